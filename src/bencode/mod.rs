//! Bencode codec: the self-describing, length-prefixed textual encoding used
//! by metainfo files and tracker responses.
//!
//! A [`Value`] is a tagged variant over the four encoded kinds. Dictionaries
//! are kept in a `BTreeMap<Vec<u8>, Value>`, whose `Ord` over `Vec<u8>` is
//! exactly ascending lexicographic byte order - the canonical ordering
//! info-hash stability depends on - so encoding a decoded dictionary never
//! needs an explicit sort.
//!
//! Schema-directed binding between encoded values and user-defined record
//! shapes is provided by the [`FromValue`] / [`IntoValue`] traits in
//! [`binding`], hand-implemented per record (this crate has no reflection
//! and no derive macro for bencode - the same binding is used for both
//! directions so the round-trip law holds).
use std::collections::BTreeMap;
use thiserror::Error;

pub mod binding;
pub mod decoder;
pub mod encoder;

pub use binding::{FromValue, IntoValue};
pub use decoder::{decode, decode_bytes};
pub use encoder::{encode, encode_to_vec};

/// An encoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    ByteString(Vec<u8>),
    Integer(i64),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::ByteString(_) => "byte string",
            Value::Integer(_) => "integer",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }

    pub fn as_integer(&self) -> BencodeResult<i64> {
        match self {
            Value::Integer(i) => Ok(*i),
            other => Err(BencodeError::type_mismatch("integer", other)),
        }
    }

    pub fn as_bytes(&self) -> BencodeResult<&[u8]> {
        match self {
            Value::ByteString(bytes) => Ok(bytes),
            other => Err(BencodeError::type_mismatch("byte string", other)),
        }
    }

    pub fn as_list(&self) -> BencodeResult<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(BencodeError::type_mismatch("list", other)),
        }
    }

    pub fn as_dict(&self) -> BencodeResult<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(map) => Ok(map),
            other => Err(BencodeError::type_mismatch("dict", other)),
        }
    }

    pub fn into_dict(self) -> BencodeResult<BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(map) => Ok(map),
            other => Err(BencodeError::type_mismatch("dict", &other)),
        }
    }
}

/// Errors produced by decoding, encoding, or schema-binding a [`Value`].
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed bencode input: {0}")]
    MalformedInput(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("integer overflow while decoding")]
    IntegerOverflow,
}

impl BencodeError {
    pub(crate) fn type_mismatch(expected: &'static str, found: &Value) -> Self {
        BencodeError::TypeMismatch {
            expected,
            found: found.kind_name(),
        }
    }
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_iteration_is_canonically_ordered() {
        let mut map = BTreeMap::new();
        map.insert(b"zebra".to_vec(), Value::Integer(1));
        map.insert(b"age".to_vec(), Value::Integer(2));
        map.insert(b"name".to_vec(), Value::Integer(3));
        let keys: Vec<&[u8]> = map.keys().map(|k| k.as_slice()).collect();
        assert_eq!(keys, vec![b"age".as_slice(), b"name".as_slice(), b"zebra".as_slice()]);
    }
}
