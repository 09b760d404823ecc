//! Schema-directed binding between [`Value`] and user-defined record shapes.
//!
//! Rust has no runtime reflection, so unlike the Go original this binds by
//! hand-written trait impls rather than struct-tag introspection: each
//! record type implements [`FromValue`] / [`IntoValue`] itself, matching its
//! fields against fixed byte-string keys. The contract that matters is that
//! the *same* key set is used in both directions, so marshaling a decoded
//! value and re-decoding it is lossless for canonical input.
use std::collections::BTreeMap;

use super::{BencodeError, BencodeResult, Value};

/// Decodes `Self` out of an encoded [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> BencodeResult<Self>;
}

/// Encodes `Self` into a [`Value`] suitable for canonical re-encoding.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> BencodeResult<Self> {
        value.as_integer()
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> BencodeResult<Self> {
        let bytes = value.as_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|err| BencodeError::MalformedInput(format!("byte string is not valid UTF-8: {err}")))
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::ByteString(self.into_bytes())
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> BencodeResult<Self> {
        value.as_bytes().map(|bytes| bytes.to_vec())
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self) -> Value {
        Value::ByteString(self)
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    /// Decodes every element with the same declared kind; the first element
    /// whose kind doesn't match `T` surfaces as a `TypeMismatch`, which is
    /// how a mixed-kind sequence is rejected.
    fn from_value(value: &Value) -> BencodeResult<Self> {
        value.as_list()?.iter().map(T::from_value).collect()
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

/// Looks up `key` in a decoded dict and binds it to `T`, leaving the field
/// at its zero value (`None`) when the key is absent.
pub fn field<T: FromValue>(dict: &BTreeMap<Vec<u8>, Value>, key: &[u8]) -> BencodeResult<Option<T>> {
    dict.get(key).map(T::from_value).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::{decode_bytes, encode_to_vec};

    /// Record used only to exercise schema-directed binding end to end; the
    /// field order here is irrelevant to the wire form since the encoded
    /// dict always sorts its keys.
    #[derive(Debug, PartialEq)]
    struct User {
        name: String,
        age: i64,
    }

    impl FromValue for User {
        fn from_value(value: &Value) -> BencodeResult<Self> {
            let dict = value.as_dict()?;
            let name = field::<String>(dict, b"name")?.unwrap_or_default();
            let age = field::<i64>(dict, b"age")?.unwrap_or_default();
            Ok(User { name, age })
        }
    }

    impl IntoValue for User {
        fn into_value(self) -> Value {
            let mut map = BTreeMap::new();
            map.insert(b"age".to_vec(), self.age.into_value());
            map.insert(b"name".to_vec(), self.name.into_value());
            Value::Dict(map)
        }
    }

    #[test]
    fn decodes_record_and_ignores_unknown_keys() {
        let value = decode_bytes(b"d3:agei20e4:name4:Ryan5:extra2:hie").unwrap();
        let user = User::from_value(&value).unwrap();
        assert_eq!(user, User { name: "Ryan".to_string(), age: 20 });
    }

    #[test]
    fn missing_field_decodes_to_zero_value() {
        let value = decode_bytes(b"d4:name4:Ryane").unwrap();
        let user = User::from_value(&value).unwrap();
        assert_eq!(user, User { name: "Ryan".to_string(), age: 0 });
    }

    #[test]
    fn marshal_then_unmarshal_round_trips_canonically() {
        let user = User { name: "Ryan".to_string(), age: 20 };
        let encoded = encode_to_vec(&user.into_value()).unwrap();
        assert_eq!(encoded, b"d3:agei20e4:name4:Ryane");

        let decoded = User::from_value(&decode_bytes(&encoded).unwrap()).unwrap();
        assert_eq!(decoded, User { name: "Ryan".to_string(), age: 20 });
    }

    #[test]
    fn mixed_kind_sequence_is_rejected() {
        let value = decode_bytes(b"li1e4:twoe").unwrap();
        let result = Vec::<i64>::from_value(&value);
        assert!(matches!(result, Err(BencodeError::TypeMismatch { .. })));
    }
}
