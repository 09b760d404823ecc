//! Bencode encoder. Dictionaries are backed by a `BTreeMap<Vec<u8>, Value>`,
//! so iterating `map.iter()` already yields keys in ascending lexicographic
//! byte order - the canonical form the round-trip law (and `info_hash`
//! stability) depends on.
use std::io::Write;

use super::{BencodeResult, Value};

/// Encodes `value` into `writer`.
pub fn encode<W: Write>(writer: &mut W, value: &Value) -> BencodeResult<()> {
    match value {
        Value::ByteString(bytes) => encode_bytestring(writer, bytes),
        Value::Integer(i) => encode_integer(writer, *i),
        Value::List(items) => encode_list(writer, items),
        Value::Dict(map) => encode_dict(writer, map),
    }
}

/// Encodes `value` into a freshly allocated buffer.
pub fn encode_to_vec(value: &Value) -> BencodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    encode(&mut buf, value)?;
    Ok(buf)
}

fn encode_bytestring<W: Write>(writer: &mut W, bytes: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", bytes.len())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn encode_integer<W: Write>(writer: &mut W, value: i64) -> BencodeResult<()> {
    write!(writer, "i{value}e")?;
    Ok(())
}

fn encode_list<W: Write>(writer: &mut W, items: &[Value]) -> BencodeResult<()> {
    writer.write_all(b"l")?;
    for item in items {
        encode(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

fn encode_dict<W: Write>(
    writer: &mut W,
    map: &std::collections::BTreeMap<Vec<u8>, Value>,
) -> BencodeResult<()> {
    writer.write_all(b"d")?;
    for (key, value) in map {
        encode_bytestring(writer, key)?;
        encode(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}
