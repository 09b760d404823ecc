//! Recursive-descent bencode decoder.
//!
//! Decoding is driven entirely by the next byte: `i` starts an integer,
//! `0`..`9` starts a length-prefixed byte string, `l` starts a list, `d`
//! starts a dict, and any other byte is `MalformedInput`.
use std::collections::BTreeMap;
use std::io::{self, Read};

use super::{BencodeError, BencodeResult, Value};

type ByteIter<R> = std::iter::Peekable<io::Bytes<R>>;

/// Decodes a single bencode value from `reader`. Trailing bytes after the
/// value are left unread.
pub fn decode<R: Read>(reader: R) -> BencodeResult<Value> {
    let mut iter = reader.bytes().peekable();
    decode_value(&mut iter)
}

/// Convenience wrapper over [`decode`] for an in-memory byte slice.
pub fn decode_bytes(data: &[u8]) -> BencodeResult<Value> {
    decode(data)
}

fn peek_byte<R: Read>(iter: &mut ByteIter<R>) -> BencodeResult<u8> {
    match iter.peek() {
        Some(Ok(byte)) => Ok(*byte),
        Some(Err(err)) => Err(BencodeError::Io(io::Error::new(err.kind(), err.to_string()))),
        None => Err(BencodeError::MalformedInput("unexpected end of input".to_string())),
    }
}

fn next_byte<R: Read>(iter: &mut ByteIter<R>) -> BencodeResult<u8> {
    iter.next()
        .ok_or_else(|| BencodeError::MalformedInput("unexpected end of input".to_string()))?
        .map_err(BencodeError::Io)
}

fn expect_byte<R: Read>(iter: &mut ByteIter<R>, expected: u8) -> BencodeResult<()> {
    let got = next_byte(iter)?;
    if got != expected {
        return Err(BencodeError::MalformedInput(format!(
            "expected '{}', found '{}'",
            expected as char, got as char
        )));
    }
    Ok(())
}

/// Reads raw bytes up to and including `delimiter`, returning everything
/// before it.
fn read_until<R: Read>(iter: &mut ByteIter<R>, delimiter: u8) -> BencodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    loop {
        let byte = next_byte(iter)?;
        if byte == delimiter {
            return Ok(buf);
        }
        buf.push(byte);
    }
}

fn decode_value<R: Read>(iter: &mut ByteIter<R>) -> BencodeResult<Value> {
    match peek_byte(iter)? {
        b'i' => decode_integer(iter).map(Value::Integer),
        b'0'..=b'9' => decode_bytestring(iter).map(Value::ByteString),
        b'l' => decode_list(iter).map(Value::List),
        b'd' => decode_dict(iter).map(Value::Dict),
        other => Err(BencodeError::MalformedInput(format!(
            "unexpected byte '{}' (0x{:02x})",
            other as char, other
        ))),
    }
}

fn decode_integer<R: Read>(iter: &mut ByteIter<R>) -> BencodeResult<i64> {
    expect_byte(iter, b'i')?;
    let digits = read_until(iter, b'e')?;
    let text = String::from_utf8(digits)
        .map_err(|_| BencodeError::MalformedInput("integer is not valid ASCII".to_string()))?;

    if text.is_empty() {
        return Err(BencodeError::MalformedInput("empty integer".to_string()));
    }
    if text == "-0" {
        return Err(BencodeError::MalformedInput("\"-0\" is not a canonical integer".to_string()));
    }
    let digits_only = text.strip_prefix('-').unwrap_or(&text);
    if digits_only.len() > 1 && digits_only.starts_with('0') {
        return Err(BencodeError::MalformedInput(
            "integer has a non-canonical leading zero".to_string(),
        ));
    }

    text.parse::<i64>().map_err(|_| BencodeError::IntegerOverflow)
}

fn decode_bytestring<R: Read>(iter: &mut ByteIter<R>) -> BencodeResult<Vec<u8>> {
    let digits = read_until(iter, b':')?;
    let text = String::from_utf8(digits)
        .map_err(|_| BencodeError::MalformedInput("string length is not valid ASCII".to_string()))?;
    let len: usize = text
        .parse()
        .map_err(|_| BencodeError::MalformedInput(format!("invalid string length '{text}'")))?;

    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
        bytes.push(next_byte(iter)?);
    }
    Ok(bytes)
}

fn decode_list<R: Read>(iter: &mut ByteIter<R>) -> BencodeResult<Vec<Value>> {
    expect_byte(iter, b'l')?;
    let mut items = Vec::new();
    loop {
        if peek_byte(iter)? == b'e' {
            next_byte(iter)?;
            return Ok(items);
        }
        items.push(decode_value(iter)?);
    }
}

fn decode_dict<R: Read>(iter: &mut ByteIter<R>) -> BencodeResult<BTreeMap<Vec<u8>, Value>> {
    expect_byte(iter, b'd')?;
    let mut map = BTreeMap::new();
    loop {
        if peek_byte(iter)? == b'e' {
            next_byte(iter)?;
            return Ok(map);
        }
        let key = decode_bytestring(iter)?;
        let value = decode_value(iter)?;
        map.insert(key, value);
    }
}
