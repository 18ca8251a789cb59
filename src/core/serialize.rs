// Canonical binary encoding for hashed and persisted structures
//
// Integers are little-endian, collections are prefixed with a VarInt
// count. Any change to field order changes every txid and block hash.

use std::io::{self, Read};
use thiserror::Error;

/// Errors raised while decoding the canonical binary form
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unexpected end of data: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported locking script: {0}")]
    UnknownScript(String),
    #[error("length {0} exceeds remaining input")]
    LengthOverflow(u64),
    #[error("{0} trailing bytes after object")]
    TrailingBytes(usize),
}

/// Trait for types with a canonical byte encoding
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self, DecodeError>
    where
        Self: Sized;
}

/// Upper bound for any length prefix we are willing to allocate for
const MAX_VAR_LEN: u64 = 32 * 1024 * 1024;

/// Write a variable-length integer (VarInt)
/// Bitcoin uses a compact format for integers
pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffffffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let first = read_u8(reader)?;

    match first {
        0..=0xfc => Ok(first as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => Ok(read_u32(reader)? as u64),
        0xff => read_u64(reader),
    }
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, DecodeError> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_LEN {
        return Err(DecodeError::LengthOverflow(len));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Read a VarInt element count, bounded like any other length prefix
pub fn read_count<R: Read + ?Sized>(reader: &mut R) -> Result<usize, DecodeError> {
    let count = read_varint(reader)?;
    if count > MAX_VAR_LEN {
        return Err(DecodeError::LengthOverflow(count));
    }
    Ok(count as usize)
}

pub fn read_u8<R: Read + ?Sized>(reader: &mut R) -> io::Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn read_array<const N: usize, R: Read + ?Sized>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_varint_small() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100);
        assert_eq!(buf, vec![100]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_varint(&mut cursor).unwrap(), 100);
    }

    #[test]
    fn test_varint_widths() {
        for (value, len) in [(0xfcu64, 1), (1000, 3), (100_000, 5), (u64::MAX, 9)] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(buf.len(), len, "width of {value}");

            let mut cursor = Cursor::new(buf);
            assert_eq!(read_varint(&mut cursor).unwrap(), value);
        }
    }

    #[test]
    fn test_var_bytes() {
        let data = b"hello world";
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, data);

        let mut cursor = Cursor::new(buf);
        let decoded = read_var_bytes(&mut cursor).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_var_bytes_truncated() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 10);
        buf.extend_from_slice(&[1, 2, 3]);

        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_var_bytes(&mut cursor), Err(DecodeError::Io(_))));
    }

    #[test]
    fn test_var_bytes_oversized_prefix() {
        let mut buf = Vec::new();
        write_varint(&mut buf, u64::MAX);

        let mut cursor = Cursor::new(buf);
        assert!(matches!(
            read_var_bytes(&mut cursor),
            Err(DecodeError::LengthOverflow(_))
        ));
    }
}
