//! Variable-length integers and length-prefixed binary blocks.
//!
//! A search index row is a concatenation of blocks, each one a varint length
//! followed by that many bytes. Rows can be appended to without decoding
//! them and iterated without copying.

use std::io::{Read, Write};

use byteorder::ReadBytesExt;

use crate::error::{Result, SealdexError};

/// Encode a u64 value using variable-length encoding.
///
/// Uses 7 bits per byte with a continuation bit.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(10);
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80;
        }

        bytes.push(byte);

        if val == 0 {
            break;
        }
    }

    bytes
}

/// Decode a u64 value, returning it with the number of bytes consumed.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 {
            return Err(SealdexError::encoding("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(SealdexError::encoding("Incomplete VarInt"))
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let bytes = encode_u64(value);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 64 {
            return Err(SealdexError::encoding("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

/// Append `block` to `row` as a length-prefixed block.
pub fn append_binary_block(row: &mut Vec<u8>, block: &[u8]) {
    row.extend_from_slice(&encode_u64(block.len() as u64));
    row.extend_from_slice(block);
}

/// Iterator over the blocks of a row.
#[derive(Debug, Clone)]
pub struct BinaryBlocks<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for BinaryBlocks<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let (len, header) = match decode_u64(&self.data[self.offset..]) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.offset = self.data.len();
                return Some(Err(e));
            }
        };
        let start = self.offset + header;
        let end = start.saturating_add(len as usize);
        if end > self.data.len() {
            self.offset = self.data.len();
            return Some(Err(SealdexError::encoding(format!(
                "Block of {len} bytes exceeds row of {} bytes",
                self.data.len()
            ))));
        }

        self.offset = end;
        Some(Ok(&self.data[start..end]))
    }
}

/// Iterate the length-prefixed blocks of `row`.
pub fn iterate_binary_blocks(row: &[u8]) -> BinaryBlocks<'_> {
    BinaryBlocks {
        data: row,
        offset: 0,
    }
}

/// Rebuild `row` keeping only the blocks for which `keep` returns true.
///
/// Returns the new row and the number of blocks removed.
pub fn retain_binary_blocks<F>(row: &[u8], mut keep: F) -> Result<(Vec<u8>, usize)>
where
    F: FnMut(&[u8]) -> bool,
{
    let mut retained = Vec::with_capacity(row.len());
    let mut removed = 0;
    for block in iterate_binary_blocks(row) {
        let block = block?;
        if keep(block) {
            append_binary_block(&mut retained, block);
        } else {
            removed += 1;
        }
    }
    Ok((retained, removed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_encode_decode_u64() {
        let test_values = [0, 1, 127, 128, 255, 256, 16383, 16384, u64::MAX];

        for &value in &test_values {
            let encoded = encode_u64(value);
            let (decoded, bytes_read) = decode_u64(&encoded).unwrap();

            assert_eq!(value, decoded);
            assert_eq!(encoded.len(), bytes_read);
        }
    }

    #[test]
    fn test_write_read_u64() {
        let mut buffer = Vec::new();
        let value = 123456789012345u64;

        let bytes_written = write_u64(&mut buffer, value).unwrap();
        assert_eq!(bytes_written, buffer.len());

        let mut cursor = Cursor::new(buffer);
        assert_eq!(read_u64(&mut cursor).unwrap(), value);
    }

    #[test]
    fn test_incomplete_varint() {
        assert!(decode_u64(&[0x80]).is_err());
    }

    #[test]
    fn test_blocks_in_order() {
        let mut row = Vec::new();
        append_binary_block(&mut row, b"first");
        append_binary_block(&mut row, &[]);
        append_binary_block(&mut row, &vec![7u8; 300]);

        let blocks: Vec<&[u8]> = iterate_binary_blocks(&row)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], b"first");
        assert!(blocks[1].is_empty());
        assert_eq!(blocks[2].len(), 300);
    }

    #[test]
    fn test_truncated_block_is_an_error() {
        let mut row = Vec::new();
        append_binary_block(&mut row, b"payload");
        row.truncate(row.len() - 2);

        let blocks: Vec<Result<&[u8]>> = iterate_binary_blocks(&row).collect();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_err());
    }

    #[test]
    fn test_retain_blocks() {
        let mut row = Vec::new();
        for block in [b"aa".as_slice(), b"bb", b"ab"] {
            append_binary_block(&mut row, block);
        }

        let (retained, removed) = retain_binary_blocks(&row, |b| b[0] == b'a').unwrap();
        assert_eq!(removed, 1);
        let blocks: Vec<&[u8]> = iterate_binary_blocks(&retained)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(blocks, vec![b"aa".as_slice(), b"ab".as_slice()]);
    }
}
