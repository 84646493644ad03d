//! Binary reader for zero-copy access to byte slices.
//!
//! This module provides [`BinaryReader`], a cursor over a byte slice that
//! supports bounded reads and forward delimiter searches.

use crate::{Error, Result};

/// A zero-copy byte source.
///
/// The reader never copies; every read hands out a subslice of the
/// underlying buffer. Positions are absolute offsets into that buffer.
///
/// # Example
///
/// ```
/// use bytetree_common::BinaryReader;
///
/// let data = b"ab\0cd\0";
/// let mut reader = BinaryReader::new(data);
///
/// assert_eq!(reader.find(b"\0", 0), Some(2));
/// reader.advance(3)?;
/// assert_eq!(reader.read_bytes(2)?, b"cd");
/// # Ok::<(), bytetree_common::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    /// Create a new reader from a byte slice.
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Create a new reader starting at a specific position.
    #[inline]
    pub const fn new_at(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    /// Get the current position in the buffer.
    #[inline]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Get the total length of the underlying buffer.
    #[inline]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Get the number of bytes remaining to read.
    #[inline]
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Check if there are no more bytes to read.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Advance the position by a number of bytes.
    ///
    /// Moving exactly to the end is allowed; moving past it is not.
    #[inline]
    pub fn advance(&mut self, count: usize) -> Result<()> {
        let position = self.position.saturating_add(count);
        if position > self.data.len() {
            return Err(Error::SeekOutOfRange {
                position,
                len: self.data.len(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Peek at bytes without advancing the position.
    #[inline]
    pub fn peek_bytes(&self, count: usize) -> Result<&'a [u8]> {
        self.slice(self.position, count)
    }

    /// Read bytes and advance the position.
    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let bytes = self.peek_bytes(count)?;
        self.position += count;
        Ok(bytes)
    }

    /// Borrow `count` bytes starting at an absolute position.
    #[inline]
    pub fn slice(&self, start: usize, count: usize) -> Result<&'a [u8]> {
        let available = self.data.len().saturating_sub(start);
        if start > self.data.len() || available < count {
            return Err(Error::UnexpectedEof {
                needed: count,
                available,
            });
        }
        Ok(&self.data[start..start + count])
    }

    /// Read a little-endian u32.
    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Find the first occurrence of `needle` at or after `start`.
    ///
    /// Returns the absolute offset of the match.
    pub fn find(&self, needle: &[u8], start: usize) -> Option<usize> {
        if start > self.data.len() {
            return None;
        }
        let haystack = &self.data[start..];
        let found = match needle {
            [] => Some(0),
            [byte] => memchr::memchr(*byte, haystack),
            _ => memchr::memmem::find(haystack, needle),
        };
        found.map(|pos| start + pos)
    }

    /// Like [`find`](Self::find), but report a missing delimiter as an error.
    pub fn find_required(&self, needle: &[u8], start: usize) -> Result<usize> {
        self.find(needle, start)
            .ok_or_else(|| Error::DelimiterNotFound {
                delimiter: needle.to_vec(),
                start,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let data = [
            0x01u8, 0x02, 0x03, 0x04, // u32: 0x04030201
            0xAA, 0xBB,
        ];
        let mut reader = BinaryReader::new(&data);

        assert_eq!(reader.read_u32().unwrap(), 0x04030201);
        assert_eq!(reader.peek_bytes(2).unwrap(), [0xAA, 0xBB]);
        assert_eq!(reader.position(), 4);
        assert_eq!(reader.read_bytes(2).unwrap(), [0xAA, 0xBB]);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_eof_error() {
        let data = [0x01, 0x02];
        let mut reader = BinaryReader::new(&data);

        match reader.read_u32() {
            Err(Error::UnexpectedEof { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("expected eof, got {:?}", other),
        }
    }

    #[test]
    fn test_find_multibyte_from_offset() {
        let data = b"h\0i\0\0\0";
        let reader = BinaryReader::new(data);

        assert_eq!(reader.find(b"\0\0", 0), Some(3));
        assert_eq!(reader.find(b"\0\0", 4), Some(4));
        assert_eq!(reader.find(b"\0\0", 5), None);
        assert!(reader.find_required(b"\0\0", 6).is_err());
    }

    #[test]
    fn test_advance_past_end_is_rejected() {
        let data = [0u8; 4];
        let mut reader = BinaryReader::new_at(&data, 1);

        reader.advance(3).unwrap();
        assert_eq!(reader.remaining(), 0);
        match reader.advance(1) {
            Err(Error::SeekOutOfRange { position, len }) => {
                assert_eq!(position, 5);
                assert_eq!(len, 4);
            }
            other => panic!("expected seek error, got {:?}", other),
        }
        assert_eq!(reader.position(), 4);
    }
}
