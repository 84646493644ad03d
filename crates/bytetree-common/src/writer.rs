//! Seekable byte sink backed by a growable buffer.

/// A seekable writer over an in-memory buffer.
///
/// Writes may land anywhere: seeking past the end and writing zero-fills
/// the gap, and seeking backward overwrites what is already there. This is
/// what lets a struct reserve its whole region before its fields are
/// written at their offsets inside it.
///
/// # Example
///
/// ```
/// use bytetree_common::BinaryWriter;
///
/// let mut writer = BinaryWriter::new();
/// writer.write_zeros(4);
/// writer.seek(1);
/// writer.write_bytes(&[0xAA]);
/// assert_eq!(writer.into_inner(), [0, 0xAA, 0, 0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct BinaryWriter {
    data: Vec<u8>,
    position: usize,
}

impl BinaryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current position.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Get the number of bytes written so far (the high-water mark).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Seek to an absolute position.
    #[inline]
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Write bytes at the current position and advance past them.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.position + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
    }

    /// Write `count` zero bytes.
    pub fn write_zeros(&mut self, count: usize) {
        let end = self.position + count;
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].fill(0);
        self.position = end;
    }

    /// Consume the writer and return the buffer.
    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_is_zero_filled() {
        let mut writer = BinaryWriter::new();
        writer.seek(3);
        writer.write_bytes(&[1, 2]);

        assert_eq!(writer.position(), 5);
        assert_eq!(writer.into_inner(), vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_backward_overwrite_keeps_length() {
        let mut writer = BinaryWriter::new();
        writer.write_bytes(&[9, 9, 9, 9]);
        writer.seek(1);
        writer.write_bytes(&[7]);

        assert_eq!(writer.position(), 2);
        assert_eq!(writer.len(), 4);
        assert_eq!(writer.into_inner(), vec![9, 7, 9, 9]);
    }

    #[test]
    fn test_write_zeros_clears_existing() {
        let mut writer = BinaryWriter::new();
        assert!(writer.is_empty());
        writer.write_bytes(&[5, 5, 5]);
        writer.seek(0);
        writer.write_zeros(2);

        assert_eq!(writer.into_inner(), vec![0, 0, 5]);
    }
}
