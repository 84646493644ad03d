//! Compressed sub-stream adapters.
//!
//! Both adapters decompress starting at the field's position and report how
//! many compressed bytes the stream used, so parsing continues right after
//! it. Encoding recompresses the serialized inner structure.

use std::io::{Read, Write};

use bytetree_core::{Error, FieldContext, Result, StreamCodec};
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::trace;

fn input<'r>(name: &str, raw: &'r [u8], start: usize) -> Result<&'r [u8]> {
    raw.get(start..).ok_or_else(|| {
        Error::Adapter(format!(
            "{} stream starts at {} past the end of {} bytes",
            name,
            start,
            raw.len()
        ))
    })
}

/// A zlib (RFC 1950) stream.
#[derive(Debug, Clone, Copy)]
pub struct ZlibAdapter {
    level: u32,
}

impl ZlibAdapter {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Default for ZlibAdapter {
    fn default() -> Self {
        Self::new(6)
    }
}

impl StreamCodec for ZlibAdapter {
    fn name(&self) -> &str {
        "zlib"
    }

    fn decode(&self, _ctx: &FieldContext<'_>, raw: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
        let mut decoder = ZlibDecoder::new(input(self.name(), raw, start)?);
        let mut inner = Vec::new();
        decoder
            .read_to_end(&mut inner)
            .map_err(|e| Error::Adapter(format!("zlib decompression failed at {}: {}", start, e)))?;
        let consumed = usize::try_from(decoder.total_in())
            .map_err(|_| Error::Adapter("zlib stream length overflows usize".to_owned()))?;
        trace!(start, consumed, inflated = inner.len(), "zlib stream");
        Ok((inner, consumed))
    }

    fn encode(&self, _ctx: &FieldContext<'_>, inner: Vec<u8>) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(&inner)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::Adapter(format!("zlib compression failed: {}", e)))
    }
}

/// A single Zstandard frame.
#[derive(Debug, Clone, Copy)]
pub struct ZstdAdapter {
    level: i32,
}

impl ZstdAdapter {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdAdapter {
    fn default() -> Self {
        Self::new(3)
    }
}

impl StreamCodec for ZstdAdapter {
    fn name(&self) -> &str {
        "zstd"
    }

    fn decode(&self, _ctx: &FieldContext<'_>, raw: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
        let data = input(self.name(), raw, start)?;
        let consumed = zstd::zstd_safe::find_frame_compressed_size(data).map_err(|code| {
            Error::Adapter(format!(
                "no complete zstd frame at {}: {}",
                start,
                zstd::zstd_safe::get_error_name(code)
            ))
        })?;
        let inner = zstd::decode_all(&data[..consumed])
            .map_err(|e| Error::Adapter(format!("zstd decompression failed at {}: {}", start, e)))?;
        trace!(start, consumed, inflated = inner.len(), "zstd frame");
        Ok((inner, consumed))
    }

    fn encode(&self, _ctx: &FieldContext<'_>, inner: Vec<u8>) -> Result<Vec<u8>> {
        zstd::encode_all(&inner[..], self.level)
            .map_err(|e| Error::Adapter(format!("zstd compression failed: {}", e)))
    }
}
