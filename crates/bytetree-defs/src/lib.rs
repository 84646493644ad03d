//! Built-in format definitions and stream adapters for bytetree.
//!
//! - [`riff`] - RIFF/WAVE audio
//! - [`archive`] - a pointer-table archive with zlib-packed entries
//! - [`adapters`] - zlib and zstd [`StreamCodec`](bytetree_core::StreamCodec)s
//!
//! [`registry`] lists every definition by name:
//!
//! ```
//! let wav = bytetree_defs::find("wav")?;
//! assert_eq!(wav.extension, "wav");
//! let def = (wav.definition)()?;
//! assert_eq!(def.name, "wav");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adapters;
pub mod archive;
mod error;
pub mod riff;

pub use adapters::{ZlibAdapter, ZstdAdapter};
pub use error::{Error, Result};

use bytetree_core::DescRef;

/// A named built-in definition.
#[derive(Debug, Clone, Copy)]
pub struct Format {
    pub name: &'static str,
    pub extension: &'static str,
    pub description: &'static str,
    pub definition: fn() -> bytetree_core::Result<DescRef>,
}

static FORMATS: &[Format] = &[
    Format {
        name: "wav",
        extension: "wav",
        description: "RIFF/WAVE audio",
        definition: riff::wav_def,
    },
    Format {
        name: "archive",
        extension: "btar",
        description: "pointer-table archive with zlib-packed entries",
        definition: archive::archive_def,
    },
];

/// Every built-in definition.
pub fn registry() -> &'static [Format] {
    FORMATS
}

/// Look up a definition by name, or by file extension.
pub fn find(name: &str) -> Result<&'static Format> {
    let name = name.trim_start_matches('.').to_ascii_lowercase();
    FORMATS
        .iter()
        .find(|f| f.name == name || f.extension == name)
        .ok_or_else(|| Error::UnknownFormat {
            known: FORMATS.iter().map(|f| f.name).collect::<Vec<_>>().join(", "),
            name,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_definition_builds() {
        for format in registry() {
            let def = (format.definition)().unwrap();
            assert!(!def.name.is_empty(), "{} built an unnamed root", format.name);
        }
    }

    #[test]
    fn test_find_by_extension() {
        assert_eq!(find(".BTAR").unwrap().name, "archive");
        let err = find("png").unwrap_err();
        assert!(err.to_string().contains("wav, archive"));
    }
}
