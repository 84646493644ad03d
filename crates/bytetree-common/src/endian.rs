//! Byte order markers.

use std::fmt;

/// Byte order of a field.
///
/// `Native` means "whatever the host uses" and is the marker for types
/// with no byte order of their own (single bytes, strings, blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endian {
    #[default]
    Little,
    Big,
    Native,
}

impl Endian {
    /// Byte order of the machine running this code.
    #[inline]
    pub const fn host() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    /// Resolve `Native` to the host byte order.
    #[inline]
    pub const fn resolve(self) -> Self {
        match self {
            Endian::Native => Self::host(),
            other => other,
        }
    }

    /// Check if this is big endian (after resolving `Native`).
    #[inline]
    pub fn is_big(self) -> bool {
        self.resolve() == Endian::Big
    }

    /// The single-character marker used in format strings.
    pub const fn marker(self) -> char {
        match self {
            Endian::Little => '<',
            Endian::Big => '>',
            Endian::Native => '=',
        }
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_resolves_to_host() {
        assert_eq!(Endian::Native.resolve(), Endian::host());
        assert_eq!(Endian::Native.is_big(), cfg!(target_endian = "big"));
        assert!(Endian::Big.is_big());
    }

    #[test]
    fn test_display_markers() {
        assert_eq!(format!("{}{}{}", Endian::Little, Endian::Big, Endian::Native), "<>=");
    }
}
