//! Runtime values stored in block slots.

use std::fmt;

use crate::block::NodeId;

/// A value held in one slot of a block.
///
/// Leaf fields store their decoded value inline. Composite fields (and
/// enum/bool data blocks) store a [`Value::Block`] handle into the owning
/// [`BlockTree`](crate::BlockTree).
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// Slot not yet populated.
    #[default]
    None,
    Int(i128),
    Float(f64),
    /// Seconds since the UNIX epoch.
    Timestamp(f64),
    Str(String),
    Bytes(Vec<u8>),
    UInts(Vec<u64>),
    SInts(Vec<i64>),
    Floats(Vec<f64>),
    Block(NodeId),
}

impl Value {
    /// Get the integer payload, if this is an integer.
    #[inline]
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the integer payload as a `usize`, if it is one and fits.
    #[inline]
    pub fn as_usize(&self) -> Option<usize> {
        self.as_int().and_then(|v| usize::try_from(v).ok())
    }

    /// Get the float payload (timestamps included).
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the node handle, if this slot holds a block.
    #[inline]
    pub fn as_block(&self) -> Option<NodeId> {
        match self {
            Value::Block(id) => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn is_block(&self) -> bool {
        matches!(self, Value::Block(_))
    }

    /// Number of elements for sequence-like values.
    pub fn len(&self) -> usize {
        match self {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::UInts(v) => v.len(),
            Value::SInts(v) => v.len(),
            Value::Floats(v) => v.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Timestamp(_) => "timestamp",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::UInts(_) => "uint array",
            Value::SInts(_) => "sint array",
            Value::Floats(_) => "float array",
            Value::Block(_) => "block",
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v as i128)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, i128, u8, u16, u32, u64, usize);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Value::Block(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", format_timestamp(*v)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => {
                let shown = b.len().min(16);
                write!(f, "b\"")?;
                for byte in &b[..shown] {
                    write!(f, "{:02x}", byte)?;
                }
                if b.len() > shown {
                    write!(f, "...")?;
                }
                write!(f, "\" ({} bytes)", b.len())
            }
            Value::UInts(v) => write!(f, "{:?}", v),
            Value::SInts(v) => write!(f, "{:?}", v),
            Value::Floats(v) => write!(f, "{:?}", v),
            Value::Block(id) => write!(f, "<block {}>", id.index()),
        }
    }
}

/// Key selecting a case of a switch or union.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CaseKey {
    Int(i128),
    Str(String),
    Bytes(Vec<u8>),
}

impl CaseKey {
    /// Convert a plain (non-block) value into a case key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(CaseKey::Int(*v)),
            Value::Str(s) => Some(CaseKey::Str(s.clone())),
            Value::Bytes(b) => Some(CaseKey::Bytes(b.clone())),
            _ => None,
        }
    }
}

impl From<&str> for CaseKey {
    fn from(v: &str) -> Self {
        CaseKey::Str(v.to_owned())
    }
}

impl From<String> for CaseKey {
    fn from(v: String) -> Self {
        CaseKey::Str(v)
    }
}

impl From<i64> for CaseKey {
    fn from(v: i64) -> Self {
        CaseKey::Int(v as i128)
    }
}

impl From<i32> for CaseKey {
    fn from(v: i32) -> Self {
        CaseKey::Int(v as i128)
    }
}

impl From<u32> for CaseKey {
    fn from(v: u32) -> Self {
        CaseKey::Int(v as i128)
    }
}

impl From<&[u8]> for CaseKey {
    fn from(v: &[u8]) -> Self {
        CaseKey::Bytes(v.to_vec())
    }
}

impl fmt::Display for CaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseKey::Int(v) => write!(f, "{}", v),
            CaseKey::Str(s) => write!(f, "{:?}", s),
            CaseKey::Bytes(b) => write!(f, "{:02x?}", b),
        }
    }
}

/// Render seconds since the UNIX epoch as a UTC calendar date.
pub fn format_timestamp(secs: f64) -> String {
    let whole = secs.floor() as i64;
    let days = whole.div_euclid(86_400);
    let rem = whole.rem_euclid(86_400);

    // Civil-from-days over the proleptic Gregorian calendar.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp_epoch_and_leap_day() {
        assert_eq!(format_timestamp(0.0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(951_782_400.0), "2000-02-29 00:00:00 UTC");
        assert_eq!(format_timestamp(-1.0), "1969-12-31 23:59:59 UTC");
    }

    #[test]
    fn test_case_key_from_value() {
        assert_eq!(CaseKey::from_value(&Value::Int(3)), Some(CaseKey::Int(3)));
        assert_eq!(
            CaseKey::from_value(&Value::from("fmt ")),
            Some(CaseKey::from("fmt "))
        );
        assert_eq!(CaseKey::from_value(&Value::Float(1.0)), None);
    }

    #[test]
    fn test_as_usize_rejects_negative() {
        assert_eq!(Value::Int(-1).as_usize(), None);
        assert_eq!(Value::Int(12).as_usize(), Some(12));
    }
}
