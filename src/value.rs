//! # Property Value Types
//!
//! Typed values decoded from device registers, one variant per semantic type.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::schema::SemanticType;

/// Decoded value of a single property.
///
/// # Semantic Mapping
///
/// | Variant | Semantic type | Registers |
/// |---------|---------------|-----------|
/// | Float | Float64 | 1, 2 or 4 (scaled signed integer) |
/// | UInt32/Int32 | UInt32/Int32 | 2 |
/// | UInt16/Int16 | UInt16/Int16 | 1 |
/// | Duration | Duration | 1 or 2 |
/// | Timestamp | Timestamp | 2 or 4 |
/// | Enum | EnumOrdinal | 1 or 2 |
/// | Text | FixedString | declared length |
///
/// # Example
///
/// ```rust
/// use voltage_regmap::PropertyValue;
///
/// let temp = PropertyValue::Float(21.5);
/// assert_eq!(temp.as_f64(), Some(21.5));
/// assert_eq!(temp.type_name(), "float64");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Scaled engineering value
    Float(f64),
    UInt32(u32),
    Int32(i32),
    UInt16(u16),
    Int16(i16),
    /// Elapsed time (runtime counters, intervals)
    Duration(Duration),
    /// Absolute point in time
    Timestamp(DateTime<Utc>),
    /// Raw ordinal, possibly unknown to the descriptor's labels
    Enum(u32),
    /// Fixed-length text with trailing NULs removed
    Text(String),
}

impl PropertyValue {
    /// The semantic type this value belongs to.
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Self::Float(_) => SemanticType::Float64,
            Self::UInt32(_) => SemanticType::UInt32,
            Self::Int32(_) => SemanticType::Int32,
            Self::UInt16(_) => SemanticType::UInt16,
            Self::Int16(_) => SemanticType::Int16,
            Self::Duration(_) => SemanticType::Duration,
            Self::Timestamp(_) => SemanticType::Timestamp,
            Self::Enum(_) => SemanticType::EnumOrdinal,
            Self::Text(_) => SemanticType::FixedString,
        }
    }

    /// Numeric view for reporting and comparisons.
    ///
    /// Durations are returned in seconds, timestamps as Unix seconds,
    /// text as `None`.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::UInt32(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::UInt16(v) => Some(f64::from(*v)),
            Self::Int16(v) => Some(f64::from(*v)),
            Self::Duration(d) => Some(d.as_secs_f64()),
            Self::Timestamp(t) => Some(t.timestamp() as f64),
            Self::Enum(v) => Some(f64::from(*v)),
            Self::Text(_) => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the type name as a string for logging/debugging.
    pub fn type_name(&self) -> &'static str {
        self.semantic_type().as_str()
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Duration(d) => {
                let secs = d.as_secs();
                write!(f, "{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
            }
            Self::Timestamp(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::Enum(v) => write!(f, "{}", v),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// ============================================================================
// From implementations for ergonomic construction
// ============================================================================

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::UInt32(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        Self::UInt16(v)
    }
}

impl From<i16> for PropertyValue {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<Duration> for PropertyValue {
    fn from(v: Duration) -> Self {
        Self::Duration(v)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
