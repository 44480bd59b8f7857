//! Operation outcome returned to callers and stored in the snapshot.

use std::fmt;

use crate::error::{ErrorKind, RegMapError};

/// Result of a mapping-engine operation.
///
/// A good status carries no kind; a bad one carries exactly one
/// [`ErrorKind`] plus a human-readable detail.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::{ErrorKind, Status};
///
/// let status = Status::failed(ErrorKind::NotFound, "Property not found: Foo");
/// assert!(!status.is_ok());
/// assert_eq!(status.kind(), Some(ErrorKind::NotFound));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    kind: Option<ErrorKind>,
    detail: String,
}

impl Status {
    /// A good status.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A bad status of the given kind.
    pub fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            detail: detail.into(),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.kind.is_none()
    }

    /// Failure kind, `None` when good.
    #[inline]
    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    #[inline]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<&RegMapError> for Status {
    fn from(err: &RegMapError) -> Self {
        Self::failed(err.kind(), err.to_string())
    }
}

impl From<RegMapError> for Status {
    fn from(err: RegMapError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            None => f.write_str("ok"),
            Some(kind) => write!(f, "{}: {}", kind, self.detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ok() {
        let status = Status::default();
        assert!(status.is_ok());
        assert_eq!(status.kind(), None);
        assert_eq!(status.to_string(), "ok");
    }

    #[test]
    fn test_from_error() {
        let status = Status::from(RegMapError::not_writable("Serial"));
        assert_eq!(status.kind(), Some(ErrorKind::NotWritable));
        assert_eq!(status.detail(), "Property is not writable: Serial");
        assert_eq!(
            status.to_string(),
            "not_writable: Property is not writable: Serial"
        );
    }
}
