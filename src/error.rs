//! Error types and the closed error taxonomy reported to callers
//!
//! Two layers:
//! - [`TransportError`]: what the device connection can fail with.
//! - [`RegMapError`]: everything the schema, codec and engine can fail with,
//!   each variant mapping to exactly one [`ErrorKind`].
//!
//! Engine operations never return these directly; they fold them into a
//! [`Status`](crate::status::Status).

use std::fmt;

use thiserror::Error;

use crate::constants::exception_name;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for schema, codec and engine internals.
pub type RegMapResult<T> = Result<T, RegMapError>;

/// Closed set of failure kinds visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Property name unknown to the schema
    NotFound,
    /// Property is write-only
    NotReadable,
    /// Property is read-only
    NotWritable,
    /// The device connection could not be opened
    NotConnected,
    /// Argument or address outside the valid range
    OutOfRange,
    /// Parse, format or scale conversion failure
    EncodingError,
    /// I/O or protocol-level transport failure
    CommunicationError,
    /// Device-side rejection (slave exception)
    DeviceFailure,
    /// Anything unexpected, including cancellation
    InternalError,
}

impl ErrorKind {
    /// Stable identifier for logs and upstream payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::NotReadable => "not_readable",
            Self::NotWritable => "not_writable",
            Self::NotConnected => "not_connected",
            Self::OutOfRange => "out_of_range",
            Self::EncodingError => "encoding_error",
            Self::CommunicationError => "communication_error",
            Self::DeviceFailure => "device_failure",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by a [`DeviceTransport`](crate::transport::DeviceTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("Device rejected request (exception 0x{code:02X}): {message}")]
    DeviceRejected { code: u8, message: String },
}

impl TransportError {
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Device exception response; the message is derived from the code.
    pub fn rejected(code: u8) -> Self {
        Self::DeviceRejected {
            code,
            message: exception_name(code).to_string(),
        }
    }

    /// True when the device itself refused the request.
    pub fn is_device_rejection(&self) -> bool {
        matches!(self, Self::DeviceRejected { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            return Self::timeout(err.to_string(), 0);
        }
        Self::io(err.to_string())
    }
}

/// Failures raised by the schema, codec and engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegMapError {
    #[error("Property not found: {name}")]
    NotFound { name: String },

    #[error("Property is not readable: {name}")]
    NotReadable { name: String },

    #[error("Property is not writable: {name}")]
    NotWritable { name: String },

    #[error("Device not connected: {source}")]
    NotConnected { source: TransportError },

    #[error("Out of range: {message}")]
    OutOfRange { message: String },

    #[error("Encoding error: {message}")]
    Encoding { message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid schema: {message}")]
    Schema { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation exceeded deadline of {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RegMapError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn not_readable(name: impl Into<String>) -> Self {
        Self::NotReadable { name: name.into() }
    }

    pub fn not_writable(name: impl Into<String>) -> Self {
        Self::NotWritable { name: name.into() }
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The taxonomy entry this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotReadable { .. } => ErrorKind::NotReadable,
            Self::NotWritable { .. } => ErrorKind::NotWritable,
            Self::NotConnected { .. } => ErrorKind::NotConnected,
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::Encoding { .. } => ErrorKind::EncodingError,
            Self::Transport(err) if err.is_device_rejection() => ErrorKind::DeviceFailure,
            Self::Transport(_) | Self::DeadlineExceeded { .. } => ErrorKind::CommunicationError,
            Self::Schema { .. } | Self::Cancelled | Self::Internal { .. } => {
                ErrorKind::InternalError
            }
        }
    }
}
