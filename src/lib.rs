//! # Voltage RegMap - Device Register Mapping Engine
//!
//! Typed property schemas over Modbus-style register devices: declare which
//! named properties a device exposes and where they live, then read and
//! write them as typed values through a single-flight engine.
//!
//! ## Features
//!
//! - **Declarative Schemas**: name, semantic type, offset, length, rational scale,
//!   access mode and optional block membership per property
//! - **Exact Scaling**: rational scales, so `215 × 1/10` decodes to exactly `21.5`
//! - **Block Reads**: one bulk request per block, every member decoded from the buffer
//! - **Single-Flight Access**: operations on one device never overlap
//! - **Closed Error Taxonomy**: every failure surfaces as one [`ErrorKind`] in a [`Status`]
//! - **Cancellation**: caller tokens and deadlines, with guaranteed disconnect
//!
//! ## Semantic Types
//!
//! | Type | Registers | Value |
//! |------|-----------|-------|
//! | Float64 | 1, 2, 4 | scaled signed integer |
//! | UInt32 / Int32 | 2 | integer |
//! | UInt16 / Int16 | 1 | integer |
//! | Duration | 1, 2 | seconds or minutes |
//! | Timestamp | 2, 4 | seconds since a device epoch |
//! | EnumOrdinal | 1, 2 | ordinal, optional labels |
//! | FixedString | n | UTF-8 text |
//!
//! ## Quick Start
//!
//! ```rust
//! use voltage_regmap::{
//!     ErrorKind, MappingEngine, MemoryTransport, PropertyDescriptor, RegisterBank, Scale,
//!     Schema, SemanticType,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let schema = Schema::builder("boiler")
//!         .property(
//!             PropertyDescriptor::new("Setpoint", SemanticType::Float64, 200)
//!                 .with_length(1)
//!                 .with_scale(Scale::per(10).unwrap())
//!                 .read_write(),
//!         )
//!         .build()
//!         .unwrap();
//!
//!     let bank = RegisterBank::new();
//!     let engine = MappingEngine::new(schema, MemoryTransport::new(bank.clone()));
//!
//!     // Write a wire-format value
//!     assert!(engine.write_one("Setpoint", "21.5").await.is_ok());
//!     assert_eq!(bank.words(200, 1), vec![215]);
//!
//!     // Parse failures never reach the device
//!     let status = engine.write_one("Setpoint", "abc").await;
//!     assert_eq!(status.kind(), Some(ErrorKind::EncodingError));
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and the caller-facing error taxonomy
pub mod error;

/// Operation status
pub mod status;

/// Protocol constants and device exception codes
pub mod constants;

/// Device transport contract and in-memory reference device
pub mod transport;

/// Engine configuration
pub mod config;

// ============================================================================
// Mapping modules
// ============================================================================

/// Word order and register packing
pub mod bytes;

/// Rational scale factors
pub mod scale;

/// Typed property values
pub mod value;

/// Property descriptors, blocks and schemas
pub mod schema;

/// Conversions between registers, values and wire strings
pub mod codec;

/// Snapshot of current device values
pub mod snapshot;

/// Single-flight mapping engine
pub mod engine;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_regmap::tokio) ===
pub use tokio;
pub use tokio_util::sync::CancellationToken;

// === Engine API ===
pub use engine::{MappingEngine, Request};
pub use snapshot::{Entry, Snapshot};
pub use status::Status;

// === Error handling ===
pub use error::{ErrorKind, RegMapError, RegMapResult, TransportError, TransportResult};

// === Schema ===
pub use schema::{Access, Block, PropertyDescriptor, Schema, SchemaBuilder, SemanticType, TimeUnit};
pub use scale::Scale;
pub use value::PropertyValue;

// === Codec ===
pub use crate::bytes::{u64_to_words, words_to_u64, WordOrder};
pub use codec::{decode, encode, format_wire, parse_wire};

// === Transport ===
pub use transport::{DeviceTransport, MemoryTransport, RegisterBank, TransportStats};

// === Configuration ===
pub use config::EngineConfig;
pub use constants::{MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

#[doc(hidden)]
pub use config::{
    DEFAULT_INTER_REQUEST_DELAY_MS, DEFAULT_MAX_READ_WORDS, DEFAULT_MAX_WRITE_WORDS,
    DEFAULT_OPERATION_TIMEOUT,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage RegMap v{} - device register mapping engine", VERSION)
}
