//! # Engine Configuration
//!
//! Per-device tuning of the mapping engine.
//!
//! ## Protocol Limits
//!
//! - **Read (FC03/04)**: Max 125 registers per request
//! - **Write (FC16)**: Max 123 registers per request
//!
//! Ranges longer than the limit are split into sequential requests. Some
//! devices accept less, or need a pause between requests.

use std::time::Duration;

use crate::constants::{MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

/// Default maximum words per read request.
pub const DEFAULT_MAX_READ_WORDS: u16 = MAX_READ_REGISTERS;

/// Default maximum words per write request.
pub const DEFAULT_MAX_WRITE_WORDS: u16 = MAX_WRITE_REGISTERS;

/// Default inter-request delay in milliseconds.
pub const DEFAULT_INTER_REQUEST_DELAY_MS: u64 = 0;

/// Default deadline for one engine operation, guard wait included.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Mapping engine settings.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_regmap::EngineConfig;
///
/// let config = EngineConfig::new()
///     .with_max_read_words(50)
///     .with_inter_request_delay_ms(10)
///     .with_operation_timeout(Some(Duration::from_secs(2)));
///
/// assert_eq!(config.max_read_words, 50);
/// assert_eq!(config.read_request_count(120), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum words per read request.
    pub max_read_words: u16,
    /// Maximum words per write request.
    pub max_write_words: u16,
    /// Minimum delay between chunked requests (milliseconds).
    pub inter_request_delay_ms: u64,
    /// Deadline for a whole operation; `None` waits forever.
    pub operation_timeout: Option<Duration>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings for slow or limited devices:
    /// - 50 words per read/write
    /// - 10ms inter-request delay
    pub fn conservative() -> Self {
        Self {
            max_read_words: 50,
            max_write_words: 50,
            inter_request_delay_ms: 10,
            operation_timeout: Some(DEFAULT_OPERATION_TIMEOUT),
        }
    }

    /// Set maximum read words; zero is raised to one.
    pub fn with_max_read_words(mut self, count: u16) -> Self {
        self.max_read_words = count.max(1);
        self
    }

    /// Set maximum write words; zero is raised to one.
    pub fn with_max_write_words(mut self, count: u16) -> Self {
        self.max_write_words = count.max(1);
        self
    }

    pub fn with_inter_request_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_request_delay_ms = delay_ms;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Number of read requests needed for `total_words`.
    pub fn read_request_count(&self, total_words: u16) -> u16 {
        if total_words == 0 {
            return 0;
        }
        total_words.div_ceil(self.max_read_words.max(1))
    }

    /// Number of write requests needed for `total_words`.
    pub fn write_request_count(&self, total_words: u16) -> u16 {
        if total_words == 0 {
            return 0;
        }
        total_words.div_ceil(self.max_write_words.max(1))
    }

    pub(crate) fn inter_request_delay(&self) -> Option<Duration> {
        (self.inter_request_delay_ms > 0).then(|| Duration::from_millis(self.inter_request_delay_ms))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_read_words: DEFAULT_MAX_READ_WORDS,
            max_write_words: DEFAULT_MAX_WRITE_WORDS,
            inter_request_delay_ms: DEFAULT_INTER_REQUEST_DELAY_MS,
            operation_timeout: Some(DEFAULT_OPERATION_TIMEOUT),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_read_words, DEFAULT_MAX_READ_WORDS);
        assert_eq!(config.max_write_words, DEFAULT_MAX_WRITE_WORDS);
        assert_eq!(config.inter_request_delay_ms, DEFAULT_INTER_REQUEST_DELAY_MS);
        assert_eq!(config.operation_timeout, Some(DEFAULT_OPERATION_TIMEOUT));
        assert_eq!(config.inter_request_delay(), None);
    }

    #[test]
    fn test_conservative_config() {
        let config = EngineConfig::conservative();
        assert_eq!(config.max_read_words, 50);
        assert_eq!(config.max_write_words, 50);
        assert_eq!(config.inter_request_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_zero_limits_are_clamped() {
        let config = EngineConfig::new()
            .with_max_read_words(0)
            .with_max_write_words(0);
        assert_eq!(config.max_read_words, 1);
        assert_eq!(config.max_write_words, 1);
    }

    #[test]
    fn test_request_counts() {
        let config = EngineConfig::new()
            .with_max_read_words(50)
            .with_max_write_words(100);

        assert_eq!(config.read_request_count(0), 0);
        assert_eq!(config.read_request_count(50), 1);
        assert_eq!(config.read_request_count(51), 2);
        assert_eq!(config.read_request_count(101), 3);

        assert_eq!(config.write_request_count(100), 1);
        assert_eq!(config.write_request_count(250), 3);
    }

    #[test]
    fn test_timeout_can_be_disabled() {
        let config = EngineConfig::new().with_operation_timeout(None);
        assert_eq!(config.operation_timeout, None);
    }
}
