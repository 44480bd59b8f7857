//! Device transport contract and an in-memory reference device
//!
//! The mapping engine only talks to a device through [`DeviceTransport`]:
//! open a session, move raw register words, close the session. Framing,
//! CRCs and sockets are the implementor's business.
//!
//! [`MemoryTransport`] is a complete implementation backed by a shared
//! [`RegisterBank`]. The bank handle stays with the caller so words can be
//! seeded, faults injected and session counts inspected while an engine owns
//! the transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use crate::bytes::{bytes_to_words, u64_to_words, words_to_bytes, words_to_u64, WordOrder};
use crate::constants::{
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, MAX_READ_REGISTERS,
    MAX_WRITE_REGISTERS, REGISTER_SPACE,
};
use crate::error::{TransportError, TransportResult};

// ============================================================================
// Transport Contract
// ============================================================================

/// Word-oriented connection to one device.
///
/// Implementations hold at most one open session. The engine calls
/// `connect`, then any number of reads/writes, then `disconnect`, and never
/// shares a transport between concurrent operations.
///
/// The typed helpers are provided on top of `read_words`/`write_words` using
/// high-word-first layout.
pub trait DeviceTransport: Send {
    /// Open a session.
    fn connect(&mut self) -> impl std::future::Future<Output = TransportResult<()>> + Send;

    /// Close the session. Closing an already closed transport is not an error.
    fn disconnect(&mut self) -> impl std::future::Future<Output = TransportResult<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Read `count` consecutive registers starting at `offset`.
    fn read_words(
        &mut self,
        offset: u16,
        count: u16,
    ) -> impl std::future::Future<Output = TransportResult<Vec<u16>>> + Send;

    /// Write consecutive registers starting at `offset`.
    fn write_words(
        &mut self,
        offset: u16,
        values: &[u16],
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send;

    // ========================================================================
    // Typed helpers
    // ========================================================================

    /// `read_words` that fails unless exactly `count` words come back.
    fn read_exact_words(
        &mut self,
        offset: u16,
        count: u16,
    ) -> impl std::future::Future<Output = TransportResult<Vec<u16>>> + Send
    where
        Self: Sized,
    {
        async move {
            let words = self.read_words(offset, count).await?;
            if words.len() != usize::from(count) {
                return Err(TransportError::protocol(format!(
                    "requested {} registers at {}, received {}",
                    count,
                    offset,
                    words.len()
                )));
            }
            Ok(words)
        }
    }

    fn read_bool(
        &mut self,
        offset: u16,
    ) -> impl std::future::Future<Output = TransportResult<bool>> + Send
    where
        Self: Sized,
    {
        async move { Ok(self.read_exact_words(offset, 1).await?[0] != 0) }
    }

    fn read_u16(
        &mut self,
        offset: u16,
    ) -> impl std::future::Future<Output = TransportResult<u16>> + Send
    where
        Self: Sized,
    {
        async move { Ok(self.read_exact_words(offset, 1).await?[0]) }
    }

    fn read_i16(
        &mut self,
        offset: u16,
    ) -> impl std::future::Future<Output = TransportResult<i16>> + Send
    where
        Self: Sized,
    {
        async move { Ok(self.read_u16(offset).await? as i16) }
    }

    fn read_u32(
        &mut self,
        offset: u16,
    ) -> impl std::future::Future<Output = TransportResult<u32>> + Send
    where
        Self: Sized,
    {
        async move {
            let words = self.read_exact_words(offset, 2).await?;
            Ok(words_to_u64(&words, WordOrder::HighFirst) as u32)
        }
    }

    fn read_i32(
        &mut self,
        offset: u16,
    ) -> impl std::future::Future<Output = TransportResult<i32>> + Send
    where
        Self: Sized,
    {
        async move { Ok(self.read_u32(offset).await? as i32) }
    }

    fn read_f32(
        &mut self,
        offset: u16,
    ) -> impl std::future::Future<Output = TransportResult<f32>> + Send
    where
        Self: Sized,
    {
        async move { Ok(f32::from_bits(self.read_u32(offset).await?)) }
    }

    fn read_f64(
        &mut self,
        offset: u16,
    ) -> impl std::future::Future<Output = TransportResult<f64>> + Send
    where
        Self: Sized,
    {
        async move {
            let words = self.read_exact_words(offset, 4).await?;
            Ok(f64::from_bits(words_to_u64(&words, WordOrder::HighFirst)))
        }
    }

    /// Read `count` registers as text, dropping trailing NULs.
    fn read_string(
        &mut self,
        offset: u16,
        count: u16,
    ) -> impl std::future::Future<Output = TransportResult<String>> + Send
    where
        Self: Sized,
    {
        async move {
            let words = self.read_exact_words(offset, count).await?;
            let bytes = words_to_bytes(&words);
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            String::from_utf8(bytes[..end].to_vec())
                .map_err(|e| TransportError::protocol(format!("invalid UTF-8 text: {}", e)))
        }
    }

    fn write_bool(
        &mut self,
        offset: u16,
        value: bool,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send
    where
        Self: Sized,
    {
        async move { self.write_words(offset, &[u16::from(value)]).await }
    }

    fn write_u16(
        &mut self,
        offset: u16,
        value: u16,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send
    where
        Self: Sized,
    {
        async move { self.write_words(offset, &[value]).await }
    }

    fn write_i16(
        &mut self,
        offset: u16,
        value: i16,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send
    where
        Self: Sized,
    {
        async move { self.write_words(offset, &[value as u16]).await }
    }

    fn write_u32(
        &mut self,
        offset: u16,
        value: u32,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send
    where
        Self: Sized,
    {
        async move {
            let words = u64_to_words(u64::from(value), 2, WordOrder::HighFirst);
            self.write_words(offset, &words).await
        }
    }

    fn write_i32(
        &mut self,
        offset: u16,
        value: i32,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send
    where
        Self: Sized,
    {
        async move { self.write_u32(offset, value as u32).await }
    }

    fn write_f32(
        &mut self,
        offset: u16,
        value: f32,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send
    where
        Self: Sized,
    {
        async move { self.write_u32(offset, value.to_bits()).await }
    }

    fn write_f64(
        &mut self,
        offset: u16,
        value: f64,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send
    where
        Self: Sized,
    {
        async move {
            let words = u64_to_words(value.to_bits(), 4, WordOrder::HighFirst);
            self.write_words(offset, &words).await
        }
    }

    /// Write text into exactly `count` registers, NUL padded.
    fn write_string(
        &mut self,
        offset: u16,
        count: u16,
        value: &str,
    ) -> impl std::future::Future<Output = TransportResult<()>> + Send
    where
        Self: Sized,
    {
        async move {
            let words = bytes_to_words(value.as_bytes(), usize::from(count)).ok_or_else(|| {
                TransportError::protocol(format!(
                    "text of {} bytes does not fit {} registers",
                    value.len(),
                    count
                ))
            })?;
            self.write_words(offset, &words).await
        }
    }
}

// ============================================================================
// Register Bank
// ============================================================================

/// Session and traffic counters of a [`RegisterBank`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub connects: u64,
    pub disconnects: u64,
    pub reads: u64,
    pub writes: u64,
    pub words_read: u64,
    pub words_written: u64,
    /// Sessions currently open
    pub open_sessions: u64,
    /// Highest number of sessions ever open at the same time
    pub max_open_sessions: u64,
}

#[derive(Debug, Default)]
struct BankState {
    words: HashMap<u16, u16>,
    faults: HashMap<u16, TransportError>,
    refusal: Option<TransportError>,
    latency: Duration,
    stats: TransportStats,
}

/// Shared register memory of a simulated device.
///
/// Unset registers read as zero. Clones share the same memory.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::RegisterBank;
///
/// let bank = RegisterBank::new();
/// bank.set_words(100, &[0x0000, 0x00D7]);
/// assert_eq!(bank.words(100, 2), vec![0x0000, 0x00D7]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    inner: Arc<Mutex<BankState>>,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BankState> {
        // a panicking test thread must not wedge every other handle
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store words starting at `offset`; addresses past 0xFFFF are dropped.
    pub fn set_words(&self, offset: u16, values: &[u16]) {
        let mut state = self.state();
        for (address, &value) in (u32::from(offset)..REGISTER_SPACE).zip(values) {
            state.words.insert(address as u16, value);
        }
    }

    /// Snapshot of `count` words starting at `offset`.
    pub fn words(&self, offset: u16, count: u16) -> Vec<u16> {
        let state = self.state();
        (u32::from(offset)..u32::from(offset) + u32::from(count))
            .map(|address| {
                u16::try_from(address)
                    .ok()
                    .and_then(|a| state.words.get(&a).copied())
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Make every read or write touching `address` fail with `err`.
    pub fn inject_fault(&self, address: u16, err: TransportError) {
        self.state().faults.insert(address, err);
    }

    pub fn clear_fault(&self, address: u16) {
        self.state().faults.remove(&address);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Make `connect` fail with `err` until [`accept_connections`](Self::accept_connections).
    pub fn refuse_connections(&self, err: TransportError) {
        self.state().refusal = Some(err);
    }

    pub fn accept_connections(&self) {
        self.state().refusal = None;
    }

    /// Delay applied to every connect, read and write.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn stats(&self) -> TransportStats {
        self.state().stats
    }

    pub fn reset_stats(&self) {
        let mut state = self.state();
        let open = state.stats.open_sessions;
        state.stats = TransportStats {
            open_sessions: open,
            max_open_sessions: open,
            ..TransportStats::default()
        };
    }

    fn latency(&self) -> Duration {
        self.state().latency
    }
}

// ============================================================================
// Memory Transport
// ============================================================================

/// [`DeviceTransport`] over a [`RegisterBank`].
///
/// Mirrors a Modbus server's checks: reads and writes need an open session,
/// request sizes are bounded, and ranges past the last address are rejected
/// with an illegal-data-address exception.
#[derive(Debug)]
pub struct MemoryTransport {
    bank: RegisterBank,
    connected: bool,
    max_read_words: u16,
    max_write_words: u16,
}

impl MemoryTransport {
    pub fn new(bank: RegisterBank) -> Self {
        Self {
            bank,
            connected: false,
            max_read_words: MAX_READ_REGISTERS,
            max_write_words: MAX_WRITE_REGISTERS,
        }
    }

    /// Override the per-request word limits the device accepts.
    pub fn with_limits(mut self, max_read_words: u16, max_write_words: u16) -> Self {
        self.max_read_words = max_read_words;
        self.max_write_words = max_write_words;
        self
    }

    pub fn bank(&self) -> &RegisterBank {
        &self.bank
    }

    fn check_request(&self, offset: u16, count: usize, limit: u16) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::io("transport is not connected"));
        }
        if count == 0 || count > usize::from(limit) {
            return Err(TransportError::rejected(EXCEPTION_ILLEGAL_DATA_VALUE));
        }
        if u32::from(offset) + count as u32 > REGISTER_SPACE {
            return Err(TransportError::rejected(EXCEPTION_ILLEGAL_DATA_ADDRESS));
        }
        Ok(())
    }

    fn fault_in(state: &BankState, offset: u16, count: usize) -> Option<TransportError> {
        (u32::from(offset)..u32::from(offset) + count as u32)
            .find_map(|address| state.faults.get(&(address as u16)))
            .cloned()
    }

    async fn pause(&self) {
        let latency = self.bank.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn open_session(&mut self) -> TransportResult<()> {
        if self.connected {
            return Ok(());
        }
        let mut state = self.bank.state();
        if let Some(err) = state.refusal.clone() {
            return Err(err);
        }
        let stats = &mut state.stats;
        stats.connects += 1;
        stats.open_sessions += 1;
        stats.max_open_sessions = stats.max_open_sessions.max(stats.open_sessions);
        self.connected = true;
        Ok(())
    }

    fn close_session(&mut self) {
        if !self.connected {
            return;
        }
        let mut state = self.bank.state();
        state.stats.disconnects += 1;
        state.stats.open_sessions = state.stats.open_sessions.saturating_sub(1);
        self.connected = false;
    }

    fn load(&self, offset: u16, count: u16) -> TransportResult<Vec<u16>> {
        self.check_request(offset, usize::from(count), self.max_read_words)?;

        let mut state = self.bank.state();
        state.stats.reads += 1;
        if let Some(err) = Self::fault_in(&state, offset, usize::from(count)) {
            return Err(err);
        }
        state.stats.words_read += u64::from(count);
        Ok((0..count)
            .map(|i| state.words.get(&(offset + i)).copied().unwrap_or(0))
            .collect())
    }

    fn store(&self, offset: u16, values: &[u16]) -> TransportResult<()> {
        self.check_request(offset, values.len(), self.max_write_words)?;

        let mut state = self.bank.state();
        state.stats.writes += 1;
        if let Some(err) = Self::fault_in(&state, offset, values.len()) {
            return Err(err);
        }
        state.stats.words_written += values.len() as u64;
        for (i, &value) in values.iter().enumerate() {
            state.words.insert(offset + i as u16, value);
        }
        Ok(())
    }
}

impl DeviceTransport for MemoryTransport {
    async fn connect(&mut self) -> TransportResult<()> {
        self.pause().await;
        self.open_session()?;
        debug!("memory transport connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.close_session();
        debug!("memory transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_words(&mut self, offset: u16, count: u16) -> TransportResult<Vec<u16>> {
        self.pause().await;
        let words = self.load(offset, count)?;
        trace!(offset, count, "memory transport read");
        Ok(words)
    }

    async fn write_words(&mut self, offset: u16, values: &[u16]) -> TransportResult<()> {
        self.pause().await;
        self.store(offset, values)?;
        trace!(offset, count = values.len(), "memory transport write");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected(bank: &RegisterBank) -> MemoryTransport {
        let mut transport = MemoryTransport::new(bank.clone());
        transport.connect().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_session_counters() {
        let bank = RegisterBank::new();
        let mut transport = MemoryTransport::new(bank.clone());
        assert!(!transport.is_connected());

        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(bank.stats().open_sessions, 1);

        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        let stats = bank.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.disconnects, 1);
        assert_eq!(stats.open_sessions, 0);
        assert_eq!(stats.max_open_sessions, 1);
    }

    #[tokio::test]
    async fn test_read_requires_session() {
        let mut transport = MemoryTransport::new(RegisterBank::new());
        let err = transport.read_words(0, 1).await.unwrap_err();
        assert!(matches!(err, TransportError::Io { .. }));
    }

    #[tokio::test]
    async fn test_read_write_roundtrip() {
        let bank = RegisterBank::new();
        let mut transport = connected(&bank).await;

        transport.write_words(10, &[1, 2, 3]).await.unwrap();
        assert_eq!(transport.read_words(9, 5).await.unwrap(), vec![0, 1, 2, 3, 0]);
        assert_eq!(bank.words(10, 3), vec![1, 2, 3]);

        let stats = bank.stats();
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.words_read, 5);
        assert_eq!(stats.words_written, 3);
    }

    #[tokio::test]
    async fn test_request_limits() {
        let bank = RegisterBank::new();
        let mut transport = connected(&bank).await.with_limits(10, 10);

        let err = transport.read_words(0, 11).await.unwrap_err();
        assert_eq!(err, TransportError::rejected(EXCEPTION_ILLEGAL_DATA_VALUE));

        let err = transport.read_words(0xFFFE, 4).await.unwrap_err();
        assert_eq!(err, TransportError::rejected(EXCEPTION_ILLEGAL_DATA_ADDRESS));

        let err = transport.write_words(0, &[]).await.unwrap_err();
        assert!(err.is_device_rejection());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let bank = RegisterBank::new();
        let mut transport = connected(&bank).await;

        bank.inject_fault(5, TransportError::timeout("read_words", 100));
        assert!(transport.read_words(0, 4).await.is_ok());
        assert!(matches!(
            transport.read_words(4, 2).await,
            Err(TransportError::Timeout { .. })
        ));
        assert!(transport.write_words(5, &[1]).await.is_err());

        bank.clear_faults();
        assert!(transport.read_words(4, 2).await.is_ok());
    }

    #[test]
    fn test_refused_connection() {
        let bank = RegisterBank::new();
        bank.refuse_connections(TransportError::io("connection refused"));

        let mut transport = MemoryTransport::new(bank.clone());
        assert!(tokio_test::block_on(transport.connect()).is_err());
        assert!(!transport.is_connected());
        assert_eq!(bank.stats().connects, 0);

        bank.accept_connections();
        assert!(tokio_test::block_on(transport.connect()).is_ok());
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let bank = RegisterBank::new();
        let mut transport = connected(&bank).await;

        transport.write_i16(0, -5).await.unwrap();
        assert_eq!(transport.read_i16(0).await.unwrap(), -5);

        transport.write_u32(2, 0x1234_5678).await.unwrap();
        assert_eq!(bank.words(2, 2), vec![0x1234, 0x5678]);
        assert_eq!(transport.read_u32(2).await.unwrap(), 0x1234_5678);

        transport.write_i32(4, -200).await.unwrap();
        assert_eq!(transport.read_i32(4).await.unwrap(), -200);

        transport.write_f32(6, 1.5).await.unwrap();
        assert_eq!(transport.read_f32(6).await.unwrap(), 1.5);

        transport.write_f64(8, -2.75).await.unwrap();
        assert_eq!(transport.read_f64(8).await.unwrap(), -2.75);

        transport.write_bool(12, true).await.unwrap();
        assert!(transport.read_bool(12).await.unwrap());

        transport.write_string(20, 4, "ETA").await.unwrap();
        assert_eq!(transport.read_string(20, 4).await.unwrap(), "ETA");
        assert!(transport.write_string(20, 1, "TOO LONG").await.is_err());
    }

    #[test]
    fn test_latency_applies_to_reads() {
        let bank = RegisterBank::new();
        bank.set_latency(Duration::from_millis(20));
        let mut transport = MemoryTransport::new(bank.clone());

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let started = std::time::Instant::now();
        rt.block_on(async {
            transport.connect().await.unwrap();
            transport.read_words(0, 1).await.unwrap();
        });
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
