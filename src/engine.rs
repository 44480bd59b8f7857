//! Mapping engine: schema-driven reads and writes under a single-flight guard
//!
//! # Architecture
//!
//! One [`MappingEngine`] owns one device transport. Every operation follows
//! the same path:
//!
//! 1. Resolve names against the schema. Unknown names, access violations and
//!    unparsable values are rejected here, before the device is touched.
//! 2. Acquire the per-instance guard (a FIFO `tokio::sync::Mutex` around the
//!    transport). Operations on the same engine never overlap.
//! 3. Connect, read or write every item, always disconnect.
//! 4. Commit decoded values and the resulting [`Status`] to the snapshot,
//!    then release the guard.
//!
//! Batches continue past failed items and report the last failure in request
//! order. Caller cancellation and the configured deadline abort the session,
//! but the disconnect and the commit of values decoded so far still run.
//!
//! # Quick Start
//!
//! ```rust
//! use voltage_regmap::{
//!     MappingEngine, MemoryTransport, PropertyDescriptor, PropertyValue, RegisterBank, Scale,
//!     Schema, SemanticType,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let schema = Schema::builder("boiler")
//!     .property(
//!         PropertyDescriptor::new("Temperature", SemanticType::Float64, 100)
//!             .with_length(2)
//!             .with_scale(Scale::per(10).unwrap()),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let bank = RegisterBank::new();
//! bank.set_words(100, &[0, 215]);
//!
//! let engine = MappingEngine::new(schema, MemoryTransport::new(bank));
//! assert!(engine.read_one("Temperature").await.is_ok());
//! assert_eq!(engine.value("Temperature"), Some(PropertyValue::Float(21.5)));
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, warn, Instrument};

use crate::codec;
use crate::config::EngineConfig;
use crate::error::{ErrorKind, RegMapError, RegMapResult, TransportError};
use crate::schema::{Block, PropertyDescriptor, Schema};
use crate::snapshot::Snapshot;
use crate::status::Status;
use crate::transport::DeviceTransport;
use crate::value::PropertyValue;

// ============================================================================
// Requests
// ============================================================================

/// An engine operation, for use with [`MappingEngine::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Health probe: open and close a session without touching values
    Connect,
    ReadOne(String),
    ReadMany(Vec<String>),
    /// Every readable property in schema order
    ReadAll,
    /// One bulk read per block, members decoded from the buffer
    ReadBlocks,
    /// Write a wire-format value
    WriteOne { name: String, value: String },
    WriteMany(Vec<(String, String)>),
    /// Push the snapshot's value of every writable property that has one
    WriteAll,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::ReadOne(_) => "read_one",
            Self::ReadMany(_) => "read_many",
            Self::ReadAll => "read_all",
            Self::ReadBlocks => "read_blocks",
            Self::WriteOne { .. } => "write_one",
            Self::WriteMany(_) => "write_many",
            Self::WriteAll => "write_all",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Planning
// ============================================================================

/// A write that has already been parsed and encoded.
#[derive(Debug)]
struct WriteItem {
    position: usize,
    /// Value as the device will hold it after encoding
    value: PropertyValue,
    words: Vec<u16>,
}

/// Device work for one session; item indices are positions in the request.
#[derive(Debug)]
enum Plan {
    Probe,
    Read(Vec<(usize, usize)>),
    Blocks,
    Write(Vec<(usize, WriteItem)>),
}

enum Resolved {
    Ready(Plan, Tally),
    /// `WriteAll`: planned from the snapshot once the guard is held
    FromSnapshot,
}

/// Outcome bookkeeping for one operation.
#[derive(Debug, Default)]
struct Tally {
    /// Items in the request
    total: usize,
    batch: bool,
    failures: usize,
    last: Option<(usize, RegMapError)>,
    updates: Vec<(usize, PropertyValue)>,
    /// Device requests issued in this session
    requests: usize,
}

impl Tally {
    fn single() -> Self {
        Self {
            total: 1,
            ..Self::default()
        }
    }

    fn batch(total: usize) -> Self {
        Self {
            total,
            batch: true,
            ..Self::default()
        }
    }

    /// Record a failed item; the highest request index wins.
    fn fail(&mut self, index: usize, err: RegMapError) {
        self.failures += 1;
        if self.last.as_ref().map_or(true, |(last, _)| index >= *last) {
            self.last = Some((index, err));
        }
    }

    fn status(&self) -> Status {
        match &self.last {
            None => Status::ok(),
            Some((_, err)) if !self.batch => Status::from(err),
            Some((_, err)) => Status::failed(
                err.kind(),
                format!("{} ({} of {} failed)", err, self.failures, self.total),
            ),
        }
    }
}

// ============================================================================
// Mapping Engine
// ============================================================================

/// Schema-driven access to one device.
///
/// All methods take `&self`; share the engine behind an `Arc` to issue
/// operations from several tasks. They are serialized by the engine's guard.
pub struct MappingEngine<T: DeviceTransport> {
    schema: Arc<Schema>,
    config: EngineConfig,
    transport: Mutex<T>,
    snapshot: watch::Sender<Snapshot>,
}

impl<T: DeviceTransport> MappingEngine<T> {
    /// Create an engine with the default configuration.
    pub fn new(schema: Schema, transport: T) -> Self {
        Self::with_config(schema, transport, EngineConfig::default())
    }

    pub fn with_config(schema: Schema, transport: T, config: EngineConfig) -> Self {
        let schema = Arc::new(schema);
        let (snapshot, _) = watch::channel(Snapshot::new(Arc::clone(&schema)));
        Self {
            schema,
            config,
            transport: Mutex::new(transport),
            snapshot,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Status of the last operation that reached the device.
    pub fn status(&self) -> Status {
        self.snapshot.borrow().status().clone()
    }

    /// Current snapshot value of a property.
    pub fn value(&self, name: &str) -> Option<PropertyValue> {
        self.snapshot.borrow().get(name).cloned()
    }

    /// Receiver notified after every snapshot commit.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Consume the engine and hand back the transport.
    pub fn into_transport(self) -> T {
        self.transport.into_inner()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Health probe. Returns false on any transport failure and records it
    /// in the status; never touches values.
    pub async fn connect(&self) -> bool {
        self.run(Request::Connect, &CancellationToken::new())
            .await
            .is_ok()
    }

    pub async fn read_one(&self, name: &str) -> Status {
        self.run(Request::ReadOne(name.to_string()), &CancellationToken::new())
            .await
    }

    /// Read several properties in one session, continuing past failures.
    pub async fn read_many(&self, names: &[&str]) -> Status {
        let names = names.iter().map(|n| n.to_string()).collect();
        self.run(Request::ReadMany(names), &CancellationToken::new())
            .await
    }

    pub async fn read_all(&self) -> Status {
        self.run(Request::ReadAll, &CancellationToken::new()).await
    }

    pub async fn read_blocks(&self) -> Status {
        self.run(Request::ReadBlocks, &CancellationToken::new())
            .await
    }

    /// Parse `value` in the property's wire format and write it.
    pub async fn write_one(&self, name: &str, value: &str) -> Status {
        let request = Request::WriteOne {
            name: name.to_string(),
            value: value.to_string(),
        };
        self.run(request, &CancellationToken::new()).await
    }

    pub async fn write_many(&self, writes: &[(&str, &str)]) -> Status {
        let writes = writes
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        self.run(Request::WriteMany(writes), &CancellationToken::new())
            .await
    }

    pub async fn write_all(&self) -> Status {
        self.run(Request::WriteAll, &CancellationToken::new()).await
    }

    /// Execute a request, aborting when `cancel` fires or the configured
    /// deadline passes.
    pub async fn run(&self, request: Request, cancel: &CancellationToken) -> Status {
        let span = debug_span!(
            "regmap_op",
            device = %self.schema.device(),
            operation = request.name()
        );
        self.execute(request, cancel).instrument(span).await
    }

    async fn execute(&self, request: Request, cancel: &CancellationToken) -> Status {
        // a timeout too large to represent means no deadline
        let deadline = self
            .config
            .operation_timeout
            .and_then(|t| Instant::now().checked_add(t));
        let is_probe = request == Request::Connect;

        let resolved = match self.resolve(request) {
            Ok(resolved) => resolved,
            Err(status) => {
                debug!(%status, "rejected before reaching the device");
                return status;
            }
        };

        let mut transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("cancelled while waiting for the device guard");
                return Status::from(RegMapError::Cancelled);
            }
            _ = expire(deadline) => {
                warn!("deadline passed while waiting for the device guard");
                return Status::from(self.deadline_error());
            }
            guard = self.transport.lock() => guard,
        };
        debug!("device guard acquired");

        let (plan, mut tally) = match resolved {
            Resolved::Ready(plan, tally) => (plan, tally),
            Resolved::FromSnapshot => match self.plan_write_all() {
                Ok(planned) => planned,
                Err(status) => return status,
            },
        };

        let outcome = {
            let session = self.session(&mut *transport, plan, &mut tally);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RegMapError::Cancelled),
                _ = expire(deadline) => Err(self.deadline_error()),
                result = session => result,
            }
        };

        if let Err(err) = transport.disconnect().await {
            warn!(error = %err, "disconnect failed");
        }
        debug!("session closed");

        let status = match outcome {
            Ok(()) if is_probe => return Status::ok(),
            Err(err) if is_probe => {
                warn!(error = %err, "probe failed");
                Status::failed(ErrorKind::InternalError, err.to_string())
            }
            Ok(()) => tally.status(),
            Err(err) => {
                warn!(error = %err, "session aborted");
                Status::from(&err)
            }
        };

        if tally.batch {
            info!(
                updated = tally.updates.len(),
                failed = tally.failures,
                total = tally.total,
                "operation completed"
            );
        }

        let updates = std::mem::take(&mut tally.updates);
        self.snapshot.send_modify(|snap| {
            snap.apply(updates, status.clone());
        });
        drop(transport);
        status
    }

    fn deadline_error(&self) -> RegMapError {
        let timeout_ms = self
            .config
            .operation_timeout
            .map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        RegMapError::DeadlineExceeded { timeout_ms }
    }

    // ========================================================================
    // Resolution (no device access)
    // ========================================================================

    fn readable(&self, name: &str) -> RegMapResult<usize> {
        let desc = self.schema.lookup(name)?;
        if !desc.is_readable() {
            return Err(RegMapError::not_readable(name));
        }
        self.schema
            .position(name)
            .ok_or_else(|| RegMapError::not_found(name))
    }

    fn prepare_write(&self, name: &str, raw: &str) -> RegMapResult<WriteItem> {
        let desc = self.schema.lookup(name)?;
        if !desc.is_writable() {
            return Err(RegMapError::not_writable(name));
        }
        let parsed = codec::parse_wire(desc, raw)?;
        self.encode_item(desc, parsed)
    }

    fn encode_item(&self, desc: &PropertyDescriptor, value: PropertyValue) -> RegMapResult<WriteItem> {
        let words = codec::encode(desc, &value)?;
        // store what the device will report back, e.g. after scale rounding
        let value = codec::decode(desc, &words)?;
        let position = self
            .schema
            .position(&desc.name)
            .ok_or_else(|| RegMapError::not_found(&desc.name))?;
        Ok(WriteItem {
            position,
            value,
            words,
        })
    }

    fn resolve(&self, request: Request) -> Result<Resolved, Status> {
        let (plan, tally) = match request {
            Request::Connect => (Plan::Probe, Tally::single()),
            Request::ReadOne(name) => {
                let position = self.readable(&name).map_err(Status::from)?;
                (Plan::Read(vec![(0, position)]), Tally::single())
            }
            Request::ReadMany(names) => {
                let mut tally = Tally::batch(names.len());
                let items = names
                    .iter()
                    .enumerate()
                    .filter_map(|(index, name)| match self.readable(name) {
                        Ok(position) => Some((index, position)),
                        Err(err) => {
                            tally.fail(index, err);
                            None
                        }
                    })
                    .collect::<Vec<_>>();
                if items.is_empty() {
                    return Err(tally.status());
                }
                (Plan::Read(items), tally)
            }
            Request::ReadAll => {
                let items: Vec<_> = self
                    .schema
                    .readable()
                    .enumerate()
                    .map(|(index, (position, _))| (index, position))
                    .collect();
                if items.is_empty() {
                    return Err(Status::ok());
                }
                let tally = Tally::batch(items.len());
                (Plan::Read(items), tally)
            }
            Request::ReadBlocks => {
                let total = self
                    .schema
                    .blocks()
                    .iter()
                    .map(|b| self.readable_members(b).count())
                    .sum();
                if total == 0 {
                    return Err(Status::ok());
                }
                (Plan::Blocks, Tally::batch(total))
            }
            Request::WriteOne { name, value } => {
                let item = self.prepare_write(&name, &value).map_err(Status::from)?;
                (Plan::Write(vec![(0, item)]), Tally::single())
            }
            Request::WriteMany(writes) => {
                let mut tally = Tally::batch(writes.len());
                let items = writes
                    .iter()
                    .enumerate()
                    .filter_map(|(index, (name, value))| match self.prepare_write(name, value) {
                        Ok(item) => Some((index, item)),
                        Err(err) => {
                            tally.fail(index, err);
                            None
                        }
                    })
                    .collect::<Vec<_>>();
                if items.is_empty() {
                    return Err(tally.status());
                }
                (Plan::Write(items), tally)
            }
            Request::WriteAll => return Ok(Resolved::FromSnapshot),
        };
        Ok(Resolved::Ready(plan, tally))
    }

    /// Plan `WriteAll` from the snapshot. Call with the guard held.
    fn plan_write_all(&self) -> Result<(Plan, Tally), Status> {
        let snapshot = self.snapshot.borrow();
        let candidates: Vec<(&PropertyDescriptor, PropertyValue)> = self
            .schema
            .properties()
            .iter()
            .enumerate()
            .filter(|(_, desc)| desc.is_writable())
            .filter_map(|(position, desc)| {
                snapshot.value_at(position).map(|v| (desc, v.clone()))
            })
            .collect();
        drop(snapshot);

        let mut tally = Tally::batch(candidates.len());
        let mut items = Vec::with_capacity(candidates.len());
        for (index, (desc, value)) in candidates.into_iter().enumerate() {
            match self.encode_item(desc, value) {
                Ok(item) => items.push((index, item)),
                Err(err) => tally.fail(index, err),
            }
        }
        if items.is_empty() {
            return Err(tally.status());
        }
        Ok((Plan::Write(items), tally))
    }

    fn readable_members<'a>(
        &'a self,
        block: &'a Block,
    ) -> impl Iterator<Item = (usize, &'a PropertyDescriptor)> + 'a {
        block.members.iter().filter_map(move |&position| {
            self.schema
                .get(position)
                .filter(|desc| desc.is_readable())
                .map(|desc| (position, desc))
        })
    }

    // ========================================================================
    // Session (device access)
    // ========================================================================

    async fn session(&self, transport: &mut T, plan: Plan, tally: &mut Tally) -> RegMapResult<()> {
        transport
            .connect()
            .await
            .map_err(|source| RegMapError::NotConnected { source })?;
        debug!("session opened");

        match plan {
            Plan::Probe => {}
            Plan::Read(items) => {
                for (index, position) in items {
                    self.read_property(transport, index, position, tally).await;
                }
            }
            Plan::Blocks => {
                let mut index = 0;
                for block in self.schema.blocks() {
                    self.read_block(transport, block, &mut index, tally).await;
                }
            }
            Plan::Write(items) => {
                for (index, item) in items {
                    self.write_property(transport, index, item, tally).await;
                }
            }
        }
        Ok(())
    }

    async fn read_property(&self, transport: &mut T, index: usize, position: usize, tally: &mut Tally) {
        let Some(desc) = self.schema.get(position) else {
            tally.fail(index, RegMapError::internal(format!("no property at {}", position)));
            return;
        };
        let result = match self.read_range(transport, desc.offset, desc.length, tally).await {
            Ok(words) => codec::decode(desc, &words),
            Err(err) => Err(err),
        };
        match result {
            Ok(value) => {
                debug!(property = %desc.name, offset = desc.offset, %value, "decoded");
                tally.updates.push((position, value));
            }
            Err(err) => {
                warn!(property = %desc.name, offset = desc.offset, error = %err, "read failed");
                tally.fail(index, err);
            }
        }
    }

    async fn read_block(&self, transport: &mut T, block: &Block, index: &mut usize, tally: &mut Tally) {
        let members: Vec<_> = self.readable_members(block).collect();
        if members.is_empty() {
            return;
        }

        match self.read_range(transport, block.offset, block.length, tally).await {
            Ok(words) => {
                for (position, desc) in members {
                    let start = usize::from(desc.offset - block.offset);
                    let slice = &words[start..start + usize::from(desc.length)];
                    match codec::decode(desc, slice) {
                        Ok(value) => {
                            debug!(property = %desc.name, block = %block.id, %value, "decoded");
                            tally.updates.push((position, value));
                        }
                        Err(err) => {
                            warn!(property = %desc.name, block = %block.id, error = %err, "decode failed");
                            tally.fail(*index, err);
                        }
                    }
                    *index += 1;
                }
            }
            Err(err) => {
                warn!(block = %block.id, offset = block.offset, error = %err, "block read failed");
                for _ in members {
                    tally.fail(*index, err.clone());
                    *index += 1;
                }
            }
        }
    }

    async fn write_property(&self, transport: &mut T, index: usize, item: WriteItem, tally: &mut Tally) {
        let Some(desc) = self.schema.get(item.position) else {
            tally.fail(index, RegMapError::internal(format!("no property at {}", item.position)));
            return;
        };
        match self.write_range(transport, desc.offset, &item.words, tally).await {
            Ok(()) => {
                debug!(property = %desc.name, offset = desc.offset, value = %item.value, "written");
                tally.updates.push((item.position, item.value));
            }
            Err(err) => {
                warn!(property = %desc.name, offset = desc.offset, error = %err, "write failed");
                tally.fail(index, err);
            }
        }
    }

    /// Pause between device requests when the config asks for it.
    async fn pace(&self, tally: &mut Tally) {
        if tally.requests > 0 {
            if let Some(delay) = self.config.inter_request_delay() {
                tokio::time::sleep(delay).await;
            }
        }
        tally.requests += 1;
    }

    /// Read a register range, split into chunks of at most `max_read_words`.
    async fn read_range(
        &self,
        transport: &mut T,
        offset: u16,
        length: u16,
        tally: &mut Tally,
    ) -> RegMapResult<Vec<u16>> {
        let max_read_words = self.config.max_read_words.max(1);
        let mut result = Vec::with_capacity(usize::from(length));
        let mut current_address = offset;
        let mut remaining = length;

        while remaining > 0 {
            let count = remaining.min(max_read_words);
            self.pace(tally).await;
            let chunk = transport.read_words(current_address, count).await?;
            if chunk.len() != usize::from(count) {
                return Err(TransportError::protocol(format!(
                    "requested {} registers at {}, received {}",
                    count,
                    current_address,
                    chunk.len()
                ))
                .into());
            }
            result.extend_from_slice(&chunk);

            current_address = current_address.saturating_add(count);
            remaining -= count;
        }

        Ok(result)
    }

    /// Write a register range, split into chunks of at most `max_write_words`.
    async fn write_range(
        &self,
        transport: &mut T,
        offset: u16,
        words: &[u16],
        tally: &mut Tally,
    ) -> RegMapResult<()> {
        let max_write_words = usize::from(self.config.max_write_words.max(1));
        let mut current_address = offset;

        for chunk in words.chunks(max_write_words) {
            self.pace(tally).await;
            transport.write_words(current_address, chunk).await?;
            current_address = current_address.saturating_add(chunk.len() as u16);
        }

        Ok(())
    }
}

/// Resolves at `deadline`, never when there is none.
async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
