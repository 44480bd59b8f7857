//! End-to-end engine behavior against a recording device double.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use voltage_regmap::{
    format_wire, CancellationToken, DeviceTransport, ErrorKind, MappingEngine, MemoryTransport,
    PropertyDescriptor, PropertyValue, RegisterBank, Request, Scale, Schema, SemanticType,
    TransportError, TransportResult,
};

// ============================================================================
// Recording transport
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Connect,
    Read(u16, u16),
    Write(u16, Vec<u16>),
    Disconnect,
}

#[derive(Debug, Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    active: Arc<AtomicUsize>,
    overlaps: Arc<AtomicUsize>,
}

impl Recorder {
    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

/// Memory device that logs every call and counts overlapping sessions.
struct RecordingTransport {
    inner: MemoryTransport,
    recorder: Recorder,
}

impl RecordingTransport {
    fn new(bank: &RegisterBank, recorder: &Recorder) -> Self {
        Self {
            inner: MemoryTransport::new(bank.clone()),
            recorder: recorder.clone(),
        }
    }
}

impl DeviceTransport for RecordingTransport {
    async fn connect(&mut self) -> TransportResult<()> {
        self.recorder.push(Event::Connect);
        if self.recorder.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.recorder.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let result = self.inner.connect().await;
        if result.is_err() {
            self.recorder.active.fetch_sub(1, Ordering::SeqCst);
        }
        result
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        if self.inner.is_connected() {
            self.recorder.active.fetch_sub(1, Ordering::SeqCst);
        }
        self.recorder.push(Event::Disconnect);
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn read_words(&mut self, offset: u16, count: u16) -> TransportResult<Vec<u16>> {
        self.recorder.push(Event::Read(offset, count));
        self.inner.read_words(offset, count).await
    }

    async fn write_words(&mut self, offset: u16, values: &[u16]) -> TransportResult<()> {
        self.recorder.push(Event::Write(offset, values.to_vec()));
        self.inner.write_words(offset, values).await
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn plant_schema() -> Schema {
    Schema::builder("plant")
        .property(
            PropertyDescriptor::new("Temperature", SemanticType::Float64, 100)
                .with_length(2)
                .with_scale(Scale::per(10).unwrap())
                .in_block("status"),
        )
        .property(PropertyDescriptor::new("Pressure", SemanticType::Int16, 102).in_block("status"))
        .property(
            PropertyDescriptor::new("State", SemanticType::EnumOrdinal, 103)
                .with_variants(["Off", "Standby", "Heating"])
                .in_block("status"),
        )
        .property(
            PropertyDescriptor::new("Setpoint", SemanticType::Float64, 200)
                .with_length(1)
                .with_scale(Scale::per(10).unwrap())
                .read_write(),
        )
        .property(PropertyDescriptor::new("Command", SemanticType::UInt16, 300).write_only())
        .property(PropertyDescriptor::new("LastService", SemanticType::Timestamp, 310).read_write())
        .property(PropertyDescriptor::new("Runtime", SemanticType::Duration, 320).read_write())
        .build()
        .unwrap()
}

fn seeded_bank() -> RegisterBank {
    let bank = RegisterBank::new();
    bank.set_words(100, &[0x0000, 0x00D7, 0xFFF6, 0x0002]);
    bank.set_words(200, &[650]);
    bank.set_words(310, &[0x6553, 0xF100]);
    bank.set_words(320, &[3600]);
    bank
}

fn recording_engine(bank: &RegisterBank) -> (MappingEngine<RecordingTransport>, Recorder) {
    let recorder = Recorder::default();
    let engine = MappingEngine::new(plant_schema(), RecordingTransport::new(bank, &recorder));
    (engine, recorder)
}

fn counter_schema() -> Schema {
    Schema::builder("counters")
        .properties(
            (0..5u16).map(|i| PropertyDescriptor::new(format!("C{}", i + 1), SemanticType::UInt16, 10 + i)),
        )
        .build()
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_batch_continues_past_failed_property() {
    let bank = RegisterBank::new();
    bank.set_words(10, &[1, 2, 3, 4, 5]);
    bank.inject_fault(12, TransportError::rejected(0x02));
    let recorder = Recorder::default();
    let engine = MappingEngine::new(counter_schema(), RecordingTransport::new(&bank, &recorder));

    let status = engine.read_all().await;
    assert_eq!(status.kind(), Some(ErrorKind::DeviceFailure));
    assert!(status.detail().contains("1 of 5 failed"), "{}", status.detail());

    // the failed third property did not stop the fourth and fifth
    assert_eq!(
        recorder.events(),
        vec![
            Event::Connect,
            Event::Read(10, 1),
            Event::Read(11, 1),
            Event::Read(12, 1),
            Event::Read(13, 1),
            Event::Read(14, 1),
            Event::Disconnect,
        ]
    );

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status(), &status);
    assert_eq!(snapshot.get("C1"), Some(&PropertyValue::UInt16(1)));
    assert_eq!(snapshot.get("C3"), None);
    assert_eq!(snapshot.get("C5"), Some(&PropertyValue::UInt16(5)));
}

#[tokio::test]
async fn test_write_batch_continues_past_failed_write() {
    let schema = Schema::builder("valves")
        .properties(
            ["A", "B", "C"]
                .into_iter()
                .zip(0u16..)
                .map(|(name, offset)| {
                    PropertyDescriptor::new(name, SemanticType::UInt16, offset).read_write()
                }),
        )
        .build()
        .unwrap();
    let bank = RegisterBank::new();
    bank.set_words(0, &[10, 20, 30]);
    let recorder = Recorder::default();
    let engine = MappingEngine::new(schema, RecordingTransport::new(&bank, &recorder));
    assert!(engine.read_all().await.is_ok());

    bank.inject_fault(1, TransportError::rejected(0x04));
    recorder.clear();
    let status = engine.write_many(&[("A", "1"), ("B", "2"), ("C", "3")]).await;

    assert_eq!(status.kind(), Some(ErrorKind::DeviceFailure));
    assert!(status.detail().contains("1 of 3 failed"), "{}", status.detail());
    assert_eq!(
        recorder.events(),
        vec![
            Event::Connect,
            Event::Write(0, vec![1]),
            Event::Write(1, vec![2]),
            Event::Write(2, vec![3]),
            Event::Disconnect,
        ]
    );

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.status(), &status);
    assert_eq!(snapshot.get("A"), Some(&PropertyValue::UInt16(1)));
    assert_eq!(snapshot.get("B"), Some(&PropertyValue::UInt16(20)));
    assert_eq!(snapshot.get("C"), Some(&PropertyValue::UInt16(3)));
    assert_eq!(bank.words(0, 3), vec![1, 20, 3]);
}

#[tokio::test]
async fn test_block_read_matches_individual_reads() {
    let bank = seeded_bank();
    let (blocks, block_recorder) = recording_engine(&bank);
    let (singles, _) = recording_engine(&bank);

    assert!(blocks.read_blocks().await.is_ok());
    assert_eq!(
        block_recorder.events(),
        vec![Event::Connect, Event::Read(100, 4), Event::Disconnect]
    );

    for name in ["Temperature", "Pressure", "State"] {
        assert!(singles.read_one(name).await.is_ok());
        assert_eq!(blocks.value(name), singles.value(name), "{}", name);
    }
    assert_eq!(blocks.value("Temperature"), Some(PropertyValue::Float(21.5)));
    assert_eq!(blocks.value("Pressure"), Some(PropertyValue::Int16(-10)));
    assert_eq!(blocks.value("State"), Some(PropertyValue::Enum(2)));
}

#[tokio::test]
async fn test_access_violations_leave_snapshot_unchanged() {
    let bank = seeded_bank();
    let (engine, recorder) = recording_engine(&bank);

    assert!(engine.read_all().await.is_ok());
    let before = engine.snapshot();
    recorder.clear();

    let status = engine.write_one("Temperature", "30").await;
    assert_eq!(status.kind(), Some(ErrorKind::NotWritable));
    let status = engine.read_one("Command").await;
    assert_eq!(status.kind(), Some(ErrorKind::NotReadable));
    let status = engine.read_one("Humidity").await;
    assert_eq!(status.kind(), Some(ErrorKind::NotFound));

    assert!(recorder.events().is_empty());
    let after = engine.snapshot();
    assert_eq!(after.version(), before.version());
    assert!(after.status().is_ok());
    assert_eq!(after.get("Temperature"), before.get("Temperature"));
}

#[tokio::test]
async fn test_unparsable_write_never_reaches_device() {
    let bank = seeded_bank();
    let (engine, recorder) = recording_engine(&bank);
    assert!(engine.read_one("Setpoint").await.is_ok());
    recorder.clear();

    let status = engine.write_one("Setpoint", "abc").await;
    assert_eq!(status.kind(), Some(ErrorKind::EncodingError));
    assert!(recorder.events().is_empty());
    assert_eq!(engine.value("Setpoint"), Some(PropertyValue::Float(65.0)));
    assert_eq!(bank.words(200, 1), vec![650]);
}

#[tokio::test]
async fn test_wire_writes_round_trip_through_device() {
    let bank = seeded_bank();
    let (engine, recorder) = recording_engine(&bank);

    let status = engine
        .write_many(&[
            ("LastService", "2024-06-01T08:00:00Z"),
            ("Runtime", "2:30"),
            ("Setpoint", "72.5"),
        ])
        .await;
    assert!(status.is_ok(), "{}", status);
    assert!(recorder.events().contains(&Event::Write(200, vec![725])));
    assert!(recorder.events().contains(&Event::Write(320, vec![9000])));

    let (reader, _) = recording_engine(&bank);
    assert!(reader.read_all().await.is_ok());
    let snapshot = reader.snapshot();
    let schema = snapshot.schema();
    let wire = |name: &str| {
        let desc = schema.lookup(name).unwrap();
        format_wire(desc, snapshot.get(name).unwrap())
    };
    assert_eq!(wire("LastService"), "2024-06-01T08:00:00Z");
    assert_eq!(wire("Runtime"), "2:30:00");
    assert_eq!(wire("Setpoint"), "72.5");
    assert_eq!(wire("State"), "Heating");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_operations_never_overlap() {
    let bank = seeded_bank();
    bank.set_latency(Duration::from_millis(2));
    let (engine, recorder) = recording_engine(&bank);
    let engine = Arc::new(engine);

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if i % 2 == 0 {
                    engine.read_all().await
                } else {
                    engine.write_one("Setpoint", &format!("{}", 60 + i)).await
                }
            })
        })
        .collect();
    for task in tasks {
        let status = task.await.unwrap();
        assert!(status.is_ok(), "{}", status);
    }

    assert_eq!(recorder.overlaps(), 0);
    let stats = bank.stats();
    assert_eq!(stats.connects, 8);
    assert_eq!(stats.disconnects, 8);
    assert_eq!(stats.max_open_sessions, 1);

    // every session is closed before the next one opens
    let mut open = false;
    for event in recorder.events() {
        match event {
            Event::Connect => {
                assert!(!open, "session opened while another was active");
                open = true;
            }
            Event::Disconnect => open = false,
            Event::Read(..) | Event::Write(..) => assert!(open, "device access outside a session"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_session_still_disconnects() {
    let bank = RegisterBank::new();
    bank.set_words(10, &[1, 2, 3, 4, 5]);
    bank.set_latency(Duration::from_millis(50));
    let recorder = Recorder::default();
    let engine = MappingEngine::new(counter_schema(), RecordingTransport::new(&bank, &recorder));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        trigger.cancel();
    });

    // connect at 50ms, first read at 100ms, cancelled during the second
    let status = engine.run(Request::ReadAll, &cancel).await;
    assert_eq!(status.kind(), Some(ErrorKind::InternalError));

    let events = recorder.events();
    assert_eq!(events.last(), Some(&Event::Disconnect));
    assert!(!events.contains(&Event::Read(14, 1)));
    assert_eq!(bank.stats().open_sessions, 0);
    assert_eq!(engine.value("C1"), Some(PropertyValue::UInt16(1)));
    assert_eq!(engine.value("C5"), None);
    assert_eq!(engine.status(), status);
}

#[tokio::test]
async fn test_subscribers_see_commits_only() {
    let bank = seeded_bank();
    let (engine, _) = recording_engine(&bank);
    let mut updates = engine.subscribe();

    assert!(engine.read_one("Temperature").await.is_ok());
    updates.changed().await.unwrap();
    {
        let snapshot = updates.borrow_and_update();
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.get("Temperature"), Some(&PropertyValue::Float(21.5)));
    }

    // rejected before the device: nothing committed
    assert!(!engine.read_one("Nope").await.is_ok());
    assert!(!updates.has_changed().unwrap());

    // device failures are committed as status
    bank.refuse_connections(TransportError::io("connection refused"));
    let status = engine.read_one("Pressure").await;
    assert_eq!(status.kind(), Some(ErrorKind::NotConnected));
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().status(), &status);
}
