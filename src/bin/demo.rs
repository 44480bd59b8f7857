//! Voltage RegMap Demo
//!
//! Walks through the register mapping engine against a simulated boiler:
//! - Declaring a schema with blocks, scales, enums and access modes
//! - Block reads, full reads and the resulting snapshot
//! - Wire-format writes, including the ones rejected before the device
//! - Health probes, cancellation and concurrent callers
//!
//! Usage: cargo run --bin demo --features demo
//! Logging: RUST_LOG=voltage_regmap=debug cargo run --bin demo --features demo

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use voltage_regmap::{
    format_wire, CancellationToken, DeviceTransport, EngineConfig, MappingEngine,
    MemoryTransport, PropertyDescriptor, RegMapResult, RegisterBank, Request, Scale, Schema,
    SemanticType, TimeUnit, TransportError,
};

fn boiler_schema() -> RegMapResult<Schema> {
    Schema::builder("boiler-01")
        .block("status", 100, 6)
        .property(
            PropertyDescriptor::new("FlowTemperature", SemanticType::Float64, 100)
                .with_length(2)
                .with_scale(Scale::per(10)?)
                .in_block("status"),
        )
        .property(
            PropertyDescriptor::new("ReturnTemperature", SemanticType::Float64, 102)
                .with_length(1)
                .with_scale(Scale::per(10)?)
                .in_block("status"),
        )
        .property(
            PropertyDescriptor::new("State", SemanticType::EnumOrdinal, 103)
                .with_variants(["Off", "Standby", "Heating", "Fault"])
                .in_block("status"),
        )
        .property(
            PropertyDescriptor::new("BurnerHours", SemanticType::Duration, 104)
                .with_length(2)
                .with_time_unit(TimeUnit::Minutes)
                .in_block("status"),
        )
        .property(
            PropertyDescriptor::new("Setpoint", SemanticType::Float64, 200)
                .with_length(1)
                .with_scale(Scale::per(10)?)
                .read_write(),
        )
        .property(PropertyDescriptor::new("ResetCommand", SemanticType::UInt16, 300).write_only())
        .property(
            PropertyDescriptor::new("LastService", SemanticType::Timestamp, 310).read_write(),
        )
        .property(
            PropertyDescriptor::new("SerialNumber", SemanticType::FixedString, 400)
                .with_length(6),
        )
        .build()
}

fn seed(bank: &RegisterBank) {
    bank.set_words(100, &[0x0000, 0x02A3]); // 67.5
    bank.set_words(102, &[0x01C2]); // 45.0
    bank.set_words(103, &[2]); // Heating
    bank.set_words(104, &[0x0001, 0x5F90]); // 90000 minutes
    bank.set_words(200, &[650]);
    bank.set_words(310, &[0x6553, 0xF100]);
    bank.set_words(400, &[0x4232, 0x3032, 0x362D, 0x3030, 0x3031, 0x0000]);
}

fn print_snapshot(engine: &MappingEngine<MemoryTransport>) {
    let snapshot = engine.snapshot();
    println!(
        "  Snapshot v{} (status: {})",
        snapshot.version(),
        snapshot.status()
    );
    for (desc, value) in snapshot.iter() {
        let shown = match value {
            Some(v) => format_wire(desc, v),
            None => "-".to_string(),
        };
        println!("    {:<18} {:<9} {}", desc.name, desc.semantic_type, shown);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    println!("🚀 {}", voltage_regmap::info());
    println!("=============================================");

    let bank = RegisterBank::new();
    seed(&bank);

    let config = EngineConfig::new()
        .with_max_read_words(4)
        .with_operation_timeout(Some(Duration::from_secs(2)));
    let engine = Arc::new(MappingEngine::with_config(
        boiler_schema()?,
        MemoryTransport::new(bank.clone()),
        config,
    ));

    // =========================================================================
    // Part 1: Schema
    // =========================================================================
    println!("\n📦 Part 1: Schema '{}'", engine.schema().device());
    println!("-----------------------------------------------");
    for desc in engine.schema().properties() {
        println!(
            "  {:<18} @{:<4} x{} {:<9} scale {}",
            desc.name, desc.offset, desc.length, desc.semantic_type, desc.scale
        );
    }
    for block in engine.schema().blocks() {
        println!(
            "  block '{}' @{} x{} ({} members)",
            block.id,
            block.offset,
            block.length,
            block.members.len()
        );
    }

    // =========================================================================
    // Part 2: Reads
    // =========================================================================
    println!("\n📖 Part 2: Reads");
    println!("----------------");

    let status = engine.read_blocks().await;
    println!("  read_blocks -> {} ({} device reads)", status, bank.stats().reads);

    bank.reset_stats();
    let status = engine.read_all().await;
    println!("  read_all    -> {} ({} device reads)", status, bank.stats().reads);
    print_snapshot(&engine);

    // =========================================================================
    // Part 3: Writes
    // =========================================================================
    println!("\n✏️  Part 3: Writes");
    println!("-----------------");

    for (name, value) in [
        ("Setpoint", "70.25"),
        ("Setpoint", "abc"),
        ("FlowTemperature", "80"),
        ("ResetCommand", "1"),
        ("LastService", "2024-06-01T08:00:00Z"),
        ("Unknown", "1"),
    ] {
        let status = engine.write_one(name, value).await;
        println!("  write_one({}, {:?}) -> {}", name, value, status);
    }
    println!("  Setpoint register now holds {:?}", bank.words(200, 1));

    let status = engine
        .write_many(&[("Setpoint", "68"), ("ResetCommand", "2")])
        .await;
    println!("  write_many -> {}", status);

    // =========================================================================
    // Part 4: Failures
    // =========================================================================
    println!("\n⚠️  Part 4: Failures");
    println!("--------------------");

    bank.inject_fault(102, TransportError::rejected(0x04));
    let status = engine.read_all().await;
    println!("  read_all with a faulty register -> {}", status);
    bank.clear_faults();

    bank.refuse_connections(TransportError::io("connection refused"));
    println!("  connect() while refused -> {}", engine.connect().await);
    println!("  status -> {}", engine.status());
    bank.accept_connections();
    println!("  connect() after recovery -> {}", engine.connect().await);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let status = engine.run(Request::ReadAll, &cancel).await;
    println!("  cancelled read_all -> {}", status);

    // =========================================================================
    // Part 5: Concurrent callers
    // =========================================================================
    println!("\n🔀 Part 5: Concurrent callers");
    println!("-----------------------------");

    let updates = engine.subscribe();
    bank.reset_stats();
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.read_all().await })
        })
        .collect();
    for task in tasks {
        println!("  task -> {}", task.await?);
    }
    println!("  snapshot changed: {}", updates.has_changed()?);
    let stats = bank.stats();
    println!(
        "  sessions: {} opened, at most {} at once",
        stats.connects, stats.max_open_sessions
    );
    println!("  latest snapshot version: {}", updates.borrow().version());

    // =========================================================================
    // Part 6: Transport helpers
    // =========================================================================
    println!("\n🔌 Part 6: Raw transport helpers");
    println!("--------------------------------");

    let mut transport = MemoryTransport::new(bank.clone());
    transport.connect().await?;
    transport.write_f32(500, 3.25).await?;
    println!("  f32 at 500 -> {}", transport.read_f32(500).await?);
    println!("  serial     -> {:?}", transport.read_string(400, 6).await?);
    transport.disconnect().await?;

    println!("\n🎉 Demo completed!");
    Ok(())
}
