// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic presence-tracker usage example.
//!
//! Demonstrates:
//! 1. Connecting to a SQLite durable tier (Redis optional)
//! 2. Queueing a burst of presence and identity events
//! 3. Watching one flush collapse the burst
//! 4. Reading presence and name history back
//! 5. Displaying metrics
//! 6. Clean shutdown with a final drain
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! REDIS_URL=redis://localhost:6379 cargo run --example basic_usage
//! ```

use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use presence_tracker::{now_millis, MemberSnapshot, Tracker, TrackerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║          presence-tracker: Basic Usage Example                ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the tracker
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let config = TrackerConfig {
        // Without a Redis URL the cache tier lives in process memory
        redis_url: std::env::var("REDIS_URL").ok(),
        sql_url: Some(format!("sqlite://{}?mode=rwc", dir.path().join("tracking.db").display())),
        flush_interval_ms: 250,
        ..Default::default()
    };

    println!("📦 Connecting...");
    let tracker = Tracker::connect(config).await?;
    tracker.start()?;
    println!("   ✅ State: {}", tracker.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. A burst of events from the host
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Queueing a burst of events...");
    let guild = 1001;
    let start = now_millis();

    for i in 0..1_000 {
        let principal = 1 + (i % 5);
        tracker.queue_last_spoke(principal, guild, start + i);
    }
    tracker.queue_identity(1, "alice", start);
    tracker.queue_identity(1, "alice_", start + 1);
    tracker.queue_identity(1, "alice", start + 2);
    tracker.queue_nickname(1, guild, Some("Al".into()), start);
    tracker.queue_identity(2, "bob", start);

    println!("   └─ Pending: {:?}", tracker.status().pending);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Let the scheduler flush
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⏳ Waiting for a scheduled flush...");
    tokio::time::sleep(Duration::from_millis(600)).await;
    if let Some(report) = tracker.status().last_flush {
        println!("   └─ Cycle {} ({})", report.cycle_id, report.reason);
        println!("      last_seen rows: {}, last_spoke rows: {}", report.last_seen_rows, report.last_spoke_rows);
        println!("      name versions: {}, nickname versions: {}", report.name_versions, report.nickname_versions);
        println!("      took {:?}", report.duration);
    }

    // A second round of the same identities is absorbed by the cache
    tracker.force_resync(vec![MemberSnapshot {
        principal: 1,
        scope: guild,
        name: "alice".into(),
        nickname: Some("Al".into()),
        online: true,
    }]);
    let report = tracker.flush_now().await;
    println!("   └─ Resync: {} cache hits, {} new versions", report.cache_hits, report.name_versions + report.nickname_versions);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Read it back
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Reading back...");
    for principal in 1..=3 {
        let presence = tracker.presence(principal, guild).await?;
        let names = tracker.names_for(principal, None).await?;
        println!("   └─ {} → {:?} names={:?}", principal, presence, names);
    }
    println!("   └─ 1 nicknames in {}: {:?}", guild, tracker.nicks_for(1, guild, None).await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    tracker.queue_last_seen(3, now_millis());
    if let Some(report) = tracker.stop().await {
        println!("   └─ Final drain: {} rows, success={}", report.last_seen_rows, report.is_success());
    }
    println!("   ✅ State: {}", tracker.state());

    Ok(())
}

/// Dump captured metrics grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        let rendered = match value {
            DebugValue::Counter(v) => format!("{} (counter)", v),
            DebugValue::Gauge(v) => format!("{:.2} (gauge)", v.into_inner()),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                format!("count={} sum={:.4} (histogram)", samples.len(), sum)
            }
        };
        lines.push(format!("{}{} = {}", key.name(), label_str, rendered));
    }

    lines.sort();
    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
