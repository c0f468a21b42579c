// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the tracker.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `presence_tracker_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: last_seen, last_spoke, identity, nickname
//! - `table`: durable-tier table name
//! - `reason`: why an entry was skipped

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::batching::ingest_queue::QueueDepth;

pub const KIND_LAST_SEEN: &str = "last_seen";
pub const KIND_LAST_SPOKE: &str = "last_spoke";
pub const KIND_IDENTITY: &str = "identity";
pub const KIND_NICKNAME: &str = "nickname";

/// One event accepted by an ingest call
pub fn record_queued(kind: &'static str) {
    counter!("presence_tracker_queued_total", "kind" => kind).increment(1);
}

/// Rows written to the durable tier after collapse
pub fn record_flushed_rows(kind: &'static str, count: usize) {
    counter!("presence_tracker_flushed_rows_total", "kind" => kind).increment(count as u64);
}

/// Updates discarded because their flush failed
pub fn record_dropped(kind: &'static str, count: usize) {
    counter!("presence_tracker_dropped_total", "kind" => kind).increment(count as u64);
}

/// Entries skipped without failing the batch
pub fn record_skipped(reason: &'static str, count: usize) {
    counter!("presence_tracker_skipped_total", "reason" => reason).increment(count as u64);
}

/// Identity/nickname updates resolved by the cache alone
pub fn record_cache_hits(kind: &'static str, count: usize) {
    counter!("presence_tracker_cache_hits_total", "kind" => kind).increment(count as u64);
}

/// One chunked statement against the durable tier
pub fn record_statement(table: &'static str, rows: usize) {
    counter!("presence_tracker_statements_total", "table" => table).increment(1);
    histogram!("presence_tracker_statement_rows", "table" => table).record(rows as f64);
}

/// Duration and outcome of one flush cycle
pub fn record_flush(duration: Duration, success: bool) {
    histogram!("presence_tracker_flush_seconds").record(duration.as_secs_f64());
    if !success {
        counter!("presence_tracker_flush_errors_total").increment(1);
    }
}

/// Pending items of one kind, updated on every push
pub fn set_queue_depth_for(kind: &'static str, depth: usize) {
    gauge!("presence_tracker_queue_depth", "kind" => kind).set(depth as f64);
}

/// Current ingest queue depth for every kind
pub fn set_queue_depth(depth: &QueueDepth) {
    set_queue_depth_for(KIND_LAST_SEEN, depth.last_seen);
    set_queue_depth_for(KIND_LAST_SPOKE, depth.last_spoke);
    set_queue_depth_for(KIND_IDENTITY, depth.identities);
    set_queue_depth_for(KIND_NICKNAME, depth.nicknames);
}

/// Scheduler state as a gauge (one label set to 1, others to 0)
pub fn set_tracker_state(state: &'static str) {
    for s in ["created", "running", "draining", "stopped"] {
        gauge!("presence_tracker_state", "state" => s).set(if s == state { 1.0 } else { 0.0 });
    }
}

/// Read API latency
pub fn record_read_latency(operation: &'static str, duration: Duration) {
    histogram!("presence_tracker_read_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Timer that records read latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_read_latency(self.operation, self.start.elapsed());
    }
}
