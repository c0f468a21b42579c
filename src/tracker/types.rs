// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the tracker.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::batching::ingest_queue::{FlushReason, QueueDepth};
use crate::storage::traits::StorageError;

/// Tracker lifecycle state.
///
/// Use [`super::Tracker::state()`] to check the current state or
/// [`super::Tracker::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Built, scheduler not started yet (manual flushes still work)
    Created,
    /// Scheduler ticking
    Running,
    /// Shutdown requested, final flush in progress
    Draining,
    /// Final flush done
    Stopped,
}

impl TrackerState {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for TrackerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Bulk request for {requested} keys exceeds limit of {limit}")]
    LimitExceeded { requested: usize, limit: usize },
    #[error("Bulk request with no keys")]
    EmptyRequest,
    #[error("No durable store configured")]
    NotConnected,
}

/// Outcome of one flush cycle.
///
/// Each of the four kinds is flushed as an independent stage; a stage error
/// drops that stage's batch and is listed in `errors`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    /// Correlates the cycle's log lines
    pub cycle_id: Uuid,
    pub reason: FlushReason,
    /// Items swapped out of the ingest queue
    pub queued: QueueDepth,
    /// Presence rows upserted after collapse
    pub last_seen_rows: usize,
    pub last_spoke_rows: usize,
    /// Versions actually inserted
    pub name_versions: usize,
    pub nickname_versions: usize,
    /// Identity/nickname updates already matching the cache
    pub cache_hits: usize,
    /// Entries rejected individually (e.g. a nickname for the global scope)
    pub skipped: usize,
    /// Queued items lost to failed stages
    pub dropped: usize,
    pub errors: Vec<String>,
    pub duration: Duration,
}

impl FlushReport {
    pub(crate) fn new(cycle_id: Uuid, reason: FlushReason, queued: QueueDepth) -> Self {
        Self {
            cycle_id,
            reason,
            queued,
            last_seen_rows: 0,
            last_spoke_rows: 0,
            name_versions: 0,
            nickname_versions: 0,
            cache_hits: 0,
            skipped: 0,
            dropped: 0,
            errors: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Every stage succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Snapshot returned by [`super::Tracker::status()`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerStatus {
    pub state: TrackerState,
    /// Items waiting for the next flush
    pub pending: QueueDepth,
    pub last_flush: Option<FlushReport>,
}

/// Outcome of [`super::Tracker::migrate_legacy_presence()`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Keys found under the legacy prefixes
    pub scanned: usize,
    pub last_seen_queued: usize,
    pub last_spoke_queued: usize,
    /// Keys that did not parse or whose value was not 8 bytes
    pub malformed: usize,
    /// Keys that vanished between the scan and the read
    pub missing: usize,
}

impl MigrationReport {
    #[must_use]
    pub fn queued(&self) -> usize {
        self.last_seen_queued + self.last_spoke_queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_state_display() {
        assert_eq!(format!("{}", TrackerState::Created), "Created");
        assert_eq!(format!("{}", TrackerState::Draining), "Draining");
        assert_eq!(TrackerState::Stopped.as_str(), "stopped");
    }

    #[test]
    fn test_flush_report_success() {
        let mut report = FlushReport::new(Uuid::new_v4(), FlushReason::Tick, QueueDepth::default());
        assert!(report.is_success());

        report.errors.push("last_seen: backend down".into());
        assert!(!report.is_success());
    }

    #[test]
    fn test_error_messages() {
        let err = TrackerError::LimitExceeded { requested: 60_000, limit: 50_000 };
        assert_eq!(err.to_string(), "Bulk request for 60000 keys exceeds limit of 50000");

        let err: TrackerError = StorageError::Backend("boom".into()).into();
        assert!(matches!(err, TrackerError::Storage(_)));
        assert_eq!(err.to_string(), "Storage backend error: boom");
    }

    #[test]
    fn test_migration_report_queued() {
        let report = MigrationReport { last_seen_queued: 2, last_spoke_queued: 3, ..Default::default() };
        assert_eq!(report.queued(), 5);
    }
}
