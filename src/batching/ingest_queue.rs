// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory ingest queues.
//!
//! Every `queue_*` call lands here. Pushing takes a short `parking_lot`
//! lock and never suspends; the flush cycle swaps the whole batch out in one
//! step with [`IngestQueue::take`]. The `presence_tracker_queue_depth` gauge
//! is set under the same lock, so it tracks the live queue even while a
//! flush is stuck on a slow backend.
//!
//! # Example
//!
//! ```
//! use presence_tracker::batching::ingest_queue::IngestQueue;
//! use presence_tracker::model::LastSeen;
//!
//! let queue = IngestQueue::new();
//! queue.push_last_seen(LastSeen { principal: 42, at: 100 });
//! assert_eq!(queue.depth().last_seen, 1);
//!
//! let batch = queue.take();
//! assert_eq!(batch.last_seen.len(), 1);
//! assert!(queue.depth().is_empty());
//! ```

use parking_lot::Mutex;
use std::time::Instant;

use crate::metrics::{self, KIND_IDENTITY, KIND_LAST_SEEN, KIND_LAST_SPOKE, KIND_NICKNAME};
use crate::model::{IdentityUpdate, LastSeen, LastSpoke, NicknameUpdate};

/// Why a flush cycle ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushReason {
    /// Scheduler tick
    #[default]
    Tick,
    /// Manual flush requested by the host
    Manual,
    /// Final drain on shutdown
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tick => write!(f, "tick"),
            Self::Manual => write!(f, "manual"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Pending item counts per queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub last_seen: usize,
    pub last_spoke: usize,
    pub identities: usize,
    pub nicknames: usize,
}

impl QueueDepth {
    #[must_use]
    pub fn total(&self) -> usize {
        self.last_seen + self.last_spoke + self.identities + self.nicknames
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Everything queued since the previous swap
#[derive(Debug)]
pub struct PendingBatch {
    pub last_seen: Vec<LastSeen>,
    pub last_spoke: Vec<LastSpoke>,
    pub identities: Vec<IdentityUpdate>,
    pub nicknames: Vec<NicknameUpdate>,
    pub opened_at: Instant,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self {
            last_seen: Vec::new(),
            last_spoke: Vec::new(),
            identities: Vec::new(),
            nicknames: Vec::new(),
            opened_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn depth(&self) -> QueueDepth {
        QueueDepth {
            last_seen: self.last_seen.len(),
            last_spoke: self.last_spoke.len(),
            identities: self.identities.len(),
            nicknames: self.nicknames.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.depth().is_empty()
    }
}

impl Default for PendingBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Unbounded, mutex-guarded ingest queue shared by all producers.
pub struct IngestQueue {
    pending: Mutex<PendingBatch>,
}

impl IngestQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(PendingBatch::new()),
        }
    }

    pub fn push_last_seen(&self, update: LastSeen) {
        let mut pending = self.pending.lock();
        pending.last_seen.push(update);
        metrics::set_queue_depth_for(KIND_LAST_SEEN, pending.last_seen.len());
    }

    pub fn push_last_spoke(&self, update: LastSpoke) {
        let mut pending = self.pending.lock();
        pending.last_spoke.push(update);
        metrics::set_queue_depth_for(KIND_LAST_SPOKE, pending.last_spoke.len());
    }

    pub fn push_identity(&self, update: IdentityUpdate) {
        let mut pending = self.pending.lock();
        pending.identities.push(update);
        metrics::set_queue_depth_for(KIND_IDENTITY, pending.identities.len());
    }

    pub fn push_nickname(&self, update: NicknameUpdate) {
        let mut pending = self.pending.lock();
        pending.nicknames.push(update);
        metrics::set_queue_depth_for(KIND_NICKNAME, pending.nicknames.len());
    }

    /// Swap the live batch for an empty one and hand back what was queued.
    pub fn take(&self) -> PendingBatch {
        let mut pending = self.pending.lock();
        let batch = std::mem::take(&mut *pending);
        metrics::set_queue_depth(&pending.depth());
        batch
    }

    #[must_use]
    pub fn depth(&self) -> QueueDepth {
        self.pending.lock().depth()
    }
}

impl Default for IngestQueue {
    fn default() -> Self {
        Self::new()
    }
}
