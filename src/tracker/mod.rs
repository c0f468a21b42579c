// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-behind presence and identity tracker.
//!
//! The [`Tracker`] ties the components together:
//! - mutex-guarded ingest queues fed by the `queue_*` methods
//! - a periodic flush task that collapses and persists each window
//! - the cache tier read-through for versioned names and nicknames
//! - point and bulk reads over the durable tier
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → Draining → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use presence_tracker::{Tracker, TrackerConfig, TrackerState};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TrackerConfig {
//!     sql_url: Some("sqlite://tracker.db?mode=rwc".into()),
//!     ..Default::default()
//! };
//! let tracker = Tracker::connect(config).await?;
//! tracker.start()?;
//! assert_eq!(tracker.state(), TrackerState::Running);
//!
//! tracker.queue_last_seen(42, 1_700_000_000_000);
//! tracker.stop().await;
//! # Ok(())
//! # }
//! ```

mod admin;
mod api;
mod flush;
mod lifecycle;
mod read_through;
mod types;

pub use types::{FlushReport, MigrationReport, TrackerError, TrackerState, TrackerStatus};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::batching::ingest_queue::IngestQueue;
use crate::config::TrackerConfig;
use crate::metrics::{self, KIND_IDENTITY, KIND_LAST_SEEN, KIND_LAST_SPOKE, KIND_NICKNAME};
use crate::model::{
    IdentityUpdate, LastSeen, LastSpoke, NicknameUpdate, PrincipalId, ScopeId, Timestamp,
    GLOBAL_SCOPE,
};
use crate::storage::traits::{CacheStore, DurableStore};

/// Presence and identity tracker over a cache tier and a durable tier.
///
/// # Thread Safety
///
/// `Send + Sync`; share it behind an `Arc`. Ingest methods take `&self`,
/// hold a short non-async lock and never suspend.
pub struct Tracker {
    config: TrackerConfig,

    /// Disposable accelerator (Redis or in-memory)
    cache: Arc<dyn CacheStore>,

    /// Source of truth
    durable: Arc<dyn DurableStore>,

    queue: IngestQueue,

    /// Held for the whole of a flush cycle
    flush_gate: tokio::sync::Mutex<()>,

    /// Lifecycle state (broadcast to watchers)
    state: watch::Sender<TrackerState>,

    /// Flipped to `true` once to stop the scheduler
    shutdown: watch::Sender<bool>,

    /// Scheduler task, present while running
    task: Mutex<Option<JoinHandle<()>>>,

    last_report: Mutex<Option<FlushReport>>,
}

impl Tracker {
    /// Build a tracker over already-connected stores.
    ///
    /// Use [`Tracker::connect`] to build the stores from a config.
    pub fn new(
        config: TrackerConfig,
        cache: Arc<dyn CacheStore>,
        durable: Arc<dyn DurableStore>,
    ) -> Self {
        let (state, _) = watch::channel(TrackerState::Created);
        let (shutdown, _) = watch::channel(false);
        metrics::set_tracker_state(TrackerState::Created.as_str());

        Self {
            config,
            cache,
            durable,
            queue: IngestQueue::new(),
            flush_gate: tokio::sync::Mutex::new(()),
            state,
            shutdown,
            task: Mutex::new(None),
            last_report: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> TrackerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<TrackerState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn set_state(&self, state: TrackerState) {
        self.state.send_replace(state);
        metrics::set_tracker_state(state.as_str());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Ingest: O(1), never blocks on I/O, never fails
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record activity at `at` (epoch millis).
    pub fn queue_last_seen(&self, principal: PrincipalId, at: Timestamp) {
        self.queue.push_last_seen(LastSeen { principal, at });
        metrics::record_queued(KIND_LAST_SEEN);
    }

    /// Record a message in `scope`.
    ///
    /// Speaking is also activity, so this records last-seen, and for a
    /// non-global scope the global last-spoke, at the same instant.
    pub fn queue_last_spoke(&self, principal: PrincipalId, scope: ScopeId, at: Timestamp) {
        self.queue.push_last_seen(LastSeen { principal, at });
        self.queue.push_last_spoke(LastSpoke { principal, scope, at });
        if scope != GLOBAL_SCOPE {
            self.queue.push_last_spoke(LastSpoke { principal, scope: GLOBAL_SCOPE, at });
        }
        metrics::record_queued(KIND_LAST_SPOKE);
    }

    /// Record the principal's current account name.
    pub fn queue_identity(&self, principal: PrincipalId, name: impl Into<String>, at: Timestamp) {
        self.queue.push_identity(IdentityUpdate { principal, name: name.into(), at });
        metrics::record_queued(KIND_IDENTITY);
    }

    /// Record the principal's nickname in `scope` (`None` = no nickname).
    ///
    /// Nicknames only exist per scope: an entry for [`GLOBAL_SCOPE`] is
    /// accepted here and skipped (with a warning) at flush time.
    pub fn queue_nickname(
        &self,
        principal: PrincipalId,
        scope: ScopeId,
        nickname: Option<String>,
        at: Timestamp,
    ) {
        self.queue.push_nickname(NicknameUpdate { principal, scope, nickname, at });
        metrics::record_queued(KIND_NICKNAME);
    }
}
