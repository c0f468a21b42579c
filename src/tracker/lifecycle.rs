// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tracker lifecycle: connect, start, run loop, stop.

use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::batching::ingest_queue::FlushReason;
use crate::config::TrackerConfig;
use crate::metrics;
use crate::storage::memory::InMemoryCache;
use crate::storage::redis::RedisCache;
use crate::storage::sql::SqlStore;
use crate::storage::traits::{CacheStore, DurableStore};

use super::{FlushReport, Tracker, TrackerError, TrackerState};

impl Tracker {
    /// Connect both tiers from `config`.
    ///
    /// `sql_url` is required. Without `redis_url` the cache tier lives in
    /// process memory. Connections are retried with the startup preset, so a
    /// wrong URL fails within a few seconds.
    #[tracing::instrument(skip(config), fields(has_redis = config.redis_url.is_some()))]
    pub async fn connect(config: TrackerConfig) -> Result<Arc<Self>, TrackerError> {
        let sql_url = config.sql_url.clone().ok_or(TrackerError::NotConnected)?;

        let mut sql = SqlStore::with_pool_size(&sql_url, config.sql_max_connections).await?;
        if let Some(max_params) = config.max_params {
            sql = sql.with_max_params(max_params);
        }
        info!(dialect = ?sql.dialect(), max_params = sql.max_params(), "Durable tier connected");
        let durable: Arc<dyn DurableStore> = Arc::new(sql);

        let cache: Arc<dyn CacheStore> = match config.redis_url.as_deref() {
            Some(url) => {
                let redis = RedisCache::with_prefix(url, Some(&config.key_prefix)).await?;
                info!(prefix = %config.key_prefix, "Cache tier connected (Redis)");
                Arc::new(redis)
            }
            None => {
                warn!("No Redis URL configured, cache tier is process-local");
                Arc::new(InMemoryCache::new())
            }
        };

        Ok(Arc::new(Self::new(config, cache, durable)))
    }

    /// Spawn the periodic flush task. Requires a tokio runtime.
    ///
    /// Starting a running tracker is a no-op; a stopped tracker cannot be
    /// restarted.
    pub fn start(self: &Arc<Self>) -> Result<(), TrackerError> {
        // Held until the handle is stored, so a concurrent stop() always
        // finds the task it has to wait for
        let mut task = self.task.lock();
        let shutdown = self.shutdown.subscribe();

        let started = self.state.send_if_modified(|state| {
            if *state == TrackerState::Created {
                *state = TrackerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return match self.state() {
                TrackerState::Running => Ok(()),
                state => Err(TrackerError::Validation(format!("cannot start a tracker that is {}", state))),
            };
        }

        *task = Some(tokio::spawn(run(Arc::downgrade(self), shutdown)));
        drop(task);

        metrics::set_tracker_state(TrackerState::Running.as_str());
        info!(interval_ms = self.config.flush_interval_ms, "Tracker running");
        Ok(())
    }

    /// Stop the scheduler and run exactly one final flush.
    ///
    /// Never fails: a failed final flush is logged and its updates are lost.
    /// Returns `None` if the tracker was already stopping or stopped.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> Option<FlushReport> {
        let began = self.state.send_if_modified(|state| match state {
            TrackerState::Created | TrackerState::Running => {
                *state = TrackerState::Draining;
                true
            }
            TrackerState::Draining | TrackerState::Stopped => false,
        });
        if !began {
            debug!("Stop requested twice, ignoring");
            return None;
        }
        metrics::set_tracker_state(TrackerState::Draining.as_str());
        info!("Stopping tracker, draining queues");

        self.shutdown.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Flush task ended abnormally");
            }
        }

        let report = self.flush_cycle(FlushReason::Shutdown).await;
        if !report.is_success() {
            error!(dropped = report.dropped, errors = ?report.errors, "Final flush failed");
        }

        // Anything queued while the final flush ran has nowhere to go
        let leftover = self.queue.take().depth();
        if !leftover.is_empty() {
            error!(
                last_seen = leftover.last_seen,
                last_spoke = leftover.last_spoke,
                identities = leftover.identities,
                nicknames = leftover.nicknames,
                "Dropping updates queued during shutdown"
            );
            metrics::record_dropped(metrics::KIND_LAST_SEEN, leftover.last_seen);
            metrics::record_dropped(metrics::KIND_LAST_SPOKE, leftover.last_spoke);
            metrics::record_dropped(metrics::KIND_IDENTITY, leftover.identities);
            metrics::record_dropped(metrics::KIND_NICKNAME, leftover.nicknames);
        }

        self.set_state(TrackerState::Stopped);
        info!("Tracker stopped");
        Some(report)
    }
}

/// Scheduler loop. Holds only a weak handle so a dropped tracker ends it.
async fn run(tracker: Weak<Tracker>, mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow_and_update() {
        return;
    }
    let interval = match tracker.upgrade() {
        Some(t) => t.config.flush_interval(),
        None => return,
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Flush task received shutdown");
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(tracker) = tracker.upgrade() else {
                    debug!("Tracker dropped, ending flush task");
                    break;
                };
                // Failures are logged and counted inside the cycle
                tracker.flush_cycle(FlushReason::Tick).await;
            }
        }
    }
}
