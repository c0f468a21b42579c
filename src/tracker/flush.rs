// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The drain-flush cycle.
//!
//! One cycle swaps the ingest queue out and runs four independent stages
//! over the swapped batch:
//!
//! | stage      | collapse            | write                                   |
//! |------------|---------------------|-----------------------------------------|
//! | last_seen  | max timestamp       | chunked upsert, `GREATEST(old, new)`    |
//! | last_spoke | max timestamp       | chunked upsert, `GREATEST(old, new)`    |
//! | identity   | last queued wins    | read-through, versioned insert, cache   |
//! | nickname   | last queued wins    | read-through, versioned insert, cache   |
//!
//! A failing stage drops its own items and nothing else. Nothing is
//! re-queued: the next window carries fresher values anyway. The versioned
//! stages commit window by window, so a failure there only drops the keys
//! from the failing window onward.

use std::time::Instant;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batching::dedup::{collapse_last_queued, collapse_latest};
use crate::batching::ingest_queue::{FlushReason, PendingBatch};
use crate::metrics::{self, KIND_IDENTITY, KIND_LAST_SEEN, KIND_LAST_SPOKE, KIND_NICKNAME};
use crate::model::{IdentityUpdate, LastSeen, LastSpoke, NicknameUpdate, GLOBAL_SCOPE};
use crate::storage::keys::{name_key, nickname_key};
use crate::storage::upsert::{NAME_COLUMNS, NICKNAME_COLUMNS};

use super::read_through::Observed;
use super::{FlushReport, Tracker, TrackerError};

impl Tracker {
    /// Run one flush cycle now.
    ///
    /// Waits for any cycle already in progress (scheduled or manual), then
    /// flushes whatever has been queued since.
    pub async fn flush_now(&self) -> FlushReport {
        self.flush_cycle(FlushReason::Manual).await
    }

    #[tracing::instrument(skip(self), fields(cycle_id))]
    pub(super) async fn flush_cycle(&self, reason: FlushReason) -> FlushReport {
        let _gate = self.flush_gate.lock().await;

        let batch = self.queue.take();

        let cycle_id = Uuid::new_v4();
        tracing::Span::current().record("cycle_id", tracing::field::display(cycle_id));

        let mut report = FlushReport::new(cycle_id, reason, batch.depth());
        if batch.is_empty() {
            return report;
        }

        let queued = report.queued;
        let start = Instant::now();
        let window_ms = batch.opened_at.elapsed().as_millis() as u64;
        let PendingBatch { last_seen, last_spoke, identities, nicknames, .. } = batch;

        match self.flush_last_seen(last_seen).await {
            Ok(rows) => report.last_seen_rows = rows,
            Err(e) => stage_failed(&mut report, KIND_LAST_SEEN, queued.last_seen, e),
        }

        match self.flush_last_spoke(last_spoke).await {
            Ok(rows) => report.last_spoke_rows = rows,
            Err(e) => stage_failed(&mut report, KIND_LAST_SPOKE, queued.last_spoke, e),
        }

        if let Err(f) = self.flush_identities(identities, &mut report).await {
            stage_failed(&mut report, KIND_IDENTITY, f.unwritten, f.error);
        }

        if let Err(f) = self.flush_nicknames(nicknames, &mut report).await {
            stage_failed(&mut report, KIND_NICKNAME, f.unwritten, f.error);
        }

        report.duration = start.elapsed();
        metrics::record_flush(report.duration, report.is_success());

        if report.is_success() {
            info!(
                %reason,
                queued = queued.total(),
                window_ms,
                last_seen = report.last_seen_rows,
                last_spoke = report.last_spoke_rows,
                names = report.name_versions,
                nicknames = report.nickname_versions,
                cache_hits = report.cache_hits,
                skipped = report.skipped,
                duration_ms = report.duration.as_millis() as u64,
                "Flush complete"
            );
        } else {
            warn!(
                %reason,
                queued = queued.total(),
                dropped = report.dropped,
                failed_stages = report.errors.len(),
                duration_ms = report.duration.as_millis() as u64,
                "Flush completed with dropped stages"
            );
        }

        *self.last_report.lock() = Some(report.clone());
        report
    }

    async fn flush_last_seen(&self, rows: Vec<LastSeen>) -> Result<usize, TrackerError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let queued = rows.len();
        let collapsed = collapse_latest(rows);

        self.durable.upsert_last_seen(&collapsed).await?;
        debug!(queued, rows = collapsed.len(), "Flushed last_seen");
        metrics::record_flushed_rows(KIND_LAST_SEEN, collapsed.len());
        Ok(collapsed.len())
    }

    async fn flush_last_spoke(&self, rows: Vec<LastSpoke>) -> Result<usize, TrackerError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let queued = rows.len();
        let collapsed = collapse_latest(rows);

        self.durable.upsert_last_spoke(&collapsed).await?;
        debug!(queued, rows = collapsed.len(), "Flushed last_spoke");
        metrics::record_flushed_rows(KIND_LAST_SPOKE, collapsed.len());
        Ok(collapsed.len())
    }

    /// Keys per read-through window: bounded by the bulk key limit and by
    /// what one insert statement can carry.
    fn versioned_window(&self, columns: usize) -> usize {
        self.config
            .bulk_key_limit
            .min(self.durable.max_params() / columns)
            .max(1)
    }

    async fn flush_identities(
        &self,
        updates: Vec<IdentityUpdate>,
        report: &mut FlushReport,
    ) -> Result<(), StageFailure> {
        if updates.is_empty() {
            return Ok(());
        }
        let collapsed = collapse_last_queued(updates);
        let mut written = 0;

        for window in collapsed.chunks(self.versioned_window(NAME_COLUMNS)) {
            let observed = window
                .iter()
                .map(|u| Observed {
                    key: u.principal,
                    cache_key: name_key(u.principal),
                    value: Some(u.name.clone()),
                    at: u.at,
                })
                .collect();

            let outcome = self
                .write_names(observed)
                .await
                .map_err(|error| StageFailure { unwritten: collapsed.len() - written, error })?;
            written += window.len();
            report.name_versions += outcome.inserted;
            report.cache_hits += outcome.cache_hits;
            metrics::record_flushed_rows(KIND_IDENTITY, outcome.inserted);
            metrics::record_cache_hits(KIND_IDENTITY, outcome.cache_hits);
        }
        Ok(())
    }

    async fn flush_nicknames(
        &self,
        updates: Vec<NicknameUpdate>,
        report: &mut FlushReport,
    ) -> Result<(), StageFailure> {
        if updates.is_empty() {
            return Ok(());
        }

        let (scoped, unscoped): (Vec<_>, Vec<_>) =
            updates.into_iter().partition(|u| u.scope != GLOBAL_SCOPE);
        if !unscoped.is_empty() {
            warn!(
                count = unscoped.len(),
                principal = unscoped[0].principal,
                "Skipping nickname updates without a scope"
            );
            metrics::record_skipped("global_scope_nickname", unscoped.len());
            report.skipped += unscoped.len();
        }

        let collapsed = collapse_last_queued(scoped);
        let mut written = 0;

        for window in collapsed.chunks(self.versioned_window(NICKNAME_COLUMNS)) {
            let observed = window
                .iter()
                .map(|u| Observed {
                    key: (u.principal, u.scope),
                    cache_key: nickname_key(u.principal, u.scope),
                    value: u.nickname.clone(),
                    at: u.at,
                })
                .collect();

            let outcome = self
                .write_nicknames(observed)
                .await
                .map_err(|error| StageFailure { unwritten: collapsed.len() - written, error })?;
            written += window.len();
            report.nickname_versions += outcome.inserted;
            report.cache_hits += outcome.cache_hits;
            metrics::record_flushed_rows(KIND_NICKNAME, outcome.inserted);
            metrics::record_cache_hits(KIND_NICKNAME, outcome.cache_hits);
        }
        Ok(())
    }
}

/// A versioned stage that stopped partway through its windows
struct StageFailure {
    /// Collapsed keys from the failing window onward
    unwritten: usize,
    error: TrackerError,
}

fn stage_failed(report: &mut FlushReport, kind: &'static str, lost: usize, error: TrackerError) {
    error!(
        cycle_id = %report.cycle_id,
        kind,
        dropped = lost,
        error = %error,
        "Flush stage failed, dropping its updates"
    );
    metrics::record_dropped(kind, lost);
    report.dropped += lost;
    report.errors.push(format!("{}: {}", kind, error));
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{harness, harness_with};
    use crate::config::TrackerConfig;
    use crate::storage::keys::{name_key, nickname_key, NULL_NAME_SENTINEL};
    use crate::storage::traits::{CacheStore, DurableStore};

    #[tokio::test]
    async fn test_empty_flush_is_a_noop() {
        let h = harness().await;
        let report = h.tracker.flush_now().await;
        assert!(report.is_success());
        assert!(report.queued.is_empty());
        assert!(h.tracker.status().last_flush.is_none());
    }

    #[tokio::test]
    async fn test_last_seen_keeps_max_within_and_across_windows() {
        let h = harness().await;
        h.tracker.queue_last_seen(42, 100);
        h.tracker.queue_last_seen(42, 105);
        let report = h.tracker.flush_now().await;
        assert_eq!(report.last_seen_rows, 1);
        assert_eq!(h.tracker.last_seen(42).await.unwrap(), 105);

        h.tracker.queue_last_seen(42, 103);
        h.tracker.flush_now().await;
        assert_eq!(h.tracker.last_seen(42).await.unwrap(), 105);
    }

    #[tokio::test]
    async fn test_names_are_versioned_and_cached() {
        let h = harness().await;
        h.tracker.queue_identity(7, "alice", 1);
        let report = h.tracker.flush_now().await;
        assert_eq!(report.name_versions, 1);
        assert_eq!(h.cache.get(&name_key(7)).await.unwrap(), Some(b"alice".to_vec()));

        // Same name again: resolved by the cache
        h.tracker.queue_identity(7, "alice", 2);
        let report = h.tracker.flush_now().await;
        assert_eq!(report.name_versions, 0);
        assert_eq!(report.cache_hits, 1);

        h.tracker.queue_identity(7, "alicia", 3);
        h.tracker.flush_now().await;
        let current = h.durable.current_names(&[7]).await.unwrap();
        assert_eq!(current[&7].version, 2);
        assert_eq!(current[&7].value, "alicia");
    }

    #[tokio::test]
    async fn test_lost_cache_does_not_duplicate_versions() {
        let h = harness().await;
        h.tracker.queue_identity(7, "alice", 1);
        h.tracker.flush_now().await;

        h.cache.clear();
        h.tracker.queue_identity(7, "alice", 2);
        let report = h.tracker.flush_now().await;
        assert_eq!(report.name_versions, 0);
        assert_eq!(h.durable.name_history(7, None).await.unwrap(), vec!["alice".to_string()]);
        // Cache healed from the durable tier
        assert_eq!(h.cache.get(&name_key(7)).await.unwrap(), Some(b"alice".to_vec()));
    }

    #[tokio::test]
    async fn test_last_queued_name_wins_within_window() {
        let h = harness().await;
        h.tracker.queue_identity(7, "a", 1);
        h.tracker.queue_identity(7, "b", 2);
        h.tracker.queue_identity(7, "c", 3);
        h.tracker.flush_now().await;
        assert_eq!(h.durable.name_history(7, None).await.unwrap(), vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn test_global_scope_nickname_is_skipped_not_fatal() {
        let h = harness().await;
        h.tracker.queue_nickname(1, 0, Some("bad".into()), 1);
        h.tracker.queue_nickname(1, 5, Some("good".into()), 1);

        let report = h.tracker.flush_now().await;
        assert!(report.is_success());
        assert_eq!(report.skipped, 1);
        assert_eq!(report.nickname_versions, 1);
        assert!(h.cache.get(&nickname_key(1, 0)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_null_nickname_is_cached_only() {
        let h = harness().await;
        h.tracker.queue_nickname(1, 5, None, 1);
        let report = h.tracker.flush_now().await;
        assert_eq!(report.nickname_versions, 0);
        assert_eq!(h.cache.get(&nickname_key(1, 5)).await.unwrap(), Some(NULL_NAME_SENTINEL.to_vec()));

        // Setting then clearing a nickname stores both
        h.tracker.queue_nickname(1, 5, Some("nick".into()), 2);
        h.tracker.flush_now().await;
        h.tracker.queue_nickname(1, 5, None, 3);
        h.tracker.flush_now().await;
        let history = h.durable.nickname_history(1, 5, None).await.unwrap();
        assert_eq!(history, vec![None, Some("nick".to_string())]);
    }

    #[tokio::test]
    async fn test_small_windows_still_write_everything() {
        let config = TrackerConfig { bulk_key_limit: 3, ..Default::default() };
        let h = harness_with(config).await;
        for principal in 1..=10 {
            h.tracker.queue_identity(principal, format!("user{}", principal), 1);
        }

        let report = h.tracker.flush_now().await;
        assert_eq!(report.name_versions, 10);
        let current = h.durable.current_names(&(1..=10).collect::<Vec<_>>()).await.unwrap();
        assert_eq!(current.len(), 10);
    }

    #[tokio::test]
    async fn test_last_report_is_recorded() {
        let h = harness().await;
        h.tracker.queue_last_seen(1, 10);
        let report = h.tracker.flush_now().await;
        assert_eq!(h.tracker.status().last_flush, Some(report));
    }
}
