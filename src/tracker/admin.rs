// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Administrative operations: full resync, legacy migration, status.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::model::{now_millis, LastSeen, LastSpoke, MemberSnapshot, PrincipalId, GLOBAL_SCOPE};
use crate::storage::keys::{
    decode_timestamp, parse_legacy_key, LegacyKey, LEGACY_LAST_SEEN_PREFIX,
    LEGACY_LAST_SPOKE_PREFIX,
};

use super::{MigrationReport, Tracker, TrackerError, TrackerStatus};

impl Tracker {
    /// Re-queue the current state of every member the host knows about.
    ///
    /// Queues the name, the nickname (for scoped snapshots) and, for online
    /// members, a last-seen of now. Unchanged values cost a cache lookup at
    /// flush time and nothing more. Returns the number of distinct
    /// principals queued.
    pub fn force_resync(&self, snapshots: impl IntoIterator<Item = MemberSnapshot>) -> usize {
        let at = now_millis();
        let mut principals: HashSet<PrincipalId> = HashSet::new();

        for member in snapshots {
            self.queue_identity(member.principal, member.name, at);
            if member.scope != GLOBAL_SCOPE {
                self.queue_nickname(member.principal, member.scope, member.nickname, at);
            }
            if member.online {
                self.queue_last_seen(member.principal, at);
            }
            principals.insert(member.principal);
        }

        info!(principals = principals.len(), "Queued full resync");
        principals.len()
    }

    /// Move presence timestamps from the legacy cache-only keys into the
    /// presence queues; the next flush persists them.
    ///
    /// Legacy keys are left in place. Running this twice is harmless since
    /// presence upserts never move a timestamp backward.
    #[tracing::instrument(skip(self))]
    pub async fn migrate_legacy_presence(&self) -> Result<MigrationReport, TrackerError> {
        let mut keys = self.cache.scan_prefix(LEGACY_LAST_SEEN_PREFIX).await?;
        keys.extend(self.cache.scan_prefix(LEGACY_LAST_SPOKE_PREFIX).await?);

        let mut report = MigrationReport { scanned: keys.len(), ..Default::default() };

        let mut parsed = Vec::with_capacity(keys.len());
        for key in keys {
            match parse_legacy_key(&key) {
                Some(legacy) => parsed.push((key, legacy)),
                None => {
                    warn!(key = %key, "Skipping malformed legacy key");
                    report.malformed += 1;
                }
            }
        }

        for window in parsed.chunks(self.config.bulk_key_limit.max(1)) {
            let names: Vec<String> = window.iter().map(|(key, _)| key.clone()).collect();
            let values = self.cache.mget(&names).await?;

            for ((key, legacy), value) in window.iter().zip(values) {
                let Some(bytes) = value else {
                    report.missing += 1;
                    continue;
                };
                let at = match decode_timestamp(key, &bytes) {
                    Ok(at) => at,
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed legacy value");
                        report.malformed += 1;
                        continue;
                    }
                };

                match *legacy {
                    LegacyKey::LastSeen(principal) => {
                        self.queue.push_last_seen(LastSeen { principal, at });
                        report.last_seen_queued += 1;
                    }
                    LegacyKey::LastSpoke(principal, scope) => {
                        self.queue.push_last_spoke(LastSpoke { principal, scope, at });
                        report.last_spoke_queued += 1;
                    }
                }
            }
        }

        info!(
            scanned = report.scanned,
            last_seen = report.last_seen_queued,
            last_spoke = report.last_spoke_queued,
            malformed = report.malformed,
            missing = report.missing,
            "Legacy presence queued for migration"
        );
        Ok(report)
    }

    #[must_use]
    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            state: self.state(),
            pending: self.queue.depth(),
            last_flush: self.last_report.lock().clone(),
        }
    }
}
