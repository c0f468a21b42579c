// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Versioned writes for names and nicknames.
//!
//! ```text
//! observed ─► MGET cache ─► drop matches ─► current (value, idx) from SQL
//!          ─► idx + 1 where the value changed ─► INSERT .. DO NOTHING ─► MSET cache
//! ```
//!
//! Identity values are always `Some`; nicknames may be `None`. A key with no
//! stored row counts as `(None, 0)`, so the first name gets version 1 and a
//! first nickname of `None` is only cached, never inserted.

use std::collections::HashMap;
use std::hash::Hash;

use tracing::{debug, warn};

use crate::model::{
    IdentityRecord, NicknameRecord, PrincipalId, ScopeId, Timestamp, Versioned,
};
use crate::storage::keys::{decode_name, encode_name};

use super::{Tracker, TrackerError};

/// One value seen by the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Observed<K> {
    pub key: K,
    pub cache_key: String,
    pub value: Option<String>,
    pub at: Timestamp,
}

/// Work left after comparing against the durable tier.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct VersionPlan<K> {
    /// Observations that need a new version, with that version index
    pub inserts: Vec<(Observed<K>, i64)>,
    /// Final value per key for the cache write-through
    pub cache_writes: Vec<(String, Vec<u8>)>,
}

/// Counts from one versioned write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct VersionOutcome {
    pub inserted: usize,
    pub cache_hits: usize,
}

/// Split observations into those the cache already agrees with (counted)
/// and those that need the durable tier. `cached` is aligned with
/// `observed`; a missing or undecodable entry is a mismatch.
pub(super) fn cache_mismatches<K>(
    observed: Vec<Observed<K>>,
    cached: &[Option<Vec<u8>>],
) -> (Vec<Observed<K>>, usize) {
    let mut hits = 0;
    let mut pending = Vec::with_capacity(observed.len());

    for (i, obs) in observed.into_iter().enumerate() {
        let cached_value = match cached.get(i).and_then(Option::as_deref) {
            None => None,
            Some(bytes) => match decode_name(&obs.cache_key, bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %obs.cache_key, error = %e, "Ignoring undecodable cache entry");
                    None
                }
            },
        };

        if cached_value.as_ref() == Some(&obs.value) {
            hits += 1;
        } else {
            pending.push(obs);
        }
    }

    (pending, hits)
}

/// Assign version indexes. A value equal to the latest stored one gets no
/// insert but is still written back to the cache.
pub(super) fn plan_versions<K: Hash + Eq + Copy>(
    pending: Vec<Observed<K>>,
    mut current: HashMap<K, Versioned<Option<String>>>,
) -> VersionPlan<K> {
    let mut inserts = Vec::new();
    let mut cache_writes = Vec::with_capacity(pending.len());

    for obs in pending {
        cache_writes.push((obs.cache_key.clone(), encode_name(obs.value.as_deref())));

        let latest = current
            .entry(obs.key)
            .or_insert(Versioned { value: None, version: 0 });
        if latest.value != obs.value {
            latest.version += 1;
            latest.value = obs.value.clone();
            inserts.push((obs, latest.version));
        }
    }

    VersionPlan { inserts, cache_writes }
}

impl Tracker {
    /// Bulk cache lookup. A cache failure makes everything a miss.
    async fn filter_cached<K: Send>(
        &self,
        observed: Vec<Observed<K>>,
    ) -> (Vec<Observed<K>>, usize) {
        let keys: Vec<String> = observed.iter().map(|o| o.cache_key.clone()).collect();
        match self.cache.mget(&keys).await {
            Ok(cached) => cache_mismatches(observed, &cached),
            Err(e) => {
                warn!(keys = keys.len(), error = %e, "Cache read failed, checking durable tier for all");
                (observed, 0)
            }
        }
    }

    /// Cache write-through. Failures only cost a later durable lookup.
    pub(super) async fn write_through(&self, entries: &[(String, Vec<u8>)]) {
        for window in entries.chunks(self.config.bulk_key_limit.max(1)) {
            if let Err(e) = self.cache.mset(window).await {
                warn!(keys = window.len(), error = %e, "Cache write-through failed");
            }
        }
    }

    pub(super) async fn write_names(
        &self,
        observed: Vec<Observed<PrincipalId>>,
    ) -> Result<VersionOutcome, TrackerError> {
        let (pending, cache_hits) = self.filter_cached(observed).await;
        if pending.is_empty() {
            return Ok(VersionOutcome { inserted: 0, cache_hits });
        }

        let principals: Vec<PrincipalId> = pending.iter().map(|o| o.key).collect();
        let current = self
            .durable
            .current_names(&principals)
            .await?
            .into_iter()
            .map(|(principal, latest)| (principal, latest.map(Some)))
            .collect();

        let plan = plan_versions(pending, current);
        let records: Vec<IdentityRecord> = plan
            .inserts
            .into_iter()
            .filter_map(|(obs, version)| {
                obs.value.map(|name| IdentityRecord {
                    principal: obs.key,
                    name,
                    version,
                    captured_at: obs.at,
                })
            })
            .collect();

        let inserted = if records.is_empty() {
            0
        } else {
            self.durable.insert_names(&records).await?
        };
        debug!(checked = principals.len(), inserted, cache_hits, "Name versions written");

        self.write_through(&plan.cache_writes).await;
        Ok(VersionOutcome { inserted, cache_hits })
    }

    pub(super) async fn write_nicknames(
        &self,
        observed: Vec<Observed<(PrincipalId, ScopeId)>>,
    ) -> Result<VersionOutcome, TrackerError> {
        let (pending, cache_hits) = self.filter_cached(observed).await;
        if pending.is_empty() {
            return Ok(VersionOutcome { inserted: 0, cache_hits });
        }

        let keys: Vec<(PrincipalId, ScopeId)> = pending.iter().map(|o| o.key).collect();
        let current = self.durable.current_nicknames(&keys).await?;

        let plan = plan_versions(pending, current);
        let records: Vec<NicknameRecord> = plan
            .inserts
            .into_iter()
            .map(|(obs, version)| NicknameRecord {
                principal: obs.key.0,
                scope: obs.key.1,
                nickname: obs.value,
                version,
                captured_at: obs.at,
            })
            .collect();

        let inserted = if records.is_empty() {
            0
        } else {
            self.durable.insert_nicknames(&records).await?
        };
        debug!(checked = keys.len(), inserted, cache_hits, "Nickname versions written");

        self.write_through(&plan.cache_writes).await;
        Ok(VersionOutcome { inserted, cache_hits })
    }
}
