// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read API and immediate (unqueued) identity updates.
//!
//! Presence reads go straight to the durable tier. Name and nickname reads
//! try the cache first and memoize what the durable tier says, including
//! "nothing", so repeated lookups of unknown principals stay cheap.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::metrics::LatencyTimer;
use crate::model::{now_millis, PrincipalId, Presence, ScopeId, Timestamp, GLOBAL_SCOPE, NEVER};
use crate::storage::keys::{decode_name, encode_name, name_key, nickname_key};

use super::read_through::Observed;
use super::{Tracker, TrackerError};

impl Tracker {
    // ═══════════════════════════════════════════════════════════════════════════
    // Presence
    // ═══════════════════════════════════════════════════════════════════════════

    /// Last activity anywhere, or [`NEVER`] for an unknown principal.
    pub async fn last_seen(&self, principal: PrincipalId) -> Result<Timestamp, TrackerError> {
        let _timer = LatencyTimer::new("last_seen");
        let seen = self.durable.last_seen(&[principal]).await?;
        Ok(seen.get(&principal).copied().unwrap_or(NEVER))
    }

    /// Last message in `scope` ([`GLOBAL_SCOPE`] for anywhere).
    pub async fn last_spoke(&self, principal: PrincipalId, scope: ScopeId) -> Result<Timestamp, TrackerError> {
        let _timer = LatencyTimer::new("last_spoke");
        let spoke = self.durable.last_spoke(&[principal], &[scope]).await?;
        Ok(spoke.get(&(principal, scope)).copied().unwrap_or(NEVER))
    }

    /// Combined view: last seen, last spoke anywhere, last spoke in `scope`.
    pub async fn presence(&self, principal: PrincipalId, scope: ScopeId) -> Result<Presence, TrackerError> {
        let mut all = self.bulk_last_seen(&[principal], scope).await?;
        Ok(all.pop().unwrap_or_default())
    }

    /// [`presence`](Self::presence) for many principals sharing one scope.
    ///
    /// The result is aligned with `principals`; duplicates are allowed and
    /// unknown principals get [`Presence::default()`].
    ///
    /// # Errors
    ///
    /// [`TrackerError::EmptyRequest`] for an empty slice and
    /// [`TrackerError::LimitExceeded`] above `bulk_key_limit` distinct
    /// principals.
    pub async fn bulk_last_seen(
        &self,
        principals: &[PrincipalId],
        scope: ScopeId,
    ) -> Result<Vec<Presence>, TrackerError> {
        let _timer = LatencyTimer::new("bulk_last_seen");
        if principals.is_empty() {
            return Err(TrackerError::EmptyRequest);
        }
        let distinct = principals.iter().collect::<HashSet<_>>().len();
        if distinct > self.config.bulk_key_limit {
            return Err(TrackerError::LimitExceeded {
                requested: distinct,
                limit: self.config.bulk_key_limit,
            });
        }

        let scopes: &[ScopeId] = if scope == GLOBAL_SCOPE {
            &[GLOBAL_SCOPE]
        } else {
            &[GLOBAL_SCOPE, scope]
        };

        let seen = self.durable.last_seen(principals).await?;
        let spoke = self.durable.last_spoke(principals, scopes).await?;

        Ok(principals
            .iter()
            .map(|p| Presence {
                last_seen: seen.get(p).copied().unwrap_or(NEVER),
                last_spoke: spoke.get(&(*p, GLOBAL_SCOPE)).copied().unwrap_or(NEVER),
                scope_last_spoke: spoke.get(&(*p, scope)).copied().unwrap_or(NEVER),
            })
            .collect())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Names and nicknames
    // ═══════════════════════════════════════════════════════════════════════════

    /// Names newest first.
    ///
    /// With `since`, only names captured within that window plus the one
    /// held when it opened. Falls back to the last known name when the
    /// history is empty; empty only for a never-observed principal.
    pub async fn names_for(
        &self,
        principal: PrincipalId,
        since: Option<Duration>,
    ) -> Result<Vec<String>, TrackerError> {
        let _timer = LatencyTimer::new("names_for");
        let history = self.durable.name_history(principal, cutoff(since)).await?;
        if !history.is_empty() {
            return Ok(history);
        }
        Ok(self.last_name(principal).await?.into_iter().collect())
    }

    /// Nicknames in `scope` newest first, cleared (null) entries omitted.
    ///
    /// Same window and fallback rules as [`names_for`](Self::names_for).
    pub async fn nicks_for(
        &self,
        principal: PrincipalId,
        scope: ScopeId,
        since: Option<Duration>,
    ) -> Result<Vec<String>, TrackerError> {
        let _timer = LatencyTimer::new("nicks_for");
        require_scope(scope)?;

        let history: Vec<String> = self
            .durable
            .nickname_history(principal, scope, cutoff(since))
            .await?
            .into_iter()
            .flatten()
            .collect();
        if !history.is_empty() {
            return Ok(history);
        }
        Ok(self.last_nickname(principal, scope).await?.into_iter().collect())
    }

    /// Current name: cache, then durable tier. The answer (even `None`) is
    /// written back to the cache.
    pub async fn last_name(&self, principal: PrincipalId) -> Result<Option<String>, TrackerError> {
        let key = name_key(principal);
        if let Some(cached) = self.cached_name(&key).await {
            return Ok(cached);
        }

        let name = self
            .durable
            .current_names(&[principal])
            .await?
            .remove(&principal)
            .map(|latest| latest.value);
        self.memoize(&key, name.as_deref()).await;
        Ok(name)
    }

    /// Current nickname in `scope`, same caching as [`last_name`](Self::last_name).
    pub async fn last_nickname(
        &self,
        principal: PrincipalId,
        scope: ScopeId,
    ) -> Result<Option<String>, TrackerError> {
        require_scope(scope)?;
        let key = nickname_key(principal, scope);
        if let Some(cached) = self.cached_name(&key).await {
            return Ok(cached);
        }

        let nickname = self
            .durable
            .current_nicknames(&[(principal, scope)])
            .await?
            .remove(&(principal, scope))
            .and_then(|latest| latest.value);
        self.memoize(&key, nickname.as_deref()).await;
        Ok(nickname)
    }

    /// Record a name change now instead of at the next flush. Returns whether
    /// a new version was stored.
    pub async fn update_identity_now(
        &self,
        principal: PrincipalId,
        name: impl Into<String>,
    ) -> Result<bool, TrackerError> {
        let observed = Observed {
            key: principal,
            cache_key: name_key(principal),
            value: Some(name.into()),
            at: now_millis(),
        };
        let outcome = self.write_names(vec![observed]).await?;
        Ok(outcome.inserted > 0)
    }

    /// Record a nickname change now. Returns whether a new version was stored.
    pub async fn update_nickname_now(
        &self,
        principal: PrincipalId,
        scope: ScopeId,
        nickname: Option<String>,
    ) -> Result<bool, TrackerError> {
        require_scope(scope)?;
        let observed = Observed {
            key: (principal, scope),
            cache_key: nickname_key(principal, scope),
            value: nickname,
            at: now_millis(),
        };
        let outcome = self.write_nicknames(vec![observed]).await?;
        Ok(outcome.inserted > 0)
    }

    /// `Some(value)` on a usable cache hit. Cache errors count as a miss.
    async fn cached_name(&self, key: &str) -> Option<Option<String>> {
        let bytes = match self.cache.get(key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, using durable tier");
                return None;
            }
        };
        match decode_name(key, &bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Ignoring undecodable cache entry");
                None
            }
        }
    }

    async fn memoize(&self, key: &str, value: Option<&str>) {
        if let Err(e) = self.cache.set(key, &encode_name(value)).await {
            debug!(key, error = %e, "Could not memoize lookup");
        }
    }
}

/// Start of the lookback window. Windows wider than the clock can express
/// clamp to "everything".
fn cutoff(since: Option<Duration>) -> Option<Timestamp> {
    since.map(|window| {
        let window = Timestamp::try_from(window.as_millis()).unwrap_or(Timestamp::MAX);
        now_millis().saturating_sub(window)
    })
}

fn require_scope(scope: ScopeId) -> Result<(), TrackerError> {
    if scope == GLOBAL_SCOPE {
        return Err(TrackerError::Validation("nicknames require a non-global scope".into()));
    }
    Ok(())
}
