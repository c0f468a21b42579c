// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tracked entities and the rows persisted for them.
//!
//! Principals and scopes are opaque numeric ids handed to us by the event
//! source. Timestamps are milliseconds since the Unix epoch; `0` doubles as
//! the "never seen" sentinel returned by the read API.

use std::hash::Hash;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque id of a tracked actor.
pub type PrincipalId = i64;

/// Opaque id of a grouping context. [`GLOBAL_SCOPE`] means "global".
pub type ScopeId = i64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Scope sentinel for global (cross-scope) values.
pub const GLOBAL_SCOPE: ScopeId = 0;

/// Returned for principals we have never observed.
pub const NEVER: Timestamp = 0;

/// Current wall-clock time in milliseconds.
#[must_use]
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(NEVER)
}

/// An update that collapses onto an entity key during a flush window.
pub trait Keyed {
    type Key: Hash + Eq + Copy;

    fn key(&self) -> Self::Key;
}

/// A keyed update carrying an observation time.
pub trait Timestamped: Keyed {
    fn at(&self) -> Timestamp;
}

/// Last time a principal was active anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastSeen {
    pub principal: PrincipalId,
    pub at: Timestamp,
}

impl Keyed for LastSeen {
    type Key = PrincipalId;

    fn key(&self) -> PrincipalId {
        self.principal
    }
}

impl Timestamped for LastSeen {
    fn at(&self) -> Timestamp {
        self.at
    }
}

/// Last time a principal spoke, per scope. `scope == GLOBAL_SCOPE` is the
/// cross-scope value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastSpoke {
    pub principal: PrincipalId,
    pub scope: ScopeId,
    pub at: Timestamp,
}

impl Keyed for LastSpoke {
    type Key = (PrincipalId, ScopeId);

    fn key(&self) -> (PrincipalId, ScopeId) {
        (self.principal, self.scope)
    }
}

impl Timestamped for LastSpoke {
    fn at(&self) -> Timestamp {
        self.at
    }
}

/// An observed account name, waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub principal: PrincipalId,
    pub name: String,
    pub at: Timestamp,
}

impl Keyed for IdentityUpdate {
    type Key = PrincipalId;

    fn key(&self) -> PrincipalId {
        self.principal
    }
}

/// An observed per-scope nickname (or its absence), waiting for the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicknameUpdate {
    pub principal: PrincipalId,
    pub scope: ScopeId,
    pub nickname: Option<String>,
    pub at: Timestamp,
}

impl Keyed for NicknameUpdate {
    type Key = (PrincipalId, ScopeId);

    fn key(&self) -> (PrincipalId, ScopeId) {
        (self.principal, self.scope)
    }
}

/// One row of the name history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub principal: PrincipalId,
    pub name: String,
    pub version: i64,
    pub captured_at: Timestamp,
}

/// One row of the per-scope nickname history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicknameRecord {
    pub principal: PrincipalId,
    pub scope: ScopeId,
    pub nickname: Option<String>,
    pub version: i64,
    pub captured_at: Timestamp,
}

/// Most recent persisted value together with its version index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

impl<T> Versioned<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }
}

/// Combined presence view for one principal.
///
/// Every field is [`NEVER`] when nothing is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Presence {
    pub last_seen: Timestamp,
    pub last_spoke: Timestamp,
    pub scope_last_spoke: Timestamp,
}

/// Current state of one member as reported by the host, used for resyncs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub principal: PrincipalId,
    pub scope: ScopeId,
    pub name: String,
    pub nickname: Option<String>,
    pub online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_last_spoke_key_includes_scope() {
        let global = LastSpoke { principal: 1, scope: GLOBAL_SCOPE, at: 10 };
        let scoped = LastSpoke { principal: 1, scope: 99, at: 10 };
        assert_ne!(global.key(), scoped.key());
    }

    #[test]
    fn test_presence_default_is_never() {
        let p = Presence::default();
        assert_eq!(p.last_seen, NEVER);
        assert_eq!(p.last_spoke, NEVER);
        assert_eq!(p.scope_last_spoke, NEVER);
    }

    #[test]
    fn test_versioned_map_keeps_version() {
        let v = Versioned { value: "alice".to_string(), version: 3 }.map(Some);
        assert_eq!(v.value.as_deref(), Some("alice"));
        assert_eq!(v.version, 3);
    }
}
