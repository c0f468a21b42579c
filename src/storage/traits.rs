// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Interfaces to the two storage tiers.
//!
//! [`CacheStore`] is the disposable key/value accelerator; [`DurableStore`]
//! is the relational source of truth. Neither carries business logic: the
//! tracker decides what to read and write, the stores only move rows.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    IdentityRecord, LastSeen, LastSpoke, NicknameRecord, PrincipalId, ScopeId, Timestamp,
    Versioned,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Undecodable value at '{key}': {reason}")]
    Decode { key: String, reason: String },
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// One result per key, aligned with the input.
    /// Default implementation falls back to sequential gets.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Default implementation falls back to sequential sets.
    async fn mset(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }

    /// Every key starting with `prefix`. Used by one-off maintenance jobs,
    /// never on the flush path.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Hard ceiling on bound parameters per statement.
    fn max_params(&self) -> usize;

    /// Upsert presence rows; a stored timestamp never moves backward.
    /// Rows must be unique per principal. Returns rows affected.
    async fn upsert_last_seen(&self, rows: &[LastSeen]) -> Result<usize, StorageError>;

    /// Same as [`upsert_last_seen`](Self::upsert_last_seen), keyed per (principal, scope).
    async fn upsert_last_spoke(&self, rows: &[LastSpoke]) -> Result<usize, StorageError>;

    /// Insert name versions; a (principal, version) conflict is a no-op.
    /// Returns rows actually inserted.
    async fn insert_names(&self, rows: &[IdentityRecord]) -> Result<usize, StorageError>;

    /// Insert nickname versions; a (principal, scope, version) conflict is a no-op.
    async fn insert_nicknames(&self, rows: &[NicknameRecord]) -> Result<usize, StorageError>;

    /// Latest stored name and version per principal. Absent principals are
    /// missing from the map.
    async fn current_names(
        &self,
        principals: &[PrincipalId],
    ) -> Result<HashMap<PrincipalId, Versioned<String>>, StorageError>;

    /// Latest stored nickname and version per (principal, scope).
    async fn current_nicknames(
        &self,
        keys: &[(PrincipalId, ScopeId)],
    ) -> Result<HashMap<(PrincipalId, ScopeId), Versioned<Option<String>>>, StorageError>;

    /// Names newest first. With `since`, only rows captured at or after it
    /// plus the single row that was current when that window opened.
    async fn name_history(
        &self,
        principal: PrincipalId,
        since: Option<Timestamp>,
    ) -> Result<Vec<String>, StorageError>;

    /// Nicknames newest first, `None` entries included.
    async fn nickname_history(
        &self,
        principal: PrincipalId,
        scope: ScopeId,
        since: Option<Timestamp>,
    ) -> Result<Vec<Option<String>>, StorageError>;

    async fn last_seen(
        &self,
        principals: &[PrincipalId],
    ) -> Result<HashMap<PrincipalId, Timestamp>, StorageError>;

    /// Last-spoke rows for every requested principal in any of `scopes`.
    async fn last_spoke(
        &self,
        principals: &[PrincipalId],
        scopes: &[ScopeId],
    ) -> Result<HashMap<(PrincipalId, ScopeId), Timestamp>, StorageError>;
}
