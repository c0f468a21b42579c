// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process-local cache tier, used in tests and when no Redis is configured.
//!
//! Same contract as [`RedisCache`](super::redis::RedisCache) minus the key
//! prefix: a tracker owns its instance, so there is nothing to share.

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{CacheStore, StorageError};

pub struct InMemoryCache {
    data: DashMap<String, Vec<u8>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop every entry, as if Redis had been flushed
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Drop one entry, as if Redis had evicted it. Returns whether it existed.
    pub fn evict(&self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        Ok(keys
            .iter()
            .map(|key| self.data.get(key).map(|r| r.value().clone()))
            .collect())
    }

    async fn mset(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.data.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}
