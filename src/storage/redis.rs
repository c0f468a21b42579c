// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis cache tier.
//!
//! Plain string keys holding raw bytes (see [`keys`](super::keys) for the
//! layout). Bulk reads are a single `MGET` and bulk writes a single `MSET`.
//! No TTLs: entries live until Redis evicts or loses them, and the tracker
//! treats either as a miss.

use std::future::Future;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, AsyncCommands, Client, Cmd, ErrorKind, RedisError, RedisResult};

use super::traits::{CacheStore, StorageError};
use crate::resilience::retry::{retry, retry_if, RetryConfig};

/// Keys fetched per SCAN page.
const SCAN_PAGE: usize = 1000;

pub struct RedisCache {
    connection: ConnectionManager,
    /// Namespace for every key ("spoo:" → "spoo:last_username:42")
    prefix: String,
}

/// Worth retrying: the connection went away or the server asked us to wait.
fn is_transient(e: &RedisError) -> bool {
    e.is_io_error()
        || e.is_timeout()
        || e.is_connection_dropped()
        || e.is_connection_refusal()
        || matches!(e.kind(), ErrorKind::TryAgain | ErrorKind::BusyLoadingError)
}

impl RedisCache {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect with startup-mode retry and namespace every key under `prefix`.
    ///
    /// ```rust,no_run
    /// # use presence_tracker::storage::redis::RedisCache;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let cache = RedisCache::with_prefix("redis://localhost", Some("spoo:")).await?;
    /// assert_eq!(cache.prefix(), "spoo:");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StorageError> {
        let client = Client::open(connection_string)
            .map_err(|e| StorageError::Backend(format!("Invalid Redis URL: {}", e)))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || {
            ConnectionManager::new(client.clone())
        })
        .await
        .map_err(|e| StorageError::Backend(format!("Redis unreachable: {}", e)))?;

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or_default().to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Run one command on a fresh handle to the shared connection,
    /// retrying transient failures.
    async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, StorageError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        retry_if(operation, &RetryConfig::query(), is_transient, || {
            attempt(self.connection.clone())
        })
        .await
        .map_err(|e| StorageError::Backend(format!("{} failed: {}", operation, e)))
    }

    async fn run_cmd<T: redis::FromRedisValue>(
        &self,
        operation: &str,
        command: &Cmd,
    ) -> Result<T, StorageError> {
        self.run(operation, |mut conn| async move {
            command.query_async(&mut conn).await
        })
        .await
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = self.full_key(key);
        self.run("redis_get", |mut conn| {
            let key = key.clone();
            async move { conn.get(key).await }
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = self.full_key(key);
        self.run("redis_set", |mut conn| {
            let key = key.clone();
            async move { conn.set(key, value).await }
        })
        .await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // Explicit MGET so a single key still yields a list
        let mut mget = cmd("MGET");
        for key in keys {
            mget.arg(self.full_key(key));
        }
        let values: Vec<Option<Vec<u8>>> = self.run_cmd("redis_mget", &mget).await?;

        if values.len() != keys.len() {
            return Err(StorageError::Backend(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                keys.len()
            )));
        }
        Ok(values)
    }

    async fn mset(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut mset = cmd("MSET");
        for (key, value) in entries {
            mset.arg(self.full_key(key)).arg(value.as_slice());
        }
        self.run_cmd::<()>("redis_mset", &mset).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // SCAN instead of KEYS so a large keyspace doesn't block Redis
        let pattern = format!("{}*", self.full_key(prefix));
        let mut keys: Vec<String> = Vec::new();
        let mut cursor = 0u64;

        loop {
            let mut page = cmd("SCAN");
            page.arg(cursor).arg("MATCH").arg(&pattern).arg("COUNT").arg(SCAN_PAGE);
            let (next, batch): (u64, Vec<String>) = self.run_cmd("redis_scan", &page).await?;

            keys.extend(
                batch
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(self.prefix.as_str()).map(str::to_string)),
            );
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}
