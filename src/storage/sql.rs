// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL durable tier (source of truth).
//!
//! Schema:
//! ```sql
//! CREATE TABLE last_seen   (id BIGINT PRIMARY KEY, date BIGINT NOT NULL);
//! CREATE TABLE last_spoke  (id BIGINT, server_id BIGINT, date BIGINT NOT NULL,
//!                           PRIMARY KEY (id, server_id));
//! CREATE TABLE namechanges (id BIGINT, name TEXT NOT NULL, idx BIGINT, date BIGINT NOT NULL,
//!                           PRIMARY KEY (id, idx));
//! CREATE TABLE nickchanges (id BIGINT, server_id BIGINT, name TEXT, idx BIGINT, date BIGINT NOT NULL,
//!                           PRIMARY KEY (id, server_id, idx));
//! ```
//!
//! Every timestamp is i64 milliseconds. `server_id = 0` is the global scope.
//!
//! Writes go through the [`Chunker`]: each chunk is one multi-row statement in
//! its own transaction, which first takes an exclusive lock on the target
//! table (PostgreSQL only; SQLite's write transaction is already exclusive).
//!
//! ## sqlx Any Driver Quirks
//!
//! All integer columns are BIGINT so every value decodes as `i64` on both
//! backends. Array binds (`= ANY($1)`) are not available through `Any`, so
//! key lookups use chunked `IN (...)` lists instead.

use std::collections::{HashMap, HashSet};
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row};

use super::traits::{DurableStore, StorageError};
use super::upsert::{
    self, Dialect, LAST_SEEN_COLUMNS, LAST_SPOKE_COLUMNS, NAME_COLUMNS, NICKNAME_COLUMNS,
};
use crate::batching::chunker::Chunker;
use crate::model::{
    IdentityRecord, LastSeen, LastSpoke, NicknameRecord, PrincipalId, ScopeId, Timestamp,
    Versioned,
};
use crate::resilience::retry::{retry, retry_if, RetryConfig};

type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

const SCHEMA: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS last_seen (
        id BIGINT PRIMARY KEY,
        date BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS last_spoke (
        id BIGINT NOT NULL,
        server_id BIGINT NOT NULL,
        date BIGINT NOT NULL,
        PRIMARY KEY (id, server_id)
    )",
    "CREATE TABLE IF NOT EXISTS namechanges (
        id BIGINT NOT NULL,
        name TEXT NOT NULL,
        idx BIGINT NOT NULL,
        date BIGINT NOT NULL,
        PRIMARY KEY (id, idx)
    )",
    "CREATE TABLE IF NOT EXISTS nickchanges (
        id BIGINT NOT NULL,
        server_id BIGINT NOT NULL,
        name TEXT,
        idx BIGINT NOT NULL,
        date BIGINT NOT NULL,
        PRIMARY KEY (id, server_id, idx)
    )",
    "CREATE INDEX IF NOT EXISTS idx_namechanges_date ON namechanges (id, date)",
    "CREATE INDEX IF NOT EXISTS idx_nickchanges_date ON nickchanges (id, server_id, date)",
];

/// Connection trouble and lock contention are worth another attempt;
/// constraint or syntax errors will fail the same way again.
fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            // SQLite BUSY/LOCKED, Postgres serialization failure/deadlock
            Some("5") | Some("6") | Some("40001") | Some("40P01")
        ),
        _ => false,
    }
}

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn bind_last_seen<'q>(query: AnyQuery<'q>, row: &LastSeen) -> AnyQuery<'q> {
    query.bind(row.principal).bind(row.at)
}

fn bind_last_spoke<'q>(query: AnyQuery<'q>, row: &LastSpoke) -> AnyQuery<'q> {
    query.bind(row.principal).bind(row.scope).bind(row.at)
}

fn bind_name<'q>(query: AnyQuery<'q>, row: &IdentityRecord) -> AnyQuery<'q> {
    query
        .bind(row.principal)
        .bind(row.name.clone())
        .bind(row.version)
        .bind(row.captured_at)
}

fn bind_nickname<'q>(query: AnyQuery<'q>, row: &NicknameRecord) -> AnyQuery<'q> {
    query
        .bind(row.principal)
        .bind(row.scope)
        .bind(row.nickname.clone())
        .bind(row.version)
        .bind(row.captured_at)
}

fn distinct<T: std::hash::Hash + Eq + Copy>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(*item)).collect()
}

pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
    chunker: Chunker,
}

impl SqlStore {
    /// Connect with a default pool size and create the schema if missing.
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        Self::with_pool_size(connection_string, 10).await
    }

    /// Connect with startup-mode retry (fails fast if config is wrong).
    pub async fn with_pool_size(connection_string: &str, max_connections: u32) -> Result<Self, StorageError> {
        install_drivers();

        let dialect = Dialect::from_url(connection_string)?;

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections.max(1))
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(backend)
        })
        .await?;

        let store = Self {
            pool,
            dialect,
            chunker: Chunker::new(dialect.max_params()),
        };

        if dialect == Dialect::Sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        Ok(store)
    }

    /// Lower the per-statement parameter ceiling (never raises it past the
    /// dialect's hard limit).
    #[must_use]
    pub fn with_max_params(mut self, max_params: usize) -> Self {
        self.chunker = Chunker::new(max_params.min(self.dialect.max_params()));
        self
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// WAL lets readers proceed while a flush transaction holds the write lock.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("Failed to create schema: {}", e)))?;
        }
        Ok(())
    }

    /// Write `rows` as chunked multi-row statements, one locked transaction
    /// per chunk. Returns the summed rows-affected count.
    async fn write_chunked<T, B>(
        &self,
        operation: &'static str,
        table: &'static str,
        rows: &[T],
        columns: usize,
        statement: fn(Dialect, usize) -> String,
        bind: B,
    ) -> Result<usize, StorageError>
    where
        T: Sync,
        B: for<'q> Fn(AnyQuery<'q>, &T) -> AnyQuery<'q> + Sync,
    {
        let lock = self.dialect.lock_table(table);
        let mut affected = 0usize;

        for chunk in self.chunker.chunks(rows, columns) {
            let sql = statement(self.dialect, chunk.len());

            let done = retry_if(operation, &RetryConfig::query(), is_transient, || {
                let (pool, sql, lock, bind) = (&self.pool, &sql, &lock, &bind);
                async move {
                    let mut tx = pool.begin().await?;
                    if let Some(lock) = lock {
                        sqlx::query(lock.as_str()).execute(&mut *tx).await?;
                    }
                    let mut query = sqlx::query(sql.as_str());
                    for row in chunk {
                        query = bind(query, row);
                    }
                    let result = query.execute(&mut *tx).await?;
                    tx.commit().await?;
                    Ok::<u64, sqlx::Error>(result.rows_affected())
                }
            })
            .await
            .map_err(backend)?;

            crate::metrics::record_statement(table, chunk.len());
            affected += done as usize;
        }

        tracing::debug!(table, rows = rows.len(), affected, "Chunked write complete");
        Ok(affected)
    }

    /// Run `sql_for(in_list)` once per chunk of `ids` and collect the rows.
    /// `reserved` values are bound as `$1..` ahead of the id list.
    async fn fetch_by_ids(
        &self,
        operation: &'static str,
        ids: &[i64],
        reserved: &[i64],
        sql_for: impl Fn(&str) -> String + Sync,
    ) -> Result<Vec<AnyRow>, StorageError> {
        let mut rows = Vec::new();
        let budget = self.chunker.max_params().saturating_sub(reserved.len()).max(1);

        for chunk in ids.chunks(budget) {
            let sql = sql_for(&upsert::in_list(reserved.len() + 1, chunk.len()));
            let fetched = retry_if(operation, &RetryConfig::query(), is_transient, || {
                let (pool, sql) = (&self.pool, &sql);
                async move {
                    let mut query = sqlx::query(sql.as_str());
                    for value in reserved.iter().chain(chunk) {
                        query = query.bind(*value);
                    }
                    query.fetch_all(pool).await
                }
            })
            .await
            .map_err(backend)?;
            rows.extend(fetched);
        }

        Ok(rows)
    }
}

#[async_trait]
impl DurableStore for SqlStore {
    fn max_params(&self) -> usize {
        self.chunker.max_params()
    }

    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert_last_seen(&self, rows: &[LastSeen]) -> Result<usize, StorageError> {
        self.write_chunked(
            "sql_upsert_last_seen",
            "last_seen",
            rows,
            LAST_SEEN_COLUMNS,
            upsert::last_seen_upsert,
            bind_last_seen,
        )
        .await
    }

    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert_last_spoke(&self, rows: &[LastSpoke]) -> Result<usize, StorageError> {
        self.write_chunked(
            "sql_upsert_last_spoke",
            "last_spoke",
            rows,
            LAST_SPOKE_COLUMNS,
            upsert::last_spoke_upsert,
            bind_last_spoke,
        )
        .await
    }

    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert_names(&self, rows: &[IdentityRecord]) -> Result<usize, StorageError> {
        self.write_chunked(
            "sql_insert_names",
            "namechanges",
            rows,
            NAME_COLUMNS,
            upsert::name_insert,
            bind_name,
        )
        .await
    }

    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert_nicknames(&self, rows: &[NicknameRecord]) -> Result<usize, StorageError> {
        self.write_chunked(
            "sql_insert_nicknames",
            "nickchanges",
            rows,
            NICKNAME_COLUMNS,
            upsert::nickname_insert,
            bind_nickname,
        )
        .await
    }

    async fn current_names(
        &self,
        principals: &[PrincipalId],
    ) -> Result<HashMap<PrincipalId, Versioned<String>>, StorageError> {
        let ids = distinct(principals.iter().copied());
        let rows = self
            .fetch_by_ids("sql_current_names", &ids, &[], |list| {
                format!(
                    "SELECT id, name, idx FROM namechanges WHERE id IN ({}) ORDER BY idx ASC",
                    list
                )
            })
            .await?;

        // Ascending idx: the last row seen per principal is the current one
        let mut current = HashMap::with_capacity(ids.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(backend)?;
            let name: String = row.try_get("name").map_err(backend)?;
            let idx: i64 = row.try_get("idx").map_err(backend)?;
            current.insert(id, Versioned { value: name, version: idx });
        }
        Ok(current)
    }

    async fn current_nicknames(
        &self,
        keys: &[(PrincipalId, ScopeId)],
    ) -> Result<HashMap<(PrincipalId, ScopeId), Versioned<Option<String>>>, StorageError> {
        let wanted: HashSet<(PrincipalId, ScopeId)> = keys.iter().copied().collect();
        let scopes = distinct(keys.iter().map(|(_, scope)| *scope));
        let mut current = HashMap::with_capacity(wanted.len());

        // Keep the scope list small enough to leave room for principals
        let scope_budget = (self.chunker.max_params() / 2).max(1);
        for scope_chunk in scopes.chunks(scope_budget) {
            let in_scope: HashSet<ScopeId> = scope_chunk.iter().copied().collect();
            let ids = distinct(
                keys.iter()
                    .filter(|(_, scope)| in_scope.contains(scope))
                    .map(|(principal, _)| *principal),
            );
            let scope_list = upsert::in_list(1, scope_chunk.len());

            let rows = self
                .fetch_by_ids("sql_current_nicknames", &ids, scope_chunk, |list| {
                    format!(
                        "SELECT id, server_id, name, idx FROM nickchanges \
                         WHERE server_id IN ({}) AND id IN ({}) ORDER BY idx ASC",
                        scope_list, list
                    )
                })
                .await?;

            for row in rows {
                let id: i64 = row.try_get("id").map_err(backend)?;
                let scope: i64 = row.try_get("server_id").map_err(backend)?;
                if !wanted.contains(&(id, scope)) {
                    continue;
                }
                let name: Option<String> = row.try_get("name").map_err(backend)?;
                let idx: i64 = row.try_get("idx").map_err(backend)?;
                current.insert((id, scope), Versioned { value: name, version: idx });
            }
        }

        Ok(current)
    }

    async fn name_history(
        &self,
        principal: PrincipalId,
        since: Option<Timestamp>,
    ) -> Result<Vec<String>, StorageError> {
        let sql = match since {
            Some(_) => {
                "SELECT name FROM namechanges WHERE id = $1 AND (date >= $2 OR idx = \
                 (SELECT MAX(idx) FROM namechanges WHERE id = $1 AND date < $2)) \
                 ORDER BY idx DESC"
            }
            None => "SELECT name FROM namechanges WHERE id = $1 ORDER BY idx DESC",
        };

        let rows = retry_if("sql_name_history", &RetryConfig::query(), is_transient, || async {
            let mut query = sqlx::query(sql).bind(principal);
            if let Some(since) = since {
                query = query.bind(since);
            }
            query.fetch_all(&self.pool).await
        })
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(backend))
            .collect()
    }

    async fn nickname_history(
        &self,
        principal: PrincipalId,
        scope: ScopeId,
        since: Option<Timestamp>,
    ) -> Result<Vec<Option<String>>, StorageError> {
        let sql = match since {
            Some(_) => {
                "SELECT name FROM nickchanges WHERE id = $1 AND server_id = $2 AND (date >= $3 OR idx = \
                 (SELECT MAX(idx) FROM nickchanges WHERE id = $1 AND server_id = $2 AND date < $3)) \
                 ORDER BY idx DESC"
            }
            None => "SELECT name FROM nickchanges WHERE id = $1 AND server_id = $2 ORDER BY idx DESC",
        };

        let rows = retry_if("sql_nickname_history", &RetryConfig::query(), is_transient, || async {
            let mut query = sqlx::query(sql).bind(principal).bind(scope);
            if let Some(since) = since {
                query = query.bind(since);
            }
            query.fetch_all(&self.pool).await
        })
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| row.try_get::<Option<String>, _>("name").map_err(backend))
            .collect()
    }

    async fn last_seen(
        &self,
        principals: &[PrincipalId],
    ) -> Result<HashMap<PrincipalId, Timestamp>, StorageError> {
        let ids = distinct(principals.iter().copied());
        let rows = self
            .fetch_by_ids("sql_last_seen", &ids, &[], |list| {
                format!("SELECT id, date FROM last_seen WHERE id IN ({})", list)
            })
            .await?;

        let mut seen = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(backend)?;
            let date: i64 = row.try_get("date").map_err(backend)?;
            seen.insert(id, date);
        }
        Ok(seen)
    }

    async fn last_spoke(
        &self,
        principals: &[PrincipalId],
        scopes: &[ScopeId],
    ) -> Result<HashMap<(PrincipalId, ScopeId), Timestamp>, StorageError> {
        let ids = distinct(principals.iter().copied());
        let scopes = distinct(scopes.iter().copied());
        if ids.is_empty() || scopes.is_empty() {
            return Ok(HashMap::new());
        }
        let scope_list = upsert::in_list(1, scopes.len());

        let rows = self
            .fetch_by_ids("sql_last_spoke", &ids, &scopes, |list| {
                format!(
                    "SELECT id, server_id, date FROM last_spoke \
                     WHERE server_id IN ({}) AND id IN ({})",
                    scope_list, list
                )
            })
            .await?;

        let mut spoke = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(backend)?;
            let scope: i64 = row.try_get("server_id").map_err(backend)?;
            let date: i64 = row.try_get("date").map_err(backend)?;
            spoke.insert((id, scope), date);
        }
        Ok(spoke)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sqlite_store() -> (TempDir, SqlStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("durable.db").display());
        let store = SqlStore::new(&url).await.unwrap();
        (dir, store)
    }

    async fn count(store: &SqlStore, table: &str) -> i64 {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS cnt FROM {}", table))
            .fetch_one(&store.pool())
            .await
            .unwrap();
        row.try_get("cnt").unwrap()
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let (_dir, store) = sqlite_store().await;
        store.init_schema().await.unwrap();
        assert_eq!(count(&store, "last_seen").await, 0);
        assert_eq!(store.dialect(), Dialect::Sqlite);
    }

    #[tokio::test]
    async fn test_last_seen_never_regresses() {
        let (_dir, store) = sqlite_store().await;

        store.upsert_last_seen(&[LastSeen { principal: 42, at: 105 }]).await.unwrap();
        store.upsert_last_seen(&[LastSeen { principal: 42, at: 103 }]).await.unwrap();

        let seen = store.last_seen(&[42]).await.unwrap();
        assert_eq!(seen.get(&42), Some(&105));

        store.upsert_last_seen(&[LastSeen { principal: 42, at: 110 }]).await.unwrap();
        assert_eq!(store.last_seen(&[42]).await.unwrap().get(&42), Some(&110));
    }

    #[tokio::test]
    async fn test_last_spoke_is_per_scope() {
        let (_dir, store) = sqlite_store().await;
        store
            .upsert_last_spoke(&[
                LastSpoke { principal: 1, scope: 0, at: 50 },
                LastSpoke { principal: 1, scope: 9, at: 40 },
                LastSpoke { principal: 2, scope: 9, at: 30 },
            ])
            .await
            .unwrap();

        let spoke = store.last_spoke(&[1, 2, 3], &[0, 9]).await.unwrap();
        assert_eq!(spoke.get(&(1, 0)), Some(&50));
        assert_eq!(spoke.get(&(1, 9)), Some(&40));
        assert_eq!(spoke.get(&(2, 9)), Some(&30));
        assert_eq!(spoke.get(&(3, 0)), None);
    }

    #[tokio::test]
    async fn test_chunked_upsert_writes_every_row_once() {
        let (_dir, store) = sqlite_store().await;
        // 2 columns per row → 5 rows per statement
        let store = store.with_max_params(10);
        assert_eq!(store.max_params(), 10);

        let rows: Vec<LastSeen> = (1..=23).map(|i| LastSeen { principal: i, at: i * 10 }).collect();
        store.upsert_last_seen(&rows).await.unwrap();

        assert_eq!(count(&store, "last_seen").await, 23);
        let ids: Vec<i64> = (1..=23).collect();
        let seen = store.last_seen(&ids).await.unwrap();
        assert_eq!(seen.len(), 23);
        assert_eq!(seen.get(&17), Some(&170));
    }

    #[tokio::test]
    async fn test_max_params_cannot_exceed_dialect() {
        let (_dir, store) = sqlite_store().await;
        let store = store.with_max_params(1_000_000);
        assert_eq!(store.max_params(), Dialect::Sqlite.max_params());
    }

    #[tokio::test]
    async fn test_name_versions_conflict_is_noop() {
        let (_dir, store) = sqlite_store().await;
        let row = IdentityRecord { principal: 7, name: "alice".into(), version: 1, captured_at: 1 };

        assert_eq!(store.insert_names(&[row.clone()]).await.unwrap(), 1);
        let dup = IdentityRecord { name: "mallory".into(), ..row };
        assert_eq!(store.insert_names(&[dup]).await.unwrap(), 0);

        assert_eq!(store.name_history(7, None).await.unwrap(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_current_names_returns_highest_version() {
        let (_dir, store) = sqlite_store().await;
        store
            .insert_names(&[
                IdentityRecord { principal: 7, name: "alice".into(), version: 1, captured_at: 1 },
                IdentityRecord { principal: 7, name: "alicia".into(), version: 2, captured_at: 2 },
                IdentityRecord { principal: 8, name: "bob".into(), version: 1, captured_at: 1 },
            ])
            .await
            .unwrap();

        let current = store.current_names(&[7, 8, 9]).await.unwrap();
        assert_eq!(current.get(&7), Some(&Versioned { value: "alicia".to_string(), version: 2 }));
        assert_eq!(current.get(&8).map(|v| v.version), Some(1));
        assert!(!current.contains_key(&9));
    }

    #[tokio::test]
    async fn test_nicknames_store_null() {
        let (_dir, store) = sqlite_store().await;
        store
            .insert_nicknames(&[
                NicknameRecord { principal: 1, scope: 5, nickname: Some("x".into()), version: 1, captured_at: 1 },
                NicknameRecord { principal: 1, scope: 5, nickname: None, version: 2, captured_at: 2 },
                NicknameRecord { principal: 1, scope: 6, nickname: Some("y".into()), version: 1, captured_at: 1 },
            ])
            .await
            .unwrap();

        let current = store.current_nicknames(&[(1, 5), (1, 6), (2, 5)]).await.unwrap();
        assert_eq!(current.get(&(1, 5)), Some(&Versioned { value: None, version: 2 }));
        assert_eq!(current.get(&(1, 6)).and_then(|v| v.value.clone()).as_deref(), Some("y"));
        assert!(!current.contains_key(&(2, 5)));

        let history = store.nickname_history(1, 5, None).await.unwrap();
        assert_eq!(history, vec![None, Some("x".to_string())]);
    }

    #[tokio::test]
    async fn test_history_since_keeps_value_held_entering_window() {
        let (_dir, store) = sqlite_store().await;
        store
            .insert_names(&[
                IdentityRecord { principal: 3, name: "old".into(), version: 1, captured_at: 100 },
                IdentityRecord { principal: 3, name: "new".into(), version: 2, captured_at: 200 },
            ])
            .await
            .unwrap();

        // "old" was still held when the window opened at 150
        assert_eq!(store.name_history(3, Some(150)).await.unwrap(), vec!["new".to_string(), "old".to_string()]);
        assert_eq!(store.name_history(3, Some(500)).await.unwrap(), vec!["new".to_string()]);
        assert_eq!(store.name_history(3, Some(50)).await.unwrap().len(), 2);
        assert!(store.name_history(4, Some(50)).await.unwrap().is_empty());

        store
            .insert_names(&[IdentityRecord { principal: 3, name: "newer".into(), version: 3, captured_at: 300 }])
            .await
            .unwrap();
        assert_eq!(
            store.name_history(3, Some(250)).await.unwrap(),
            vec!["newer".to_string(), "new".to_string()]
        );
    }

    #[tokio::test]
    async fn test_lookups_with_many_ids_are_chunked() {
        let (_dir, store) = sqlite_store().await;
        let store = store.with_max_params(4);

        let rows: Vec<LastSpoke> = (1..=9).map(|i| LastSpoke { principal: i, scope: 3, at: i }).collect();
        store.upsert_last_spoke(&rows).await.unwrap();

        let ids: Vec<i64> = (1..=9).collect();
        // one scope param reserved → 3 ids per query
        let spoke = store.last_spoke(&ids, &[3]).await.unwrap();
        assert_eq!(spoke.len(), 9);
    }

    #[tokio::test]
    async fn test_unsupported_url_is_rejected() {
        let result = SqlStore::new("mysql://user@localhost/db").await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }
}
