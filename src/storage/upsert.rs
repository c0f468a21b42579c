// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Statement text for the durable tier's multi-row writes.
//!
//! Presence tables take `ON CONFLICT ... DO UPDATE` with a greatest-of rule so
//! a stale flush can never pull a timestamp backward. Version tables take
//! `ON CONFLICT ... DO NOTHING` so a duplicate flush of the same version index
//! is harmless.
//!
//! Placeholders are numbered (`$1, $2, ...`); both PostgreSQL and SQLite
//! accept that form.

use crate::batching::chunker::{POSTGRES_MAX_PARAMS, SQLITE_MAX_PARAMS};

use super::traits::StorageError;

pub const LAST_SEEN_COLUMNS: usize = 2;
pub const LAST_SPOKE_COLUMNS: usize = 3;
pub const NAME_COLUMNS: usize = 4;
pub const NICKNAME_COLUMNS: usize = 5;

/// SQL flavour of the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self, StorageError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            Err(StorageError::Backend(format!(
                "Unsupported SQL url scheme: {}",
                url.split(':').next().unwrap_or_default()
            )))
        }
    }

    #[must_use]
    pub fn max_params(self) -> usize {
        match self {
            Self::Postgres => POSTGRES_MAX_PARAMS,
            Self::Sqlite => SQLITE_MAX_PARAMS,
        }
    }

    /// Two-argument maximum. SQLite spells `GREATEST` as scalar `MAX`.
    fn greatest(self) -> &'static str {
        match self {
            Self::Postgres => "GREATEST",
            Self::Sqlite => "MAX",
        }
    }

    /// Statement taking an exclusive table lock inside the current
    /// transaction. SQLite holds a database-wide write lock for any write
    /// transaction, so it needs none.
    #[must_use]
    pub fn lock_table(self, table: &str) -> Option<String> {
        match self {
            Self::Postgres => Some(format!("LOCK TABLE {} IN EXCLUSIVE MODE", table)),
            Self::Sqlite => None,
        }
    }
}

/// `($1, $2), ($3, $4), ...` for `rows` rows of `columns` values.
#[must_use]
pub fn values_clause(rows: usize, columns: usize) -> String {
    let mut out = String::with_capacity(rows * columns * 6);
    let mut n = 1;
    for row in 0..rows {
        if row > 0 {
            out.push_str(", ");
        }
        out.push('(');
        for col in 0..columns {
            if col > 0 {
                out.push_str(", ");
            }
            out.push('$');
            out.push_str(&n.to_string());
            n += 1;
        }
        out.push(')');
    }
    out
}

/// `$first, $first+1, ...` for an `IN (...)` list.
#[must_use]
pub fn in_list(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|n| format!("${}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

#[must_use]
pub fn last_seen_upsert(dialect: Dialect, rows: usize) -> String {
    format!(
        "INSERT INTO last_seen (id, date) VALUES {} \
         ON CONFLICT (id) DO UPDATE SET date = {}(last_seen.date, excluded.date)",
        values_clause(rows, LAST_SEEN_COLUMNS),
        dialect.greatest()
    )
}

#[must_use]
pub fn last_spoke_upsert(dialect: Dialect, rows: usize) -> String {
    format!(
        "INSERT INTO last_spoke (id, server_id, date) VALUES {} \
         ON CONFLICT (id, server_id) DO UPDATE SET date = {}(last_spoke.date, excluded.date)",
        values_clause(rows, LAST_SPOKE_COLUMNS),
        dialect.greatest()
    )
}

#[must_use]
pub fn name_insert(_dialect: Dialect, rows: usize) -> String {
    format!(
        "INSERT INTO namechanges (id, name, idx, date) VALUES {} \
         ON CONFLICT (id, idx) DO NOTHING",
        values_clause(rows, NAME_COLUMNS)
    )
}

#[must_use]
pub fn nickname_insert(_dialect: Dialect, rows: usize) -> String {
    format!(
        "INSERT INTO nickchanges (id, server_id, name, idx, date) VALUES {} \
         ON CONFLICT (id, server_id, idx) DO NOTHING",
        values_clause(rows, NICKNAME_COLUMNS)
    )
}
