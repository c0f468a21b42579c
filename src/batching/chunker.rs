// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Splits row lists so no statement binds more parameters than the backend
//! accepts.
//!
//! # Example
//!
//! ```
//! use presence_tracker::batching::chunker::Chunker;
//!
//! let chunker = Chunker::new(32767);
//! assert_eq!(chunker.rows_per_statement(5), 6553);
//!
//! let rows: Vec<u32> = (0..10).collect();
//! let sizes: Vec<usize> = Chunker::new(8).chunks(&rows, 2).map(|c| c.len()).collect();
//! assert_eq!(sizes, vec![4, 4, 2]);
//! ```

/// Parameter ceiling for PostgreSQL (16-bit bind count).
pub const POSTGRES_MAX_PARAMS: usize = 32767;

/// Parameter ceiling for SQLite builds since 3.32.
pub const SQLITE_MAX_PARAMS: usize = 32766;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_params: usize,
}

impl Chunker {
    #[must_use]
    pub fn new(max_params: usize) -> Self {
        Self {
            max_params: max_params.max(1),
        }
    }

    #[must_use]
    pub fn max_params(&self) -> usize {
        self.max_params
    }

    /// `floor(max_params / columns_per_row)`, never below one row.
    #[must_use]
    pub fn rows_per_statement(&self, columns_per_row: usize) -> usize {
        (self.max_params / columns_per_row.max(1)).max(1)
    }

    /// Number of statements needed for `rows` rows.
    #[must_use]
    pub fn statements_for(&self, rows: usize, columns_per_row: usize) -> usize {
        rows.div_ceil(self.rows_per_statement(columns_per_row))
    }

    pub fn chunks<'a, T>(&self, rows: &'a [T], columns_per_row: usize) -> std::slice::Chunks<'a, T> {
        rows.chunks(self.rows_per_statement(columns_per_row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_row_budgets() {
        let chunker = Chunker::new(POSTGRES_MAX_PARAMS);
        assert_eq!(chunker.rows_per_statement(2), 16383);
        assert_eq!(chunker.rows_per_statement(3), 10922);
        assert_eq!(chunker.rows_per_statement(4), 8191);
        assert_eq!(chunker.rows_per_statement(5), 6553);
    }

    #[test]
    fn test_chunks_respect_limit_and_cover_all_rows() {
        let rows: Vec<usize> = (0..20_001).collect();
        let chunker = Chunker::new(POSTGRES_MAX_PARAMS);

        let chunks: Vec<&[usize]> = chunker.chunks(&rows, 2).collect();
        assert_eq!(chunks.len(), chunker.statements_for(rows.len(), 2));
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.len() * 2 <= POSTGRES_MAX_PARAMS);
        }

        let flattened: Vec<usize> = chunks.concat();
        assert_eq!(flattened, rows);
    }

    #[test]
    fn test_exact_multiple() {
        let rows = vec![0u8; 12];
        let chunker = Chunker::new(12);
        assert_eq!(chunker.statements_for(rows.len(), 3), 3);
        assert!(chunker.chunks(&rows, 3).all(|c| c.len() == 4));
    }

    #[test]
    fn test_empty_input_issues_no_statements() {
        let rows: Vec<u8> = Vec::new();
        let chunker = Chunker::new(100);
        assert_eq!(chunker.statements_for(0, 4), 0);
        assert_eq!(chunker.chunks(&rows, 4).count(), 0);
    }

    #[test]
    fn test_degenerate_limits_still_make_progress() {
        let rows = vec![1, 2, 3];
        let chunker = Chunker::new(0);
        assert_eq!(chunker.max_params(), 1);
        assert_eq!(chunker.rows_per_statement(5), 1);
        assert_eq!(chunker.chunks(&rows, 5).count(), 3);
    }
}
