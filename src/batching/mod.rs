// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Ingest queues, per-window collapse and statement chunking.

pub mod chunker;
pub mod dedup;
pub mod ingest_queue;
