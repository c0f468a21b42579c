// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage tiers: Redis or in-memory cache, SQL durable store.

pub mod keys;
pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;
pub mod upsert;
