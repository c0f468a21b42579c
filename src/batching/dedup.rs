// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-window collapse of same-entity updates.
//!
//! Two policies:
//! - [`collapse_latest`] keeps the update with the greatest timestamp
//!   (presence kinds).
//! - [`collapse_last_queued`] keeps the update queued last (identity kinds).
//!   A value that changes twice inside one window loses the intermediate one.
//!
//! Both are a single pass over the input with a hash map from entity key to
//! output slot. Output order is the order in which each key first appeared.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::model::{Keyed, Timestamped};

/// Keep one update per key: the one with the maximum timestamp.
///
/// Ties keep the earlier-queued update.
pub fn collapse_latest<T: Timestamped>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut slots: HashMap<T::Key, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::new();

    for item in items {
        match slots.entry(item.key()) {
            Entry::Occupied(slot) => {
                let current = &mut out[*slot.get()];
                if item.at() > current.at() {
                    *current = item;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(item);
            }
        }
    }

    out
}

/// Keep one update per key: the one queued last.
pub fn collapse_last_queued<T: Keyed>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut slots: HashMap<T::Key, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::new();

    for item in items {
        match slots.entry(item.key()) {
            Entry::Occupied(slot) => out[*slot.get()] = item,
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(item);
            }
        }
    }

    out
}
