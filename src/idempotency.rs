// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fast-tier idempotency cache.
//!
//! The cache is the first of the two idempotency tiers: a bounded, expiring
//! map from idempotency key to the committed result. It exists for latency
//! only. The durable store's unique key index remains the source of truth; a
//! cache miss always falls through to it, and the cache is populated strictly
//! after a durable commit, so it can never hold a result that was not
//! committed.

use crate::base::IdempotencyKey;
use crate::transaction::TransactionResult;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Bound on cached results; sized for recent activity, not history.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// How long a cached result stays valid.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct CachedResult {
    result: TransactionResult,
    stored_at: Instant,
}

/// Bounded TTL cache of committed transaction results, keyed by idempotency
/// key.
///
/// Concurrent population needs no coordination: keys are unique per committed
/// transaction, so two writers never race on different values for one key.
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: DashMap<IdempotencyKey, CachedResult>,
    capacity: usize,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_limits(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Looks up a previously committed result. Expired entries are dropped on
    /// the way out and count as misses.
    pub fn get(&self, key: &IdempotencyKey) -> Option<TransactionResult> {
        let hit = self.entries.get(key)?;
        if hit.stored_at.elapsed() > self.ttl {
            drop(hit);
            self.entries.remove(key);
            return None;
        }
        Some(hit.result.clone())
    }

    /// Stores a committed result under its own idempotency key.
    ///
    /// Call only after the durable commit succeeded.
    pub fn insert(&self, result: TransactionResult) {
        if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(
            result.idempotency_key.clone(),
            CachedResult {
                result,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops expired entries; if the cache is still full, drops the oldest
    /// entry to make room for one insert.
    fn evict(&self) {
        self.entries
            .retain(|_, cached| cached.stored_at.elapsed() <= self.ttl);

        if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::TransactionId;
    use crate::transaction::TransactionStatus;
    use chrono::Utc;
    use std::thread;

    fn result(key: &str) -> TransactionResult {
        TransactionResult {
            id: TransactionId(1),
            idempotency_key: key.into(),
            description: "test".to_owned(),
            status: TransactionStatus::Posted,
            posted_at: Utc::now(),
            reversal_of: None,
            entries: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn hit_returns_the_stored_result() {
        let cache = IdempotencyCache::new();
        cache.insert(result("key-1"));

        let hit = cache.get(&"key-1".into()).unwrap();
        assert_eq!(hit.idempotency_key, "key-1".into());
        assert!(cache.get(&"key-2".into()).is_none());
    }

    #[test]
    fn expired_entries_are_misses() {
        let cache = IdempotencyCache::with_limits(16, Duration::from_millis(10));
        cache.insert(result("key-1"));

        thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&"key-1".into()).is_none());
        assert!(cache.is_empty()); // dropped on read
    }

    #[test]
    fn capacity_is_enforced_on_insert() {
        let cache = IdempotencyCache::with_limits(2, Duration::from_secs(60));
        cache.insert(result("key-1"));
        thread::sleep(Duration::from_millis(5));
        cache.insert(result("key-2"));
        thread::sleep(Duration::from_millis(5));
        cache.insert(result("key-3"));

        assert!(cache.len() <= 2);
        // The oldest entry is the one evicted.
        assert!(cache.get(&"key-1".into()).is_none());
        assert!(cache.get(&"key-3".into()).is_some());
    }

    #[test]
    fn expired_sweep_makes_room_before_evicting_live_entries() {
        let cache = IdempotencyCache::with_limits(2, Duration::from_millis(20));
        cache.insert(result("stale-1"));
        cache.insert(result("stale-2"));

        thread::sleep(Duration::from_millis(40));
        cache.insert(result("fresh"));

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&"fresh".into()).is_some());
    }
}
