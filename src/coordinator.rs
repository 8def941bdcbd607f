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

//! Per-account concurrency control.
//!
//! The [`AccountLockTable`] hands out one exclusive lock per account, created
//! on first reference and kept for the life of the process. A posting that
//! touches several accounts acquires their locks strictly in ascending id
//! order; because every posting uses the same order, two postings sharing any
//! subset of accounts cannot deadlock.
//!
//! Locks are scoped to this process. Running several service instances against
//! one ledger needs an external coordination layer instead of this table.

use crate::base::AccountId;
use crate::error::LedgerError;
use dashmap::DashMap;
use parking_lot::{Mutex, RawMutex};
use parking_lot::lock_api::ArcMutexGuard;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How long one lock acquisition may wait before the posting gives up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

type AccountGuard = ArcMutexGuard<RawMutex, ()>;

/// Process-wide table of per-account locks.
///
/// Create one at service start and share it; the table is the single place
/// posting mutual exclusion lives, so it can be swapped for a distributed
/// implementation without touching the engine.
#[derive(Debug)]
pub struct AccountLockTable {
    // TODO: entries are never evicted, so the table grows with the lifetime
    // cardinality of accounts touched; reference-count entries to reclaim
    // locks for idle accounts.
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl AccountLockTable {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// A table with a custom acquisition timeout. Useful in tests that
    /// exercise the timeout path without waiting 30 seconds.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquires the locks for every account in `accounts`, in ascending id
    /// order, each within the table's timeout.
    ///
    /// The returned [`AccountLockSet`] releases everything when dropped, which
    /// covers every exit path including panics. If any single acquisition
    /// times out, locks already held are released and the whole call fails.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::LockTimeout`] naming the account whose lock
    /// could not be acquired in time. The caller may retry.
    pub fn lock_accounts<I>(&self, accounts: I) -> Result<AccountLockSet, LedgerError>
    where
        I: IntoIterator<Item = AccountId>,
    {
        // BTreeSet both dedups and yields the deterministic ascending order.
        let ordered: BTreeSet<AccountId> = accounts.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());

        for account_id in ordered {
            let lock = self
                .locks
                .entry(account_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            match lock.try_lock_arc_for(self.timeout) {
                Some(guard) => {
                    debug!(account = %account_id, "acquired account lock");
                    guards.push(guard);
                }
                None => {
                    // Dropping `guards` releases everything acquired so far.
                    warn!(account = %account_id, "lock acquisition timed out");
                    return Err(LedgerError::LockTimeout(account_id));
                }
            }
        }

        Ok(AccountLockSet { guards })
    }

    /// Number of accounts that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for AccountLockTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle over the locks held for one posting.
pub struct AccountLockSet {
    guards: Vec<AccountGuard>,
}

impl AccountLockSet {
    /// Number of account locks held.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}
