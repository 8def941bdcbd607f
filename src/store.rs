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

//! Durable transaction store.
//!
//! Holds committed transactions with a unique index on the idempotency key,
//! a per-account posting index for balance queries, and a commit-order
//! journal. The key index is reserved through the map's entry API, making it
//! the atomic arbiter between concurrent duplicates: exactly one commit wins
//! a key, and the loser receives the winner's transaction back.

use crate::base::{AccountId, IdempotencyKey, TransactionId};
use crate::error::LedgerError;
use crate::transaction::{Transaction, TransactionEntry, TransactionStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a commit attempt.
#[derive(Debug)]
pub enum Commit {
    /// The transaction was written; this is its committed form.
    Fresh(Transaction),
    /// Another commit already holds the idempotency key; this is the
    /// transaction it wrote.
    Duplicate(Transaction),
}

/// In-memory transaction store with unique-key enforcement.
#[derive(Debug)]
pub struct TransactionStore {
    transactions: DashMap<TransactionId, Transaction>,
    by_key: DashMap<IdempotencyKey, TransactionId>,
    /// Transaction ids touching each account, in commit order.
    by_account: DashMap<AccountId, Vec<TransactionId>>,
    /// All transaction ids in commit order.
    journal: Mutex<Vec<TransactionId>>,
    next_id: AtomicU64,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
            by_key: DashMap::new(),
            by_account: DashMap::new(),
            journal: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Mints the id for a transaction about to be committed.
    pub fn next_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Commits a transaction and all of its entries as one unit.
    ///
    /// The transaction record is published before the key is reserved so that
    /// a losing concurrent duplicate can always read the winner's record. If
    /// the key turns out to be taken, the record is withdrawn again and the
    /// existing transaction is returned; nothing partial survives.
    pub fn commit(&self, transaction: Transaction) -> Commit {
        let id = transaction.id;
        let key = transaction.idempotency_key.clone();
        let accounts: Vec<AccountId> = {
            let mut seen = Vec::new();
            for entry in &transaction.entries {
                if !seen.contains(&entry.account_id) {
                    seen.push(entry.account_id);
                }
            }
            seen
        };

        self.transactions.insert(id, transaction.clone());

        match self.by_key.entry(key) {
            Entry::Occupied(existing) => {
                let existing_id = *existing.get();
                drop(existing);
                self.transactions.remove(&id);
                // The winner published its record before reserving the key,
                // so this lookup cannot miss.
                let winner = self
                    .transactions
                    .get(&existing_id)
                    .map(|t| t.clone())
                    .unwrap_or(transaction);
                Commit::Duplicate(winner)
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
                for account_id in accounts {
                    self.by_account.entry(account_id).or_default().push(id);
                }
                self.journal.lock().push(id);
                Commit::Fresh(transaction)
            }
        }
    }

    /// Retrieves a transaction by id.
    pub fn get(&self, id: &TransactionId) -> Option<Transaction> {
        self.transactions.get(id).map(|t| t.clone())
    }

    /// Retrieves a transaction by its unique idempotency key.
    pub fn find_by_key(&self, key: &IdempotencyKey) -> Option<Transaction> {
        let id = *self.by_key.get(key)?;
        self.get(&id)
    }

    /// Flips a transaction's status to reversed, guarded by its version.
    ///
    /// A transaction found already reversed is returned as-is: the reversal
    /// key is deterministic, so a concurrent retry that lost the race flipped
    /// the status on our behalf. Any other version mismatch is a lost
    /// optimistic race and surfaces as [`LedgerError::VersionConflict`].
    pub fn mark_reversed(
        &self,
        id: &TransactionId,
        expected_version: u64,
    ) -> Result<Transaction, LedgerError> {
        let mut transaction = self
            .transactions
            .get_mut(id)
            .ok_or(LedgerError::TransactionNotFound(*id))?;

        if transaction.status == TransactionStatus::Reversed {
            return Ok(transaction.clone());
        }
        if transaction.version != expected_version {
            return Err(LedgerError::VersionConflict);
        }

        transaction.status = TransactionStatus::Reversed;
        transaction.version += 1;
        Ok(transaction.clone())
    }

    /// Net debit-minus-credit for one account over committed entries posted
    /// at or before `as_of`.
    pub fn balance_as_of(&self, account_id: &AccountId, as_of: DateTime<Utc>) -> Decimal {
        let ids: Vec<TransactionId> = match self.by_account.get(account_id) {
            Some(ids) => ids.clone(),
            None => return Decimal::ZERO,
        };

        let mut balance = Decimal::ZERO;
        for id in ids {
            let Some(transaction) = self.transactions.get(&id) else {
                continue;
            };
            if !transaction.status.counts_toward_balance() {
                continue;
            }
            for entry in &transaction.entries {
                if entry.account_id == *account_id && entry.posted_at <= as_of {
                    balance += entry.signed_amount();
                }
            }
        }
        balance
    }

    /// Committed entries for one account in commit order.
    pub fn entries_for_account(&self, account_id: &AccountId) -> Vec<TransactionEntry> {
        let ids: Vec<TransactionId> = match self.by_account.get(account_id) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };

        let mut entries = Vec::new();
        for id in ids {
            let Some(transaction) = self.transactions.get(&id) else {
                continue;
            };
            if !transaction.status.counts_toward_balance() {
                continue;
            }
            entries.extend(
                transaction
                    .entries
                    .iter()
                    .filter(|e| e.account_id == *account_id)
                    .cloned(),
            );
        }
        entries
    }

    /// All committed transactions in commit order.
    pub fn list(&self) -> Vec<Transaction> {
        let ids = self.journal.lock().clone();
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Currency;
    use rust_decimal_macros::dec;

    fn transaction(
        store: &TransactionStore,
        key: &str,
        status: TransactionStatus,
        entries: Vec<(u64, Decimal, Decimal)>,
    ) -> Transaction {
        let posted_at = Utc::now();
        Transaction {
            id: store.next_id(),
            idempotency_key: key.into(),
            description: "test posting".to_owned(),
            status,
            posted_at,
            reversal_of: None,
            entries: entries
                .into_iter()
                .map(|(account, debit, credit)| TransactionEntry {
                    account_id: AccountId(account),
                    debit,
                    credit,
                    currency: Currency::Kes,
                    running_balance: debit - credit,
                    posted_at,
                })
                .collect(),
            version: 0,
            created_at: posted_at,
        }
    }

    #[test]
    fn commit_is_visible_by_id_key_and_account() {
        let store = TransactionStore::new();
        let txn = transaction(
            &store,
            "key-1",
            TransactionStatus::Posted,
            vec![(1, dec!(100.00), dec!(0)), (2, dec!(0), dec!(100.00))],
        );
        let id = txn.id;

        assert!(matches!(store.commit(txn), Commit::Fresh(_)));
        assert_eq!(store.get(&id).unwrap().id, id);
        assert_eq!(store.find_by_key(&"key-1".into()).unwrap().id, id);
        assert_eq!(store.balance_as_of(&AccountId(1), Utc::now()), dec!(100.00));
        assert_eq!(store.balance_as_of(&AccountId(2), Utc::now()), dec!(-100.00));
    }

    #[test]
    fn duplicate_key_returns_the_winner_and_stores_nothing() {
        let store = TransactionStore::new();
        let first = transaction(
            &store,
            "key-1",
            TransactionStatus::Posted,
            vec![(1, dec!(100.00), dec!(0)), (2, dec!(0), dec!(100.00))],
        );
        let first_id = first.id;
        store.commit(first);

        let second = transaction(
            &store,
            "key-1",
            TransactionStatus::Posted,
            vec![(1, dec!(5.00), dec!(0)), (2, dec!(0), dec!(5.00))],
        );
        match store.commit(second) {
            Commit::Duplicate(winner) => assert_eq!(winner.id, first_id),
            Commit::Fresh(_) => panic!("duplicate key must not commit"),
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.balance_as_of(&AccountId(1), Utc::now()), dec!(100.00));
    }

    #[test]
    fn mark_reversed_bumps_version_once() {
        let store = TransactionStore::new();
        let txn = transaction(
            &store,
            "key-1",
            TransactionStatus::Posted,
            vec![(1, dec!(10.00), dec!(0)), (2, dec!(0), dec!(10.00))],
        );
        let id = txn.id;
        store.commit(txn);

        let reversed = store.mark_reversed(&id, 0).unwrap();
        assert_eq!(reversed.status, TransactionStatus::Reversed);
        assert_eq!(reversed.version, 1);

        // Already reversed: idempotent, no further bump.
        let again = store.mark_reversed(&id, 0).unwrap();
        assert_eq!(again.version, 1);
    }

    #[test]
    fn mark_reversed_with_stale_version_fails() {
        let store = TransactionStore::new();
        let mut txn = transaction(
            &store,
            "key-1",
            TransactionStatus::Posted,
            vec![(1, dec!(10.00), dec!(0)), (2, dec!(0), dec!(10.00))],
        );
        txn.version = 3;
        let id = txn.id;
        store.commit(txn);

        assert_eq!(store.mark_reversed(&id, 0), Err(LedgerError::VersionConflict));
        assert_eq!(store.get(&id).unwrap().status, TransactionStatus::Posted);
    }

    #[test]
    fn balance_excludes_entries_after_the_cutoff() {
        let store = TransactionStore::new();
        let early = transaction(
            &store,
            "key-1",
            TransactionStatus::Posted,
            vec![(1, dec!(100.00), dec!(0)), (2, dec!(0), dec!(100.00))],
        );
        store.commit(early);

        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));

        let late = transaction(
            &store,
            "key-2",
            TransactionStatus::Posted,
            vec![(1, dec!(40.00), dec!(0)), (2, dec!(0), dec!(40.00))],
        );
        store.commit(late);

        assert_eq!(store.balance_as_of(&AccountId(1), cutoff), dec!(100.00));
        assert_eq!(store.balance_as_of(&AccountId(1), Utc::now()), dec!(140.00));
    }

    #[test]
    fn pending_entries_do_not_count() {
        let store = TransactionStore::new();
        let pending = transaction(
            &store,
            "key-1",
            TransactionStatus::Pending,
            vec![(1, dec!(100.00), dec!(0)), (2, dec!(0), dec!(100.00))],
        );
        store.commit(pending);

        assert_eq!(store.balance_as_of(&AccountId(1), Utc::now()), Decimal::ZERO);
        assert!(store.entries_for_account(&AccountId(1)).is_empty());
    }

    #[test]
    fn reversed_entries_still_count() {
        let store = TransactionStore::new();
        let txn = transaction(
            &store,
            "key-1",
            TransactionStatus::Posted,
            vec![(1, dec!(100.00), dec!(0)), (2, dec!(0), dec!(100.00))],
        );
        let id = txn.id;
        store.commit(txn);
        store.mark_reversed(&id, 0).unwrap();

        assert_eq!(store.balance_as_of(&AccountId(1), Utc::now()), dec!(100.00));
    }

    #[test]
    fn list_preserves_commit_order() {
        let store = TransactionStore::new();
        for i in 0..5 {
            let txn = transaction(
                &store,
                &format!("key-{i}"),
                TransactionStatus::Posted,
                vec![(1, dec!(1.00), dec!(0)), (2, dec!(0), dec!(1.00))],
            );
            store.commit(txn);
        }

        let listed = store.list();
        assert_eq!(listed.len(), 5);
        for window in listed.windows(2) {
            assert!(window[0].id < window[1].id);
        }
    }
}
