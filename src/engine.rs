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

//! Transaction posting engine.
//!
//! The [`LedgerEngine`] is the central component: it validates balanced
//! entries, enforces at-most-once commits through the two idempotency tiers,
//! serializes postings per account through the lock table, and owns the
//! reversal algorithm.
//!
//! # Posting pipeline
//!
//! 1. Idempotency check (cache, then durable store): duplicates replay the
//!    original result with no validation, locking, or write.
//! 2. Validation, which fails fast with zero side effects.
//! 3. Ordered lock acquisition over the distinct accounts touched.
//! 4. Atomic commit of the transaction and all entries, stamped `POSTED`.
//! 5. Lock release on every exit path (RAII guards).
//! 6. Idempotency cache population, strictly after the commit.
//!
//! # Concurrency
//!
//! Postings over disjoint account sets run fully in parallel. Postings that
//! share an account serialize in lock-acquisition order; submission order is
//! not preserved and FIFO fairness is not promised.

use crate::account::AccountDirectory;
use crate::base::{AccountId, TransactionId};
use crate::coordinator::AccountLockTable;
use crate::error::LedgerError;
use crate::idempotency::IdempotencyCache;
use crate::store::{Commit, TransactionStore};
use crate::transaction::{
    EntryResult, PostingEntry, PostingRequest, Transaction, TransactionEntry, TransactionResult,
    TransactionStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Double-entry transaction posting engine.
///
/// # Invariants
///
/// - Every committed transaction balances: sum(debit) == sum(credit), in
///   exact decimal arithmetic.
/// - A given idempotency key commits at most one transaction, under any
///   interleaving of duplicate submissions.
/// - The ledger is append-only: posted entries are never mutated; a reversal
///   is a new transaction that negates the original.
pub struct LedgerEngine {
    directory: Arc<AccountDirectory>,
    store: TransactionStore,
    locks: AccountLockTable,
    recent: IdempotencyCache,
}

impl LedgerEngine {
    /// An engine over `directory` with default lock and cache settings.
    pub fn new(directory: Arc<AccountDirectory>) -> Self {
        Self::with_components(directory, AccountLockTable::new(), IdempotencyCache::new())
    }

    /// An engine with caller-supplied coordinator and cache.
    ///
    /// The lock table is injectable so a deployment can substitute another
    /// coordination mechanism without touching posting logic.
    pub fn with_components(
        directory: Arc<AccountDirectory>,
        locks: AccountLockTable,
        recent: IdempotencyCache,
    ) -> Self {
        Self {
            directory,
            store: TransactionStore::new(),
            locks,
            recent,
        }
    }

    /// Posts one balanced transaction.
    ///
    /// Resubmitting a request with a known idempotency key (same payload or
    /// not) replays the original result and never errors.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Unbalanced`] - debit and credit totals differ.
    /// - [`LedgerError::EntryBothSides`] / [`LedgerError::EntryEmpty`] /
    ///   [`LedgerError::NegativeAmount`] - malformed entry.
    /// - [`LedgerError::AccountNotFound`] / [`LedgerError::AccountInactive`] -
    ///   bad account reference.
    /// - [`LedgerError::CurrencyMismatch`] - entry currency differs from the
    ///   account's.
    /// - [`LedgerError::LockTimeout`] - an account lock could not be acquired
    ///   in time; nothing was written and the caller may retry.
    pub fn post_transaction(
        &self,
        request: PostingRequest,
    ) -> Result<TransactionResult, LedgerError> {
        if let Some(cached) = self.recent.get(&request.idempotency_key) {
            debug!(key = %request.idempotency_key, "replaying cached transaction");
            return Ok(cached);
        }
        if let Some(existing) = self.store.find_by_key(&request.idempotency_key) {
            info!(key = %request.idempotency_key, id = %existing.id, "replaying committed transaction");
            let result = self.to_result(&existing);
            self.recent.insert(result.clone());
            return Ok(result);
        }

        self.validate(&request)?;

        // Distinct accounts, ascending: the global lock order.
        let account_ids: BTreeSet<AccountId> =
            request.entries.iter().map(|e| e.account_id).collect();
        let held = self.locks.lock_accounts(account_ids.iter().copied())?;
        debug!(key = %request.idempotency_key, accounts = held.len(), "holding account locks");

        let transaction = self.build_transaction(request);
        let committed = match self.store.commit(transaction) {
            Commit::Fresh(t) => {
                info!(id = %t.id, key = %t.idempotency_key, "transaction posted");
                t
            }
            Commit::Duplicate(t) => {
                // A concurrent duplicate won the unique-key race; its result
                // is the canonical one.
                info!(id = %t.id, key = %t.idempotency_key, "duplicate commit lost the key race, replaying winner");
                t
            }
        };

        // The commit is durable; nothing below needs the locks.
        drop(held);

        let result = self.to_result(&committed);
        self.recent.insert(result.clone());
        Ok(result)
    }

    /// Reverses a posted transaction by posting its mirror image.
    ///
    /// The reversal's idempotency key is derived from the original id, so a
    /// retried or raced reversal converges on one reversal transaction. The
    /// original flips to `REVERSED` and can never be reversed again.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransactionNotFound`] - unknown transaction.
    /// - [`LedgerError::AlreadyReversed`] - the transaction was reversed
    ///   before.
    pub fn reverse_transaction(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<TransactionResult, LedgerError> {
        let original = self
            .store
            .get(transaction_id)
            .ok_or(LedgerError::TransactionNotFound(*transaction_id))?;

        if original.status == TransactionStatus::Reversed {
            return Err(LedgerError::AlreadyReversed(*transaction_id));
        }

        let entries = original
            .entries
            .iter()
            .map(|entry| PostingEntry {
                account_id: entry.account_id,
                debit: entry.credit,
                credit: entry.debit,
                currency: entry.currency,
            })
            .collect();

        let request = PostingRequest {
            idempotency_key: format!("reversal-{}", original.id).into(),
            description: format!(
                "Reversal: {} | Reason: {}",
                original.description, reason
            ),
            entries,
            reversal_of: Some(original.id),
        };

        let result = self.post_transaction(request)?;
        self.store.mark_reversed(transaction_id, original.version)?;
        info!(id = %transaction_id, reversal = %result.id, "transaction reversed");
        Ok(result)
    }

    /// Net debit-minus-credit balance for one account.
    ///
    /// Sums committed entries posted at or before `as_of` (now, if omitted).
    /// Read-only: never touches the lock table, so balance reads proceed while
    /// postings are in flight.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AccountNotFound`] for an unknown account.
    pub fn account_balance(
        &self,
        account_id: &AccountId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Decimal, LedgerError> {
        if self.directory.get(account_id).is_none() {
            return Err(LedgerError::AccountNotFound(*account_id));
        }
        let as_of = as_of.unwrap_or_else(Utc::now);
        Ok(self.store.balance_as_of(account_id, as_of))
    }

    /// Retrieves one committed transaction.
    pub fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<TransactionResult, LedgerError> {
        self.store
            .get(transaction_id)
            .map(|t| self.to_result(&t))
            .ok_or(LedgerError::TransactionNotFound(*transaction_id))
    }

    /// All committed transactions in commit order.
    pub fn list_transactions(&self) -> Vec<TransactionResult> {
        self.store
            .list()
            .iter()
            .map(|t| self.to_result(t))
            .collect()
    }

    /// The account directory this engine reads from.
    pub fn directory(&self) -> &AccountDirectory {
        &self.directory
    }

    /// Validates a posting request. No side effects: nothing is locked and
    /// nothing is written before this passes.
    fn validate(&self, request: &PostingRequest) -> Result<(), LedgerError> {
        if request.idempotency_key.0.trim().is_empty() {
            return Err(LedgerError::MissingIdempotencyKey);
        }
        if request.description.trim().is_empty() {
            return Err(LedgerError::MissingDescription);
        }
        if request.entries.len() < 2 {
            return Err(LedgerError::TooFewEntries);
        }

        let debits: Decimal = request.entries.iter().map(|e| e.debit).sum();
        let credits: Decimal = request.entries.iter().map(|e| e.credit).sum();
        if debits != credits {
            return Err(LedgerError::Unbalanced { debits, credits });
        }

        for entry in &request.entries {
            if entry.debit < Decimal::ZERO || entry.credit < Decimal::ZERO {
                return Err(LedgerError::NegativeAmount);
            }
            let has_debit = entry.debit > Decimal::ZERO;
            let has_credit = entry.credit > Decimal::ZERO;
            if has_debit && has_credit {
                return Err(LedgerError::EntryBothSides);
            }
            if !has_debit && !has_credit {
                return Err(LedgerError::EntryEmpty);
            }

            let account = self
                .directory
                .get(&entry.account_id)
                .ok_or(LedgerError::AccountNotFound(entry.account_id))?;
            if !account.is_active {
                return Err(LedgerError::AccountInactive(entry.account_id));
            }
            if account.currency != entry.currency {
                return Err(LedgerError::CurrencyMismatch {
                    account: entry.account_id,
                    expected: account.currency,
                    entry: entry.currency,
                });
            }
        }

        Ok(())
    }

    /// Builds the committed form of a request. Caller must hold the locks for
    /// every touched account: running balances are read from the store here
    /// and must not move underneath us.
    fn build_transaction(&self, request: PostingRequest) -> Transaction {
        let posted_at = Utc::now();

        let mut balances: HashMap<AccountId, Decimal> = HashMap::new();
        for entry in &request.entries {
            balances
                .entry(entry.account_id)
                .or_insert_with(|| self.store.balance_as_of(&entry.account_id, posted_at));
        }

        let entries = request
            .entries
            .iter()
            .map(|entry| {
                let balance = balances
                    .entry(entry.account_id)
                    .or_insert(Decimal::ZERO);
                *balance += entry.debit - entry.credit;
                TransactionEntry {
                    account_id: entry.account_id,
                    debit: entry.debit,
                    credit: entry.credit,
                    currency: entry.currency,
                    running_balance: *balance,
                    posted_at,
                }
            })
            .collect();

        Transaction {
            id: self.store.next_id(),
            idempotency_key: request.idempotency_key,
            description: request.description,
            status: TransactionStatus::Posted,
            posted_at,
            reversal_of: request.reversal_of,
            entries,
            version: 0,
            created_at: posted_at,
        }
    }

    /// Maps a committed transaction to its caller-facing result.
    fn to_result(&self, transaction: &Transaction) -> TransactionResult {
        let entries = transaction
            .entries
            .iter()
            .map(|entry| EntryResult {
                account_id: entry.account_id,
                account_code: self
                    .directory
                    .get(&entry.account_id)
                    .map(|a| a.code)
                    .unwrap_or_default(),
                debit: entry.debit,
                credit: entry.credit,
                currency: entry.currency,
                running_balance: entry.running_balance,
            })
            .collect();

        TransactionResult {
            id: transaction.id,
            idempotency_key: transaction.idempotency_key.clone(),
            description: transaction.description.clone(),
            status: transaction.status,
            posted_at: transaction.posted_at,
            reversal_of: transaction.reversal_of,
            entries,
            created_at: transaction.created_at,
        }
    }
}
