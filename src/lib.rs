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

//! # Ledger Core
//!
//! This library provides a double-entry accounting ledger engine: it accepts
//! requests to move value between accounts and guarantees that every recorded
//! movement is balanced, posted at most once, and never mutated afterwards,
//! even under concurrent submission.
//!
//! ## Core Components
//!
//! - [`LedgerEngine`]: Central posting engine handling validation, idempotent
//!   commits, per-account locking, reversals, and balance queries
//! - [`AccountDirectory`]: Chart of accounts (identity, type, currency,
//!   hierarchy, active flag); read-only from the engine's perspective
//! - [`AccountLockTable`]: Per-account exclusive locks acquired in a
//!   deterministic order so overlapping postings cannot deadlock
//! - [`IdempotencyCache`]: Bounded expiring fast tier over the durable
//!   unique-key record
//! - [`LedgerError`]: Typed failure taxonomy with retryability classification
//!
//! ## Example
//!
//! ```
//! use ledger_core_rs::{
//!     AccountDirectory, AccountType, Currency, LedgerEngine, NewAccount, PostingEntry,
//!     PostingRequest, TransactionStatus,
//! };
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let directory = Arc::new(AccountDirectory::new());
//! let cash = directory
//!     .create(NewAccount::new("1000", "Cash", AccountType::Asset, Currency::Kes))
//!     .unwrap();
//! let revenue = directory
//!     .create(NewAccount::new("4000", "Interest income", AccountType::Income, Currency::Kes))
//!     .unwrap();
//!
//! let engine = LedgerEngine::new(directory);
//! let result = engine
//!     .post_transaction(PostingRequest::new(
//!         "inv-001",
//!         "Interest on loan 42",
//!         vec![
//!             PostingEntry::debit(cash.id, dec!(100.00), Currency::Kes),
//!             PostingEntry::credit(revenue.id, dec!(100.00), Currency::Kes),
//!         ],
//!     ))
//!     .unwrap();
//!
//! assert_eq!(result.status, TransactionStatus::Posted);
//! assert_eq!(engine.account_balance(&cash.id, None).unwrap(), dec!(100.00));
//! ```
//!
//! ## Thread Safety
//!
//! Postings over disjoint account sets run fully in parallel. Postings that
//! share an account serialize through the lock table, which acquires locks in
//! ascending account-id order on every path. That ordering is what rules out
//! deadlock between overlapping postings.

pub mod account;
mod base;
mod coordinator;
mod engine;
pub mod error;
mod idempotency;
mod store;
mod transaction;

pub use account::{Account, AccountDirectory, AccountType, Currency, NewAccount};
pub use base::{AccountId, IdempotencyKey, TransactionId};
pub use coordinator::{AccountLockSet, AccountLockTable, DEFAULT_LOCK_TIMEOUT};
pub use engine::LedgerEngine;
pub use error::{ErrorKind, LedgerError};
pub use idempotency::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, IdempotencyCache};
pub use store::{Commit, TransactionStore};
pub use transaction::{
    EntryResult, PostingEntry, PostingRequest, Transaction, TransactionEntry, TransactionResult,
    TransactionStatus,
};
