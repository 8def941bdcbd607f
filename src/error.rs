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

//! Error types for the ledger engine.
//!
//! Every failure surfaces as a [`LedgerError`] variant. Variants are precise
//! (one per failure condition) and each maps to a coarse [`ErrorKind`] that
//! callers use to decide whether a retry can help: only [`ErrorKind::Concurrency`]
//! failures are transient.

use crate::account::Currency;
use crate::base::{AccountId, TransactionId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Coarse classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request, inactive account, or currency mismatch. Caller's fault.
    Validation,
    /// Entries do not balance. Caller's fault.
    Accounting,
    /// Referenced account or transaction does not exist.
    NotFound,
    /// Lock-wait timeout or lost optimistic-version race. Safe to retry.
    Concurrency,
    /// Attempted double reversal.
    Conflict,
}

/// Ledger posting and directory errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Debit and credit totals differ
    #[error("transaction unbalanced: debits {debits} != credits {credits}")]
    Unbalanced { debits: Decimal, credits: Decimal },

    /// Entry carries both a debit and a credit amount
    #[error("entry cannot have both debit and credit amounts")]
    EntryBothSides,

    /// Entry carries neither a debit nor a credit amount
    #[error("entry must have either debit or credit amount")]
    EntryEmpty,

    /// Debit or credit amount is negative
    #[error("entry amounts must not be negative")]
    NegativeAmount,

    /// A posting needs at least two entries
    #[error("transaction requires at least two entries")]
    TooFewEntries,

    /// Idempotency key is missing or blank
    #[error("missing idempotency key")]
    MissingIdempotencyKey,

    /// Description is missing or blank
    #[error("missing description")]
    MissingDescription,

    /// Referenced account does not exist
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Referenced account has been deactivated
    #[error("account is inactive: {0}")]
    AccountInactive(AccountId),

    /// Entry currency differs from the account currency
    #[error("currency mismatch for account {account}: expected {expected}, got {entry}")]
    CurrencyMismatch {
        account: AccountId,
        expected: Currency,
        entry: Currency,
    },

    /// Referenced transaction does not exist
    #[error("transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Lock acquisition timed out for one of the touched accounts
    #[error("failed to acquire lock for account: {0}")]
    LockTimeout(AccountId),

    /// Optimistic version check failed on an update
    #[error("stale version: record was modified concurrently")]
    VersionConflict,

    /// Transaction has already been reversed
    #[error("transaction already reversed: {0}")]
    AlreadyReversed(TransactionId),

    /// Account code is already taken
    #[error("account code already exists: {0}")]
    DuplicateCode(String),

    /// Child account type differs from its parent's
    #[error("child account must have same type as parent")]
    ParentTypeMismatch,

    /// Account still carries a balance and cannot be deactivated
    #[error("cannot deactivate account with non-zero balance: {0}")]
    NonZeroBalance(AccountId),
}

impl LedgerError {
    /// Maps this error to its coarse classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Unbalanced { .. } => ErrorKind::Accounting,
            LedgerError::EntryBothSides
            | LedgerError::EntryEmpty
            | LedgerError::NegativeAmount
            | LedgerError::TooFewEntries
            | LedgerError::MissingIdempotencyKey
            | LedgerError::MissingDescription
            | LedgerError::AccountInactive(_)
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::DuplicateCode(_)
            | LedgerError::ParentTypeMismatch
            | LedgerError::NonZeroBalance(_) => ErrorKind::Validation,
            LedgerError::AccountNotFound(_) | LedgerError::TransactionNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::LockTimeout(_) | LedgerError::VersionConflict => ErrorKind::Concurrency,
            LedgerError::AlreadyReversed(_) => ErrorKind::Conflict,
        }
    }

    /// Whether a retry of the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }
}
