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

//! Posting requests and committed transactions.
//!
//! A [`PostingRequest`] is the caller's input. A [`Transaction`] is the
//! committed, append-only record: once its status is [`TransactionStatus::Posted`]
//! its entries never change. Corrections are new reversing transactions.

use crate::account::Currency;
use crate::base::{AccountId, IdempotencyKey, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of a transaction.
///
/// The only transitions are (none) → `Posted` on a successful commit and
/// `Posted` → `Reversed` on a successful reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Posted,
    Reversed,
}

impl TransactionStatus {
    /// Whether entries of a transaction in this status count toward balances.
    ///
    /// A reversed original still counts: its negation is the reversal
    /// transaction, so the pair nets to zero. Only entries that never
    /// committed are excluded.
    pub fn counts_toward_balance(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// One leg of a posting request.
///
/// Exactly one of `debit`/`credit` must be strictly positive; the other is
/// zero. The currency must match the referenced account's currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingEntry {
    pub account_id: AccountId,
    pub debit: Decimal,
    pub credit: Decimal,
    pub currency: Currency,
}

impl PostingEntry {
    /// A debit leg for `amount`.
    pub fn debit(account_id: AccountId, amount: Decimal, currency: Currency) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
            currency,
        }
    }

    /// A credit leg for `amount`.
    pub fn credit(account_id: AccountId, amount: Decimal, currency: Currency) -> Self {
        Self {
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
            currency,
        }
    }
}

/// A request to post one balanced transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub idempotency_key: IdempotencyKey,
    pub description: String,
    pub entries: Vec<PostingEntry>,
    /// Set by the reversal path to point back at the original transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_of: Option<TransactionId>,
}

impl PostingRequest {
    pub fn new(
        idempotency_key: impl Into<IdempotencyKey>,
        description: impl Into<String>,
        entries: Vec<PostingEntry>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            description: description.into(),
            entries,
            reversal_of: None,
        }
    }
}

/// One committed entry. Owned by its transaction; dies with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub account_id: AccountId,
    pub debit: Decimal,
    pub credit: Decimal,
    pub currency: Currency,
    /// Account balance immediately after this entry applied.
    pub running_balance: Decimal,
    /// Inherited from the parent transaction.
    pub posted_at: DateTime<Utc>,
}

impl TransactionEntry {
    /// Signed effect of this entry on its account's balance.
    pub fn signed_amount(&self) -> Decimal {
        self.debit - self.credit
    }
}

/// A committed transaction and its entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub idempotency_key: IdempotencyKey,
    pub description: String,
    pub status: TransactionStatus,
    pub posted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_of: Option<TransactionId>,
    pub entries: Vec<TransactionEntry>,
    /// Optimistic version counter, bumped when the status flips to reversed.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

/// Caller-facing view of one committed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryResult {
    pub account_id: AccountId,
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub currency: Currency,
    pub running_balance: Decimal,
}

/// Caller-facing view of a committed transaction.
///
/// This is what the idempotency cache stores and what a duplicate request
/// replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub id: TransactionId,
    pub idempotency_key: IdempotencyKey,
    pub description: String,
    pub status: TransactionStatus,
    pub posted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_of: Option<TransactionId>,
    pub entries: Vec<EntryResult>,
    pub created_at: DateTime<Utc>,
}
