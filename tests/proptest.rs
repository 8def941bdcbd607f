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

//! Property-based tests for the posting engine.
//!
//! These verify invariants that must hold for any generated entry set: every
//! committed transaction balances exactly, unbalanced sets never commit,
//! duplicate keys never double-post, and reversals negate their originals.

use ledger_core_rs::{
    AccountDirectory, AccountId, AccountType, Currency, ErrorKind, LedgerEngine, NewAccount,
    PostingEntry, PostingRequest,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

const NUM_ACCOUNTS: usize = 4;

/// Engine over a small chart of KES accounts.
fn setup() -> (LedgerEngine, Vec<AccountId>) {
    let directory = Arc::new(AccountDirectory::new());
    let accounts: Vec<AccountId> = (0..NUM_ACCOUNTS)
        .map(|i| {
            directory
                .create(NewAccount::new(
                    format!("1{i:03}"),
                    format!("Account {i}"),
                    AccountType::Asset,
                    Currency::Kes,
                ))
                .unwrap()
                .id
        })
        .collect();
    (LedgerEngine::new(directory), accounts)
}

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate a positive amount (0.0001 to 1000 with 4 decimal places).
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000_000i64).prop_map(|cents| Decimal::new(cents, 4))
}

/// A balanced entry set: each generated amount becomes one debit leg and one
/// credit leg over randomly chosen accounts.
fn arb_balanced_entries() -> impl Strategy<Value = Vec<(usize, usize, Decimal)>> {
    prop::collection::vec(
        (0..NUM_ACCOUNTS, 0..NUM_ACCOUNTS, arb_amount()),
        1..6,
    )
}

fn build_entries(
    accounts: &[AccountId],
    legs: &[(usize, usize, Decimal)],
) -> Vec<PostingEntry> {
    let mut entries = Vec::with_capacity(legs.len() * 2);
    for (debit_idx, credit_idx, amount) in legs {
        entries.push(PostingEntry::debit(
            accounts[*debit_idx],
            *amount,
            Currency::Kes,
        ));
        entries.push(PostingEntry::credit(
            accounts[*credit_idx],
            *amount,
            Currency::Kes,
        ));
    }
    entries
}

// =============================================================================
// Posting Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every committed transaction balances exactly.
    #[test]
    fn balanced_sets_always_post(legs in arb_balanced_entries()) {
        let (engine, accounts) = setup();

        let result = engine
            .post_transaction(PostingRequest::new(
                "prop-1",
                "Generated posting",
                build_entries(&accounts, &legs),
            ))
            .unwrap();

        let debits: Decimal = result.entries.iter().map(|e| e.debit).sum();
        let credits: Decimal = result.entries.iter().map(|e| e.credit).sum();
        prop_assert_eq!(debits, credits);
    }

    /// Unbalanced sets are always rejected with the accounting error and
    /// leave no trace in the ledger.
    #[test]
    fn unbalanced_sets_are_always_rejected(
        legs in arb_balanced_entries(),
        skew in arb_amount(),
    ) {
        let (engine, accounts) = setup();

        let mut entries = build_entries(&accounts, &legs);
        // Skew one debit leg so the totals cannot match.
        entries[0].debit += skew;

        let result = engine.post_transaction(PostingRequest::new(
            "prop-1",
            "Skewed posting",
            entries,
        ));

        let err = result.unwrap_err();
        prop_assert_eq!(err.kind(), ErrorKind::Accounting);
        prop_assert!(engine.list_transactions().is_empty());
        for account in &accounts {
            prop_assert_eq!(
                engine.account_balance(account, None).unwrap(),
                Decimal::ZERO
            );
        }
    }

    /// The net of all balances over any committed set is zero: money moves,
    /// it is never created or destroyed.
    #[test]
    fn balances_always_net_to_zero(
        postings in prop::collection::vec(arb_balanced_entries(), 1..5),
    ) {
        let (engine, accounts) = setup();

        for (i, legs) in postings.iter().enumerate() {
            engine
                .post_transaction(PostingRequest::new(
                    format!("prop-{i}"),
                    "Generated posting",
                    build_entries(&accounts, legs),
                ))
                .unwrap();
        }

        let net: Decimal = accounts
            .iter()
            .map(|a| engine.account_balance(a, None).unwrap())
            .sum();
        prop_assert_eq!(net, Decimal::ZERO);
    }
}

// =============================================================================
// Idempotency Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Resubmitting a key returns the identical result and commits exactly
    /// one transaction, whatever the second payload looks like.
    #[test]
    fn duplicate_keys_never_double_post(
        legs in arb_balanced_entries(),
        other_legs in arb_balanced_entries(),
    ) {
        let (engine, accounts) = setup();

        let first = engine
            .post_transaction(PostingRequest::new(
                "prop-dup",
                "Original",
                build_entries(&accounts, &legs),
            ))
            .unwrap();

        let second = engine
            .post_transaction(PostingRequest::new(
                "prop-dup",
                "Different payload",
                build_entries(&accounts, &other_legs),
            ))
            .unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(engine.list_transactions().len(), 1);
    }
}

// =============================================================================
// Reversal Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// A reversal restores every account to its pre-transaction balance.
    #[test]
    fn reversal_restores_prior_balances(
        base in arb_balanced_entries(),
        target in arb_balanced_entries(),
    ) {
        let (engine, accounts) = setup();

        // Some unrelated history first.
        engine
            .post_transaction(PostingRequest::new(
                "prop-base",
                "History",
                build_entries(&accounts, &base),
            ))
            .unwrap();
        let before: Vec<Decimal> = accounts
            .iter()
            .map(|a| engine.account_balance(a, None).unwrap())
            .collect();

        let posted = engine
            .post_transaction(PostingRequest::new(
                "prop-target",
                "To be reversed",
                build_entries(&accounts, &target),
            ))
            .unwrap();
        engine.reverse_transaction(&posted.id, "generated").unwrap();

        let after: Vec<Decimal> = accounts
            .iter()
            .map(|a| engine.account_balance(a, None).unwrap())
            .collect();
        prop_assert_eq!(before, after);
    }

    /// A reversal's entries are the original's with debit and credit swapped,
    /// account by account.
    #[test]
    fn reversal_swaps_each_entry(legs in arb_balanced_entries()) {
        let (engine, accounts) = setup();

        let posted = engine
            .post_transaction(PostingRequest::new(
                "prop-target",
                "To be reversed",
                build_entries(&accounts, &legs),
            ))
            .unwrap();
        let reversal = engine.reverse_transaction(&posted.id, "generated").unwrap();

        prop_assert_eq!(posted.entries.len(), reversal.entries.len());
        for (original, mirrored) in posted.entries.iter().zip(reversal.entries.iter()) {
            prop_assert_eq!(original.account_id, mirrored.account_id);
            prop_assert_eq!(original.debit, mirrored.credit);
            prop_assert_eq!(original.credit, mirrored.debit);
        }
    }
}
