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

//! Chart of accounts.
//!
//! The [`AccountDirectory`] owns account identity: code, type, currency,
//! hierarchy, and the active flag. The posting engine only ever reads it;
//! writes (create, deactivate) belong to whoever administers the chart.
//!
//! # Example
//!
//! ```
//! use ledger_core_rs::{AccountDirectory, AccountType, Currency, NewAccount};
//!
//! let directory = AccountDirectory::new();
//! let cash = directory
//!     .create(NewAccount::new("1000", "Cash", AccountType::Asset, Currency::Kes))
//!     .unwrap();
//! assert_eq!(directory.get_by_code("1000").unwrap().id, cash.id);
//! ```

use crate::base::AccountId;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where an account sits in the accounting equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountType::Asset => "ASSET",
            AccountType::Liability => "LIABILITY",
            AccountType::Equity => "EQUITY",
            AccountType::Income => "INCOME",
            AccountType::Expense => "EXPENSE",
        };
        write!(f, "{name}")
    }
}

impl FromStr for AccountType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ASSET" => Ok(AccountType::Asset),
            "LIABILITY" => Ok(AccountType::Liability),
            "EQUITY" => Ok(AccountType::Equity),
            "INCOME" => Ok(AccountType::Income),
            "EXPENSE" => Ok(AccountType::Expense),
            _ => Err(()),
        }
    }
}

/// Currencies the ledger accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Kes,
    Usd,
    Eur,
    Gbp,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::Kes => "KES",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        };
        write!(f, "{code}")
    }
}

impl FromStr for Currency {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "KES" => Ok(Currency::Kes),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            _ => Err(()),
        }
    }
}

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Unique code within the chart, e.g. `"1000"`.
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub currency: Currency,
    /// Parent in the chart hierarchy. A child shares its parent's type.
    pub parent: Option<AccountId>,
    pub is_active: bool,
    /// Optimistic version counter, bumped on every directory update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a directory entry.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub currency: Currency,
    pub parent: Option<AccountId>,
}

impl NewAccount {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        account_type: AccountType,
        currency: Currency,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            account_type,
            currency,
            parent: None,
        }
    }

    /// Places the new account under `parent` in the hierarchy.
    pub fn with_parent(mut self, parent: AccountId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Concurrent account directory.
///
/// Code uniqueness is enforced atomically through the code index's entry API,
/// so two racing `create` calls with the same code cannot both win.
#[derive(Debug)]
pub struct AccountDirectory {
    accounts: DashMap<AccountId, Account>,
    by_code: DashMap<String, AccountId>,
    next_id: AtomicU64,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            by_code: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates an account.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicateCode`] - the code is already taken.
    /// - [`LedgerError::AccountNotFound`] - the parent does not exist.
    /// - [`LedgerError::ParentTypeMismatch`] - the parent has a different type.
    pub fn create(&self, new: NewAccount) -> Result<Account, LedgerError> {
        if let Some(parent_id) = new.parent {
            let parent = self
                .accounts
                .get(&parent_id)
                .ok_or(LedgerError::AccountNotFound(parent_id))?;
            if parent.account_type != new.account_type {
                return Err(LedgerError::ParentTypeMismatch);
            }
        }

        let id = AccountId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let account = Account {
            id,
            code: new.code.clone(),
            name: new.name,
            account_type: new.account_type,
            currency: new.currency,
            parent: new.parent,
            is_active: true,
            version: 0,
            created_at: Utc::now(),
        };

        // The code index is the uniqueness gate; reserve it before publishing
        // the account record.
        match self.by_code.entry(new.code) {
            Entry::Occupied(entry) => Err(LedgerError::DuplicateCode(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(id);
                self.accounts.insert(id, account.clone());
                Ok(account)
            }
        }
    }

    /// Retrieves an account by id.
    pub fn get(&self, id: &AccountId) -> Option<Account> {
        self.accounts.get(id).map(|a| a.clone())
    }

    /// Retrieves an account by its unique code.
    pub fn get_by_code(&self, code: &str) -> Option<Account> {
        let id = *self.by_code.get(code)?;
        self.get(&id)
    }

    /// All active accounts, in no particular order.
    pub fn list_active(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .filter(|a| a.is_active)
            .map(|a| a.clone())
            .collect()
    }

    /// All active accounts of one type.
    pub fn list_by_type(&self, account_type: AccountType) -> Vec<Account> {
        self.accounts
            .iter()
            .filter(|a| a.is_active && a.account_type == account_type)
            .map(|a| a.clone())
            .collect()
    }

    /// Deactivates an account.
    ///
    /// The directory does not track balances, so the caller supplies the
    /// account's current balance; a non-zero balance refuses the deactivation.
    /// `expected_version` is compared against the stored version and a mismatch
    /// fails with [`LedgerError::VersionConflict`], which is retryable.
    pub fn deactivate(
        &self,
        id: &AccountId,
        expected_version: u64,
        balance: Decimal,
    ) -> Result<Account, LedgerError> {
        if balance != Decimal::ZERO {
            return Err(LedgerError::NonZeroBalance(*id));
        }

        let mut account = self
            .accounts
            .get_mut(id)
            .ok_or(LedgerError::AccountNotFound(*id))?;
        if account.version != expected_version {
            return Err(LedgerError::VersionConflict);
        }
        account.is_active = false;
        account.version += 1;
        Ok(account.clone())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl Default for AccountDirectory {
    fn default() -> Self {
        Self::new()
    }
}
