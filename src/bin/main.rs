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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use ledger_core_rs::{
    AccountDirectory, AccountType, Currency, LedgerEngine, NewAccount, PostingEntry,
    PostingRequest,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Ledger batch import - replay accounts and postings from CSV files
///
/// Loads the chart of accounts, posts every transaction in the postings file,
/// and prints the resulting account balances to stdout. Rows that fail to
/// parse or post are logged and skipped; the rest of the batch continues.
#[derive(Parser, Debug)]
#[command(name = "ledger-core-rs")]
#[command(about = "A double-entry ledger engine that replays posting CSVs", long_about = None)]
struct Args {
    /// Path to the chart-of-accounts CSV
    ///
    /// Expected format: code,name,type,currency
    #[arg(value_name = "ACCOUNTS")]
    accounts: PathBuf,

    /// Path to the postings CSV
    ///
    /// Expected format: key,description,account,debit,credit,currency
    /// Consecutive rows sharing a key form one transaction.
    #[arg(value_name = "POSTINGS")]
    postings: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let directory = Arc::new(AccountDirectory::new());
    let engine = LedgerEngine::new(Arc::clone(&directory));

    let accounts_file = match File::open(&args.accounts) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.accounts.display(), e);
            process::exit(1);
        }
    };
    if let Err(e) = load_accounts(&directory, BufReader::new(accounts_file)) {
        eprintln!("Error loading accounts: {}", e);
        process::exit(1);
    }

    let postings_file = match File::open(&args.postings) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.postings.display(), e);
            process::exit(1);
        }
    };
    if let Err(e) = post_transactions(&engine, BufReader::new(postings_file)) {
        eprintln!("Error processing postings: {}", e);
        process::exit(1);
    }

    if let Err(e) = write_balances(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record for one chart-of-accounts row.
#[derive(Debug, Deserialize)]
struct AccountRecord {
    code: String,
    name: String,
    #[serde(rename = "type")]
    account_type: String,
    currency: String,
}

/// Raw CSV record for one posting leg.
///
/// Fields: `key, description, account, debit, credit, currency`; `account` is
/// the account code. Missing or unparsable amounts read as zero-absent.
#[derive(Debug, Deserialize)]
struct PostingRecord {
    key: String,
    description: String,
    account: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    debit: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    credit: Option<Decimal>,
    currency: String,
}

/// Load the chart of accounts from a CSV reader.
///
/// Rows with an unknown type or currency, or a duplicate code, are logged and
/// skipped. Returns the number of accounts created.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn load_accounts<R: Read>(
    directory: &AccountDirectory,
    reader: R,
) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut created = 0usize;
    for result in rdr.deserialize::<AccountRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed account row");
                continue;
            }
        };

        let Ok(account_type) = record.account_type.parse::<AccountType>() else {
            warn!(code = %record.code, account_type = %record.account_type, "skipping account with unknown type");
            continue;
        };
        let Ok(currency) = record.currency.parse::<Currency>() else {
            warn!(code = %record.code, currency = %record.currency, "skipping account with unknown currency");
            continue;
        };

        match directory.create(NewAccount::new(
            record.code,
            record.name,
            account_type,
            currency,
        )) {
            Ok(account) => {
                debug!(id = %account.id, code = %account.code, "account created");
                created += 1;
            }
            Err(e) => warn!(error = %e, "skipping account"),
        }
    }

    Ok(created)
}

/// One transaction being assembled from consecutive CSV rows.
#[derive(Debug)]
struct PendingPosting {
    key: String,
    description: String,
    entries: Vec<PostingEntry>,
    /// Set when any row of the group failed to resolve; the whole group is
    /// then skipped rather than posted partially.
    broken: bool,
}

/// Replay postings from a CSV reader through the engine.
///
/// Consecutive rows sharing a key are grouped into one posting request.
/// Groups that fail to resolve or post are logged and skipped. Returns the
/// number of transactions posted.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn post_transactions<R: Read>(
    engine: &LedgerEngine,
    reader: R,
) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut posted = 0usize;
    let mut pending: Option<PendingPosting> = None;

    for result in rdr.deserialize::<PostingRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed posting row");
                continue;
            }
        };

        if pending.as_ref().is_some_and(|p| p.key != record.key) {
            if let Some(group) = pending.take() {
                posted += flush(engine, group);
            }
        }

        let entry = resolve_entry(engine.directory(), &record);
        let group = pending.get_or_insert_with(|| PendingPosting {
            key: record.key.clone(),
            description: record.description.clone(),
            entries: Vec::new(),
            broken: false,
        });
        match entry {
            Some(entry) => group.entries.push(entry),
            None => group.broken = true,
        }
    }

    if let Some(group) = pending.take() {
        posted += flush(engine, group);
    }

    Ok(posted)
}

/// Resolves one CSV row to a posting entry, or logs why it cannot be.
fn resolve_entry(directory: &AccountDirectory, record: &PostingRecord) -> Option<PostingEntry> {
    let Some(account) = directory.get_by_code(&record.account) else {
        warn!(key = %record.key, account = %record.account, "unknown account code");
        return None;
    };
    let Ok(currency) = record.currency.parse::<Currency>() else {
        warn!(key = %record.key, currency = %record.currency, "unknown currency");
        return None;
    };
    Some(PostingEntry {
        account_id: account.id,
        debit: record.debit.unwrap_or(Decimal::ZERO),
        credit: record.credit.unwrap_or(Decimal::ZERO),
        currency,
    })
}

/// Posts one assembled group; returns 1 when it committed.
fn flush(engine: &LedgerEngine, group: PendingPosting) -> usize {
    if group.broken {
        warn!(key = %group.key, "skipping transaction with unresolved rows");
        return 0;
    }
    let key = group.key;
    match engine.post_transaction(PostingRequest::new(
        key.as_str(),
        group.description,
        group.entries,
    )) {
        Ok(result) => {
            debug!(id = %result.id, key = %key, "posted");
            1
        }
        Err(e) => {
            warn!(key = %key, error = %e, "skipping transaction");
            0
        }
    }
}

/// Output row for one account balance.
#[derive(Debug, Serialize)]
struct BalanceRow {
    code: String,
    name: String,
    #[serde(rename = "type")]
    account_type: AccountType,
    currency: Currency,
    balance: Decimal,
}

/// Write current balances for all active accounts to a CSV writer.
///
/// Rows are ordered by account code.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_balances<W: Write>(engine: &LedgerEngine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut accounts = engine.directory().list_active();
    accounts.sort_by(|a, b| a.code.cmp(&b.code));

    for account in accounts {
        let balance = engine
            .account_balance(&account.id, None)
            .unwrap_or(Decimal::ZERO);
        wtr.serialize(BalanceRow {
            code: account.code,
            name: account.name,
            account_type: account.account_type,
            currency: account.currency,
            balance,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
