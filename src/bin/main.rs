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
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, de};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wallet_ledger::memory::{MemoryDedupStore, MemoryStore};
use wallet_ledger::{
    BalanceStore, CoinType, Ledger, LedgerConfig, Movement, MovementRequest, UserId, Wallet,
    WalletId,
};

type MemoryLedger = Ledger<MemoryStore, MemoryDedupStore>;

/// Wallet Ledger - Replay money movements against seeded wallets
///
/// Seeds wallets from one CSV file, replays movement requests from another
/// through the deduplication guard and the ledger engine, and writes the
/// final wallet balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "Replays wallet movement CSVs through the ledger engine", long_about = None)]
struct Args {
    /// Path to CSV file with wallets
    ///
    /// Expected format: id,user_id,coin_type,amount
    #[arg(value_name = "WALLETS")]
    wallets: PathBuf,

    /// Path to CSV file with movement requests
    ///
    /// Expected format: caller,token,type,wallet,to_wallet,amount
    /// Example: cargo run -- wallets.csv requests.csv > balances.csv
    #[arg(value_name = "REQUESTS")]
    requests: PathBuf,

    /// Lifetime of an in-flight deduplication marker, in milliseconds
    #[arg(long, env = "LEDGER_IN_FLIGHT_TTL_MS", default_value_t = LedgerConfig::DEFAULT_IN_FLIGHT_TTL_MS)]
    in_flight_ttl_ms: u64,

    /// Lifetime of a marker after its movement committed, in seconds
    #[arg(long, env = "LEDGER_RETENTION_TTL_SECS", default_value_t = LedgerConfig::DEFAULT_RETENTION_TTL_SECS)]
    retention_ttl_secs: u64,

    /// Prefix of deduplication marker keys
    #[arg(long, env = "LEDGER_KEY_PREFIX", default_value = LedgerConfig::DEFAULT_KEY_PREFIX)]
    key_prefix: String,
}

impl Args {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            in_flight_ttl_ms: self.in_flight_ttl_ms,
            retention_ttl_secs: self.retention_ttl_secs,
            key_prefix: self.key_prefix.clone(),
        }
    }
}

fn main() {
    init_tracing();
    let args = Args::parse();

    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(
        Arc::clone(&store),
        Arc::new(MemoryDedupStore::new()),
        &args.config(),
    );

    let wallets = match open(&args.wallets).and_then(|f| seed_wallets(&store, f)) {
        Ok(wallets) => wallets,
        Err(e) => {
            error!(path = %args.wallets.display(), error = %e, "Failed to seed wallets");
            process::exit(1);
        }
    };

    let summary = match open(&args.requests).and_then(|f| replay_requests(&ledger, f)) {
        Ok(summary) => summary,
        Err(e) => {
            error!(path = %args.requests.display(), error = %e, "Failed to replay requests");
            process::exit(1);
        }
    };
    info!(
        applied = summary.applied,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "Replay finished"
    );

    if let Err(e) = write_wallets(store.as_ref(), &wallets, std::io::stdout()) {
        error!(error = %e, "Failed to write balances");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn open(path: &Path) -> Result<BufReader<File>, csv::Error> {
    Ok(BufReader::new(File::open(path)?))
}

/// Raw CSV record describing a provisioned wallet.
///
/// Fields: `id, user_id, coin_type, amount`
#[derive(Debug, Deserialize)]
struct WalletRecord {
    id: WalletId,
    user_id: UserId,
    coin_type: CoinType,
    #[serde(deserialize_with = "non_negative")]
    amount: Decimal,
}

/// Seeded balances start the `amount >= 0` invariant, so negatives are refused.
fn non_negative<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    let amount = <Decimal as Deserialize>::deserialize(deserializer)?;
    if amount < Decimal::ZERO {
        return Err(de::Error::custom(format!("negative wallet amount {amount}")));
    }
    Ok(amount)
}

impl WalletRecord {
    fn into_wallet(self) -> Wallet {
        Wallet::new(self.user_id, self.coin_type)
            .with_id(self.id)
            .with_amount(self.amount)
    }
}

/// Raw CSV record matching the request format.
///
/// Fields: `caller, token, type, wallet, to_wallet, amount`
#[derive(Debug, Deserialize)]
struct RequestRecord {
    caller: UserId,
    token: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    wallet: WalletId,
    to_wallet: Option<WalletId>,
    amount: Decimal,
}

impl RequestRecord {
    /// Converts the CSV record into a request.
    ///
    /// Returns `None` for unknown types or a transfer without a receiver.
    fn into_request(self) -> Option<MovementRequest> {
        let movement = match self.kind.to_lowercase().as_str() {
            "deposit" => Movement::Deposit {
                wallet_id: self.wallet,
                amount: self.amount,
            },
            "withdraw" | "withdrawal" => Movement::Withdraw {
                wallet_id: self.wallet,
                amount: self.amount,
            },
            "transfer" => Movement::Transfer {
                sender_wallet_id: self.wallet,
                receiver_wallet_id: self.to_wallet?,
                amount: self.amount,
            },
            _ => return None,
        };
        Some(MovementRequest {
            caller: self.caller,
            idempotency_token: self.token,
            movement,
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    applied: usize,
    rejected: usize,
    skipped: usize,
}

fn reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// Provisions every wallet in the CSV and returns their ids in file order.
///
/// # Errors
///
/// Returns a CSV error if any row is malformed; a partial seed is useless.
fn seed_wallets<R: Read>(store: &MemoryStore, input: R) -> Result<Vec<WalletId>, csv::Error> {
    let mut ids = Vec::new();
    for record in reader(input).deserialize::<WalletRecord>() {
        ids.push(store.insert_wallet(record?.into_wallet()));
    }
    Ok(ids)
}

/// Replays movement requests from a CSV reader.
///
/// Malformed rows are skipped; rejected movements are logged and counted.
///
/// # Example
///
/// ```csv
/// caller,token,type,wallet,to_wallet,amount
/// 7d0c...,req-1,deposit,1b9f...,,50.00
/// 7d0c...,req-2,transfer,1b9f...,c24e...,25.00
/// ```
fn replay_requests<R: Read>(ledger: &MemoryLedger, input: R) -> Result<ReplaySummary, csv::Error> {
    let mut summary = ReplaySummary::default();

    for (row, result) in reader(input).deserialize::<RequestRecord>().enumerate() {
        let request = match result.map(RequestRecord::into_request) {
            Ok(Some(request)) => request,
            Ok(None) => {
                warn!(row, "Skipping request with unknown type or missing receiver");
                summary.skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(row, error = %e, "Skipping malformed row");
                summary.skipped += 1;
                continue;
            }
        };

        match ledger.submit(&request) {
            Ok(_) => summary.applied += 1,
            Err(e) => {
                warn!(row, error = %e, "Request rejected");
                summary.rejected += 1;
            }
        }
    }

    Ok(summary)
}

/// Writes the final state of `wallets` as CSV.
///
/// Columns: `wallet_id, user_id, coin_type, amount, frozen_amount, created_at`
fn write_wallets<W: Write>(
    store: &MemoryStore,
    wallets: &[WalletId],
    writer: W,
) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for wallet_id in wallets {
        let wallet = store
            .get(*wallet_id)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        if let Some(wallet) = wallet {
            wtr.serialize(&wallet)?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    const ALICE: &str = "00000000-0000-4000-8000-00000000000a";
    const BOB: &str = "00000000-0000-4000-8000-00000000000b";
    const W1: &str = "10000000-0000-4000-8000-000000000001";
    const W2: &str = "20000000-0000-4000-8000-000000000002";

    fn seeded() -> (Arc<MemoryStore>, MemoryLedger) {
        let store = Arc::new(MemoryStore::new());
        let wallets = format!(
            "id,user_id,coin_type,amount\n{W1},{ALICE},BTC,100.00\n{W2},{BOB},BTC,0\n"
        );
        seed_wallets(&store, Cursor::new(wallets)).unwrap();
        let ledger = Ledger::new(
            Arc::clone(&store),
            Arc::new(MemoryDedupStore::new()),
            &LedgerConfig::default(),
        );
        (store, ledger)
    }

    fn amount(store: &MemoryStore, id: &str) -> Decimal {
        store.get(id.parse().unwrap()).unwrap().unwrap().amount
    }

    #[test]
    fn seed_rejects_negative_amount() {
        let store = MemoryStore::new();
        let wallets = format!("id,user_id,coin_type,amount\n{W1},{ALICE},BTC,-5.00\n");

        let err = seed_wallets(&store, Cursor::new(wallets)).unwrap_err();

        assert!(err.to_string().contains("negative wallet amount"));
        assert!(store.get(W1.parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn replay_worked_example() {
        let (store, ledger) = seeded();
        let csv = format!(
            "caller,token,type,wallet,to_wallet,amount\n\
             {ALICE},r1,deposit,{W1},,50.00\n\
             {ALICE},r2,withdraw,{W1},,200.00\n\
             {ALICE},r3,transfer,{W1},{W2},150.00\n"
        );

        let summary = replay_requests(&ledger, Cursor::new(csv)).unwrap();

        assert_eq!(
            summary,
            ReplaySummary {
                applied: 2,
                rejected: 1,
                skipped: 0
            }
        );
        assert_eq!(amount(&store, W1), dec!(0.00));
        assert_eq!(amount(&store, W2), dec!(150.00));
    }

    #[test]
    fn duplicate_token_is_rejected() {
        let (store, ledger) = seeded();
        let csv = format!(
            "caller,token,type,wallet,to_wallet,amount\n\
             {ALICE},r1,deposit,{W1},,1\n\
             {ALICE},r1,deposit,{W1},,1\n"
        );

        let summary = replay_requests(&ledger, Cursor::new(csv)).unwrap();

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(amount(&store, W1), dec!(101.00));
    }

    #[test]
    fn skip_malformed_and_unknown_rows() {
        let (_, ledger) = seeded();
        let csv = format!(
            "caller,token,type,wallet,to_wallet,amount\n\
             not-a-uuid,r1,deposit,{W1},,1\n\
             {ALICE},r2,dispute,{W1},,1\n\
             {ALICE},r3,transfer,{W1},,1\n\
             {ALICE},r4,deposit,{W1},,1\n"
        );

        let summary = replay_requests(&ledger, Cursor::new(csv)).unwrap();

        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.applied, 1);
    }

    #[test]
    fn missing_token_is_rejected() {
        let (store, ledger) = seeded();
        let csv = format!(
            "caller,token,type,wallet,to_wallet,amount\n\
             {ALICE},,deposit,{W1},,1\n"
        );

        let summary = replay_requests(&ledger, Cursor::new(csv)).unwrap();

        assert_eq!(summary.rejected, 1);
        assert_eq!(amount(&store, W1), dec!(100.00));
    }

    #[test]
    fn write_wallets_to_csv() {
        let (store, _) = seeded();
        let ids = vec![W1.parse().unwrap(), W2.parse().unwrap()];

        let mut output = Vec::new();
        write_wallets(&store, &ids, &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("wallet_id,user_id,coin_type,amount,frozen_amount,created_at"));
        assert!(output.contains(&format!("{W1},{ALICE},BTC,100.00,0,")));
    }
}
