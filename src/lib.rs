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

//! # Wallet Ledger
//!
//! This library moves value between wallets under concurrent access.
//! Deposits, withdrawals and transfers are applied atomically, recorded as
//! double-entry ledger lines, and deduplicated per caller-supplied
//! idempotency token.
//!
//! ## Core Components
//!
//! - [`Engine`]: validates a movement, computes its entries, applies it
//! - [`Coordinator`]: all-or-nothing unit of work over an [`AtomicDomain`]
//! - [`DeduplicationGuard`]: single winner per `(caller, token)`
//! - [`Ledger`]: guard + ownership check + engine, the caller-facing entry point
//! - [`BalanceStore`], [`LedgerLog`], [`DedupStore`]: storage capabilities,
//!   with in-memory implementations in [`memory`]
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_decimal_macros::dec;
//! use wallet_ledger::memory::{MemoryDedupStore, MemoryStore};
//! use wallet_ledger::{CoinType, Ledger, LedgerConfig, LedgerError, Movement, MovementRequest, UserId, Wallet};
//!
//! let store = Arc::new(MemoryStore::new());
//! let ledger = Ledger::new(store.clone(), Arc::new(MemoryDedupStore::new()), &LedgerConfig::default());
//!
//! let alice = UserId::new();
//! let wallet = store.insert_wallet(Wallet::new(alice, CoinType::Btc).with_amount(dec!(100.00)));
//!
//! let request = MovementRequest::new(alice, "req-1", Movement::Deposit { wallet_id: wallet, amount: dec!(50.00) });
//! let receipt = ledger.submit(&request).unwrap();
//! assert_eq!(receipt.balance_of(wallet), Some(dec!(150.00)));
//!
//! // A retry with the same token is rejected and changes nothing.
//! assert_eq!(ledger.submit(&request), Err(LedgerError::DuplicateOrInFlight));
//! assert_eq!(ledger.engine().wallet(wallet).unwrap().amount, dec!(150.00));
//! ```
//!
//! ## Thread Safety
//!
//! There is no global lock. Each wallet row serializes its own balance
//! updates, so movements on different wallets proceed in parallel.

mod base;
pub mod clock;
pub mod config;
pub mod coordinator;
mod engine;
pub mod error;
pub mod guard;
mod ledger;
pub mod memory;
pub mod store;
mod transaction;
mod wallet;

pub use base::{EntryId, TransactionId, UserId, WalletId};
pub use config::LedgerConfig;
pub use coordinator::Coordinator;
pub use engine::{Engine, Receipt, WalletBalance};
pub use error::{LedgerError, Outcome, Phase, StoreError};
pub use guard::{Admission, DeduplicationGuard};
pub use ledger::{Ledger, Movement, MovementRequest};
pub use store::{AtomicDomain, BalanceStore, DedupStore, HistoryPage, HistoryQuery, LedgerLog};
pub use transaction::{
    Direction, EntrySet, LedgerEntry, LedgerTransaction, TransactionKind, TransactionStatus,
};
pub use wallet::{BalanceChange, CoinType, Wallet};
