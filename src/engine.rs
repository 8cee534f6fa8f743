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

//! Ledger transaction engine.
//!
//! The [`Engine`] validates a requested money movement, computes its entry
//! set, and applies it through the [`Coordinator`] so that balances and the
//! audit trail change together or not at all.
//!
//! # Movements
//!
//! - **Deposit**: credit one wallet, one `In` entry.
//! - **Withdraw**: debit one wallet, one `Out` entry.
//! - **Transfer**: debit the sender, credit the receiver, two mirrored entries.
//!
//! # Thread Safety
//!
//! The engine holds no per-request state and no global lock. Balance checks
//! made before the unit of work are advisory; the store's conditional debit
//! is authoritative, so concurrent withdrawals on one wallet cannot both
//! succeed past zero.

use crate::base::{TransactionId, UserId, WalletId};
use crate::coordinator::Coordinator;
use crate::error::{LedgerError, Phase, StoreError};
use crate::store::{BalanceStore, HistoryPage, HistoryQuery, LedgerLog};
use crate::transaction::{EntrySet, LedgerEntry, LedgerTransaction, TransactionKind};
use crate::wallet::Wallet;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Balance of a wallet right after a movement committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WalletBalance {
    pub wallet_id: WalletId,
    pub amount: Decimal,
}

/// Success payload of a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balances: Vec<WalletBalance>,
}

impl Receipt {
    /// Post-commit balance of `wallet_id`, if the movement touched it.
    pub fn balance_of(&self, wallet_id: WalletId) -> Option<Decimal> {
        self.balances
            .iter()
            .find(|b| b.wallet_id == wallet_id)
            .map(|b| b.amount)
    }
}

/// Money movement engine over a store implementing both capabilities.
///
/// # Invariants
///
/// - A wallet's committed balance is never negative.
/// - Every committed transaction carries exactly the entries of its kind.
/// - A failed movement leaves neither balance changes nor log lines behind.
pub struct Engine<S: BalanceStore + LedgerLog> {
    store: Arc<S>,
    coordinator: Coordinator<S>,
}

impl<S: BalanceStore + LedgerLog> Engine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            coordinator: Coordinator::new(Arc::clone(&store)),
            store,
        }
    }

    /// Credits `amount` to a wallet.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is not positive, or the
    ///   credit would overflow the balance.
    /// - [`LedgerError::WalletNotFound`] - unknown wallet.
    /// - [`LedgerError::StorageUnavailable`] - store failure.
    #[instrument(skip_all, fields(wallet = %wallet_id, amount = %amount))]
    pub fn deposit(&self, wallet_id: WalletId, amount: Decimal) -> Result<Receipt, LedgerError> {
        ensure_positive(amount)?;
        let wallet = self.load(wallet_id)?;

        let set = EntrySet::deposit(wallet.id, amount)?;
        self.execute(&set)
    }

    /// Debits `amount` from a wallet.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is not positive.
    /// - [`LedgerError::WalletNotFound`] - unknown wallet.
    /// - [`LedgerError::InsufficientBalance`] - balance read before the unit
    ///   of work does not cover `amount`.
    /// - [`LedgerError::Conflict`] - the balance dropped below `amount` between
    ///   the read and the conditional debit.
    /// - [`LedgerError::StorageUnavailable`] - store failure.
    #[instrument(skip_all, fields(wallet = %wallet_id, amount = %amount))]
    pub fn withdraw(&self, wallet_id: WalletId, amount: Decimal) -> Result<Receipt, LedgerError> {
        ensure_positive(amount)?;
        let wallet = self.load(wallet_id)?;
        ensure_covers(&wallet, amount)?;

        let set = EntrySet::withdrawal(wallet.id, amount)?;
        self.execute(&set)
    }

    /// Moves `amount` from `sender_id` to `receiver_id`.
    ///
    /// # Errors
    ///
    /// Everything [`Engine::withdraw`] returns, plus:
    /// - [`LedgerError::SelfTransfer`] - sender and receiver are the same.
    /// - [`LedgerError::CurrencyMismatch`] - wallets hold different coins.
    #[instrument(skip_all, fields(sender = %sender_id, receiver = %receiver_id, amount = %amount))]
    pub fn transfer(
        &self,
        sender_id: WalletId,
        receiver_id: WalletId,
        amount: Decimal,
    ) -> Result<Receipt, LedgerError> {
        ensure_positive(amount)?;
        if sender_id == receiver_id {
            return Err(LedgerError::SelfTransfer);
        }

        let sender = self.load(sender_id)?;
        let receiver = self.load(receiver_id)?;
        if sender.coin_type != receiver.coin_type {
            return Err(LedgerError::CurrencyMismatch {
                sender: sender.coin_type,
                receiver: receiver.coin_type,
            });
        }
        ensure_covers(&sender, amount)?;

        let set = EntrySet::transfer(sender.id, receiver.id, amount)?;
        self.execute(&set)
    }

    /// Current committed state of a wallet.
    pub fn wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.load(wallet_id)
    }

    /// All wallets owned by `user_id`, oldest first.
    pub fn wallets_of(&self, user_id: UserId) -> Result<Vec<Wallet>, LedgerError> {
        self.store
            .wallets_of(user_id)
            .map_err(|e| LedgerError::from_store(e, Phase::Read))
    }

    pub fn transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        self.store
            .transaction(transaction_id)
            .map_err(|e| LedgerError::from_store(e, Phase::Read))
    }

    pub fn entries(&self, transaction_id: TransactionId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store
            .entries_of(transaction_id)
            .map_err(|e| LedgerError::from_store(e, Phase::Read))
    }

    /// Entry history of a wallet, newest first.
    pub fn history(
        &self,
        wallet_id: WalletId,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, LedgerError> {
        self.load(wallet_id)?;
        self.store
            .history(wallet_id, query)
            .map_err(|e| LedgerError::from_store(e, Phase::Read))
    }

    fn load(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .get(wallet_id)
            .map_err(|e| LedgerError::from_store(e, Phase::Read))?
            .ok_or(LedgerError::WalletNotFound(wallet_id))
    }

    /// Applies `set` in one unit of work: header, balance changes in wallet
    /// order, then entry lines.
    fn execute(&self, set: &EntrySet) -> Result<Receipt, LedgerError> {
        let store = &self.store;
        let apply = |e: StoreError| LedgerError::from_store(e, Phase::Apply);

        let balances = self.coordinator.run(|scope| {
            store
                .append_transaction(scope, set.transaction())
                .map_err(apply)?;

            let mut balances = Vec::with_capacity(set.entries().len());
            for (wallet_id, change) in set.balance_changes() {
                let amount = store
                    .conditional_update_amount(scope, wallet_id, change)
                    .map_err(apply)?;
                debug!(wallet = %wallet_id, ?change, balance = %amount, "Balance updated");
                balances.push(WalletBalance { wallet_id, amount });
            }

            for entry in set.entries() {
                store.append_entry(scope, entry).map_err(apply)?;
            }
            Ok(balances)
        })?;

        let transaction = set.transaction();
        let amount = set.entries()[0].amount;
        info!(
            transaction_id = %transaction.id,
            kind = %transaction.kind,
            amount = %amount,
            "Movement committed"
        );

        Ok(Receipt {
            transaction_id: transaction.id,
            kind: transaction.kind,
            amount,
            balances,
        })
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount);
    }
    Ok(())
}

fn ensure_covers(wallet: &Wallet, amount: Decimal) -> Result<(), LedgerError> {
    if wallet.amount < amount {
        return Err(LedgerError::InsufficientBalance);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::wallet::CoinType;
    use rust_decimal_macros::dec;

    fn engine() -> (Engine<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Engine::new(Arc::clone(&store)), store)
    }

    #[test]
    fn receipt_reports_new_balances() {
        let (engine, store) = engine();
        let user = UserId::new();
        let a = store.insert_wallet(Wallet::new(user, CoinType::Btc).with_amount(dec!(3)));
        let b = store.insert_wallet(Wallet::new(user, CoinType::Btc));

        let receipt = engine.transfer(a, b, dec!(1)).unwrap();
        assert_eq!(receipt.kind, TransactionKind::Transfer);
        assert_eq!(receipt.amount, dec!(1));
        assert_eq!(receipt.balance_of(a), Some(dec!(2)));
        assert_eq!(receipt.balance_of(b), Some(dec!(1)));
        assert_eq!(receipt.balance_of(WalletId::new()), None);
    }

    #[test]
    fn validation_errors_precede_wallet_lookup() {
        let (engine, _) = engine();
        let missing = WalletId::new();
        assert_eq!(
            engine.deposit(missing, dec!(0)),
            Err(LedgerError::InvalidAmount)
        );
        assert_eq!(
            engine.transfer(missing, missing, dec!(1)),
            Err(LedgerError::SelfTransfer)
        );
        assert_eq!(
            engine.withdraw(missing, dec!(1)),
            Err(LedgerError::WalletNotFound(missing))
        );
    }
}
