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

//! In-memory balance store and ledger log sharing one atomic domain.
//!
//! Wallet rows live behind their own [`parking_lot::Mutex`]. A scope takes a
//! row's lock on the first update to that wallet and keeps it until commit or
//! discard, which makes per-wallet updates linearizable while leaving other
//! wallets free. Updates are written in place and undone on rollback; log
//! appends are buffered in the scope and published on commit.

use crate::base::{TransactionId, UserId, WalletId};
use crate::error::StoreError;
use crate::store::{AtomicDomain, BalanceStore, HistoryPage, HistoryQuery, LedgerLog};
use crate::transaction::{LedgerEntry, LedgerTransaction};
use crate::wallet::{BalanceChange, Wallet};
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, warn};

/// A deterministic failure that fires once at the named step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Begin,
    UpdateAmount,
    AppendTransaction,
    AppendEntry,
    Commit,
}

impl Fault {
    fn name(&self) -> &'static str {
        match self {
            Fault::Begin => "begin",
            Fault::UpdateAmount => "update_amount",
            Fault::AppendTransaction => "append_transaction",
            Fault::AppendEntry => "append_entry",
            Fault::Commit => "commit",
        }
    }
}

type WalletGuard = ArcMutexGuard<RawMutex, Wallet>;

/// Open unit of work against a [`MemoryStore`].
pub struct MemoryScope {
    id: u64,
    /// Wallet rows this scope has written, locked until the scope ends.
    locks: BTreeMap<WalletId, WalletGuard>,
    /// Balance of each locked wallet before this scope touched it.
    undo: HashMap<WalletId, Decimal>,
    transactions: Vec<LedgerTransaction>,
    entries: Vec<LedgerEntry>,
    finished: bool,
}

impl MemoryScope {
    fn new(id: u64) -> Self {
        Self {
            id,
            locks: BTreeMap::new(),
            undo: HashMap::new(),
            transactions: Vec::new(),
            entries: Vec::new(),
            finished: false,
        }
    }

    fn rollback(&mut self) {
        for (wallet_id, amount) in self.undo.drain() {
            if let Some(guard) = self.locks.get_mut(&wallet_id) {
                guard.amount = amount;
            }
        }
        self.transactions.clear();
        self.entries.clear();
        self.locks.clear();
        self.finished = true;
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if !self.finished {
            debug!(scope = self.id, "Scope dropped without commit, rolling back");
            self.rollback();
        }
    }
}

#[derive(Debug, Default)]
struct LogData {
    transactions: HashMap<TransactionId, LedgerTransaction>,
    entries: Vec<LedgerEntry>,
    by_transaction: HashMap<TransactionId, Vec<usize>>,
    by_wallet: HashMap<WalletId, Vec<usize>>,
}

impl LogData {
    fn publish(&mut self, transactions: Vec<LedgerTransaction>, entries: Vec<LedgerEntry>) {
        for transaction in transactions {
            self.transactions.insert(transaction.id, transaction);
        }
        for entry in entries {
            let index = self.entries.len();
            self.by_transaction
                .entry(entry.transaction_id)
                .or_default()
                .push(index);
            self.by_wallet.entry(entry.wallet_id).or_default().push(index);
            self.entries.push(entry);
        }
    }
}

/// Thread-safe in-memory implementation of [`BalanceStore`] and [`LedgerLog`].
#[derive(Default)]
pub struct MemoryStore {
    wallets: DashMap<WalletId, Arc<Mutex<Wallet>>>,
    log: RwLock<LogData>,
    faults: Mutex<Vec<Fault>>,
    unavailable: AtomicBool,
    next_scope: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions a wallet, replacing any wallet with the same id.
    pub fn insert_wallet(&self, wallet: Wallet) -> WalletId {
        let wallet_id = wallet.id;
        self.wallets.insert(wallet_id, Arc::new(Mutex::new(wallet)));
        wallet_id
    }

    /// Arms `fault` to fail the next matching operation.
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }

    /// Disarms every fault that has not fired yet.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Simulates losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn transaction_count(&self) -> usize {
        self.log.read().transactions.len()
    }

    pub fn entry_count(&self) -> usize {
        self.log.read().entries.len()
    }

    /// Sum of all committed available balances.
    pub fn total_balance(&self) -> Decimal {
        let rows: Vec<_> = self.wallets.iter().map(|r| Arc::clone(r.value())).collect();
        rows.iter().map(|row| row.lock().amount).sum()
    }

    fn check(&self, step: Fault) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut faults = self.faults.lock();
        if let Some(pos) = faults.iter().position(|f| *f == step) {
            faults.remove(pos);
            warn!(step = step.name(), "Injected fault fired");
            return Err(StoreError::Injected(step.name()));
        }
        Ok(())
    }

    fn row(&self, wallet_id: WalletId) -> Option<Arc<Mutex<Wallet>>> {
        // Clone the row handle so the map shard is released before locking.
        self.wallets.get(&wallet_id).map(|r| Arc::clone(r.value()))
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

impl AtomicDomain for MemoryStore {
    type Scope = MemoryScope;

    fn begin(&self) -> Result<MemoryScope, StoreError> {
        self.check(Fault::Begin)?;
        let id = self.next_scope.fetch_add(1, Ordering::Relaxed);
        Ok(MemoryScope::new(id))
    }

    fn commit(&self, mut scope: MemoryScope) -> Result<(), StoreError> {
        // On failure the scope drops here and rolls itself back.
        self.check(Fault::Commit)?;

        let transactions = std::mem::take(&mut scope.transactions);
        let entries = std::mem::take(&mut scope.entries);
        {
            let mut log = self.log.write();
            log.publish(transactions, entries);
        }
        scope.undo.clear();
        scope.finished = true;
        debug!(scope = scope.id, wallets = scope.locks.len(), "Scope committed");
        // Row locks release as the scope drops.
        Ok(())
    }

    fn discard(&self, mut scope: MemoryScope) {
        debug!(scope = scope.id, "Scope discarded");
        scope.rollback();
    }
}

impl BalanceStore for MemoryStore {
    fn get(&self, wallet_id: WalletId) -> Result<Option<Wallet>, StoreError> {
        self.ensure_online()?;
        Ok(self.row(wallet_id).map(|row| row.lock().clone()))
    }

    fn wallets_of(&self, user_id: UserId) -> Result<Vec<Wallet>, StoreError> {
        self.ensure_online()?;
        let rows: Vec<_> = self.wallets.iter().map(|r| Arc::clone(r.value())).collect();
        let mut wallets: Vec<Wallet> = rows
            .iter()
            .map(|row| row.lock().clone())
            .filter(|w| w.user_id == user_id)
            .collect();
        wallets.sort_by_key(|w| w.created_at);
        Ok(wallets)
    }

    fn conditional_update_amount(
        &self,
        scope: &mut MemoryScope,
        wallet_id: WalletId,
        change: BalanceChange,
    ) -> Result<Decimal, StoreError> {
        self.check(Fault::UpdateAmount)?;

        if !scope.locks.contains_key(&wallet_id) {
            let row = self.row(wallet_id).ok_or(StoreError::NotFound(wallet_id))?;
            let guard = row.lock_arc();
            scope.undo.insert(wallet_id, guard.amount);
            scope.locks.insert(wallet_id, guard);
        }

        let guard = scope
            .locks
            .get_mut(&wallet_id)
            .ok_or(StoreError::NotFound(wallet_id))?;
        guard.apply(change)
    }
}

impl LedgerLog for MemoryStore {
    fn append_transaction(
        &self,
        scope: &mut MemoryScope,
        transaction: &LedgerTransaction,
    ) -> Result<(), StoreError> {
        self.check(Fault::AppendTransaction)?;
        scope.transactions.push(transaction.clone());
        Ok(())
    }

    fn append_entry(&self, scope: &mut MemoryScope, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.check(Fault::AppendEntry)?;
        scope.entries.push(entry.clone());
        Ok(())
    }

    fn transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<LedgerTransaction>, StoreError> {
        self.ensure_online()?;
        Ok(self.log.read().transactions.get(&transaction_id).cloned())
    }

    fn entries_of(&self, transaction_id: TransactionId) -> Result<Vec<LedgerEntry>, StoreError> {
        self.ensure_online()?;
        let log = self.log.read();
        Ok(log
            .by_transaction
            .get(&transaction_id)
            .map(|indexes| indexes.iter().map(|&i| log.entries[i].clone()).collect())
            .unwrap_or_default())
    }

    fn history(
        &self,
        wallet_id: WalletId,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, StoreError> {
        self.ensure_online()?;
        let log = self.log.read();
        let Some(indexes) = log.by_wallet.get(&wallet_id) else {
            return Ok(HistoryPage {
                entries: Vec::new(),
                total: 0,
            });
        };

        // Indexes are in commit order; walk them backwards for newest first.
        let matching: Vec<&LedgerEntry> = indexes
            .iter()
            .rev()
            .map(|&i| &log.entries[i])
            .filter(|entry| query.matches(entry))
            .collect();
        let total = matching.len();
        let entries = matching
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(HistoryPage { entries, total })
    }
}
