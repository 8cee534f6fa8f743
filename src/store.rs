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

//! Storage capabilities consumed by the engine and the deduplication guard.
//!
//! The balance store and the ledger log extend the same [`AtomicDomain`], so
//! a type implementing both shares one `Scope` type and therefore one atomic
//! transaction domain. Writes are only accepted through a scope.

use crate::base::{TransactionId, UserId, WalletId};
use crate::error::StoreError;
use crate::transaction::{LedgerEntry, LedgerTransaction};
use crate::wallet::{BalanceChange, Wallet};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;

/// A storage domain able to group writes into all-or-nothing scopes.
pub trait AtomicDomain: Send + Sync {
    /// Handle to an open unit of work. Dropping it without committing
    /// must leave no visible writes.
    type Scope;

    fn begin(&self) -> Result<Self::Scope, StoreError>;

    fn commit(&self, scope: Self::Scope) -> Result<(), StoreError>;

    fn discard(&self, scope: Self::Scope);
}

/// Holds wallet balances.
pub trait BalanceStore: AtomicDomain {
    /// Reads the last committed state of a wallet.
    fn get(&self, wallet_id: WalletId) -> Result<Option<Wallet>, StoreError>;

    /// All wallets owned by `user_id`.
    fn wallets_of(&self, user_id: UserId) -> Result<Vec<Wallet>, StoreError>;

    /// Applies `change` against the value stored at the moment of the write
    /// and returns the resulting balance.
    ///
    /// A debit that the stored balance cannot cover fails with
    /// [`StoreError::ConditionFailed`]. Once a scope has updated a wallet,
    /// other scopes updating the same wallet wait until it commits or
    /// discards.
    fn conditional_update_amount(
        &self,
        scope: &mut Self::Scope,
        wallet_id: WalletId,
        change: BalanceChange,
    ) -> Result<Decimal, StoreError>;
}

/// Append-only store of transaction headers and entry lines.
pub trait LedgerLog: AtomicDomain {
    fn append_transaction(
        &self,
        scope: &mut Self::Scope,
        transaction: &LedgerTransaction,
    ) -> Result<(), StoreError>;

    fn append_entry(&self, scope: &mut Self::Scope, entry: &LedgerEntry) -> Result<(), StoreError>;

    fn transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<LedgerTransaction>, StoreError>;

    fn entries_of(&self, transaction_id: TransactionId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Entries touching `wallet_id`, newest first.
    fn history(&self, wallet_id: WalletId, query: &HistoryQuery)
    -> Result<HistoryPage, StoreError>;
}

/// Backing store for deduplication markers.
///
/// Every marker carries the `owner` value of the admission that created it.
/// Extending and removing compare that value first, so a late settlement
/// never touches a marker created by a later admission.
pub trait DedupStore: Send + Sync {
    /// Atomically creates `key` with the given lifetime unless a live marker
    /// already exists. Returns `true` if this call created it.
    fn create_if_absent(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Resets the lifetime of a live marker held by `owner`. Returns `false`
    /// if the marker has expired, never existed, or belongs to someone else.
    fn set_expiry(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Deletes the marker if `owner` holds it. Returns whether it was removed.
    fn remove(&self, key: &str, owner: &str) -> Result<bool, StoreError>;
}

/// Filters for a wallet's entry history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub counterparty: Option<WalletId>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn counterparty(mut self, wallet_id: WalletId) -> Self {
        self.counterparty = Some(wallet_id);
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Whether `entry` passes the time and counterparty filters.
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.start.is_none_or(|start| entry.created_at >= start)
            && self.end.is_none_or(|end| entry.created_at <= end)
            && self
                .counterparty
                .is_none_or(|c| entry.counterparty_wallet_id == Some(c))
    }
}

/// One page of history. `total` counts every match before pagination.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryPage {
    pub entries: Vec<LedgerEntry>,
    pub total: usize,
}
