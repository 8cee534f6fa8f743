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

//! Wallet balances.
//!
//! A [`Wallet`] is one user's balance record for one asset. Wallets are owned
//! by the balance store; the engine only ever sees snapshots of them and
//! mutates them through [`BalanceChange`]s applied inside a unit of work.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use wallet_ledger::{CoinType, UserId, Wallet};
//!
//! let wallet = Wallet::new(UserId::new(), CoinType::Btc).with_amount(dec!(1.5));
//! assert_eq!(wallet.amount, dec!(1.5));
//! assert_eq!(wallet.frozen_amount, dec!(0));
//! ```

use crate::base::{UserId, WalletId};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::{Deserialize, Serialize as DeriveSerialize};
use std::fmt;
use std::str::FromStr;

/// Asset held by a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, DeriveSerialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoinType {
    Btc,
    Eth,
    Ada,
}

impl CoinType {
    pub fn code(&self) -> &'static str {
        match self {
            CoinType::Btc => "BTC",
            CoinType::Eth => "ETH",
            CoinType::Ada => "ADA",
        }
    }
}

impl fmt::Display for CoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CoinType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTC" => Ok(CoinType::Btc),
            "ETH" => Ok(CoinType::Eth),
            "ADA" => Ok(CoinType::Ada),
            other => Err(format!("unknown coin type '{other}'")),
        }
    }
}

/// A signed adjustment to a wallet's available balance.
///
/// A debit is conditional: it only applies if the balance stored at the
/// moment of the write covers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceChange {
    Credit(Decimal),
    Debit(Decimal),
}

impl BalanceChange {
    pub fn amount(&self) -> Decimal {
        match self {
            BalanceChange::Credit(amount) | BalanceChange::Debit(amount) => *amount,
        }
    }
}

/// One user's balance record for one coin type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub coin_type: CoinType,
    /// Available balance. Never negative in a committed state.
    pub amount: Decimal,
    /// Reserved for future holds; no current operation touches it.
    pub frozen_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    pub const DECIMAL_PRECISION: u32 = 8;

    pub fn new(user_id: UserId, coin_type: CoinType) -> Self {
        Self {
            id: WalletId::new(),
            user_id,
            coin_type,
            amount: Decimal::ZERO,
            frozen_amount: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: WalletId) -> Self {
        self.id = id;
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }

    /// Returns `amount + frozen_amount`.
    pub fn total(&self) -> Decimal {
        self.amount + self.frozen_amount
    }

    /// Applies `change` against the current balance and returns the new one.
    ///
    /// # Errors
    ///
    /// - [`StoreError::ConditionFailed`] if the change is not positive or a
    ///   debit exceeds the stored balance.
    /// - [`StoreError::Overflow`] if a credit does not fit in a `Decimal`.
    ///
    /// The wallet is left untouched on error.
    pub fn apply(&mut self, change: BalanceChange) -> Result<Decimal, StoreError> {
        if change.amount() <= Decimal::ZERO {
            return Err(StoreError::ConditionFailed(self.id));
        }
        match change {
            BalanceChange::Credit(amount) => {
                self.amount = self
                    .amount
                    .checked_add(amount)
                    .ok_or(StoreError::Overflow(self.id))?;
            }
            BalanceChange::Debit(amount) => {
                if self.amount < amount {
                    return Err(StoreError::ConditionFailed(self.id));
                }
                self.amount -= amount;
            }
        }
        self.assert_invariants();
        Ok(self.amount)
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.amount >= Decimal::ZERO,
            "Invariant violated: wallet {} balance went negative: {}",
            self.id,
            self.amount
        );
    }
}

impl Serialize for Wallet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Wallet", 6)?;
        state.serialize_field("wallet_id", &self.id)?;
        state.serialize_field("user_id", &self.user_id)?;
        state.serialize_field("coin_type", &self.coin_type)?;
        state.serialize_field(
            "amount",
            &self.amount.round_dp(Wallet::DECIMAL_PRECISION),
        )?;
        state.serialize_field(
            "frozen_amount",
            &self.frozen_amount.round_dp(Wallet::DECIMAL_PRECISION),
        )?;
        state.serialize_field("created_at", &self.created_at)?;
        state.end()
    }
}
