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

//! Error types for money movements and the storage capabilities behind them.

use crate::base::WalletId;
use crate::wallet::CoinType;
use std::fmt;
use thiserror::Error;

/// Stage of a request in which a storage failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Deduplication marker creation or settlement.
    Guard,
    /// Reading wallet state before the unit of work.
    Read,
    /// Opening the unit of work.
    Begin,
    /// Issuing writes inside the unit of work.
    Apply,
    /// Committing the unit of work.
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Guard => "guard",
            Phase::Read => "read",
            Phase::Begin => "begin",
            Phase::Apply => "apply",
            Phase::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// What the caller can assume about the state of the ledger after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No write became visible. Retrying is safe.
    NothingApplied,
    /// The commit may or may not have landed; reconcile before retrying.
    Ambiguous,
}

/// Money movement errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Referenced wallet does not exist
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),

    /// Debit would exceed the available balance
    #[error("insufficient balance")]
    InsufficientBalance,

    /// The same (caller, token) pair was admitted within the marker window
    #[error("duplicate request or request already in flight")]
    DuplicateOrInFlight,

    /// Caller did not present an idempotency token
    #[error("missing idempotency token")]
    MissingIdempotencyToken,

    /// Caller identity is blank
    #[error("missing caller identity")]
    MissingCaller,

    /// Sender and receiver of a transfer are the same wallet
    #[error("cannot transfer from a wallet to itself")]
    SelfTransfer,

    /// Transfer between wallets holding different assets
    #[error("coin type mismatch: cannot move {sender} into a {receiver} wallet")]
    CurrencyMismatch { sender: CoinType, receiver: CoinType },

    /// Caller does not own the wallet being debited or credited
    #[error("wallet {0} is not owned by the caller")]
    AccessDenied(WalletId),

    /// Atomic conditional update lost a race against a concurrent write
    #[error("balance of wallet {0} changed concurrently")]
    Conflict(WalletId),

    /// Computed entries violate the double-entry shape for their kind
    #[error("malformed entry set: {0}")]
    MalformedEntrySet(&'static str),

    /// Backing store could not be reached
    #[error("storage unavailable during {phase}: {reason}")]
    StorageUnavailable { phase: Phase, reason: String },
}

impl LedgerError {
    /// Classifies whether any write may have become visible.
    ///
    /// Only a storage failure while committing is ambiguous: the atomic
    /// domain's own recovery decides whether the unit of work landed.
    pub fn outcome(&self) -> Outcome {
        match self {
            LedgerError::StorageUnavailable {
                phase: Phase::Commit,
                ..
            } => Outcome::Ambiguous,
            _ => Outcome::NothingApplied,
        }
    }

    /// Maps a capability failure raised during `phase`.
    pub fn from_store(err: StoreError, phase: Phase) -> Self {
        match err {
            StoreError::ConditionFailed(wallet_id) => LedgerError::Conflict(wallet_id),
            StoreError::Overflow(_) => LedgerError::InvalidAmount,
            StoreError::NotFound(wallet_id) => LedgerError::WalletNotFound(wallet_id),
            StoreError::Unavailable(reason) => LedgerError::StorageUnavailable { phase, reason },
            StoreError::Injected(what) => LedgerError::StorageUnavailable {
                phase,
                reason: format!("injected fault: {what}"),
            },
        }
    }
}

/// Failures reported by the storage capabilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store is unreachable or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Conditional balance update found the stored value unsuitable
    #[error("conditional update refused for wallet {0}")]
    ConditionFailed(WalletId),

    /// Credit would push the balance past the representable range
    #[error("balance of wallet {0} would overflow")]
    Overflow(WalletId),

    /// Wallet row does not exist
    #[error("wallet {0} not found")]
    NotFound(WalletId),

    /// Deterministic failure armed through fault injection
    #[error("injected fault: {0}")]
    Injected(&'static str),
}
