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

//! Caller-facing entry point.
//!
//! [`Ledger::submit`] runs a request through the deduplication guard, checks
//! that the caller owns the wallet being debited (or credited, for deposits),
//! hands the movement to the [`Engine`], and settles the guard's marker with
//! the outcome.

use crate::base::{UserId, WalletId};
use crate::config::LedgerConfig;
use crate::engine::{Engine, Receipt};
use crate::error::LedgerError;
use crate::guard::DeduplicationGuard;
use crate::store::{BalanceStore, DedupStore, HistoryPage, HistoryQuery, LedgerLog};
use crate::wallet::Wallet;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// A requested money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Movement {
    Deposit {
        wallet_id: WalletId,
        amount: Decimal,
    },
    Withdraw {
        wallet_id: WalletId,
        amount: Decimal,
    },
    Transfer {
        sender_wallet_id: WalletId,
        receiver_wallet_id: WalletId,
        amount: Decimal,
    },
}

impl Movement {
    /// The wallet the caller must own.
    pub fn source(&self) -> WalletId {
        match self {
            Self::Deposit { wallet_id, .. } => *wallet_id,
            Self::Withdraw { wallet_id, .. } => *wallet_id,
            Self::Transfer {
                sender_wallet_id, ..
            } => *sender_wallet_id,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            Self::Deposit { amount, .. }
            | Self::Withdraw { amount, .. }
            | Self::Transfer { amount, .. } => *amount,
        }
    }
}

/// A movement together with who asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementRequest {
    pub caller: UserId,
    pub idempotency_token: Option<String>,
    pub movement: Movement,
}

impl MovementRequest {
    pub fn new(caller: UserId, idempotency_token: impl Into<String>, movement: Movement) -> Self {
        Self {
            caller,
            idempotency_token: Some(idempotency_token.into()),
            movement,
        }
    }
}

pub struct Ledger<S, D>
where
    S: BalanceStore + LedgerLog,
    D: DedupStore,
{
    engine: Engine<S>,
    guard: DeduplicationGuard<D>,
}

impl<S, D> Ledger<S, D>
where
    S: BalanceStore + LedgerLog,
    D: DedupStore,
{
    pub fn new(store: Arc<S>, dedup: Arc<D>, config: &LedgerConfig) -> Self {
        Self {
            engine: Engine::new(store),
            guard: DeduplicationGuard::new(dedup, config),
        }
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    /// Applies a movement at most once per `(caller, token)`.
    ///
    /// # Errors
    ///
    /// - Guard rejections: [`LedgerError::DuplicateOrInFlight`],
    ///   [`LedgerError::MissingIdempotencyToken`], or
    ///   [`LedgerError::StorageUnavailable`] if the marker store is down.
    /// - [`LedgerError::AccessDenied`] - caller does not own the source wallet.
    /// - Any engine error for the movement itself.
    #[instrument(skip_all, fields(caller = %request.caller, kind = movement_kind(&request.movement)))]
    pub fn submit(&self, request: &MovementRequest) -> Result<Receipt, LedgerError> {
        let admission = self.guard.admit(
            &request.caller.to_string(),
            request.idempotency_token.as_deref(),
        )?;

        let result = self
            .authorize(request.caller, request.movement.source())
            .and_then(|_| self.apply(&request.movement));

        if let Err(err) = &result {
            info!(error = %err, outcome = ?err.outcome(), "Movement rejected");
        }
        self.guard.settle(admission, &result);
        result
    }

    /// A wallet owned by `caller`.
    pub fn wallet_for(&self, caller: UserId, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.authorize(caller, wallet_id)
    }

    /// History of a wallet owned by `caller`.
    pub fn history_for(
        &self,
        caller: UserId,
        wallet_id: WalletId,
        query: &HistoryQuery,
    ) -> Result<HistoryPage, LedgerError> {
        self.authorize(caller, wallet_id)?;
        self.engine.history(wallet_id, query)
    }

    fn authorize(&self, caller: UserId, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        let wallet = self.engine.wallet(wallet_id)?;
        if wallet.user_id != caller {
            return Err(LedgerError::AccessDenied(wallet_id));
        }
        Ok(wallet)
    }

    fn apply(&self, movement: &Movement) -> Result<Receipt, LedgerError> {
        match *movement {
            Movement::Deposit { wallet_id, amount } => self.engine.deposit(wallet_id, amount),
            Movement::Withdraw { wallet_id, amount } => self.engine.withdraw(wallet_id, amount),
            Movement::Transfer {
                sender_wallet_id,
                receiver_wallet_id,
                amount,
            } => self
                .engine
                .transfer(sender_wallet_id, receiver_wallet_id, amount),
        }
    }
}

fn movement_kind(movement: &Movement) -> &'static str {
    match movement {
        Movement::Deposit { .. } => "deposit",
        Movement::Withdraw { .. } => "withdraw",
        Movement::Transfer { .. } => "transfer",
    }
}
