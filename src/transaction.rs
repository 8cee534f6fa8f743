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

//! Ledger transactions and their entry lines.
//!
//! Every money movement is one [`LedgerTransaction`] header plus the
//! [`LedgerEntry`] lines it produced:
//!
//! | Kind       | Entries                                            |
//! |------------|----------------------------------------------------|
//! | Deposit    | one `In` on the wallet                             |
//! | Withdrawal | one `Out` on the wallet                            |
//! | Transfer   | `Out` on sender (counterparty = receiver) and `In` on receiver (counterparty = sender), equal amounts |
//!
//! Headers are created and finalized inside one unit of work, so only
//! [`TransactionStatus::Done`] is ever visible outside the engine.

use crate::base::{EntryId, TransactionId, WalletId};
use crate::error::LedgerError;
use crate::wallet::BalanceChange;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::Transfer => "TRANSFER",
        };
        f.write_str(name)
    }
}

/// `Pending` and `Failed` are reserved for asynchronous movement kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    In,
    Out,
}

/// Header of one logical money movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

/// One line of the audit trail: money entering or leaving a wallet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub transaction_id: TransactionId,
    pub wallet_id: WalletId,
    pub direction: Direction,
    /// Always positive; `direction` carries the sign.
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_wallet_id: Option<WalletId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn new(
        transaction: &LedgerTransaction,
        wallet_id: WalletId,
        direction: Direction,
        amount: Decimal,
        counterparty_wallet_id: Option<WalletId>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            transaction_id: transaction.id,
            wallet_id,
            direction,
            amount,
            counterparty_wallet_id,
            created_at: transaction.created_at,
        }
    }

    /// Positive for `In`, negative for `Out`.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::In => self.amount,
            Direction::Out => -self.amount,
        }
    }

    /// The balance adjustment this entry stands for.
    pub fn balance_change(&self) -> BalanceChange {
        match self.direction {
            Direction::In => BalanceChange::Credit(self.amount),
            Direction::Out => BalanceChange::Debit(self.amount),
        }
    }
}

/// A transaction header together with the entries it must commit with.
///
/// Constructors validate the double-entry shape, so an `EntrySet` that exists
/// is always well-formed for its kind.
#[derive(Debug, Clone)]
pub struct EntrySet {
    transaction: LedgerTransaction,
    entries: Vec<LedgerEntry>,
}

impl EntrySet {
    pub fn deposit(wallet_id: WalletId, amount: Decimal) -> Result<Self, LedgerError> {
        let transaction = Self::header(TransactionKind::Deposit);
        let entry = LedgerEntry::new(&transaction, wallet_id, Direction::In, amount, None);
        Self::checked(transaction, vec![entry])
    }

    pub fn withdrawal(wallet_id: WalletId, amount: Decimal) -> Result<Self, LedgerError> {
        let transaction = Self::header(TransactionKind::Withdrawal);
        let entry = LedgerEntry::new(&transaction, wallet_id, Direction::Out, amount, None);
        Self::checked(transaction, vec![entry])
    }

    pub fn transfer(
        sender: WalletId,
        receiver: WalletId,
        amount: Decimal,
    ) -> Result<Self, LedgerError> {
        let transaction = Self::header(TransactionKind::Transfer);
        let out = LedgerEntry::new(&transaction, sender, Direction::Out, amount, Some(receiver));
        let r#in = LedgerEntry::new(&transaction, receiver, Direction::In, amount, Some(sender));
        Self::checked(transaction, vec![out, r#in])
    }

    fn header(kind: TransactionKind) -> LedgerTransaction {
        LedgerTransaction {
            id: TransactionId::new(),
            kind,
            status: TransactionStatus::Done,
            created_at: Utc::now(),
        }
    }

    fn checked(
        transaction: LedgerTransaction,
        entries: Vec<LedgerEntry>,
    ) -> Result<Self, LedgerError> {
        let set = Self {
            transaction,
            entries,
        };
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.entries.iter().any(|e| e.amount <= Decimal::ZERO) {
            return Err(LedgerError::InvalidAmount);
        }
        if self
            .entries
            .iter()
            .any(|e| e.transaction_id != self.transaction.id)
        {
            return Err(LedgerError::MalformedEntrySet(
                "entry belongs to another transaction",
            ));
        }

        match (self.transaction.kind, self.entries.as_slice()) {
            (TransactionKind::Deposit, [entry]) if entry.direction == Direction::In => Ok(()),
            (TransactionKind::Withdrawal, [entry]) if entry.direction == Direction::Out => Ok(()),
            (TransactionKind::Transfer, [out, r#in]) => {
                if out.direction != Direction::Out || r#in.direction != Direction::In {
                    return Err(LedgerError::MalformedEntrySet(
                        "transfer needs one Out and one In entry",
                    ));
                }
                if out.wallet_id == r#in.wallet_id {
                    return Err(LedgerError::SelfTransfer);
                }
                if out.counterparty_wallet_id != Some(r#in.wallet_id)
                    || r#in.counterparty_wallet_id != Some(out.wallet_id)
                {
                    return Err(LedgerError::MalformedEntrySet(
                        "transfer counterparties do not point at each other",
                    ));
                }
                if self.net() != Decimal::ZERO {
                    return Err(LedgerError::MalformedEntrySet("transfer is not balanced"));
                }
                Ok(())
            }
            _ => Err(LedgerError::MalformedEntrySet(
                "entry count or direction does not match transaction kind",
            )),
        }
    }

    pub fn transaction(&self) -> &LedgerTransaction {
        &self.transaction
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Signed sum of all entries. Zero for transfers; deposits and
    /// withdrawals move money across the system boundary.
    pub fn net(&self) -> Decimal {
        self.entries.iter().map(LedgerEntry::signed_amount).sum()
    }

    /// Balance adjustments in ascending wallet order.
    ///
    /// Applying them in this order keeps two transfers running in opposite
    /// directions from waiting on each other's wallet locks.
    pub fn balance_changes(&self) -> Vec<(WalletId, BalanceChange)> {
        let mut changes: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.wallet_id, e.balance_change()))
            .collect();
        changes.sort_by_key(|(wallet_id, _)| *wallet_id);
        changes
    }
}
