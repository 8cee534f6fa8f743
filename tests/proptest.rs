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

//! Property-based tests for the ledger engine.
//!
//! These tests verify invariants that should hold for any sequence of
//! movements, whether individual movements succeed or not.

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use wallet_ledger::memory::{Fault, MemoryDedupStore, MemoryStore};
use wallet_ledger::{
    CoinType, Direction, Engine, HistoryQuery, Ledger, LedgerConfig, LedgerError, Movement,
    MovementRequest, UserId, Wallet, WalletId,
};

const WALLETS: usize = 4;

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Generate a positive amount (0.0001 to 1000 with 4 decimal places).
fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..=10_000_000i64).prop_map(|units| Decimal::new(units, 4))
}

/// A movement between wallet indexes, resolved against real ids later.
#[derive(Debug, Clone)]
enum Op {
    Deposit(usize, Decimal),
    Withdraw(usize, Decimal),
    Transfer(usize, usize, Decimal),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..WALLETS, arb_amount()).prop_map(|(w, a)| Op::Deposit(w, a)),
        (0..WALLETS, arb_amount()).prop_map(|(w, a)| Op::Withdraw(w, a)),
        (0..WALLETS, 0..WALLETS, arb_amount()).prop_map(|(f, t, a)| Op::Transfer(f, t, a)),
    ]
}

fn arb_fault() -> impl Strategy<Value = Option<Fault>> {
    prop_oneof![
        4 => Just(None),
        1 => Just(Some(Fault::AppendTransaction)),
        1 => Just(Some(Fault::UpdateAmount)),
        1 => Just(Some(Fault::AppendEntry)),
        1 => Just(Some(Fault::Commit)),
    ]
}

fn setup(initial: &[Decimal]) -> (Engine<MemoryStore>, Arc<MemoryStore>, Vec<WalletId>) {
    let store = Arc::new(MemoryStore::new());
    let wallets = initial
        .iter()
        .map(|amount| {
            store.insert_wallet(Wallet::new(UserId::new(), CoinType::Btc).with_amount(*amount))
        })
        .collect();
    (Engine::new(Arc::clone(&store)), store, wallets)
}

fn apply(engine: &Engine<MemoryStore>, wallets: &[WalletId], op: &Op) -> Result<(), LedgerError> {
    match *op {
        Op::Deposit(w, amount) => engine.deposit(wallets[w], amount).map(|_| ()),
        Op::Withdraw(w, amount) => engine.withdraw(wallets[w], amount).map(|_| ()),
        Op::Transfer(f, t, amount) => engine.transfer(wallets[f], wallets[t], amount).map(|_| ()),
    }
}

// =============================================================================
// Engine Invariant Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Total balance moves only by successful deposits and withdrawals.
    #[test]
    fn total_changes_only_by_external_movements(
        initial in prop::collection::vec(arb_amount(), WALLETS),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let (engine, store, wallets) = setup(&initial);
        let mut expected: Decimal = initial.iter().copied().sum();

        for op in &ops {
            if apply(&engine, &wallets, op).is_ok() {
                match *op {
                    Op::Deposit(_, amount) => expected += amount,
                    Op::Withdraw(_, amount) => expected -= amount,
                    Op::Transfer(..) => {}
                }
            }
        }

        prop_assert_eq!(store.total_balance(), expected);
    }

    /// No wallet balance is ever negative.
    #[test]
    fn balances_never_negative(
        initial in prop::collection::vec(arb_amount(), WALLETS),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let (engine, _, wallets) = setup(&initial);

        for op in &ops {
            let _ = apply(&engine, &wallets, op);
            for w in &wallets {
                prop_assert!(engine.wallet(*w).unwrap().amount >= Decimal::ZERO);
            }
        }
    }

    /// Each success writes one transaction and one entry per touched wallet;
    /// each failure writes nothing.
    #[test]
    fn log_matches_successful_movements(
        initial in prop::collection::vec(arb_amount(), WALLETS),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let (engine, store, wallets) = setup(&initial);
        let mut transactions = 0;
        let mut entries = 0;

        for op in &ops {
            if apply(&engine, &wallets, op).is_ok() {
                transactions += 1;
                entries += if matches!(op, Op::Transfer(..)) { 2 } else { 1 };
            }
        }

        prop_assert_eq!(store.transaction_count(), transactions);
        prop_assert_eq!(store.entry_count(), entries);
    }

    /// A wallet's balance equals its starting balance plus its signed entries.
    #[test]
    fn balance_reconciles_with_history(
        initial in prop::collection::vec(arb_amount(), WALLETS),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let (engine, _, wallets) = setup(&initial);

        for op in &ops {
            let _ = apply(&engine, &wallets, op);
        }

        for (w, start) in wallets.iter().zip(&initial) {
            let history = engine.history(*w, &HistoryQuery::new()).unwrap();
            let net: Decimal = history.entries.iter().map(|e| e.signed_amount()).sum();
            prop_assert_eq!(engine.wallet(*w).unwrap().amount, *start + net);
        }
    }

    /// Every transfer's entries net to zero and mirror each other.
    #[test]
    fn transfer_entries_are_balanced(
        initial in prop::collection::vec(arb_amount(), WALLETS),
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let (engine, _, wallets) = setup(&initial);

        for op in &ops {
            let Op::Transfer(f, t, amount) = *op else { continue };
            let Ok(receipt) = engine.transfer(wallets[f], wallets[t], amount) else {
                continue;
            };
            let entries = engine.entries(receipt.transaction_id).unwrap();
            prop_assert_eq!(entries.len(), 2);
            let net: Decimal = entries.iter().map(|e| e.signed_amount()).sum();
            prop_assert_eq!(net, Decimal::ZERO);
            let out = entries.iter().find(|e| e.direction == Direction::Out).unwrap();
            prop_assert_eq!(out.wallet_id, wallets[f]);
            prop_assert_eq!(out.counterparty_wallet_id, Some(wallets[t]));
        }
    }

    /// An injected storage failure at any step leaves no partial effect.
    #[test]
    fn failures_are_all_or_nothing(
        initial in prop::collection::vec(arb_amount(), WALLETS),
        steps in prop::collection::vec((arb_op(), arb_fault()), 1..30),
    ) {
        let (engine, store, wallets) = setup(&initial);

        for (op, fault) in &steps {
            let before: Vec<Decimal> =
                wallets.iter().map(|w| engine.wallet(*w).unwrap().amount).collect();
            let (txs, entries) = (store.transaction_count(), store.entry_count());

            if let Some(fault) = fault {
                store.inject(*fault);
            }
            let result = apply(&engine, &wallets, op);

            // Drop a fault the movement never reached.
            store.clear_faults();

            if result.is_err() {
                let after: Vec<Decimal> =
                    wallets.iter().map(|w| engine.wallet(*w).unwrap().amount).collect();
                prop_assert_eq!(after, before);
                prop_assert_eq!(store.transaction_count(), txs);
                prop_assert_eq!(store.entry_count(), entries);
            }
        }
    }
}

// =============================================================================
// Idempotency Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Replaying any request sequence a second time applies nothing new.
    #[test]
    fn replayed_requests_apply_once(
        initial in prop::collection::vec(arb_amount(), WALLETS),
        ops in prop::collection::vec(arb_op(), 1..30),
    ) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(
            Arc::clone(&store),
            Arc::new(MemoryDedupStore::new()),
            &LedgerConfig::default(),
        );
        let owner = UserId::new();
        let wallets: Vec<WalletId> = initial
            .iter()
            .map(|a| store.insert_wallet(Wallet::new(owner, CoinType::Btc).with_amount(*a)))
            .collect();

        let requests: Vec<MovementRequest> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| {
                let movement = match *op {
                    Op::Deposit(w, amount) => Movement::Deposit { wallet_id: wallets[w], amount },
                    Op::Withdraw(w, amount) => Movement::Withdraw { wallet_id: wallets[w], amount },
                    Op::Transfer(f, t, amount) => Movement::Transfer {
                        sender_wallet_id: wallets[f],
                        receiver_wallet_id: wallets[t],
                        amount,
                    },
                };
                MovementRequest::new(owner, format!("req-{i}"), movement)
            })
            .collect();

        let first: Vec<bool> = requests.iter().map(|r| ledger.submit(r).is_ok()).collect();
        let applied = first.iter().filter(|ok| **ok).count();
        prop_assert_eq!(store.transaction_count(), applied);
        let total = store.total_balance();

        for (request, ok) in requests.iter().zip(&first) {
            if *ok {
                prop_assert_eq!(ledger.submit(request), Err(LedgerError::DuplicateOrInFlight));
            }
        }

        prop_assert_eq!(store.transaction_count(), applied);
        prop_assert_eq!(store.total_balance(), total);
    }
}
