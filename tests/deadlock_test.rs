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

//! Deadlock detection tests using parking_lot's built-in deadlock detector.
//!
//! A transfer holds two wallet row locks at once until its unit of work
//! ends. These tests drive the real in-memory store through crossing
//! transfers, rollbacks and reads while the detector watches the lock graph.

use parking_lot::deadlock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;
use wallet_ledger::memory::{Fault, MemoryDedupStore, MemoryStore};
use wallet_ledger::{
    BalanceStore, CoinType, Engine, HistoryQuery, Ledger, LedgerConfig, Movement,
    MovementRequest, UserId, Wallet, WalletId,
};

struct Detector {
    running: Arc<AtomicBool>,
    found: Arc<AtomicBool>,
}

/// Spawns a background thread that checks for deadlocks every 100ms.
fn start_deadlock_detector() -> Detector {
    let running = Arc::new(AtomicBool::new(true));
    let found = Arc::new(AtomicBool::new(false));
    let (running_clone, found_clone) = (running.clone(), found.clone());

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                found_clone.store(true, Ordering::SeqCst);
                return;
            }
        }
    });

    Detector { running, found }
}

fn stop_deadlock_detector(detector: Detector) {
    detector.running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150)); // Let detector thread exit
    assert!(
        !detector.found.load(Ordering::SeqCst),
        "Deadlock detected! See output above for details."
    );
}

fn make_engine() -> (Arc<Engine<MemoryStore>>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Arc::new(Engine::new(Arc::clone(&store))), store)
}

fn make_wallets(store: &MemoryStore, count: usize, amount: Decimal) -> Arc<Vec<WalletId>> {
    Arc::new(
        (0..count)
            .map(|_| store.insert_wallet(Wallet::new(UserId::new(), CoinType::Eth).with_amount(amount)))
            .collect(),
    )
}

// === Tests ===

/// High contention on a single wallet with many threads.
#[test]
fn no_deadlock_high_contention_single_wallet() {
    let detector = start_deadlock_detector();
    let (engine, store) = make_engine();
    let wallets = make_wallets(&store, 1, dec!(0));
    let w = wallets[0];

    const NUM_THREADS: usize = 50;
    const OPS_PER_THREAD: usize = 100;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for _ in 0..NUM_THREADS {
        let engine = engine.clone();

        let handle = thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                if i % 3 == 0 {
                    let _ = engine.deposit(w, dec!(10.00));
                } else if i % 3 == 1 {
                    let _ = engine.withdraw(w, dec!(1.00));
                } else {
                    let _ = engine.wallet(w);
                    let _ = engine.history(w, &HistoryQuery::new().page(5, 0));
                }
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert!(engine.wallet(w).unwrap().amount >= Decimal::ZERO);
}

/// Transfers in both directions between every pair of wallets.
#[test]
fn no_deadlock_crossing_transfers() {
    let detector = start_deadlock_detector();
    let (engine, store) = make_engine();
    let wallets = make_wallets(&store, 5, dec!(1000));

    const NUM_THREADS: usize = 20;
    const OPS_PER_THREAD: usize = 200;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let engine = engine.clone();
        let wallets = wallets.clone();

        let handle = thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let from = wallets[(thread_id + i) % wallets.len()];
                let to = wallets[(thread_id + i * 3 + 1) % wallets.len()];
                if from != to {
                    let _ = engine.transfer(from, to, dec!(1.25));
                }
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(store.total_balance(), dec!(5000));
}

/// Rolled-back units of work release their row locks.
#[test]
fn no_deadlock_with_rollbacks() {
    let detector = start_deadlock_detector();
    let (engine, store) = make_engine();
    let wallets = make_wallets(&store, 3, dec!(100));
    let failures = Arc::new(AtomicU32::new(0));

    const NUM_THREADS: usize = 10;
    const OPS_PER_THREAD: usize = 100;

    let mut handles = Vec::with_capacity(NUM_THREADS);

    for thread_id in 0..NUM_THREADS {
        let engine = engine.clone();
        let store = store.clone();
        let wallets = wallets.clone();
        let failures = failures.clone();

        let handle = thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                if i % 10 == 0 {
                    store.inject(Fault::AppendEntry);
                }
                let from = wallets[(thread_id + i) % 3];
                let to = wallets[(thread_id + i + 1) % 3];
                if engine.transfer(from, to, dec!(0.10)).is_err() {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert!(failures.load(Ordering::SeqCst) > 0);
    assert_eq!(store.total_balance(), dec!(300));
    assert_eq!(store.entry_count(), store.transaction_count() * 2);
}

/// Reads of every wallet run while transfers hold row locks.
#[test]
fn no_deadlock_reads_during_transfers() {
    let detector = start_deadlock_detector();
    let (engine, store) = make_engine();
    let wallets = make_wallets(&store, 4, dec!(500));

    let mut handles = Vec::new();

    for thread_id in 0..8 {
        let engine = engine.clone();
        let wallets = wallets.clone();
        handles.push(thread::spawn(move || {
            for i in 0..300 {
                let from = wallets[(thread_id + i) % 4];
                let to = wallets[(thread_id + 2 * i + 1) % 4];
                if from != to {
                    let _ = engine.transfer(from, to, dec!(2));
                }
            }
        }));
    }

    for _ in 0..4 {
        let store = store.clone();
        let wallets = wallets.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..300 {
                let _ = store.total_balance();
                for w in wallets.iter() {
                    let _ = store.get(*w);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(store.total_balance(), dec!(2000));
}

/// Guarded submissions with colliding tokens and crossing transfers.
#[test]
fn no_deadlock_guarded_submissions() {
    let detector = start_deadlock_detector();
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(Ledger::new(
        Arc::clone(&store),
        Arc::new(MemoryDedupStore::new()),
        &LedgerConfig::default(),
    ));
    let alice = UserId::new();
    let a = store.insert_wallet(Wallet::new(alice, CoinType::Ada).with_amount(dec!(100)));
    let b = store.insert_wallet(Wallet::new(alice, CoinType::Ada).with_amount(dec!(100)));

    let mut handles = Vec::new();

    for thread_id in 0..10 {
        let ledger = ledger.clone();
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                // Threads share tokens pairwise, so half the submissions collide.
                let token = format!("t-{}-{}", thread_id / 2, i);
                let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
                let request = MovementRequest::new(
                    alice,
                    token,
                    Movement::Transfer {
                        sender_wallet_id: from,
                        receiver_wallet_id: to,
                        amount: dec!(1),
                    },
                );
                let _ = ledger.submit(&request);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(store.total_balance(), dec!(200));
    assert!(store.transaction_count() <= 500);
}
