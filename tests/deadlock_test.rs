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
//! These tests drive the in-memory store and the session cache from many
//! threads at once, mixing the operations that nest locks:
//!
//! - credit: credited-order slot → accounts map → account mutex
//! - debit: withdrawal slot → accounts map → account mutex
//! - pending-credit scan: orders map → credited-order map
//! - session sweep: token index → sessions map
//!
//! Account mutexes are parking_lot locks and are watched by the detector;
//! the DashMap shards are covered by the join timeout.

use chrono::{Duration as ChronoDuration, Utc};
use futures::executor::block_on;
use loyalty_ledger_rs::{
    BonusStore, Login, ManualClock, MemoryStore, Order, OrderId, OrderStatus, OrderStore,
    SessionStore, UserStore, luhn_valid,
};
use parking_lot::deadlock;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

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
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

/// Joins `handles`, failing if they do not all finish within `limit`.
fn join_within(handles: Vec<thread::JoinHandle<()>>, limit: Duration) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for handle in handles {
            handle.join().unwrap();
        }
        let _ = tx.send(());
    });
    rx.recv_timeout(limit)
        .expect("worker threads did not finish; possible lock cycle");
}

fn reference(n: u64) -> OrderId {
    (0..10)
        .map(|d| format!("{n}{d}"))
        .find(|raw| luhn_valid(raw))
        .and_then(|raw| OrderId::parse(&raw))
        .unwrap()
}

// === Tests ===

/// Many threads crediting and debiting one account.
#[test]
fn no_deadlock_single_account_contention() {
    let detector = start_deadlock_detector();
    let store = Arc::new(MemoryStore::new());
    let alice = Login::new("alice");
    block_on(store.register_user(&alice, "hash")).unwrap();

    const NUM_THREADS: u64 = 32;
    const OPS_PER_THREAD: u64 = 100;

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let store = store.clone();
            let alice = alice.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let order = reference(t * OPS_PER_THREAD + i + 1);
                    if i % 3 == 0 {
                        let _ = block_on(store.debit(&alice, &order, dec!(5), Utc::now()));
                    } else {
                        block_on(store.credit(&alice, &order, dec!(10), Utc::now())).unwrap();
                    }
                    let _ = block_on(store.balance(&alice));
                }
            })
        })
        .collect();

    join_within(handles, Duration::from_secs(30));
    stop_deadlock_detector(detector);

    let balance = block_on(store.balance(&alice)).unwrap();
    assert!(balance.current >= dec!(0));
    let entries = block_on(store.entries(&alice)).unwrap();
    let recomputed = loyalty_ledger_rs::Balance::from_entries(&entries);
    assert_eq!(recomputed, balance);
}

/// Status updates and pending-credit scans racing credits for the same orders.
#[test]
fn no_deadlock_status_updates_against_credits() {
    let detector = start_deadlock_detector();
    let store = Arc::new(MemoryStore::new());

    const NUM_ORDERS: u64 = 200;
    let orders: Vec<_> = (1..=NUM_ORDERS)
        .map(|n| {
            let order = Order::new(reference(n), Login::new(format!("user-{}", n % 7)), Utc::now());
            block_on(store.insert_order(order.clone())).unwrap();
            order
        })
        .collect();
    let orders = Arc::new(orders);

    let mut handles = Vec::new();
    for t in 0..4 {
        let store = store.clone();
        let orders = orders.clone();
        handles.push(thread::spawn(move || {
            for order in orders.iter().skip(t).step_by(4) {
                block_on(store.update_order_status(&order.id, OrderStatus::Processed, dec!(3)))
                    .unwrap();
            }
        }));
    }
    for _ in 0..4 {
        let store = store.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                for order in block_on(store.orders_awaiting_credit()).unwrap() {
                    block_on(store.credit(&order.owner, &order.id, order.accrual, Utc::now()))
                        .unwrap();
                }
            }
        }));
    }

    join_within(handles, Duration::from_secs(30));
    stop_deadlock_detector(detector);

    // Drain whatever the scanners missed, then every order is credited once.
    for order in block_on(store.orders_awaiting_credit()).unwrap() {
        block_on(store.credit(&order.owner, &order.id, order.accrual, Utc::now())).unwrap();
    }
    let total: rust_decimal::Decimal = (0..7)
        .map(|u| block_on(store.balance(&Login::new(format!("user-{u}")))).unwrap().current)
        .sum();
    assert_eq!(total, dec!(3) * rust_decimal::Decimal::from(NUM_ORDERS));
}

/// Issue, resolve and sweep on the session cache at the same time.
#[test]
fn no_deadlock_session_sweep_during_logins() {
    let detector = start_deadlock_detector();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let sessions = Arc::new(SessionStore::new(clock.clone()));

    let mut handles = Vec::new();
    for t in 0..8 {
        let sessions = sessions.clone();
        handles.push(thread::spawn(move || {
            for i in 0..500 {
                let token = sessions.issue(&Login::new(format!("user-{}", (t * 31 + i) % 50)));
                let _ = sessions.resolve(&token);
            }
        }));
    }
    for _ in 0..2 {
        let sessions = sessions.clone();
        let clock = clock.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                clock.advance(ChronoDuration::seconds(30));
                sessions.sweep();
            }
        }));
    }

    join_within(handles, Duration::from_secs(30));
    stop_deadlock_detector(detector);
    assert!(sessions.len() <= 50);
}
