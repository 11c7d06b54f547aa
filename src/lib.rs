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

//! # Loyalty Ledger
//!
//! Backend for a loyalty-points program. Users register purchase orders, an
//! external accrual service scores them, and the earned cashback lands in a
//! bonus balance that can be spent on later orders.
//!
//! ## Core Components
//!
//! - [`OrderRegistry`]: validates order numbers (Luhn) and enforces
//!   single ownership
//! - [`HttpAccrualClient`]: queries the accrual service for a verdict
//! - [`Reconciler`]: background loop that applies verdicts and credits
//!   points exactly once per order
//! - [`BonusLedger`]: credits, withdrawals and balances; never negative
//! - [`SessionStore`]: session tokens with a one hour lifetime
//! - [`LoyaltyService`]: wires everything together; [`api::router`] exposes
//!   it over HTTP
//!
//! ## Example
//!
//! ```
//! use loyalty_ledger_rs::{BonusLedger, Login, MemoryStore, OrderId, SystemClock};
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = Arc::new(MemoryStore::new());
//! let ledger = BonusLedger::new(store, Arc::new(SystemClock));
//! let alice = Login::new("alice");
//! let order = OrderId::parse("4561261212345467").unwrap();
//!
//! ledger.credit(&alice, &order, dec!(500)).await.unwrap();
//! // A second credit for the same order is a no-op.
//! assert_eq!(ledger.credit(&alice, &order, dec!(500)).await.unwrap(), 0);
//!
//! let balance = ledger.balance(&alice).await.unwrap();
//! assert_eq!(balance.current, dec!(500));
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! Stores use `DashMap` for their indexes and one mutex per bonus account,
//! so balance changes for different users proceed in parallel while changes
//! to one account are serialized.

pub mod account;
pub mod accrual;
pub mod api;
pub mod auth;
mod base;
pub mod bonus;
pub mod config;
pub mod error;
pub mod health;
pub mod ledger;
pub mod order;
pub mod reconcile;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;

pub use account::BonusAccount;
pub use accrual::{AccrualClient, AccrualReply, AccrualStatus, AccrualVerdict, HttpAccrualClient};
pub use auth::Accounts;
pub use base::{Clock, Login, ManualClock, OrderId, SystemClock, luhn_valid};
pub use bonus::{AuditReport, Balance, EntryId, EntryKind, LedgerEntry};
pub use config::Config;
pub use error::{AccrualError, AuthError, LedgerError, OrderError, ReconcileError, StoreError};
pub use health::{HealthMonitor, HealthStatus};
pub use ledger::BonusLedger;
pub use order::{Order, OrderStatus};
pub use reconcile::{Backoff, CheckOutcome, FlaggedOrder, PollPolicy, Reconciler, TickReport};
pub use registry::{OrderRegistry, Registration};
pub use service::{Intervals, LoyaltyService, Settings, Submission};
pub use session::SessionStore;
pub use store::{BonusStore, MemoryStore, OrderStore, RetryPolicy, UserStore, with_retry};
