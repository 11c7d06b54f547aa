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

//! Persistence capabilities.
//!
//! Storage is split into three narrow traits so each component depends only
//! on what it touches:
//!
//! - [`UserStore`]: credentials
//! - [`OrderStore`]: order rows and their status
//! - [`BonusStore`]: balances and the ledger entry log
//!
//! [`MemoryStore`] implements all three. The registry and ledger invariants
//! rest on the primitives these traits promise: an atomic insert-or-fail for
//! orders, a conditional status update that refuses to leave a terminal
//! state, a credit that is idempotent per order, and a debit that only
//! applies when the balance covers it.

mod memory;

pub use memory::MemoryStore;

use crate::base::{Login, OrderId};
use crate::bonus::{Balance, LedgerEntry};
use crate::error::StoreError;
use crate::order::{Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user. Fails with [`StoreError::DuplicateUser`] if the login
    /// is taken.
    async fn register_user(&self, login: &Login, password_hash: &str) -> Result<(), StoreError>;

    /// Stored password hash, or [`StoreError::NotFound`].
    async fn password_hash(&self, login: &Login) -> Result<String, StoreError>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order row.
    ///
    /// Must be atomic against concurrent inserts of the same id: exactly one
    /// caller succeeds, all others get [`StoreError::DuplicateOrder`].
    async fn insert_order(&self, order: Order) -> Result<(), StoreError>;

    async fn get_order(&self, id: &OrderId) -> Result<Order, StoreError>;

    /// Orders owned by `login`, oldest first.
    async fn orders_for_user(&self, login: &Login) -> Result<Vec<Order>, StoreError>;

    /// Orders not yet in a terminal status, oldest first.
    async fn orders_to_check(&self) -> Result<Vec<Order>, StoreError>;

    /// Moves an order to `status`, recording `accrual`.
    ///
    /// Returns the number of rows changed: `0` when the order is already
    /// terminal or the move is otherwise not allowed.
    async fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<u64, StoreError>;

    /// `Processed` orders with a positive accrual and no credit entry yet.
    async fn orders_awaiting_credit(&self) -> Result<Vec<Order>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BonusStore: Send + Sync {
    /// Credits `amount` for `order`.
    ///
    /// Idempotent per order: returns `0` rows if the order was already
    /// credited, `1` otherwise.
    async fn credit(
        &self,
        login: &Login,
        order: &OrderId,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Debits `amount` against the withdrawal reference `order`, only if the
    /// current balance covers it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InsufficientFunds`] - balance below `amount`; nothing written.
    /// - [`StoreError::DuplicateWithdrawal`] - reference already used.
    /// - [`StoreError::NotFound`] - user has no bonus account.
    async fn debit(
        &self,
        login: &Login,
        order: &OrderId,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Running totals; zero for a user with no entries.
    async fn balance(&self, login: &Login) -> Result<Balance, StoreError>;

    /// Entry log of `login`, oldest first.
    async fn entries(&self, login: &Login) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Retry schedule for transient store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    /// Fixed pause between attempts.
    pub spacing: Duration,
}

impl RetryPolicy {
    pub const fn new(retries: u32, spacing: Duration) -> Self {
        Self { retries, spacing }
    }

    /// Single attempt, no retries.
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(3))
    }
}

/// Runs `op`, retrying transient failures according to `policy`.
///
/// Non-transient errors are returned immediately.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, name: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.retries => {
                attempt += 1;
                tracing::warn!(
                    op = name,
                    attempt,
                    retries = policy.retries,
                    error = %err,
                    "Transient store failure, retrying in {:?}",
                    policy.spacing
                );
                tokio::time::sleep(policy.spacing).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result = with_retry(policy, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(StoreError::Unavailable("down".into()))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: Result<(), _> = with_retry(policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("down".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_repeat_definitive_errors() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(RetryPolicy::default(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::DuplicateOrder)
        })
        .await;

        assert_eq!(result, Err(StoreError::DuplicateOrder));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
