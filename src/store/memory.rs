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

//! In-process store backed by [`DashMap`].
//!
//! Uniqueness is enforced with the entry API (atomic check-and-insert per
//! shard), and each bonus account serializes its own mutations behind a
//! mutex. Lock order is always: reference map (orders credited / withdrawal
//! references) → accounts map → account mutex. No path takes two reference
//! maps at once.

use super::{BonusStore, OrderStore, UserStore};
use crate::account::BonusAccount;
use crate::base::{Login, OrderId};
use crate::bonus::{Balance, EntryId, EntryKind, LedgerEntry};
use crate::error::StoreError;
use crate::order::{Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Password hashes indexed by login.
    users: DashMap<Login, String>,
    orders: DashMap<OrderId, Order>,
    /// Order ids per owner in insertion order.
    user_orders: DashMap<Login, Vec<OrderId>>,
    accounts: DashMap<Login, BonusAccount>,
    /// Credit entry per order; at most one.
    credited: DashMap<OrderId, EntryId>,
    /// Debit entry per withdrawal reference; at most one.
    withdrawals: DashMap<OrderId, EntryId>,
    next_entry: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_entry_id(&self) -> EntryId {
        EntryId(self.next_entry.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

fn oldest_first(mut orders: Vec<Order>) -> Vec<Order> {
    orders.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
    orders
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn register_user(&self, login: &Login, password_hash: &str) -> Result<(), StoreError> {
        match self.users.entry(login.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateUser),
            Entry::Vacant(entry) => {
                entry.insert(password_hash.to_owned());
                self.accounts
                    .entry(login.clone())
                    .or_insert_with(|| BonusAccount::new(login.clone()));
                Ok(())
            }
        }
    }

    async fn password_hash(&self, login: &Login) -> Result<String, StoreError> {
        self.users
            .get(login)
            .map(|hash| hash.clone())
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: Order) -> Result<(), StoreError> {
        match self.orders.entry(order.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateOrder),
            Entry::Vacant(entry) => {
                self.user_orders
                    .entry(order.owner.clone())
                    .or_default()
                    .push(order.id.clone());
                entry.insert(order);
                Ok(())
            }
        }
    }

    async fn get_order(&self, id: &OrderId) -> Result<Order, StoreError> {
        self.orders
            .get(id)
            .map(|order| order.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn orders_for_user(&self, login: &Login) -> Result<Vec<Order>, StoreError> {
        let ids = match self.user_orders.get(login) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        let orders = ids
            .iter()
            .filter_map(|id| self.orders.get(id).map(|order| order.clone()))
            .collect();
        Ok(oldest_first(orders))
    }

    async fn orders_to_check(&self) -> Result<Vec<Order>, StoreError> {
        let orders = self
            .orders
            .iter()
            .filter(|order| !order.is_terminal())
            .map(|order| order.clone())
            .collect();
        Ok(oldest_first(orders))
    }

    async fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<u64, StoreError> {
        let mut order = self.orders.get_mut(id).ok_or(StoreError::NotFound)?;
        if !order.status.can_transition_to(status) {
            return Ok(0);
        }
        if order.status == status && order.accrual == accrual {
            return Ok(0);
        }
        order.status = status;
        order.accrual = accrual;
        Ok(1)
    }

    async fn orders_awaiting_credit(&self) -> Result<Vec<Order>, StoreError> {
        let orders = self
            .orders
            .iter()
            .filter(|order| {
                order.status == OrderStatus::Processed
                    && order.accrual > Decimal::ZERO
                    && !self.credited.contains_key(&order.id)
            })
            .map(|order| order.clone())
            .collect();
        Ok(oldest_first(orders))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl BonusStore for MemoryStore {
    async fn credit(
        &self,
        login: &Login,
        order: &OrderId,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        // Holding the vacant entry keeps a concurrent credit for the same
        // order waiting until this one is recorded.
        let slot = match self.credited.entry(order.clone()) {
            Entry::Occupied(_) => return Ok(0),
            Entry::Vacant(slot) => slot,
        };

        let account = self
            .accounts
            .entry(login.clone())
            .or_insert_with(|| BonusAccount::new(login.clone()));
        let entry = account.record(
            self.next_entry_id(),
            order.clone(),
            EntryKind::Credit,
            amount,
            at,
        )?;
        slot.insert(entry.id);
        Ok(1)
    }

    async fn debit(
        &self,
        login: &Login,
        order: &OrderId,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let slot = match self.withdrawals.entry(order.clone()) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateWithdrawal),
            Entry::Vacant(slot) => slot,
        };

        let account = self.accounts.get(login).ok_or(StoreError::NotFound)?;
        let entry = account.record(
            self.next_entry_id(),
            order.clone(),
            EntryKind::Debit,
            amount,
            at,
        )?;
        slot.insert(entry.id);
        Ok(1)
    }

    async fn balance(&self, login: &Login) -> Result<Balance, StoreError> {
        Ok(self
            .accounts
            .get(login)
            .map(|account| account.balance())
            .unwrap_or_default())
    }

    async fn entries(&self, login: &Login) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .accounts
            .get(login)
            .map(|account| account.entries())
            .unwrap_or_default())
    }
}
