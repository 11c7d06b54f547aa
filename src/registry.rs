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

//! Order registry.
//!
//! Registration is insert-first: the store's uniqueness constraint decides
//! which of several racing submissions wins, and only the losers re-read the
//! existing row to find out who owns it.

use crate::base::{Clock, Login, OrderId};
use crate::error::{OrderError, StoreError};
use crate::order::Order;
use crate::store::{OrderStore, RetryPolicy, with_retry};
use std::sync::Arc;

/// Successful outcome of [`OrderRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// First submission of this order number.
    Created(Order),
    /// The caller already registered this order number; nothing was written.
    AlreadyOwned(Order),
}

impl Registration {
    pub fn order(&self) -> &Order {
        match self {
            Registration::Created(order) | Registration::AlreadyOwned(order) => order,
        }
    }
}

pub struct OrderRegistry {
    store: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl OrderRegistry {
    pub fn new(store: Arc<dyn OrderStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Registers order number `raw` for `login`.
    ///
    /// # Errors
    ///
    /// - [`OrderError::InvalidFormat`] - not a Luhn-valid number.
    /// - [`OrderError::Conflict`] - number already registered by another user.
    pub async fn register(&self, raw: &str, login: &Login) -> Result<Registration, OrderError> {
        let id = OrderId::parse(raw).ok_or(OrderError::InvalidFormat)?;
        let order = Order::new(id.clone(), login.clone(), self.clock.now());

        let inserted = with_retry(self.retry, "insert_order", || {
            self.store.insert_order(order.clone())
        })
        .await;

        match inserted {
            Ok(()) => {
                tracing::info!(order = %id, login = %login, "Order registered");
                Ok(Registration::Created(order))
            }
            Err(StoreError::DuplicateOrder) => {
                let existing = self.get_order(&id).await?;
                if existing.owner == *login {
                    tracing::debug!(order = %id, login = %login, "Order already registered by caller");
                    Ok(Registration::AlreadyOwned(existing))
                } else {
                    tracing::warn!(order = %id, login = %login, "Order owned by another user");
                    Err(OrderError::Conflict)
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_order(&self, id: &OrderId) -> Result<Order, OrderError> {
        Ok(with_retry(self.retry, "get_order", || self.store.get_order(id)).await?)
    }

    /// Orders of `login`, oldest first.
    pub async fn orders_for_user(&self, login: &Login) -> Result<Vec<Order>, OrderError> {
        Ok(with_retry(self.retry, "orders_for_user", || self.store.orders_for_user(login)).await?)
    }
}
