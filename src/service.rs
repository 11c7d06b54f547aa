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

//! Wiring of all components behind one handle.
//!
//! [`LoyaltyService`] owns the registry, ledger, reconciler, session cache
//! and health monitor, and spawns the three background loops.

use crate::accrual::AccrualClient;
use crate::auth::Accounts;
use crate::base::{Clock, Login};
use crate::config::Config;
use crate::error::OrderError;
use crate::health::HealthMonitor;
use crate::ledger::BonusLedger;
use crate::order::{Order, OrderStatus};
use crate::reconcile::{CheckOutcome, PollPolicy, Reconciler};
use crate::registry::{OrderRegistry, Registration};
use crate::session::SessionStore;
use crate::store::{BonusStore, OrderStore, RetryPolicy, UserStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Tunables that are not tied to a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub poll: PollPolicy,
    pub retry: RetryPolicy,
    /// Query the accrual service while handling a submission.
    pub inline_check: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
            inline_check: true,
        }
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            poll: config.poll_policy(),
            retry: RetryPolicy::default(),
            inline_check: config.inline_accrual_check,
        }
    }
}

/// Background loop periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub token_sweep: Duration,
    pub order_check: Duration,
    pub health_check: Duration,
}

impl From<&Config> for Intervals {
    fn from(config: &Config) -> Self {
        Self {
            token_sweep: config.token_sweep_interval(),
            order_check: config.order_check_interval(),
            health_check: config.health_check_interval(),
        }
    }
}

/// Outcome of [`LoyaltyService::submit_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Newly registered; the verdict is still pending or already applied.
    Accepted(Order),
    /// The caller had already registered this order.
    AlreadyOwned(Order),
    /// Newly registered, and the accrual service declared it invalid.
    Rejected(Order),
}

pub struct LoyaltyService {
    pub accounts: Accounts,
    pub registry: OrderRegistry,
    pub ledger: Arc<BonusLedger>,
    pub reconciler: Arc<Reconciler>,
    pub sessions: Arc<SessionStore>,
    pub health: Arc<HealthMonitor>,
    inline_check: bool,
}

impl LoyaltyService {
    pub fn new<S>(
        store: Arc<S>,
        accrual: Arc<dyn AccrualClient>,
        clock: Arc<dyn Clock>,
        settings: Settings,
    ) -> Self
    where
        S: UserStore + OrderStore + BonusStore + 'static,
    {
        let sessions = Arc::new(SessionStore::new(clock.clone()));
        let accounts = Accounts::new(store.clone(), sessions.clone()).with_retry_policy(settings.retry);
        let registry = OrderRegistry::new(store.clone(), clock.clone()).with_retry_policy(settings.retry);
        let ledger = Arc::new(
            BonusLedger::new(store.clone(), clock.clone()).with_retry_policy(settings.retry),
        );
        let reconciler = Arc::new(
            Reconciler::new(store.clone(), ledger.clone(), accrual.clone())
                .with_poll_policy(settings.poll)
                .with_retry_policy(settings.retry),
        );
        let health = Arc::new(HealthMonitor::new(
            store,
            accrual,
            reconciler.clone(),
            clock,
        ));

        Self {
            accounts,
            registry,
            ledger,
            reconciler,
            sessions,
            health,
            inline_check: settings.inline_check,
        }
    }

    /// Registers an order and, when enabled, checks it with the accrual
    /// service right away.
    ///
    /// Accrual failures during the inline check are not errors: the order
    /// stays pending and the reconciliation loop picks it up.
    pub async fn submit_order(&self, raw: &str, login: &Login) -> Result<Submission, OrderError> {
        let order = match self.registry.register(raw, login).await? {
            Registration::AlreadyOwned(order) => return Ok(Submission::AlreadyOwned(order)),
            Registration::Created(order) => order,
        };
        if !self.inline_check {
            return Ok(Submission::Accepted(order));
        }

        match self.reconciler.check_order(&order).await {
            Ok(CheckOutcome::NotYetRegistered) => Ok(Submission::Accepted(order)),
            Ok(_) => match self.registry.get_order(&order.id).await {
                Ok(current) if current.status == OrderStatus::Invalid => {
                    Ok(Submission::Rejected(current))
                }
                Ok(current) => Ok(Submission::Accepted(current)),
                Err(err) => {
                    tracing::warn!(order = %order.id, error = %err, "Cannot re-read order after inline check");
                    Ok(Submission::Accepted(order))
                }
            },
            Err(err) => {
                tracing::warn!(order = %order.id, error = %err, "Inline accrual check failed, deferring to reconciliation");
                Ok(Submission::Accepted(order))
            }
        }
    }

    /// Starts the session sweep, reconciliation and health loops.
    pub fn spawn_background(
        &self,
        intervals: Intervals,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(
                self.sessions
                    .clone()
                    .run_sweeper(intervals.token_sweep, shutdown.clone()),
            ),
            tokio::spawn(
                self.reconciler
                    .clone()
                    .run(intervals.order_check, shutdown.clone()),
            ),
            tokio::spawn(
                self.health
                    .clone()
                    .run(intervals.health_check, shutdown.clone()),
            ),
        ]
    }
}
