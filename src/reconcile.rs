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

//! Order reconciliation.
//!
//! The [`Reconciler`] drives every non-terminal order toward its verdict:
//!
//! | Accrual reply | Effect |
//! |---------------|--------|
//! | not registered / transient error | nothing; polled again next tick |
//! | `REGISTERED` / `PROCESSING` | status → `PROCESSING` |
//! | `INVALID` | status → `INVALID` (terminal) |
//! | `PROCESSED` | status → `PROCESSED` with accrual, then credit (terminal) |
//!
//! Crediting is a second step after the status write. A `PROCESSED` order
//! with a positive accrual and no credit entry is a pending credit: every
//! tick first drains those (see [`OrderStore::orders_awaiting_credit`]), so a
//! crash between the two writes delays the credit but never loses it. The
//! credit itself is idempotent per order, so the submit path and the loop can
//! both apply the same verdict safely.

use crate::accrual::{AccrualClient, AccrualReply, AccrualVerdict};
use crate::base::OrderId;
use crate::error::{AccrualError, ReconcileError};
use crate::ledger::BonusLedger;
use crate::order::{Order, OrderStatus};
use crate::store::{OrderStore, RetryPolicy, with_retry};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Exponential delay between polls of the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay after `attempts` unsuccessful polls (`attempts >= 1`).
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        self.initial.saturating_mul(1 << exponent).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

/// How persistently a pending order is polled.
///
/// The default polls every order on every tick forever.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollPolicy {
    /// Polls without a terminal verdict before the order is flagged for
    /// manual review and no longer polled. `None` means unbounded.
    pub max_attempts: Option<u32>,
    /// Per-order backoff; `None` polls on every tick.
    pub backoff: Option<Backoff>,
}

/// What checking one order did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Accrual service does not know the order yet.
    NotYetRegistered,
    /// Verdict matched the stored state; nothing written.
    Unchanged,
    /// Status moved without a credit.
    Updated(OrderStatus),
    /// Order reached `PROCESSED` and this call wrote the credit.
    Credited(Decimal),
}

/// An order that exhausted [`PollPolicy::max_attempts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlaggedOrder {
    pub order: OrderId,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Orders sent to the accrual service.
    pub checked: usize,
    /// Status writes without a credit.
    pub updated: usize,
    /// Credits written, recovered ones included.
    pub credited: usize,
    /// Orders the accrual service does not know yet.
    pub not_registered: usize,
    /// Orders whose check failed.
    pub failed: usize,
    /// Orders skipped because of backoff or a flag.
    pub skipped: usize,
    /// Whether the tick stopped early on a rate limit.
    pub rate_limited: bool,
}

#[derive(Debug, Default)]
struct PollState {
    attempts: u32,
    next_poll: Option<Instant>,
    last_error: Option<String>,
}

pub struct Reconciler {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<BonusLedger>,
    accrual: Arc<dyn AccrualClient>,
    policy: PollPolicy,
    retry: RetryPolicy,
    polls: DashMap<OrderId, PollState>,
    flagged: DashMap<OrderId, FlaggedOrder>,
    paused_until: Mutex<Option<Instant>>,
}

impl Reconciler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<BonusLedger>,
        accrual: Arc<dyn AccrualClient>,
    ) -> Self {
        Self {
            orders,
            ledger,
            accrual,
            policy: PollPolicy::default(),
            retry: RetryPolicy::default(),
            polls: DashMap::new(),
            flagged: DashMap::new(),
            paused_until: Mutex::new(None),
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Queries the accrual service for `order` and applies the reply.
    ///
    /// Used by the loop and by the submit path. Transient accrual failures
    /// are returned as errors and leave the order untouched.
    pub async fn check_order(&self, order: &Order) -> Result<CheckOutcome, ReconcileError> {
        match self.accrual.query(&order.id).await? {
            AccrualReply::NotYetRegistered => {
                tracing::debug!(order = %order.id, "Order not yet known to accrual service");
                Ok(CheckOutcome::NotYetRegistered)
            }
            AccrualReply::Registered(verdict) => self.apply_verdict(order, &verdict).await,
        }
    }

    /// Applies an authoritative verdict: status first, then the credit.
    pub async fn apply_verdict(
        &self,
        order: &Order,
        verdict: &AccrualVerdict,
    ) -> Result<CheckOutcome, ReconcileError> {
        let status = verdict.order_status();
        let amount = verdict.credited_amount();

        let rows = with_retry(self.retry, "update_order_status", || {
            self.orders.update_order_status(&order.id, status, amount)
        })
        .await?;
        if rows > 0 {
            tracing::info!(order = %order.id, from = %order.status, to = %status, "Order status updated");
        }

        if status == OrderStatus::Processed {
            // The stored row decides: a terminal order refuses the move, and
            // its recorded accrual is the amount to credit.
            let stored = with_retry(self.retry, "get_order", || self.orders.get_order(&order.id)).await?;
            if stored.status == OrderStatus::Processed && stored.accrual > Decimal::ZERO {
                let credited = self
                    .ledger
                    .credit(&stored.owner, &stored.id, stored.accrual)
                    .await?;
                if credited > 0 {
                    return Ok(CheckOutcome::Credited(stored.accrual));
                }
            }
        }

        if rows > 0 {
            Ok(CheckOutcome::Updated(status))
        } else {
            Ok(CheckOutcome::Unchanged)
        }
    }

    /// Credits every `PROCESSED` order that has no credit entry yet.
    ///
    /// Returns `(credited, failed)`.
    pub async fn recover_pending_credits(&self) -> Result<(usize, usize), ReconcileError> {
        let pending = with_retry(self.retry, "orders_awaiting_credit", || {
            self.orders.orders_awaiting_credit()
        })
        .await?;

        let mut credited = 0;
        let mut failed = 0;
        for order in pending {
            match self.ledger.credit(&order.owner, &order.id, order.accrual).await {
                Ok(rows) => {
                    if rows > 0 {
                        tracing::warn!(order = %order.id, login = %order.owner, "Recovered pending credit");
                        credited += 1;
                    }
                }
                Err(err) => {
                    tracing::error!(order = %order.id, error = %err, "Failed to apply pending credit");
                    failed += 1;
                }
            }
        }
        Ok((credited, failed))
    }

    /// Runs one reconciliation pass.
    ///
    /// Per-order failures are logged and counted, never propagated. An error
    /// is returned only when the pending orders cannot be listed, in which
    /// case nothing was polled.
    pub async fn tick(&self) -> Result<TickReport, ReconcileError> {
        let mut report = TickReport::default();

        match self.recover_pending_credits().await {
            Ok((credited, failed)) => {
                report.credited += credited;
                report.failed += failed;
            }
            Err(err) => tracing::error!(error = %err, "Cannot list orders awaiting credit"),
        }

        let paused_until = *self.paused_until.lock();
        if let Some(until) = paused_until
            && Instant::now() < until
        {
            tracing::debug!("Accrual polling paused by rate limit");
            report.rate_limited = true;
            return Ok(report);
        }

        let orders = with_retry(self.retry, "orders_to_check", || self.orders.orders_to_check()).await?;

        for order in orders {
            if self.flagged.contains_key(&order.id) || !self.due(&order.id) {
                report.skipped += 1;
                continue;
            }

            report.checked += 1;
            match self.check_order(&order).await {
                Ok(CheckOutcome::Credited(_)) => {
                    report.credited += 1;
                    self.polls.remove(&order.id);
                }
                Ok(CheckOutcome::Updated(status)) if status.is_terminal() => {
                    report.updated += 1;
                    self.polls.remove(&order.id);
                }
                Ok(CheckOutcome::Updated(_)) => {
                    report.updated += 1;
                    self.record_attempt(&order.id, None);
                }
                Ok(CheckOutcome::Unchanged) => {
                    self.record_attempt(&order.id, None);
                }
                Ok(CheckOutcome::NotYetRegistered) => {
                    report.not_registered += 1;
                    self.record_attempt(&order.id, None);
                }
                Err(ReconcileError::Accrual(AccrualError::RateLimited { retry_after })) => {
                    tracing::warn!(order = %order.id, ?retry_after, "Accrual service rate limited, pausing");
                    *self.paused_until.lock() = Some(Instant::now() + retry_after);
                    report.rate_limited = true;
                    break;
                }
                Err(err) => {
                    tracing::error!(order = %order.id, error = %err, "Order check failed");
                    report.failed += 1;
                    self.record_attempt(&order.id, Some(err.to_string()));
                }
            }
        }

        if report.checked > 0 || report.credited > 0 {
            tracing::debug!(?report, "Reconciliation tick finished");
        }
        Ok(report)
    }

    /// Runs [`tick`](Self::tick) every `interval` until `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(?interval, "Order reconciliation started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "Cannot list orders to check, skipping tick");
                    }
                }
            }
        }
        tracing::info!("Order reconciliation stopped");
    }

    /// Orders taken out of polling for manual review.
    pub fn flagged_orders(&self) -> Vec<FlaggedOrder> {
        let mut flagged: Vec<_> = self.flagged.iter().map(|f| f.clone()).collect();
        flagged.sort_by(|a, b| a.order.cmp(&b.order));
        flagged
    }

    /// Puts a flagged order back into polling with a fresh attempt budget.
    pub fn release_flagged(&self, order: &OrderId) -> bool {
        self.polls.remove(order);
        self.flagged.remove(order).is_some()
    }

    fn due(&self, order: &OrderId) -> bool {
        self.polls
            .get(order)
            .and_then(|state| state.next_poll)
            .is_none_or(|next| Instant::now() >= next)
    }

    fn record_attempt(&self, order: &OrderId, error: Option<String>) {
        if self.policy.max_attempts.is_none() && self.policy.backoff.is_none() {
            return;
        }

        let mut state = self.polls.entry(order.clone()).or_default();
        state.attempts += 1;
        if error.is_some() {
            state.last_error = error;
        }
        if let Some(backoff) = self.policy.backoff {
            state.next_poll = Some(Instant::now() + backoff.delay(state.attempts));
        }

        if let Some(max) = self.policy.max_attempts
            && state.attempts >= max
        {
            tracing::warn!(
                order = %order,
                attempts = state.attempts,
                "Order flagged for manual review"
            );
            self.flagged.insert(
                order.clone(),
                FlaggedOrder {
                    order: order.clone(),
                    attempts: state.attempts,
                    last_error: state.last_error.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_max() {
        let backoff = Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
        assert_eq!(backoff.delay(5), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn default_policy_is_unbounded() {
        let policy = PollPolicy::default();
        assert_eq!(policy.max_attempts, None);
        assert_eq!(policy.backoff, None);
    }
}
