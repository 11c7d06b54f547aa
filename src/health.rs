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

//! Periodic health snapshot of the store and the accrual service.

use crate::accrual::AccrualClient;
use crate::base::Clock;
use crate::reconcile::Reconciler;
use crate::store::OrderStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub store_ok: bool,
    pub accrual_ok: bool,
    /// `None` until the first refresh.
    pub checked_at: Option<DateTime<Utc>>,
    pub flagged_orders: usize,
}

pub struct HealthMonitor {
    store: Arc<dyn OrderStore>,
    accrual: Arc<dyn AccrualClient>,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn Clock>,
    status: RwLock<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn OrderStore>,
        accrual: Arc<dyn AccrualClient>,
        reconciler: Arc<Reconciler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            accrual,
            reconciler,
            clock,
            status: RwLock::new(HealthStatus::default()),
        }
    }

    /// Last snapshot.
    pub fn status(&self) -> HealthStatus {
        self.status.read().clone()
    }

    /// Probes both dependencies and stores a new snapshot.
    pub async fn refresh(&self) -> HealthStatus {
        let store_ok = match self.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "Store health check failed");
                false
            }
        };
        let accrual_ok = self.accrual.ping().await;
        if !accrual_ok {
            tracing::warn!("Accrual service health check failed");
        }

        let status = HealthStatus {
            store_ok,
            accrual_ok,
            checked_at: Some(self.clock.now()),
            flagged_orders: self.reconciler.flagged_orders().len(),
        };
        *self.status.write() = status.clone();
        status
    }

    /// Runs [`refresh`](Self::refresh) every `interval` until `shutdown` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.refresh().await;
                }
            }
        }
    }
}
