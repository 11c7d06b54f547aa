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

//! Bonus ledger.
//!
//! The [`BonusLedger`] is the only component that moves bonus points:
//!
//! - **Credits**: points earned by a `PROCESSED` order, at most once per order.
//! - **Debits**: withdrawals, refused when they exceed the current balance.
//!
//! Every movement appends an immutable [`LedgerEntry`], so the running
//! balance can always be recomputed from the log (see [`BonusLedger::audit`]).
//!
//! # Concurrency
//!
//! The balance check and the debit are one conditional write in the store
//! ([`BonusStore::debit`]), so two concurrent withdrawals for the same user
//! cannot both pass the check.

use crate::base::{Clock, Login, OrderId};
use crate::bonus::{AuditReport, Balance, EntryKind, LedgerEntry};
use crate::error::LedgerError;
use crate::store::{BonusStore, RetryPolicy, with_retry};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct BonusLedger {
    store: Arc<dyn BonusStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl BonusLedger {
    pub fn new(store: Arc<dyn BonusStore>, clock: Arc<dyn Clock>) -> Self {
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

    /// Credits `amount` to `login` for `order`.
    ///
    /// Returns the number of entries written: `0` when the order was already
    /// credited, which makes repeated calls safe.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - amount is zero or negative.
    pub async fn credit(
        &self,
        login: &Login,
        order: &OrderId,
        amount: Decimal,
    ) -> Result<u64, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let at = self.clock.now();
        let rows = with_retry(self.retry, "credit", || {
            self.store.credit(login, order, amount, at)
        })
        .await?;

        if rows > 0 {
            tracing::info!(login = %login, order = %order, %amount, "Bonus credited");
        } else {
            tracing::debug!(login = %login, order = %order, "Order already credited");
        }
        Ok(rows)
    }

    /// Withdraws `amount` from `login`, spent on order `order`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - amount is zero or negative.
    /// - [`LedgerError::InsufficientFunds`] - amount exceeds the balance; nothing changes.
    /// - [`LedgerError::DuplicateWithdrawal`] - `order` was already used for a withdrawal.
    /// - [`LedgerError::UnknownUser`] - no bonus account for `login`.
    pub async fn debit(
        &self,
        login: &Login,
        order: &OrderId,
        amount: Decimal,
    ) -> Result<u64, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let at = self.clock.now();
        let result = with_retry(self.retry, "debit", || {
            self.store.debit(login, order, amount, at)
        })
        .await;

        match result {
            Ok(rows) => {
                tracing::info!(login = %login, order = %order, %amount, "Bonus withdrawn");
                Ok(rows)
            }
            Err(err) => {
                let err = LedgerError::from(err);
                tracing::warn!(login = %login, order = %order, %amount, error = %err, "Withdrawal refused");
                Err(err)
            }
        }
    }

    /// Current balance and lifetime withdrawn total.
    pub async fn balance(&self, login: &Login) -> Result<Balance, LedgerError> {
        Ok(with_retry(self.retry, "balance", || self.store.balance(login)).await?)
    }

    /// Withdrawal history, oldest first.
    pub async fn withdrawals(&self, login: &Login) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = with_retry(self.retry, "entries", || self.store.entries(login)).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Debit)
            .collect())
    }

    /// Recomputes the balance from the entry log and compares it with the
    /// running totals.
    pub async fn audit(&self, login: &Login) -> Result<AuditReport, LedgerError> {
        let recorded = self.balance(login).await?;
        let entries = with_retry(self.retry, "entries", || self.store.entries(login)).await?;
        let report = AuditReport {
            recorded,
            recomputed: Balance::from_entries(&entries),
        };
        if !report.is_consistent() {
            tracing::error!(
                login = %login,
                recorded = ?report.recorded,
                recomputed = ?report.recomputed,
                "Bonus balance diverged from entry log"
            );
        }
        Ok(report)
    }
}
