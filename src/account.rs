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

//! Per-user bonus account.
//!
//! A [`BonusAccount`] keeps the running totals and the append-only entry log
//! behind one mutex, so the balance check and the debit that follows it
//! happen against the same snapshot.
//!
//! # Example
//!
//! ```
//! use loyalty_ledger_rs::{BonusAccount, Login};
//! use rust_decimal_macros::dec;
//!
//! let account = BonusAccount::new(Login::new("alice"));
//! assert_eq!(account.balance().current, dec!(0));
//! ```

use crate::base::{Login, OrderId};
use crate::bonus::{Balance, EntryId, EntryKind, LedgerEntry};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

#[derive(Debug)]
struct AccountData {
    login: Login,
    current: Decimal,
    withdrawn: Decimal,
    /// Append-only; never mutated once pushed.
    entries: Vec<LedgerEntry>,
}

impl AccountData {
    fn new(login: Login) -> Self {
        Self {
            login,
            current: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
            entries: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.current >= Decimal::ZERO,
            "Invariant violated: bonus balance went negative: {}",
            self.current
        );
        debug_assert!(
            self.withdrawn >= Decimal::ZERO,
            "Invariant violated: withdrawn total went negative: {}",
            self.withdrawn
        );
    }

    /// Increases the balance.
    fn credit(&mut self, amount: Decimal) {
        debug_assert!(amount > Decimal::ZERO);
        self.current += amount;
        self.assert_invariants();
    }

    /// Decreases the balance and grows the withdrawn total.
    fn debit(&mut self, amount: Decimal) -> Result<(), StoreError> {
        debug_assert!(amount > Decimal::ZERO);
        if amount > self.current {
            return Err(StoreError::InsufficientFunds);
        }
        self.current -= amount;
        self.withdrawn += amount;
        self.assert_invariants();
        Ok(())
    }
}

/// Bonus account of one user.
#[derive(Debug)]
pub struct BonusAccount {
    inner: Mutex<AccountData>,
}

impl BonusAccount {
    pub fn new(login: Login) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(login)),
        }
    }

    pub fn balance(&self) -> Balance {
        let data = self.inner.lock();
        Balance {
            current: data.current,
            withdrawn: data.withdrawn,
        }
    }

    /// Copy of the entry log, oldest first.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.inner.lock().entries.clone()
    }

    /// Applies a movement and appends the matching entry.
    ///
    /// Debits that exceed the current balance fail with
    /// [`StoreError::InsufficientFunds`] and leave the account untouched.
    pub fn record(
        &self,
        id: EntryId,
        order: OrderId,
        kind: EntryKind,
        amount: Decimal,
        placed_at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut data = self.inner.lock();
        match kind {
            EntryKind::Credit => data.credit(amount),
            EntryKind::Debit => data.debit(amount)?,
        }

        let entry = LedgerEntry {
            id,
            order,
            owner: data.login.clone(),
            kind,
            amount,
            placed_at,
        };
        data.entries.push(entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> OrderId {
        OrderId::parse("79927398713").unwrap()
    }

    #[test]
    fn account_data_credit_then_debit() {
        let mut data = AccountData::new(Login::new("alice"));
        data.credit(dec!(100.00));
        data.debit(dec!(30.00)).unwrap();
        assert_eq!(data.current, dec!(70.00));
        assert_eq!(data.withdrawn, dec!(30.00));
    }

    #[test]
    fn account_data_debit_insufficient() {
        let mut data = AccountData::new(Login::new("alice"));
        data.credit(dec!(300.00));
        let result = data.debit(dec!(400.00));
        assert_eq!(result, Err(StoreError::InsufficientFunds));
        assert_eq!(data.current, dec!(300.00));
        assert_eq!(data.withdrawn, Decimal::ZERO);
    }

    #[test]
    fn account_data_debit_exact_balance() {
        let mut data = AccountData::new(Login::new("alice"));
        data.credit(dec!(50.00));
        data.debit(dec!(50.00)).unwrap();
        assert_eq!(data.current, Decimal::ZERO);
    }

    #[test]
    fn record_appends_entries() {
        let account = BonusAccount::new(Login::new("alice"));
        let now = Utc::now();
        account
            .record(EntryId(1), order(), EntryKind::Credit, dec!(500), now)
            .unwrap();
        let debit = account
            .record(EntryId(2), order(), EntryKind::Debit, dec!(120), now)
            .unwrap();

        assert_eq!(debit.owner, Login::new("alice"));
        assert_eq!(account.entries().len(), 2);
        assert_eq!(
            account.balance(),
            Balance {
                current: dec!(380),
                withdrawn: dec!(120)
            }
        );
    }

    #[test]
    fn failed_debit_appends_nothing() {
        let account = BonusAccount::new(Login::new("alice"));
        let result = account.record(EntryId(1), order(), EntryKind::Debit, dec!(1), Utc::now());
        assert_eq!(result, Err(StoreError::InsufficientFunds));
        assert!(account.entries().is_empty());
    }

    #[test]
    fn running_totals_match_entry_log() {
        let account = BonusAccount::new(Login::new("alice"));
        let now = Utc::now();
        for (i, (kind, amount)) in [
            (EntryKind::Credit, dec!(10)),
            (EntryKind::Credit, dec!(7.5)),
            (EntryKind::Debit, dec!(12)),
            (EntryKind::Debit, dec!(100)),
        ]
        .into_iter()
        .enumerate()
        {
            let _ = account.record(EntryId(i as u64), order(), kind, amount, now);
        }
        assert_eq!(account.balance(), Balance::from_entries(&account.entries()));
    }
}
