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

//! Bonus ledger records: immutable entries and the balance derived from them.

use crate::base::{Login, OrderId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Sequential ledger entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Credit,
    Debit,
}

/// One immutable movement of a user's bonus balance.
///
/// The magnitude is always positive; the direction lives in `kind`. Credits
/// reference the order that earned them, debits the order the points were
/// spent on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub order: OrderId,
    pub owner: Login,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub placed_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount with sign applied: positive for credits, negative for debits.
    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            EntryKind::Credit => self.amount,
            EntryKind::Debit => -self.amount,
        }
    }
}

/// Running totals of a user's bonus account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

impl Balance {
    /// Folds an entry log into totals.
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        entries
            .into_iter()
            .fold(Balance::default(), |mut balance, entry| {
                balance.current += entry.signed_amount();
                if entry.kind == EntryKind::Debit {
                    balance.withdrawn += entry.amount;
                }
                balance
            })
    }
}

/// Result of recomputing a balance from its entry log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditReport {
    pub recorded: Balance,
    pub recomputed: Balance,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.recorded == self.recomputed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(id: u64, kind: EntryKind, amount: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: EntryId(id),
            order: OrderId::parse("79927398713").unwrap(),
            owner: Login::new("alice"),
            kind,
            amount,
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn signed_amount_follows_kind() {
        assert_eq!(entry(1, EntryKind::Credit, dec!(5)).signed_amount(), dec!(5));
        assert_eq!(entry(2, EntryKind::Debit, dec!(5)).signed_amount(), dec!(-5));
    }

    #[test]
    fn balance_from_entries() {
        let entries = vec![
            entry(1, EntryKind::Credit, dec!(500)),
            entry(2, EntryKind::Debit, dec!(120.5)),
            entry(3, EntryKind::Credit, dec!(20)),
            entry(4, EntryKind::Debit, dec!(9.5)),
        ];
        let balance = Balance::from_entries(&entries);
        assert_eq!(balance.current, dec!(390));
        assert_eq!(balance.withdrawn, dec!(130));
    }

    #[test]
    fn empty_log_is_zero() {
        assert_eq!(Balance::from_entries(&[]), Balance::default());
    }

    #[test]
    fn balance_serializes_as_numbers() {
        let balance = Balance {
            current: dec!(500.5),
            withdrawn: dec!(42),
        };
        let json = serde_json::to_string(&balance).unwrap();
        assert_eq!(json, r#"{"current":500.5,"withdrawn":42.0}"#);
    }
}
