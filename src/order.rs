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

//! Order records.
//!
//! Orders follow a state machine:
//! - [`New`] → [`Processing`] (accepted by the accrual service, not scored yet)
//! - [`New`] / [`Processing`] → [`Processed`] or [`Invalid`] (terminal)
//!
//! [`New`]: OrderStatus::New
//! [`Processing`]: OrderStatus::Processing
//! [`Processed`]: OrderStatus::Processed
//! [`Invalid`]: OrderStatus::Invalid

use crate::base::{Login, OrderId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

//  NEW ──► PROCESSING ──► PROCESSED (credited)
//   │           │
//   └───────────┴───────► INVALID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    /// `Invalid` and `Processed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Whether `self → next` is a legal move. Re-asserting `Processing` is
    /// allowed so repeated polls are no-ops rather than errors.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::New, OrderStatus::New) => false,
            (from, _) if from.is_terminal() => false,
            (_, OrderStatus::New) => false,
            _ => true,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        };
        f.write_str(s)
    }
}

/// A purchase receipt registered by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: Login,
    pub status: OrderStatus,
    /// Zero until the order is `Processed`.
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    pub fn new(id: OrderId, owner: Login, uploaded_at: DateTime<Utc>) -> Self {
        Self {
            id,
            owner,
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            uploaded_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(OrderStatus::Processed.is_terminal());
    }

    #[test]
    fn transitions_out_of_new() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Processed));
        assert!(OrderStatus::New.can_transition_to(OrderStatus::Invalid));
        assert!(!OrderStatus::New.can_transition_to(OrderStatus::New));
    }

    #[test]
    fn processing_may_be_reasserted() {
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Processed));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::New));
    }

    #[test]
    fn terminal_states_are_frozen() {
        for next in [
            OrderStatus::New,
            OrderStatus::Processing,
            OrderStatus::Invalid,
            OrderStatus::Processed,
        ] {
            assert!(!OrderStatus::Invalid.can_transition_to(next));
            assert!(!OrderStatus::Processed.can_transition_to(next));
        }
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&OrderStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        assert_eq!(OrderStatus::Invalid.to_string(), "INVALID");
    }
}
