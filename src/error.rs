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

//! Error types for the store, registry, ledger, accrual client and accounts.

use std::time::Duration;
use thiserror::Error;

/// Errors reported by the persistence capabilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Order number is already taken (uniqueness violation)
    #[error("order already exists")]
    DuplicateOrder,

    /// Login is already taken
    #[error("user already exists")]
    DuplicateUser,

    /// Withdrawal reference already used
    #[error("withdrawal reference already used")]
    DuplicateWithdrawal,

    /// Referenced row does not exist
    #[error("record not found")]
    NotFound,

    /// Debit would drive the balance negative
    #[error("insufficient balance")]
    InsufficientFunds,

    /// Backend temporarily unreachable; safe to retry
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the failure is transient and the call may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Order registration failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// Order number is empty, non-numeric or fails the Luhn checksum
    #[error("invalid order number format")]
    InvalidFormat,

    /// Order number is owned by another user
    #[error("order number already registered by another user")]
    Conflict,

    /// Order does not exist
    #[error("order not found")]
    NotFound,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => OrderError::NotFound,
            other => OrderError::Store(other),
        }
    }
}

/// Bonus ledger failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Debit exceeds the current balance
    #[error("insufficient bonus balance")]
    InsufficientFunds,

    /// Withdrawal reference is not a valid order number
    #[error("invalid order number format")]
    InvalidOrder,

    /// Withdrawal reference was already used
    #[error("withdrawal already registered for this order")]
    DuplicateWithdrawal,

    /// User account does not exist
    #[error("unknown user")]
    UnknownUser,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientFunds => LedgerError::InsufficientFunds,
            StoreError::DuplicateWithdrawal => LedgerError::DuplicateWithdrawal,
            StoreError::NotFound => LedgerError::UnknownUser,
            other => LedgerError::Store(other),
        }
    }
}

/// Accrual service failures.
///
/// Every variant is transient: none of them is an authoritative verdict about
/// an order, and callers must never derive an order status from one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccrualError {
    /// Connection failed or the request could not be sent
    #[error("accrual service unreachable: {0}")]
    Transport(String),

    /// No response within the request timeout
    #[error("accrual service timed out")]
    Timeout,

    /// Service asked us to slow down
    #[error("accrual service rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Any status other than 200, 204 or 429
    #[error("accrual service returned status {0}")]
    UnexpectedStatus(u16),

    /// 200 response whose body could not be interpreted
    #[error("malformed accrual response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for AccrualError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AccrualError::Timeout
        } else if err.is_decode() {
            AccrualError::Malformed(err.to_string())
        } else {
            AccrualError::Transport(err.to_string())
        }
    }
}

/// Registration and login failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Login or password missing
    #[error("login and password are required")]
    MissingCredentials,

    /// Login is already registered
    #[error("login already taken")]
    LoginTaken,

    /// Login unknown or password mismatch
    #[error("invalid login or password")]
    InvalidCredentials,

    /// Session token unknown or expired
    #[error("invalid or expired session token")]
    InvalidToken,

    /// Password hashing failed
    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateUser => AuthError::LoginTaken,
            StoreError::NotFound => AuthError::InvalidCredentials,
            other => AuthError::Store(other),
        }
    }
}

/// Failure while checking one order against the accrual service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Accrual(#[from] AccrualError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(StoreError::DuplicateOrder.to_string(), "order already exists");
        assert_eq!(
            StoreError::Unavailable("pool closed".into()).to_string(),
            "store unavailable: pool closed"
        );
        assert_eq!(OrderError::InvalidFormat.to_string(), "invalid order number format");
        assert_eq!(
            OrderError::Conflict.to_string(),
            "order number already registered by another user"
        );
        assert_eq!(
            LedgerError::InsufficientFunds.to_string(),
            "insufficient bonus balance"
        );
        assert_eq!(
            AccrualError::UnexpectedStatus(500).to_string(),
            "accrual service returned status 500"
        );
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "invalid login or password"
        );
        assert_eq!(
            ReconcileError::from(AccrualError::Timeout).to_string(),
            "accrual service timed out"
        );
    }

    #[test]
    fn store_errors_map_into_domain_errors() {
        assert_eq!(
            LedgerError::from(StoreError::InsufficientFunds),
            LedgerError::InsufficientFunds
        );
        assert_eq!(
            LedgerError::from(StoreError::NotFound),
            LedgerError::UnknownUser
        );
        assert_eq!(OrderError::from(StoreError::NotFound), OrderError::NotFound);
        assert_eq!(AuthError::from(StoreError::DuplicateUser), AuthError::LoginTaken);
        assert_eq!(
            OrderError::from(StoreError::Unavailable("x".into())),
            OrderError::Store(StoreError::Unavailable("x".into()))
        );
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::DuplicateOrder.is_transient());
        assert!(!StoreError::InsufficientFunds.is_transient());
    }
}
