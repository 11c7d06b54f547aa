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

//! Client for the external accrual service.
//!
//! Protocol: `GET <base>/api/orders/{number}`
//!
//! | Status | Meaning |
//! |--------|---------|
//! | 200 | `{"order", "status", "accrual"?}` - authoritative verdict |
//! | 204 | order not ingested yet, ask again later |
//! | 429 | rate limited, `Retry-After` seconds |
//! | other | service error |
//!
//! Only a decoded 200 body is a verdict. Everything else is reported either
//! as [`AccrualReply::NotYetRegistered`] or as an [`AccrualError`], and
//! neither may be turned into an order status by the caller.

use crate::base::OrderId;
use crate::error::AccrualError;
use crate::order::OrderStatus;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

/// Timeout applied to every accrual request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause assumed when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Status as reported by the accrual service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl AccrualStatus {
    /// `Registered` means accepted but not scored, same as `Processing`.
    pub fn order_status(self) -> OrderStatus {
        match self {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }
}

/// Decoded 200 response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccrualVerdict {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub accrual: Option<Decimal>,
}

impl AccrualVerdict {
    pub fn order_status(&self) -> OrderStatus {
        self.status.order_status()
    }

    /// Amount to credit; zero unless the order is `Processed`.
    pub fn credited_amount(&self) -> Decimal {
        match self.status {
            AccrualStatus::Processed => self.accrual.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }

    fn validate(self, expected: &OrderId) -> Result<Self, AccrualError> {
        if self.order != expected.as_str() {
            return Err(AccrualError::Malformed(format!(
                "verdict for order {} while asking about {}",
                self.order, expected
            )));
        }
        if self.accrual.is_some_and(|amount| amount < Decimal::ZERO) {
            return Err(AccrualError::Malformed("negative accrual".into()));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualReply {
    Registered(AccrualVerdict),
    NotYetRegistered,
}

#[async_trait]
pub trait AccrualClient: Send + Sync {
    /// Looks up one order.
    async fn query(&self, order: &OrderId) -> Result<AccrualReply, AccrualError>;

    /// Whether the service answers at all.
    async fn ping(&self) -> bool;
}

/// [`AccrualClient`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    base: String,
    http: reqwest::Client,
}

impl HttpAccrualClient {
    /// Builds a client for `base` (e.g. `http://localhost:8081`). A missing
    /// scheme defaults to `http://`.
    pub fn new(base: &str) -> Result<Self, AccrualError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AccrualError::Transport(e.to_string()))?;
        Ok(Self {
            base: normalize_base(base),
            http,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

fn normalize_base(base: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn query(&self, order: &OrderId) -> Result<AccrualReply, AccrualError> {
        let url = format!("{}/api/orders/{}", self.base, order);
        let response = self.http.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let verdict: AccrualVerdict = response
                    .json()
                    .await
                    .map_err(|e| AccrualError::Malformed(e.to_string()))?;
                Ok(AccrualReply::Registered(verdict.validate(order)?))
            }
            StatusCode::NO_CONTENT => Ok(AccrualReply::NotYetRegistered),
            StatusCode::TOO_MANY_REQUESTS => Err(AccrualError::RateLimited {
                retry_after: retry_after(response.headers()),
            }),
            other => Err(AccrualError::UnexpectedStatus(other.as_u16())),
        }
    }

    async fn ping(&self) -> bool {
        self.http.get(&self.base).send().await.is_ok()
    }
}
