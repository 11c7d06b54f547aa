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

//! HTTP API.
//!
//! | Route | Success | Failure |
//! |-------|---------|---------|
//! | `POST /api/user/register` | 200 + token | 400, 409 |
//! | `POST /api/user/login` | 200 + token | 400, 401 |
//! | `POST /api/user/orders` | 202 new, 200 already yours | 409, 422 |
//! | `GET /api/user/orders` | 200, 204 if none | |
//! | `GET /api/user/balance` | 200 | |
//! | `POST /api/user/balance/withdraw` | 200 | 400, 402, 409, 422 |
//! | `GET /api/user/withdrawals` | 200, 204 if none | |
//! | `GET /api/status` | 200 | |
//!
//! Every `/api/user/*` route except register and login answers 401 without
//! a live session token.
//!
//! Each request gets an INFO span with method and URI. Headers are never
//! recorded, so bearer tokens stay out of the logs.

use crate::base::{Login, OrderId};
use crate::bonus::{Balance, LedgerEntry};
use crate::error::{AuthError, LedgerError, OrderError, StoreError};
use crate::health::HealthStatus;
use crate::order::{Order, OrderStatus};
use crate::service::{LoyaltyService, Submission};
use axum::{
    Json, Router,
    extract::{FromRequestParts, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub type AppState = Arc<LoyaltyService>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/user/register", post(register))
        .route("/api/user/login", post(login))
        .route("/api/user/orders", post(submit_order).get(list_orders))
        .route("/api/user/balance", get(balance))
        .route("/api/user/balance/withdraw", post(withdraw))
        .route("/api/user/withdrawals", get(withdrawals))
        .route("/api/status", get(status))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

// === DTOs ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderView {
    pub number: String,
    pub status: OrderStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        let accrual = (order.status == OrderStatus::Processed).then_some(order.accrual);
        Self {
            number: order.id.to_string(),
            status: order.status,
            accrual,
            uploaded_at: order.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalView {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<LedgerEntry> for WithdrawalView {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            order: entry.order.to_string(),
            sum: entry.amount,
            processed_at: entry.placed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Errors ===

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthorized,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn store_failure(err: &StoreError) -> (StatusCode, &'static str) {
    if err.is_transient() {
        (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Auth(err) => match err {
                AuthError::MissingCredentials => (StatusCode::BAD_REQUEST, "MISSING_CREDENTIALS"),
                AuthError::LoginTaken => (StatusCode::CONFLICT, "LOGIN_TAKEN"),
                AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
                AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN"),
                AuthError::Hashing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
                AuthError::Store(err) => store_failure(err),
            },
            ApiError::Order(err) => match err {
                OrderError::InvalidFormat => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_ORDER_NUMBER")
                }
                OrderError::Conflict => (StatusCode::CONFLICT, "ORDER_OWNED_BY_ANOTHER_USER"),
                OrderError::NotFound => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
                OrderError::Store(err) => store_failure(err),
            },
            ApiError::Ledger(err) => match err {
                LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                LedgerError::InsufficientFunds => {
                    (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_FUNDS")
                }
                LedgerError::InvalidOrder => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_ORDER_NUMBER")
                }
                LedgerError::DuplicateWithdrawal => (StatusCode::CONFLICT, "DUPLICATE_WITHDRAWAL"),
                LedgerError::UnknownUser => (StatusCode::UNAUTHORIZED, "UNKNOWN_USER"),
                LedgerError::Store(err) => store_failure(err),
            },
        };

        let error = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "internal server error".to_owned()
        } else {
            self.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_owned(),
            }),
        )
            .into_response()
    }
}

// === Authentication ===

/// Login behind the request's session token.
///
/// Reads `Authorization: Bearer <token>`; a bare token is accepted too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub Login);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if token.is_empty() {
            return Err(ApiError::Unauthorized);
        }

        match state.accounts.authenticate(token) {
            Ok(login) => Ok(AuthUser(login)),
            Err(err) => {
                tracing::debug!(uri = %parts.uri, "Rejected session token");
                Err(err.into())
            }
        }
    }
}

fn token_response(token: String) -> Response {
    let mut response = Json(TokenResponse {
        token: token.clone(),
    })
    .into_response();
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
        response.headers_mut().insert(AUTHORIZATION, value);
    }
    response
}

// === Handlers ===

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = payload?;
    let token = state
        .accounts
        .register(&credentials.login, &credentials.password)
        .await?;
    Ok(token_response(token))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = payload?;
    let token = state
        .accounts
        .login(&credentials.login, &credentials.password)
        .await?;
    Ok(token_response(token))
}

async fn submit_order(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
    body: String,
) -> Result<(StatusCode, Json<OrderView>), ApiError> {
    let (status, order) = match state.submit_order(&body, &login).await? {
        Submission::Accepted(order) => (StatusCode::ACCEPTED, order),
        Submission::AlreadyOwned(order) => (StatusCode::OK, order),
        Submission::Rejected(order) => (StatusCode::CONFLICT, order),
    };
    Ok((status, Json(order.into())))
}

async fn list_orders(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
) -> Result<Response, ApiError> {
    let orders = state.registry.orders_for_user(&login).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let views: Vec<OrderView> = orders.into_iter().map(OrderView::from).collect();
    Ok(Json(views).into_response())
}

async fn balance(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
) -> Result<Json<Balance>, ApiError> {
    Ok(Json(state.ledger.balance(&login).await?))
}

async fn withdraw(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload?;
    let order = OrderId::parse(&request.order).ok_or(LedgerError::InvalidOrder)?;
    state.ledger.debit(&login, &order, request.sum).await?;
    Ok(StatusCode::OK)
}

async fn withdrawals(
    State(state): State<AppState>,
    AuthUser(login): AuthUser,
) -> Result<Response, ApiError> {
    let entries = state.ledger.withdrawals(&login).await?;
    if entries.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let views: Vec<WithdrawalView> = entries.into_iter().map(WithdrawalView::from).collect();
    Ok(Json(views).into_response())
}

async fn status(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.health.status())
}
