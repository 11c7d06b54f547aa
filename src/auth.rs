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

//! User registration, login and token authentication.

use crate::base::Login;
use crate::error::{AuthError, StoreError};
use crate::session::SessionStore;
use crate::store::{RetryPolicy, UserStore, with_retry};
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use std::sync::Arc;

/// Salted argon2 hash in PHC string format.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub struct Accounts {
    users: Arc<dyn UserStore>,
    sessions: Arc<SessionStore>,
    retry: RetryPolicy,
}

impl Accounts {
    pub fn new(users: Arc<dyn UserStore>, sessions: Arc<SessionStore>) -> Self {
        Self {
            users,
            sessions,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Creates an account and returns a session token for it.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingCredentials`] - empty login or password.
    /// - [`AuthError::LoginTaken`] - login already registered.
    pub async fn register(&self, login: &str, password: &str) -> Result<String, AuthError> {
        let login = validate(login, password)?;
        let password = password.to_owned();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))??;

        with_retry(self.retry, "register_user", || {
            self.users.register_user(&login, &hash)
        })
        .await?;
        tracing::info!(login = %login, "User registered");
        Ok(self.sessions.issue(&login))
    }

    /// Checks credentials and returns a fresh session token.
    pub async fn login(&self, login: &str, password: &str) -> Result<String, AuthError> {
        let login = validate(login, password)?;
        if !self.check_credentials(&login, password).await? {
            tracing::warn!(login = %login, "Login refused");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(self.sessions.issue(&login))
    }

    /// Whether `password` matches the stored hash. Unknown logins do not match.
    pub async fn check_credentials(&self, login: &Login, password: &str) -> Result<bool, AuthError> {
        let hash = match with_retry(self.retry, "password_hash", || self.users.password_hash(login)).await {
            Ok(hash) => hash,
            Err(StoreError::NotFound) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    /// Login owning a live session token.
    pub fn authenticate(&self, token: &str) -> Result<Login, AuthError> {
        self.sessions.resolve(token).ok_or(AuthError::InvalidToken)
    }
}

fn validate(login: &str, password: &str) -> Result<Login, AuthError> {
    let login = login.trim();
    if login.is_empty() || password.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    Ok(Login::new(login))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::SystemClock;
    use crate::store::MemoryStore;

    fn accounts() -> Accounts {
        let sessions = Arc::new(SessionStore::new(Arc::new(SystemClock)));
        Accounts::new(Arc::new(MemoryStore::new()), sessions).with_retry_policy(RetryPolicy::none())
    }

    #[test]
    fn hash_round_trip() {
        let hash = hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
        assert!(!verify_password("hunter2", "not-a-hash"));
    }

    #[tokio::test]
    async fn register_issues_usable_token() {
        let accounts = accounts();
        let token = accounts.register("alice", "secret").await.unwrap();
        assert_eq!(accounts.authenticate(&token), Ok(Login::new("alice")));
    }

    #[tokio::test]
    async fn duplicate_login_is_rejected() {
        let accounts = accounts();
        accounts.register("alice", "secret").await.unwrap();
        assert_eq!(
            accounts.register("alice", "other").await,
            Err(AuthError::LoginTaken)
        );
    }

    #[tokio::test]
    async fn login_checks_password() {
        let accounts = accounts();
        accounts.register("alice", "secret").await.unwrap();
        assert!(accounts.login("alice", "secret").await.is_ok());
        assert_eq!(
            accounts.login("alice", "wrong").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            accounts.login("nobody", "secret").await,
            Err(AuthError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn empty_credentials_are_rejected() {
        let accounts = accounts();
        assert_eq!(
            accounts.register("", "secret").await,
            Err(AuthError::MissingCredentials)
        );
        assert_eq!(
            accounts.login("alice", "").await,
            Err(AuthError::MissingCredentials)
        );
    }
}
