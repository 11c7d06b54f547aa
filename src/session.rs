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

//! Session token cache.
//!
//! One live token per login: issuing a new token replaces the previous one.
//! Tokens expire one hour after issue; [`SessionStore::sweep`] removes them.
//!
//! Two maps are kept: sessions by login (the source of truth) and a reverse
//! index by token. The index may briefly hold stale tokens after concurrent
//! re-issues, so [`SessionStore::resolve`] always confirms a hit against the
//! login map. Only the sweep nests the two maps (index → sessions).

use crate::base::{Clock, Login};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub login: Login,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: DashMap<Login, Session>,
    by_token: DashMap<String, Login>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, Duration::hours(1))
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            by_token: DashMap::new(),
            clock,
            ttl,
        }
    }

    /// Issues a fresh token for `login`, invalidating any previous one.
    pub fn issue(&self, login: &Login) -> String {
        let token = generate_token();
        let session = Session {
            login: login.clone(),
            token: token.clone(),
            created_at: self.clock.now(),
        };

        self.by_token.insert(token.clone(), login.clone());
        if let Some(previous) = self.sessions.insert(login.clone(), session) {
            self.by_token.remove(&previous.token);
        }
        tracing::debug!(login = %login, "Session issued");
        token
    }

    /// Login owning `token`, if the token is current and not expired.
    pub fn resolve(&self, token: &str) -> Option<Login> {
        let login = self.by_token.get(token)?.clone();
        let session = self.sessions.get(&login)?;
        if session.token != token || self.is_expired(&session) {
            return None;
        }
        Some(login)
    }

    /// Removes every session older than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let live = now - session.created_at <= self.ttl;
            if !live {
                removed += 1;
            }
            live
        });

        self.by_token.retain(|token, login| {
            self.sessions
                .get(&*login)
                .is_some_and(|session| session.token == *token)
        });

        if removed > 0 {
            tracing::info!(removed, "Expired sessions swept");
        }
        removed
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, interval: std::time::Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_expired(&self, session: &Session) -> bool {
        self.clock.now() - session.created_at > self.ttl
    }
}

/// Hex SHA-256 of 16 bytes from the OS random source.
fn generate_token() -> String {
    let mut seed = [0u8; 16];
    OsRng.fill_bytes(&mut seed);
    hex::encode(Sha256::digest(seed))
}
