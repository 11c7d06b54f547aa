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

//! Session cache integration tests.

use chrono::{Duration, TimeZone, Utc};
use loyalty_ledger_rs::{Login, ManualClock, SessionStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn sessions() -> (Arc<ManualClock>, Arc<SessionStore>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    ));
    let sessions = Arc::new(SessionStore::new(clock.clone()));
    (clock, sessions)
}

#[test]
fn token_survives_until_ttl() {
    let (clock, sessions) = sessions();
    let bob = Login::new("bob");
    let token = sessions.issue(&bob);

    clock.advance(Duration::minutes(59));
    assert_eq!(sessions.resolve(&token), Some(bob.clone()));
    assert_eq!(sessions.sweep(), 0);

    clock.advance(Duration::minutes(2));
    assert_eq!(sessions.sweep(), 1);
    assert_eq!(sessions.resolve(&token), None);
}

#[test]
fn token_at_exactly_one_hour_is_still_valid() {
    let (clock, sessions) = sessions();
    let token = sessions.issue(&Login::new("bob"));
    clock.advance(Duration::hours(1));
    assert!(sessions.resolve(&token).is_some());
}

#[test]
fn sweep_only_removes_expired_sessions() {
    let (clock, sessions) = sessions();
    let old = sessions.issue(&Login::new("alice"));
    clock.advance(Duration::minutes(45));
    let fresh = sessions.issue(&Login::new("bob"));
    clock.advance(Duration::minutes(30));

    assert_eq!(sessions.sweep(), 1);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions.resolve(&old), None);
    assert_eq!(sessions.resolve(&fresh), Some(Login::new("bob")));
}

#[test]
fn relogin_refreshes_lifetime() {
    let (clock, sessions) = sessions();
    let bob = Login::new("bob");
    sessions.issue(&bob);
    clock.advance(Duration::minutes(50));
    let token = sessions.issue(&bob);
    clock.advance(Duration::minutes(50));

    assert_eq!(sessions.sweep(), 0);
    assert_eq!(sessions.resolve(&token), Some(bob));
}

#[test]
fn custom_ttl_is_honoured() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let sessions = SessionStore::with_ttl(clock.clone(), Duration::minutes(5));
    let token = sessions.issue(&Login::new("bob"));
    clock.advance(Duration::minutes(6));
    assert_eq!(sessions.resolve(&token), None);
}

#[test]
fn concurrent_logins_leave_one_live_token_per_user() {
    let (_, sessions) = sessions();
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let sessions = sessions.clone();
            std::thread::spawn(move || {
                for i in 0..200 {
                    sessions.issue(&Login::new(format!("user-{}", (t + i) % 4)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(sessions.len(), 4);
    let live = (0..4)
        .map(|u| sessions.issue(&Login::new(format!("user-{u}"))))
        .filter(|token| sessions.resolve(token).is_some())
        .count();
    assert_eq!(live, 4);
}

#[tokio::test]
async fn sweeper_task_stops_on_cancel() {
    let (clock, sessions) = sessions();
    sessions.issue(&Login::new("bob"));
    clock.advance(Duration::hours(2));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(
        sessions
            .clone()
            .run_sweeper(std::time::Duration::from_millis(10), shutdown.clone()),
    );

    for _ in 0..100 {
        if sessions.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(sessions.is_empty());

    shutdown.cancel();
    handle.await.unwrap();
}
