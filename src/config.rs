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

//! Service configuration from command-line flags and environment.
//!
//! Environment variables take effect when the matching flag is absent.

use crate::reconcile::{Backoff, PollPolicy};
use clap::Parser;
use std::time::Duration;

/// Loyalty points backend
///
/// Registers purchase orders, polls the accrual service for their cashback
/// and keeps each user's bonus balance.
#[derive(Parser, Debug, Clone)]
#[command(name = "loyalty-ledger-rs")]
#[command(about = "Loyalty points backend with accrual reconciliation", long_about = None)]
pub struct Config {
    /// Address the HTTP API binds to
    #[arg(short = 'a', long, env = "RUN_ADDRESS", default_value = "127.0.0.1:8080")]
    pub run_address: String,

    /// Base address of the accrual service
    #[arg(
        short = 'r',
        long,
        env = "ACCRUAL_SYSTEM_ADDRESS",
        default_value = "http://127.0.0.1:8081"
    )]
    pub accrual_address: String,

    /// Seconds between expired-session sweeps
    #[arg(long, env = "T_INTERVAL", default_value_t = 3600)]
    pub token_sweep_secs: u64,

    /// Seconds between order reconciliation ticks
    #[arg(long, env = "O_INTERVAL", default_value_t = 1)]
    pub order_check_secs: u64,

    /// Seconds between health refreshes
    #[arg(long, env = "H_INTERVAL", default_value_t = 3600)]
    pub health_check_secs: u64,

    /// Polls without a verdict before an order is flagged for manual review
    #[arg(long, env = "MAX_POLL_ATTEMPTS")]
    pub max_poll_attempts: Option<u32>,

    /// Back off exponentially between polls of the same order
    #[arg(long, env = "POLL_BACKOFF")]
    pub poll_backoff: bool,

    /// Query the accrual service while handling an order submission
    #[arg(
        long,
        env = "INLINE_ACCRUAL_CHECK",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub inline_accrual_check: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn token_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.token_sweep_secs.max(1))
    }

    pub fn order_check_interval(&self) -> Duration {
        Duration::from_secs(self.order_check_secs.max(1))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_secs.max(1))
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.max_poll_attempts,
            backoff: self.poll_backoff.then(Backoff::default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["loyalty-ledger-rs"]).unwrap();
        assert_eq!(config.order_check_interval(), Duration::from_secs(1));
        assert_eq!(config.token_sweep_interval(), Duration::from_secs(3600));
        assert!(config.inline_accrual_check);
        assert_eq!(config.poll_policy(), PollPolicy::default());
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "loyalty-ledger-rs",
            "-a",
            "0.0.0.0:9000",
            "-r",
            "accrual:8081",
            "--order-check-secs",
            "5",
            "--max-poll-attempts",
            "10",
            "--poll-backoff",
            "--inline-accrual-check",
            "false",
        ])
        .unwrap();
        assert_eq!(config.run_address, "0.0.0.0:9000");
        assert_eq!(config.accrual_address, "accrual:8081");
        assert_eq!(config.order_check_interval(), Duration::from_secs(5));
        assert!(!config.inline_accrual_check);

        let policy = config.poll_policy();
        assert_eq!(policy.max_attempts, Some(10));
        assert_eq!(policy.backoff, Some(Backoff::default()));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config =
            Config::try_parse_from(["loyalty-ledger-rs", "--order-check-secs", "0"]).unwrap();
        assert_eq!(config.order_check_interval(), Duration::from_secs(1));
    }
}
