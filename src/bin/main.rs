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

use clap::Parser;
use loyalty_ledger_rs::{
    Config, HttpAccrualClient, Intervals, LoyaltyService, MemoryStore, Settings, SystemClock, api,
};
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let config = Config::parse();
    init_tracing(&config.log_level);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server terminated");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins over `--log-level`.
fn init_tracing(fallback: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let accrual = Arc::new(HttpAccrualClient::new(&config.accrual_address)?);
    tracing::info!(accrual = accrual.base(), "Using accrual service");

    let service = Arc::new(LoyaltyService::new(
        Arc::new(MemoryStore::new()),
        accrual,
        Arc::new(SystemClock),
        Settings::from(&config),
    ));

    let shutdown = CancellationToken::new();
    let loops = service.spawn_background(Intervals::from(&config), &shutdown);

    let listener = TcpListener::bind(&config.run_address).await?;
    tracing::info!(address = %config.run_address, "Listening");

    let served = axum::serve(listener, api::router(service))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    shutdown.cancel();
    for handle in loops {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task did not stop cleanly");
        }
    }
    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for Ctrl+C");
                shutdown.cancelled().await;
            }
        },
        _ = shutdown.cancelled() => {}
    }
}
