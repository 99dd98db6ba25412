// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provenant Daemon
//!
//! Ticks every pending persisted process in the configured database until
//! interrupted.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use provenant_core::builtin::register_builtins;
use provenant_core::config::Config;
use provenant_core::daemon::{Daemon, DaemonConfig};
use provenant_core::runtime::Runtime;
use provenant_core::store::{NodeStore, SqliteNodeStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("provenant_core=info".parse()?),
        )
        .init();

    info!("Starting Provenant daemon");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        tick_interval_ms = config.tick_interval.as_millis() as u64,
        max_query_retries = config.max_query_retries,
        print_exceptions = config.print_exceptions,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let store = SqliteNodeStore::connect(&config.database_url, config.max_query_retries).await?;
    store.health_check().await?;
    info!("Database health check passed");

    let runtime = register_builtins(Runtime::builder())
        .store(Arc::new(store))
        .build()?;
    info!(process_types = ?runtime.catalog().names(), "Runtime initialized");

    let daemon = Daemon::new(runtime, DaemonConfig::from(&config));
    let shutdown = daemon.shutdown_handle();
    let daemon_handle = tokio::spawn(daemon.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    daemon_handle.await?;

    info!("Shutdown complete");
    Ok(())
}
