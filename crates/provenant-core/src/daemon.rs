// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon loop for persisted processes.
//!
//! Each tick lists the pending process nodes and resumes every one of them
//! once. A process that fails to resume has the error recorded against it in
//! the registry, keeps its last good checkpoint and does not stop the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::Pid;
use crate::config::Config;
use crate::error::Result;
use crate::runtime::{Runtime, TickOutcome};

/// Advance every pending persisted process once.
///
/// Returns `true` if at least one process made progress and at least one
/// pending process remains, `false` once nothing more can be done. Processes
/// whose resume failed are not finished; they are skipped, not retried, for
/// the lifetime of the registry. Processes currently driven by a blocking run
/// are skipped as well.
///
/// With `print_exceptions` the first error of the tick is returned after all
/// processes were visited; otherwise errors are only logged and recorded.
pub async fn tick_workflow_engine(runtime: &Runtime, print_exceptions: bool) -> Result<bool> {
    let registry = runtime.registry();
    let pending = runtime.store().list_pending_processes().await?;

    let mut progressed = false;
    let mut first_error = None;

    for uuid in pending {
        let pid = Pid::from(uuid);
        if registry.has_finished(pid) || registry.has_errors(pid) || registry.is_live(pid) {
            continue;
        }

        match runtime.tick_process(pid).await {
            Ok(TickOutcome::Failed(e)) => {
                progressed = true;
                if print_exceptions && first_error.is_none() {
                    first_error = Some(e);
                }
            }
            Ok(outcome) => {
                debug!(pid = %pid, outcome = ?outcome, "Process ticked");
                progressed |= outcome.progressed();
            }
            Err(e) => {
                error!(pid = %pid, error = %e, code = e.error_code(), "Failed to resume process");
                registry.record_error(pid, e.to_string());
                if print_exceptions && first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    let remaining = runtime
        .store()
        .list_pending_processes()
        .await?
        .into_iter()
        .map(Pid::from)
        .filter(|pid| !registry.has_finished(*pid) && !registry.has_errors(*pid))
        .count();

    debug!(progressed, remaining, "Tick complete");
    Ok(progressed && remaining > 0)
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Delay between ticks
    pub tick_interval: Duration,
    /// Return resume errors from ticks instead of only recording them
    pub print_exceptions: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            print_exceptions: false,
        }
    }
}

impl From<&Config> for DaemonConfig {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval,
            print_exceptions: config.print_exceptions,
        }
    }
}

/// Background loop ticking the engine until shut down.
pub struct Daemon {
    runtime: Runtime,
    config: DaemonConfig,
    shutdown: Arc<Notify>,
}

impl Daemon {
    /// Create a daemon for `runtime`.
    pub fn new(runtime: Runtime, config: DaemonConfig) -> Self {
        Self {
            runtime,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Tick until a tick reports no further progress, at most `max_ticks`
    /// times. Returns the number of ticks run.
    pub async fn run_until_idle(&self, max_ticks: usize) -> Result<usize> {
        for tick in 1..=max_ticks {
            if !tick_workflow_engine(&self.runtime, self.config.print_exceptions).await? {
                return Ok(tick);
            }
        }
        warn!(max_ticks, "Daemon still busy after tick limit");
        Ok(max_ticks)
    }

    /// Run the daemon loop.
    pub async fn run(self) {
        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            print_exceptions = self.config.print_exceptions,
            "Daemon started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Daemon shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    match tick_workflow_engine(&self.runtime, self.config.print_exceptions).await {
                        Ok(true) => debug!("Work remaining after tick"),
                        Ok(false) => {}
                        Err(e) => error!(error = %e, "Daemon tick failed"),
                    }
                }
            }
        }
    }
}
