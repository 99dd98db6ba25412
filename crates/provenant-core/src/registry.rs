// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Finished-status bookkeeping for processes.
//!
//! The registry is the polled completion signal: once a pid has an outcome it
//! keeps it for the lifetime of the registry. Entries are never removed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::Pid;

/// Terminal outcome of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Outline completed successfully.
    Finished,
    /// Failure path, with the error message.
    Failed(String),
}

#[derive(Debug, Default)]
struct Entry {
    outcome: Option<ProcessOutcome>,
    errors: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<Pid, Entry>,
    live: HashSet<Pid>,
}

/// Shared registry of process outcomes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ProcessRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `pid` reached a terminal outcome.
    pub fn has_finished(&self, pid: Pid) -> bool {
        self.read()
            .entries
            .get(&pid)
            .is_some_and(|entry| entry.outcome.is_some())
    }

    /// Terminal outcome of `pid`, if any.
    pub fn outcome(&self, pid: Pid) -> Option<ProcessOutcome> {
        self.read()
            .entries
            .get(&pid)
            .and_then(|entry| entry.outcome.clone())
    }

    /// Record a successful finish. Returns false if an outcome was already set.
    pub fn mark_finished(&self, pid: Pid) -> bool {
        self.set_outcome(pid, ProcessOutcome::Finished)
    }

    /// Record a failure. Returns false if an outcome was already set.
    pub fn mark_failed(&self, pid: Pid, message: impl Into<String>) -> bool {
        self.set_outcome(pid, ProcessOutcome::Failed(message.into()))
    }

    fn set_outcome(&self, pid: Pid, outcome: ProcessOutcome) -> bool {
        let mut inner = self.write();
        let entry = inner.entries.entry(pid).or_default();
        if let Some(existing) = &entry.outcome {
            warn!(
                pid = %pid,
                existing = ?existing,
                ignored = ?outcome,
                "Process outcome already recorded"
            );
            return false;
        }
        debug!(pid = %pid, outcome = ?outcome, "Recording process outcome");
        entry.outcome = Some(outcome);
        true
    }

    /// Record a non-terminal error against `pid`, e.g. a failed restore.
    pub fn record_error(&self, pid: Pid, message: impl Into<String>) {
        self.write()
            .entries
            .entry(pid)
            .or_default()
            .errors
            .push(message.into());
    }

    /// Whether any error was recorded against `pid`.
    pub fn has_errors(&self, pid: Pid) -> bool {
        self.read()
            .entries
            .get(&pid)
            .is_some_and(|entry| !entry.errors.is_empty())
    }

    /// Errors recorded against `pid`, oldest first.
    pub fn errors(&self, pid: Pid) -> Vec<String> {
        self.read()
            .entries
            .get(&pid)
            .map(|entry| entry.errors.clone())
            .unwrap_or_default()
    }

    /// Mark `pid` as live until the returned guard is dropped.
    pub fn track(&self, pid: Pid) -> LiveGuard {
        self.write().live.insert(pid);
        LiveGuard {
            registry: self.clone(),
            pid,
        }
    }

    /// Mark `pid` as live unless it already is. Returns `None` when another
    /// drive holds it.
    pub fn try_track(&self, pid: Pid) -> Option<LiveGuard> {
        if !self.write().live.insert(pid) {
            return None;
        }
        Some(LiveGuard {
            registry: self.clone(),
            pid,
        })
    }

    /// Whether `pid` is currently being driven.
    pub fn is_live(&self, pid: Pid) -> bool {
        self.read().live.contains(&pid)
    }

    /// Pids currently executing somewhere in this runtime.
    pub fn live_pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.read().live.iter().copied().collect();
        pids.sort();
        pids
    }
}

/// Keeps a pid in the live set for the duration of one drive.
#[derive(Debug)]
pub struct LiveGuard {
    registry: ProcessRegistry,
    pid: Pid,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.registry.write().live.remove(&self.pid);
    }
}
