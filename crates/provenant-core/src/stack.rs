// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Explicit per-tree process call stack.
//!
//! Every top-level submission, run or daemon resume gets its own
//! [`ExecutionContext`]; nested children share their parent's. Entering a
//! process returns a [`StackFrame`] that pops on drop, so the stack is
//! balanced on every exit path including panics and early returns.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::error;

use crate::Pid;
use crate::error::{CoreError, Result};

/// Call stack of one process tree.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    stack: Arc<Mutex<Vec<Pid>>>,
}

impl ExecutionContext {
    /// A fresh, empty context.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Pid>> {
        self.stack.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the stack, outermost first.
    pub fn stack(&self) -> Vec<Pid> {
        self.lock().clone()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    /// Innermost executing process.
    pub fn current(&self) -> Option<Pid> {
        self.lock().last().copied()
    }

    /// Push `pid`. Fails if `pid` is already executing in this context.
    pub fn enter(&self, pid: Pid) -> Result<StackFrame> {
        let mut stack = self.lock();
        if stack.contains(&pid) {
            return Err(CoreError::ReentrantProcess { pid });
        }
        stack.push(pid);
        Ok(StackFrame {
            context: self.clone(),
            pid,
        })
    }
}

/// Scoped stack entry; pops its pid when dropped.
#[derive(Debug)]
#[must_use = "the frame pops as soon as it is dropped"]
pub struct StackFrame {
    context: ExecutionContext,
    pid: Pid,
}

impl StackFrame {
    /// The pid this frame pushed.
    pub fn pid(&self) -> Pid {
        self.pid
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        let mut stack = self.context.lock();
        match stack.pop() {
            Some(top) if top == self.pid => {}
            Some(top) => {
                error!(expected = %self.pid, found = %top, "Process stack popped out of order");
                // Put back whatever was on top and remove our own entry.
                stack.push(top);
                stack.retain(|pid| *pid != self.pid);
            }
            None => {
                error!(pid = %self.pid, "Process stack was empty on frame exit");
            }
        }
    }
}
