// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State machine driver for a live process.
//!
//! [`ProcessInstance`] owns the boxed [`Process`] and its [`ProcessContext`]
//! and is the only place that calls hooks or changes state. It does not touch
//! storage; the runtime persists what the driver reports.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::context::{ChildRequest, EmittedOutput, ProcessContext};
use super::{ChildOutcome, Inputs, Pid, Process, ProcessState, StepOutcome, WaitOn};
use crate::error::{CoreError, Result};
use crate::stack::ExecutionContext;

/// Where one call to [`ProcessInstance::advance`] left the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Suspended on a wait condition.
    Waiting(WaitOn),
    /// Outline exhausted; the process is `Finished`.
    Finished,
}

/// Everything about a live process that a checkpoint must carry.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) state: ProcessState,
    pub(crate) ctx: Map<String, Value>,
    pub(crate) cursor: usize,
    pub(crate) wait_on: Option<WaitOn>,
    pub(crate) outputs: Vec<EmittedOutput>,
    pub(crate) children: Vec<Pid>,
    pub(crate) child_outcomes: BTreeMap<Pid, ChildOutcome>,
}

/// A live process plus its lifecycle position.
pub struct ProcessInstance {
    process: Box<dyn Process>,
    type_name: String,
    cx: ProcessContext,
    cursor: usize,
    wait_on: Option<WaitOn>,
}

/// Turn a body error into a [`CoreError`], keeping engine errors intact.
fn body_error(pid: Pid, err: anyhow::Error) -> CoreError {
    match err.downcast::<CoreError>() {
        Ok(core) => core,
        Err(other) => CoreError::process_failed(pid, format!("{:#}", other)),
    }
}

impl ProcessInstance {
    /// Wrap `process` with validated `inputs`. No hook has run yet; call
    /// [`create`](Self::create) next.
    pub fn new(
        process: Box<dyn Process>,
        type_name: impl Into<String>,
        pid: Pid,
        inputs: Inputs,
        execution: ExecutionContext,
    ) -> Result<Self> {
        let spec = Arc::new(process.spec());
        spec.validate_inputs(&inputs)?;
        Ok(Self {
            process,
            type_name: type_name.into(),
            cx: ProcessContext::new(pid, inputs, spec, execution),
            cursor: 0,
            wait_on: None,
        })
    }

    /// Rebuild a process from checkpointed parts and run `on_create` with the
    /// saved instance state. Outputs in the snapshot are restored silently.
    pub(crate) fn restore(
        process: Box<dyn Process>,
        type_name: impl Into<String>,
        pid: Pid,
        inputs: Inputs,
        snapshot: Snapshot,
        saved: &Value,
        execution: ExecutionContext,
    ) -> Result<Self> {
        let spec = Arc::new(process.spec());
        let mut cx = ProcessContext::new(pid, inputs, spec, execution);
        cx.state = snapshot.state;
        cx.ctx = snapshot.ctx;
        cx.outputs = snapshot.outputs;
        cx.children = snapshot.children;
        cx.child_outcomes = snapshot.child_outcomes;

        let mut instance = Self {
            process,
            type_name: type_name.into(),
            cx,
            cursor: snapshot.cursor,
            wait_on: snapshot.wait_on,
        };

        instance
            .hook(|process, cx| process.on_create(cx, Some(saved)))
            .map_err(|e| CoreError::StateRestoration {
                pid,
                reason: e.to_string(),
            })?;

        debug!(pid = %pid, state = %instance.state(), cursor = instance.cursor, "Process restored");
        Ok(instance)
    }

    /// Run `on_create` for a fresh start.
    pub fn create(&mut self) -> Result<()> {
        self.hook(|process, cx| process.on_create(cx, None))
    }

    /// Process id.
    pub fn pid(&self) -> Pid {
        self.cx.pid
    }

    /// Registered type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Current state.
    pub fn state(&self) -> ProcessState {
        self.cx.state
    }

    /// Read access to inputs, ctx and outputs.
    pub fn context(&self) -> &ProcessContext {
        &self.cx
    }

    /// Index of the next outline step.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Pending wait condition, set while `Waiting`.
    pub fn wait_on(&self) -> Option<&WaitOn> {
        self.wait_on.as_ref()
    }

    /// Process-private state for checkpoints.
    pub fn instance_state(&self) -> Value {
        self.process.save_instance_state()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.cx.state,
            ctx: self.cx.ctx.clone(),
            cursor: self.cursor,
            wait_on: self.wait_on.clone(),
            outputs: self.cx.outputs.clone(),
            children: self.cx.children.clone(),
            child_outcomes: self.cx.child_outcomes.clone(),
        }
    }

    fn transition(&mut self, to: ProcessState) -> Result<()> {
        let from = self.cx.state;
        if !from.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                pid: self.cx.pid,
                from,
                to,
            });
        }
        debug!(pid = %self.cx.pid, from = %from, to = %to, "Process state transition");
        self.cx.state = to;
        Ok(())
    }

    /// Call a hook, then deliver any emissions it queued.
    fn hook<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Process, &mut ProcessContext) -> anyhow::Result<()>,
    {
        let pid = self.cx.pid;
        f(self.process.as_mut(), &mut self.cx).map_err(|e| body_error(pid, e))?;
        self.deliver_emissions()
    }

    fn deliver_emissions(&mut self) -> Result<()> {
        let pid = self.cx.pid;
        while let Some(emitted) = self.cx.pending_emissions.pop_front() {
            self.process
                .on_output_emitted(&mut self.cx, &emitted.port, &emitted.value, emitted.dynamic)
                .map_err(|e| body_error(pid, e))?;
        }
        Ok(())
    }

    /// Run outline steps until the process suspends or finishes.
    ///
    /// From `Created` this enters `Running` and calls `on_run`; from `Waiting`
    /// it calls `on_continue` and `on_run` and continues after the step that
    /// suspended. The caller decides whether the wait condition holds.
    pub fn advance(&mut self) -> Result<Advance> {
        match self.cx.state {
            ProcessState::Created => {
                self.transition(ProcessState::Running)?;
                self.hook(|process, cx| process.on_run(cx))?;
            }
            ProcessState::Waiting => {
                let wait_on = self.wait_on.take().unwrap_or(WaitOn::Checkpoint);
                self.transition(ProcessState::Running)?;
                self.hook(|process, cx| process.on_continue(cx, &wait_on))?;
                self.hook(|process, cx| process.on_run(cx))?;
            }
            ProcessState::Running => {}
            other => {
                return Err(CoreError::InvalidTransition {
                    pid: self.cx.pid,
                    from: other,
                    to: ProcessState::Running,
                });
            }
        }

        let spec = Arc::clone(&self.cx.spec);
        while let Some(step) = spec.steps().get(self.cursor) {
            self.cursor += 1;
            debug!(pid = %self.cx.pid, step = %step, "Running outline step");

            let pid = self.cx.pid;
            let outcome = self
                .process
                .run_step(step, &mut self.cx)
                .map_err(|e| body_error(pid, e))?;
            self.deliver_emissions()?;

            if let StepOutcome::Wait(wait_on) = outcome {
                self.transition(ProcessState::Waiting)?;
                self.wait_on = Some(wait_on.clone());
                self.hook(|process, cx| process.on_wait(cx, &wait_on))?;
                return Ok(Advance::Waiting(wait_on));
            }
        }

        if let Some(port) = spec
            .outputs()
            .iter()
            .find(|port| port.required && !self.cx.outputs.iter().any(|o| o.port == port.name))
        {
            return Err(CoreError::MissingOutput {
                pid: self.cx.pid,
                port: port.name.clone(),
            });
        }

        self.transition(ProcessState::Finished)?;
        self.hook(|process, cx| process.on_finish(cx))?;
        Ok(Advance::Finished)
    }

    /// `Finished`/`Failed` to `Stopped`, running `on_stop`.
    pub fn stop(&mut self) -> Result<()> {
        self.transition(ProcessState::Stopped)?;
        self.hook(|process, cx| process.on_stop(cx))
    }

    /// `Stopped` to `Destroyed`, running `on_destroy`.
    pub fn destroy(&mut self) -> Result<()> {
        self.transition(ProcessState::Destroyed)?;
        self.hook(|process, cx| process.on_destroy(cx))
    }

    /// Take the failure path: enter `Failed`, then stop and destroy.
    ///
    /// Cleanup hooks always run; their own errors are logged, not returned.
    pub fn fail(&mut self, error: &CoreError) {
        let pid = self.cx.pid;
        self.cx.pending_emissions.clear();

        match self.cx.state {
            ProcessState::Stopped | ProcessState::Destroyed | ProcessState::Failed => {}
            // An error raised from on_finish still fails the process.
            _ => self.cx.state = ProcessState::Failed,
        }
        debug!(pid = %pid, error = %error, state = %self.cx.state, "Process failing");

        if self.cx.state == ProcessState::Failed
            && let Err(e) = self.stop()
        {
            warn!(pid = %pid, error = %e, "on_stop failed during failure cleanup");
        }
        if self.cx.state == ProcessState::Stopped
            && let Err(e) = self.destroy()
        {
            warn!(pid = %pid, error = %e, "on_destroy failed during failure cleanup");
        }
    }

    /// Mark the process sealed; no further outputs are accepted.
    pub fn seal(&mut self) {
        self.cx.sealed = true;
    }

    /// Children requested since the last call.
    pub fn take_child_requests(&mut self) -> Vec<ChildRequest> {
        std::mem::take(&mut self.cx.child_requests)
    }

    /// Record child outcomes and drop them from the pending set.
    pub fn resolve_children(&mut self, outcomes: impl IntoIterator<Item = (Pid, ChildOutcome)>) {
        for (pid, outcome) in outcomes {
            self.cx.children.retain(|child| *child != pid);
            self.cx.child_outcomes.insert(pid, outcome);
        }
    }
}

impl std::fmt::Debug for ProcessInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessInstance")
            .field("type_name", &self.type_name)
            .field("pid", &self.cx.pid)
            .field("state", &self.cx.state)
            .field("cursor", &self.cursor)
            .field("wait_on", &self.wait_on)
            .finish_non_exhaustive()
    }
}
