// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Processes: resumable units of computation with declared ports and an outline.
//!
//! A concrete process implements [`Process`]: the outline steps plus any of the
//! lifecycle hooks it wants to customise. The engine only ever talks to a
//! process through this trait; [`ProcessInstance`] drives the state machine.

mod catalog;
mod context;
mod function;
pub(crate) mod instance;
mod state;

pub use catalog::{ProcessCatalog, ProcessFactory};
pub use context::{ChildRequest, EmittedOutput, ProcessContext};
pub use function::FunctionProcess;
pub use instance::{Advance, ProcessInstance};
pub use state::ProcessState;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Process identifier, the UUID of the backing provenance node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(Uuid);

impl Pid {
    /// Allocate a fresh pid.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The node UUID behind this pid.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for Pid {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for Pid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for Pid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Input values by port name.
pub type Inputs = BTreeMap<String, Value>;

/// Output values by port name.
pub type Outputs = BTreeMap<String, Value>;

/// JSON value kinds a port can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Accept any value.
    Any,
    /// JSON boolean.
    Bool,
    /// JSON integer.
    Integer,
    /// Any JSON number.
    Number,
    /// JSON string.
    String,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl ValueType {
    /// Whether `value` is of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// A declared input or output port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    /// Port name.
    pub name: String,
    /// Whether the port must be provided (inputs) or emitted (outputs).
    pub required: bool,
    /// Accepted value kind.
    pub value_type: ValueType,
}

/// Declared ports and outline of a process.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    dynamic_input: bool,
    dynamic_output: bool,
    outline: Vec<String>,
}

impl ProcessSpec {
    /// An empty spec: no ports, no outline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required input.
    pub fn input(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.inputs.push(PortSpec {
            name: name.into(),
            required: true,
            value_type,
        });
        self
    }

    /// Declare an optional input.
    pub fn optional_input(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.inputs.push(PortSpec {
            name: name.into(),
            required: false,
            value_type,
        });
        self
    }

    /// Declare a required output.
    pub fn output(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.outputs.push(PortSpec {
            name: name.into(),
            required: true,
            value_type,
        });
        self
    }

    /// Declare an optional output.
    pub fn optional_output(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.outputs.push(PortSpec {
            name: name.into(),
            required: false,
            value_type,
        });
        self
    }

    /// Accept inputs that are not declared.
    pub fn dynamic_input(mut self) -> Self {
        self.dynamic_input = true;
        self
    }

    /// Accept outputs on ports that are not declared.
    pub fn dynamic_output(mut self) -> Self {
        self.dynamic_output = true;
        self
    }

    /// Set the ordered outline steps.
    pub fn outline<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outline = steps.into_iter().map(Into::into).collect();
        self
    }

    /// Declared input ports.
    pub fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    /// Declared output ports.
    pub fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    /// Outline step names in execution order.
    pub fn steps(&self) -> &[String] {
        &self.outline
    }

    /// Whether undeclared outputs are accepted.
    pub fn has_dynamic_output(&self) -> bool {
        self.dynamic_output
    }

    /// Look up a declared output port.
    pub fn output_port(&self, name: &str) -> Option<&PortSpec> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Check `inputs` against the declared input ports.
    pub fn validate_inputs(&self, inputs: &Inputs) -> Result<()> {
        for port in &self.inputs {
            match inputs.get(&port.name) {
                Some(value) if !port.value_type.accepts(value) => {
                    return Err(CoreError::validation(
                        &port.name,
                        format!("expected {:?}, got {}", port.value_type, value),
                    ));
                }
                None if port.required => {
                    return Err(CoreError::validation(&port.name, "required input missing"));
                }
                _ => {}
            }
        }

        if !self.dynamic_input {
            if let Some(name) = inputs
                .keys()
                .find(|name| !self.inputs.iter().any(|p| &p.name == *name))
            {
                return Err(CoreError::validation(
                    name,
                    "unexpected input: process does not accept dynamic inputs",
                ));
            }
        }

        Ok(())
    }
}

/// What a process is suspended on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitOn {
    /// Explicit checkpoint barrier, satisfied on the next resume.
    Checkpoint,
    /// Every listed child process has reached a terminal state.
    Children {
        /// Children being waited on.
        pids: Vec<Pid>,
    },
}

/// Result of executing one outline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Continue with the next outline step.
    Next,
    /// Suspend until the condition holds, then continue with the next step.
    Wait(WaitOn),
}

/// Final state of a child process as seen by its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChildOutcome {
    /// The child finished and produced these outputs.
    Finished {
        /// Child outputs.
        outputs: Outputs,
    },
    /// The child failed.
    Failed {
        /// Failure message recorded on the child node.
        message: String,
    },
}

/// A resumable unit of computation.
///
/// Every hook has a no-op default. Hooks receive the [`ProcessContext`], which
/// holds inputs, the `ctx` variables, outputs and children. Errors returned by
/// steps or hooks put the process on the failure path.
#[allow(unused_variables)]
pub trait Process: Send + Sync + 'static {
    /// Declared ports and outline.
    fn spec(&self) -> ProcessSpec;

    /// Execute the outline step named `step`.
    fn run_step(&mut self, step: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
        anyhow::bail!("process has no outline step '{}'", step)
    }

    /// Called once per load. `saved` is the value from
    /// [`save_instance_state`](Self::save_instance_state) when restoring from a
    /// checkpoint, `None` on a fresh start.
    fn on_create(&mut self, cx: &mut ProcessContext, saved: Option<&Value>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Outline execution begins.
    fn on_run(&mut self, cx: &mut ProcessContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The process suspended. Outputs cannot be emitted until it continues.
    fn on_wait(&mut self, cx: &mut ProcessContext, wait_on: &WaitOn) -> anyhow::Result<()> {
        Ok(())
    }

    /// The wait condition is satisfied and execution resumes.
    fn on_continue(&mut self, cx: &mut ProcessContext, wait_on: &WaitOn) -> anyhow::Result<()> {
        Ok(())
    }

    /// The outline is exhausted.
    fn on_finish(&mut self, cx: &mut ProcessContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs before teardown on both the success and the failure path.
    fn on_stop(&mut self, cx: &mut ProcessContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Final teardown.
    fn on_destroy(&mut self, cx: &mut ProcessContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// An output was emitted. Called in emission order.
    fn on_output_emitted(
        &mut self,
        cx: &mut ProcessContext,
        port: &str,
        value: &Value,
        dynamic: bool,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Process-private state to store in checkpoints, handed back to
    /// [`on_create`](Self::on_create) on restore.
    fn save_instance_state(&self) -> Value {
        Value::Null
    }
}

/// A process that can be instantiated by name, which is what lets the daemon
/// rebuild it from a checkpoint.
pub trait ProcessType: Process + Default {
    /// Stable name stored as the class reference in checkpoints.
    const TYPE_NAME: &'static str;
}
