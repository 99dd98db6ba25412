// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The mutable view a process body gets on its own state.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::catalog::{ProcessCatalog, ProcessFactory};
use super::{
    ChildOutcome, FunctionProcess, Inputs, Outputs, Pid, ProcessSpec, ProcessState, ProcessType,
    StepOutcome, WaitOn,
};
use crate::error::{CoreError, Result};
use crate::stack::ExecutionContext;

/// One emitted output, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedOutput {
    /// Port name.
    pub port: String,
    /// Emitted value.
    pub value: Value,
    /// Whether the port was undeclared and accepted as dynamic.
    pub dynamic: bool,
}

/// A child process requested by a step, picked up by the runtime after the
/// step returns.
#[derive(Clone)]
pub struct ChildRequest {
    /// Pid allocated for the child.
    pub pid: Pid,
    /// Registered type name of the child.
    pub type_name: String,
    /// Builds the child instance.
    pub factory: ProcessFactory,
    /// Child inputs.
    pub inputs: Inputs,
}

impl fmt::Debug for ChildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildRequest")
            .field("pid", &self.pid)
            .field("type_name", &self.type_name)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// Inputs, `ctx` variables, outputs and children of a running process.
#[derive(Debug)]
pub struct ProcessContext {
    pub(super) pid: Pid,
    pub(super) state: ProcessState,
    pub(super) inputs: Inputs,
    pub(super) ctx: Map<String, Value>,
    pub(super) spec: Arc<ProcessSpec>,
    pub(super) outputs: Vec<EmittedOutput>,
    pub(super) pending_emissions: VecDeque<EmittedOutput>,
    pub(super) children: Vec<Pid>,
    pub(super) child_requests: Vec<ChildRequest>,
    pub(super) child_outcomes: BTreeMap<Pid, ChildOutcome>,
    pub(super) sealed: bool,
    pub(super) execution: ExecutionContext,
}

impl ProcessContext {
    pub(super) fn new(
        pid: Pid,
        inputs: Inputs,
        spec: Arc<ProcessSpec>,
        execution: ExecutionContext,
    ) -> Self {
        Self {
            pid,
            state: ProcessState::Created,
            inputs,
            ctx: Map::new(),
            spec,
            outputs: Vec::new(),
            pending_emissions: VecDeque::new(),
            children: Vec::new(),
            child_requests: Vec::new(),
            child_outcomes: BTreeMap::new(),
            sealed: false,
            execution,
        }
    }

    /// This process's pid.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Current state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether the backing node has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Declared ports and outline.
    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// All inputs.
    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// A single input value.
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Deserialize input `name` into `T`.
    pub fn input_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .inputs
            .get(name)
            .ok_or_else(|| CoreError::validation(name, "input not provided"))?;
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::validation(name, e.to_string()))
    }

    /// The `ctx` variables carried across suspensions.
    pub fn ctx(&self) -> &Map<String, Value> {
        &self.ctx
    }

    /// Mutable access to `ctx`.
    pub fn ctx_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.ctx
    }

    /// Deserialize `ctx[key]` into `T`.
    pub fn ctx_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .ctx
            .get(key)
            .ok_or_else(|| CoreError::validation(key, "context variable not set"))?;
        serde_json::from_value(value.clone()).map_err(|e| CoreError::validation(key, e.to_string()))
    }

    /// Set `ctx[key]`.
    pub fn set_ctx(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.ctx.insert(key.into(), value.into());
    }

    /// Emit `value` on output `port`.
    ///
    /// Emission is rejected while waiting, after a failure and once the
    /// process is sealed; the cleanup hooks may still emit.
    ///
    /// The `on_output_emitted` hook runs after the current hook or step
    /// returns, in emission order.
    pub fn out(&mut self, port: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let port = port.into();
        let value = value.into();

        if self.sealed
            || !matches!(
                self.state,
                ProcessState::Created
                    | ProcessState::Running
                    | ProcessState::Finished
                    | ProcessState::Stopped
                    | ProcessState::Destroyed
            )
        {
            return Err(CoreError::OutputRejected {
                pid: self.pid,
                port,
                state: self.state,
            });
        }

        let dynamic = match self.spec.output_port(&port) {
            Some(declared) => {
                if !declared.value_type.accepts(&value) {
                    return Err(CoreError::validation(
                        &port,
                        format!("expected {:?}, got {}", declared.value_type, value),
                    ));
                }
                if self.outputs.iter().any(|o| o.port == port) {
                    return Err(CoreError::OutputAlreadyEmitted {
                        pid: self.pid,
                        port,
                    });
                }
                false
            }
            None if self.spec.has_dynamic_output() => true,
            None => {
                return Err(CoreError::UnknownOutputPort {
                    pid: self.pid,
                    port,
                });
            }
        };

        let emitted = EmittedOutput {
            port,
            value,
            dynamic,
        };
        self.outputs.push(emitted.clone());
        self.pending_emissions.push_back(emitted);
        Ok(())
    }

    /// Outputs emitted so far, in emission order.
    pub fn emitted(&self) -> &[EmittedOutput] {
        &self.outputs
    }

    /// Outputs as a port map. A dynamic port emitted twice keeps its last value.
    pub fn outputs(&self) -> Outputs {
        self.outputs
            .iter()
            .map(|o| (o.port.clone(), o.value.clone()))
            .collect()
    }

    /// Launch a child of type `P`. It starts once the current step returns.
    pub fn spawn<P: ProcessType>(&mut self, inputs: Inputs) -> Pid {
        self.request_child(
            P::TYPE_NAME.to_string(),
            ProcessCatalog::factory_for::<P>(),
            inputs,
        )
    }

    /// Launch a function process as a child.
    pub fn spawn_function(&mut self, function: &FunctionProcess, inputs: Inputs) -> Pid {
        let function = function.clone();
        let name = function.name().to_string();
        self.request_child(
            name,
            Arc::new(move || Box::new(function.clone()) as Box<dyn super::Process>),
            inputs,
        )
    }

    fn request_child(&mut self, type_name: String, factory: ProcessFactory, inputs: Inputs) -> Pid {
        let pid = Pid::new();
        self.children.push(pid);
        self.child_requests.push(ChildRequest {
            pid,
            type_name,
            factory,
            inputs,
        });
        pid
    }

    /// Step outcome that suspends until every unresolved child has finished.
    pub fn wait_for_children(&self) -> StepOutcome {
        StepOutcome::Wait(WaitOn::Children {
            pids: self.children.clone(),
        })
    }

    /// Children spawned but not yet resolved.
    pub fn pending_children(&self) -> &[Pid] {
        &self.children
    }

    /// Outcome of a resolved child.
    pub fn child_outcome(&self, pid: Pid) -> Option<&ChildOutcome> {
        self.child_outcomes.get(&pid)
    }

    /// Every resolved child outcome.
    pub fn child_outcomes(&self) -> &BTreeMap<Pid, ChildOutcome> {
        &self.child_outcomes
    }

    /// Call stack of the tree this process runs in.
    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ValueType;
    use serde_json::json;

    fn context(spec: ProcessSpec) -> ProcessContext {
        let mut cx = ProcessContext::new(
            Pid::new(),
            Inputs::new(),
            Arc::new(spec),
            ExecutionContext::new(),
        );
        cx.state = ProcessState::Running;
        cx
    }

    #[test]
    fn test_out_records_in_emission_order() {
        let mut cx = context(
            ProcessSpec::new()
                .output("a", ValueType::Integer)
                .output("b", ValueType::Integer),
        );

        cx.out("b", 2).unwrap();
        cx.out("a", 1).unwrap();

        let ports: Vec<&str> = cx.emitted().iter().map(|o| o.port.as_str()).collect();
        assert_eq!(ports, vec!["b", "a"]);
        assert_eq!(cx.pending_emissions.len(), 2);
    }

    #[test]
    fn test_out_twice_on_declared_port_fails() {
        let mut cx = context(ProcessSpec::new().output("sum", ValueType::Integer));

        cx.out("sum", 8).unwrap();
        let err = cx.out("sum", 9).unwrap_err();

        assert!(matches!(err, CoreError::OutputAlreadyEmitted { .. }));
        assert_eq!(cx.emitted().len(), 1);
        assert_eq!(cx.outputs()["sum"], json!(8));
    }

    #[test]
    fn test_undeclared_port_requires_dynamic_output() {
        let mut cx = context(ProcessSpec::new());
        assert!(matches!(
            cx.out("extra", 1).unwrap_err(),
            CoreError::UnknownOutputPort { .. }
        ));

        let mut cx = context(ProcessSpec::new().dynamic_output());
        cx.out("extra", 1).unwrap();
        cx.out("extra", 2).unwrap();
        assert!(cx.emitted()[0].dynamic);
        assert_eq!(cx.outputs()["extra"], json!(2));
    }

    #[test]
    fn test_out_rejected_while_waiting_or_sealed() {
        let mut cx = context(ProcessSpec::new().dynamic_output());

        cx.state = ProcessState::Waiting;
        assert!(matches!(
            cx.out("x", 1).unwrap_err(),
            CoreError::OutputRejected {
                state: ProcessState::Waiting,
                ..
            }
        ));

        cx.state = ProcessState::Failed;
        assert!(cx.out("x", 1).is_err());

        cx.state = ProcessState::Destroyed;
        cx.sealed = true;
        assert!(cx.out("x", 1).is_err());
        assert!(cx.emitted().is_empty());
    }

    #[test]
    fn test_cleanup_states_accept_output_until_sealed() {
        let mut cx = context(ProcessSpec::new().optional_output("stop", ValueType::Bool));

        cx.state = ProcessState::Stopped;
        cx.out("stop", true).unwrap();

        cx.state = ProcessState::Destroyed;
        cx.out("destroyed", true).unwrap_err();
        assert_eq!(cx.outputs()["stop"], json!(true));
    }

    #[test]
    fn test_out_checks_declared_type() {
        let mut cx = context(ProcessSpec::new().output("sum", ValueType::Integer));
        let err = cx.out("sum", "eight").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_spawn_tracks_pending_children() {
        let function = FunctionProcess::new("tests.double", |inputs: &Inputs| {
            let mut outputs = Outputs::new();
            outputs.insert("result".to_string(), inputs["x"].clone());
            Ok(outputs)
        })
        .with_param("x");

        let mut cx = context(ProcessSpec::new());
        let mut inputs = Inputs::new();
        inputs.insert("x".to_string(), json!(3));
        let child = cx.spawn_function(&function, inputs);

        assert_eq!(cx.pending_children(), &[child]);
        assert_eq!(
            cx.wait_for_children(),
            StepOutcome::Wait(WaitOn::Children { pids: vec![child] })
        );
        assert_eq!(cx.child_requests[0].type_name, "tests.double");
    }

    #[test]
    fn test_ctx_helpers() {
        let mut cx = context(ProcessSpec::new());
        cx.set_ctx("a_squared", 4);
        assert_eq!(cx.ctx_as::<i64>("a_squared").unwrap(), 4);
        assert!(cx.ctx_as::<i64>("missing").is_err());
    }
}
