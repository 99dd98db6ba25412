// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for provenant-core.
//!
//! [`Runtime`] owns the node store, the process catalog, the registry and the
//! persister, and is the entry point for submitting, running and resuming
//! processes.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use provenant_core::runtime::Runtime;
//! use provenant_core::store::SqliteNodeStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteNodeStore::from_path(".data/provenance.db").await?);
//!
//!     let runtime = Runtime::builder()
//!         .store(store)
//!         .register::<MyWorkChain>()
//!         .build()?;
//!
//!     // Blocking execution
//!     let outputs = runtime.run::<MyWorkChain>(inputs.clone()).await?;
//!
//!     // Daemon-driven execution
//!     let pid = runtime.submit::<MyWorkChain>(inputs).await?;
//!     while provenant_core::daemon::tick_workflow_engine(&runtime, false).await? {}
//!     assert!(runtime.registry().has_finished(pid));
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{CoreError, Result};
use crate::persister::{DatabasePersister, Persister};
use crate::process::{
    Advance, ChildOutcome, FunctionProcess, Inputs, Outputs, Pid, Process, ProcessCatalog,
    ProcessInstance, ProcessState, ProcessType, WaitOn,
};
use crate::registry::ProcessRegistry;
use crate::stack::ExecutionContext;
use crate::store::{LinkRecord, LinkType, NewNode, NodeStore, NodeType};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Attribute holding the outputs of a finished process.
pub const OUTPUTS_ATTR: &str = "outputs";

/// Attribute holding the error message of a failed process.
pub const EXCEPTION_ATTR: &str = "exception";

/// Builder for creating a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    store: Option<Arc<dyn NodeStore>>,
    catalog: ProcessCatalog,
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("catalog", &self.catalog)
            .finish()
    }
}

impl RuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node store (required).
    pub fn store(mut self, store: Arc<dyn NodeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a resumable process type.
    pub fn register<P: ProcessType>(self) -> Self {
        self.catalog.register::<P>();
        self
    }

    /// Register a function process under its name.
    pub fn register_function(self, function: FunctionProcess) -> Self {
        self.catalog.register_function(function);
        self
    }

    /// Build the runtime.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> anyhow::Result<Runtime> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                persister: DatabasePersister::new(store.clone()),
                store,
                catalog: self.catalog,
                registry: ProcessRegistry::new(),
            }),
        })
    }
}

struct RuntimeInner {
    store: Arc<dyn NodeStore>,
    catalog: ProcessCatalog,
    registry: ProcessRegistry,
    persister: DatabasePersister,
}

/// Label and description recorded on the process node.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Node label.
    pub label: String,
    /// Node description.
    pub description: String,
}

impl SubmitOptions {
    /// Options with a label.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: String::new(),
        }
    }

    /// Add a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// What a single resume of a persisted process achieved.
#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// The wait condition does not hold yet; nothing changed.
    Blocked,
    /// Advanced and suspended again with a new checkpoint.
    Suspended,
    /// Ran to completion; the node is sealed.
    Finished,
    /// The body failed; the node is marked failed.
    Failed(CoreError),
}

impl TickOutcome {
    /// Whether the process moved.
    pub fn progressed(&self) -> bool {
        !matches!(self, Self::Blocked)
    }
}

/// Handle to a process running on its own task.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Pid,
    handle: JoinHandle<Result<Outputs>>,
}

impl ProcessHandle {
    /// Pid of the running process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether the task has completed.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the process and return its outputs.
    pub async fn result(self) -> Result<Outputs> {
        let pid = self.pid;
        self.handle
            .await
            .map_err(|e| CoreError::process_failed(pid, format!("process task aborted: {}", e)))?
    }
}

/// Embeddable process engine.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("store", &"...")
            .field("catalog", &self.inner.catalog)
            .finish()
    }
}

impl Runtime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The node store.
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.inner.store
    }

    /// Registered process types.
    pub fn catalog(&self) -> &ProcessCatalog {
        &self.inner.catalog
    }

    /// Outcome bookkeeping.
    pub fn registry(&self) -> &ProcessRegistry {
        &self.inner.registry
    }

    /// The checkpoint persister.
    pub fn persister(&self) -> &DatabasePersister {
        &self.inner.persister
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Create `P` and persist it for the daemon. Returns immediately.
    pub async fn submit<P: ProcessType>(&self, inputs: Inputs) -> Result<Pid> {
        self.submit_with::<P>(inputs, SubmitOptions::default()).await
    }

    /// [`submit`](Self::submit) with a label and description.
    pub async fn submit_with<P: ProcessType>(
        &self,
        inputs: Inputs,
        options: SubmitOptions,
    ) -> Result<Pid> {
        self.inner.catalog.register::<P>();
        self.submit_named(P::TYPE_NAME, inputs, options).await
    }

    /// Submit a process by registered type name.
    #[instrument(skip(self, inputs, options))]
    pub async fn submit_named(
        &self,
        type_name: &str,
        inputs: Inputs,
        options: SubmitOptions,
    ) -> Result<Pid> {
        let process = self.inner.catalog.instantiate(type_name)?;
        let exec = ExecutionContext::new();
        let instance = ProcessInstance::new(process, type_name, Pid::new(), inputs, exec.clone())?;
        let pid = instance.pid();

        if let Some(e) = self.submit_instance(instance, &exec, None, options).await? {
            return Err(e);
        }
        info!(pid = %pid, type_name = %type_name, "Process submitted");
        Ok(pid)
    }

    /// Store the node, run `on_create` and write the initial checkpoint.
    ///
    /// Returns the creation error if `on_create` failed, in which case the
    /// node is already marked failed and no checkpoint is written.
    async fn submit_instance(
        &self,
        mut instance: ProcessInstance,
        exec: &ExecutionContext,
        parent: Option<Pid>,
        options: SubmitOptions,
    ) -> Result<Option<CoreError>> {
        let pid = instance.pid();
        let _frame = exec.enter(pid)?;

        self.create_node(&instance, parent, options).await?;
        if let Err(e) = instance.create() {
            return Ok(Some(self.fail_instance(&mut instance, e).await));
        }
        self.inner.persister.save_checkpoint(&instance, None).await?;
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Blocking execution
    // ------------------------------------------------------------------

    /// Run `P` to completion and return its outputs.
    pub async fn run<P: ProcessType>(&self, inputs: Inputs) -> Result<Outputs> {
        self.run_with_pid::<P>(inputs).await.map(|(outputs, _)| outputs)
    }

    /// Run `P` to completion and return its outputs and pid.
    pub async fn run_with_pid<P: ProcessType>(&self, inputs: Inputs) -> Result<(Outputs, Pid)> {
        self.inner.catalog.register::<P>();
        self.run_boxed(Box::new(P::default()), P::TYPE_NAME, inputs)
            .await
    }

    /// Run a function process to completion.
    pub async fn run_function(
        &self,
        function: &FunctionProcess,
        inputs: Inputs,
    ) -> Result<Outputs> {
        let name = function.name().to_string();
        self.run_boxed(Box::new(function.clone()), &name, inputs)
            .await
            .map(|(outputs, _)| outputs)
    }

    async fn run_boxed(
        &self,
        process: Box<dyn Process>,
        type_name: &str,
        inputs: Inputs,
    ) -> Result<(Outputs, Pid)> {
        let instance =
            ProcessInstance::new(process, type_name, Pid::new(), inputs, ExecutionContext::new())?;
        let pid = instance.pid();
        let outputs = self
            .execute(instance, None, SubmitOptions::default())
            .await?;
        Ok((outputs, pid))
    }

    /// Start `P` on its own task.
    pub fn spawn<P: ProcessType>(&self, inputs: Inputs) -> Result<ProcessHandle> {
        self.inner.catalog.register::<P>();
        self.spawn_boxed(Box::new(P::default()), P::TYPE_NAME, inputs)
    }

    /// Start a function process on its own task.
    pub fn spawn_function(
        &self,
        function: &FunctionProcess,
        inputs: Inputs,
    ) -> Result<ProcessHandle> {
        self.spawn_boxed(Box::new(function.clone()), function.name(), inputs)
    }

    fn spawn_boxed(
        &self,
        process: Box<dyn Process>,
        type_name: &str,
        inputs: Inputs,
    ) -> Result<ProcessHandle> {
        let instance =
            ProcessInstance::new(process, type_name, Pid::new(), inputs, ExecutionContext::new())?;
        let pid = instance.pid();
        let runtime = self.clone();
        let handle = tokio::spawn(async move {
            runtime
                .execute(instance, None, SubmitOptions::default())
                .await
        });
        Ok(ProcessHandle { pid, handle })
    }

    /// Drive a fresh instance to completion, running its children inline.
    fn execute(
        &self,
        mut instance: ProcessInstance,
        parent: Option<Pid>,
        options: SubmitOptions,
    ) -> BoxFuture<'_, Result<Outputs>> {
        Box::pin(async move {
            let pid = instance.pid();
            let exec = instance.context().execution().clone();
            let _frame = exec.enter(pid)?;
            let _live = self.inner.registry.track(pid);

            self.create_node(&instance, parent, options).await?;
            if let Err(e) = instance.create() {
                return Err(self.fail_instance(&mut instance, e).await);
            }

            loop {
                let advanced = match instance.advance() {
                    Ok(advanced) => advanced,
                    Err(e) => return Err(self.fail_instance(&mut instance, e).await),
                };
                if let Err(e) = self.run_children(&mut instance).await {
                    return Err(self.fail_instance(&mut instance, e).await);
                }

                match advanced {
                    Advance::Waiting(wait_on) => {
                        debug!(pid = %pid, wait_on = ?wait_on, "Blocking run checkpoint");
                        if let Err(e) = self.checkpoint_waiting(&instance).await {
                            return Err(self.fail_instance(&mut instance, e).await);
                        }
                    }
                    Advance::Finished => return self.complete(&mut instance).await,
                }
            }
        })
    }

    /// Run every requested child to completion and record the outcomes.
    async fn run_children(&self, instance: &mut ProcessInstance) -> Result<()> {
        let parent = instance.pid();
        let exec = instance.context().execution().clone();
        let mut outcomes = Vec::new();

        for request in instance.take_child_requests() {
            self.inner
                .catalog
                .ensure(&request.type_name, || request.factory.clone());
            let child = ProcessInstance::new(
                (request.factory)(),
                request.type_name.clone(),
                request.pid,
                request.inputs,
                exec.clone(),
            )?;

            let outcome = match self.execute(child, Some(parent), SubmitOptions::default()).await {
                Ok(outputs) => ChildOutcome::Finished { outputs },
                Err(e) => ChildOutcome::Failed {
                    message: e.to_string(),
                },
            };
            outcomes.push((request.pid, outcome));
        }

        instance.resolve_children(outcomes);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Daemon-driven execution
    // ------------------------------------------------------------------

    /// Load `pid` from its checkpoint and advance it once.
    ///
    /// A pid that is currently being driven elsewhere in this runtime (a
    /// blocking run or another tick) is reported as [`TickOutcome::Blocked`]
    /// without loading it. Errors loading or restoring the checkpoint are
    /// returned and leave the stored checkpoint untouched. A failing body is
    /// reported as [`TickOutcome::Failed`] after the node has been marked
    /// failed.
    ///
    /// The parent checkpoint is written before its new children are stored,
    /// so children are spawned at most once. A child whose node never made it
    /// to the store resolves as failed.
    #[instrument(skip(self))]
    pub async fn tick_process(&self, pid: Pid) -> Result<TickOutcome> {
        let Some(_live) = self.inner.registry.try_track(pid) else {
            debug!(pid = %pid, "Process is live elsewhere, skipping");
            return Ok(TickOutcome::Blocked);
        };

        let bundle = self.inner.persister.load_checkpoint(pid, None).await?;

        let exec = ExecutionContext::new();
        let _frame = exec.enter(pid)?;
        let mut instance = bundle.unbundle(&self.inner.catalog, exec.clone())?;

        if instance.state() == ProcessState::Waiting
            && let Some(WaitOn::Children { pids }) = instance.wait_on().cloned()
        {
            match self.child_outcomes(&pids).await? {
                Some(outcomes) => instance.resolve_children(outcomes),
                None => {
                    debug!(pid = %pid, "Children still running");
                    return Ok(TickOutcome::Blocked);
                }
            }
        }

        let advanced = match instance.advance() {
            Ok(advanced) => advanced,
            Err(e) => {
                return Ok(TickOutcome::Failed(
                    self.fail_instance(&mut instance, e).await,
                ));
            }
        };

        let children = match self.prepare_children(&mut instance, &exec) {
            Ok(children) => children,
            Err(e) => {
                return Ok(TickOutcome::Failed(
                    self.fail_instance(&mut instance, e).await,
                ));
            }
        };

        let outcome = match advanced {
            Advance::Waiting(_) => {
                self.checkpoint_waiting(&instance).await?;
                TickOutcome::Suspended
            }
            Advance::Finished => {
                self.complete(&mut instance).await?;
                TickOutcome::Finished
            }
        };

        self.submit_children(pid, children, &exec).await?;
        Ok(outcome)
    }

    /// Validate the children requested by the last advance.
    fn prepare_children(
        &self,
        instance: &mut ProcessInstance,
        exec: &ExecutionContext,
    ) -> Result<Vec<ProcessInstance>> {
        instance
            .take_child_requests()
            .into_iter()
            .map(|request| {
                self.inner
                    .catalog
                    .ensure(&request.type_name, || request.factory.clone());
                ProcessInstance::new(
                    (request.factory)(),
                    request.type_name,
                    request.pid,
                    request.inputs,
                    exec.clone(),
                )
            })
            .collect()
    }

    /// Persist prepared children for the daemon to pick up.
    async fn submit_children(
        &self,
        parent: Pid,
        children: Vec<ProcessInstance>,
        exec: &ExecutionContext,
    ) -> Result<()> {
        for child in children {
            let child_pid = child.pid();
            // A child failing in on_create is already terminal; the parent
            // sees it as a failed outcome when it resumes.
            match self
                .submit_instance(child, exec, Some(parent), SubmitOptions::default())
                .await?
            {
                None => debug!(parent = %parent, child = %child_pid, "Child submitted"),
                Some(e) => {
                    warn!(parent = %parent, child = %child_pid, error = %e, "Child failed on creation");
                }
            }
        }
        Ok(())
    }

    /// Outcomes of `pids`, or `None` while any of them is still running.
    async fn child_outcomes(&self, pids: &[Pid]) -> Result<Option<Vec<(Pid, ChildOutcome)>>> {
        let mut outcomes = Vec::with_capacity(pids.len());
        for pid in pids {
            let node = match self.inner.store.load_node(pid.as_uuid()).await {
                Ok(node) => node,
                Err(e) if e.is_not_found() => {
                    warn!(child = %pid, "Child node is missing");
                    outcomes.push((
                        *pid,
                        ChildOutcome::Failed {
                            message: e.to_string(),
                        },
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let outcome = match node.process_state {
                Some(ProcessState::Finished) => ChildOutcome::Finished {
                    outputs: node
                        .get_attr(OUTPUTS_ATTR)
                        .and_then(Value::as_object)
                        .map(|map| map.clone().into_iter().collect())
                        .unwrap_or_default(),
                },
                Some(ProcessState::Failed) => ChildOutcome::Failed {
                    message: node
                        .get_attr(EXCEPTION_ATTR)
                        .and_then(Value::as_str)
                        .unwrap_or("child process failed")
                        .to_string(),
                },
                _ => return Ok(None),
            };
            outcomes.push((*pid, outcome));
        }
        Ok(Some(outcomes))
    }

    // ------------------------------------------------------------------
    // Node bookkeeping shared by both paths
    // ------------------------------------------------------------------

    async fn create_node(
        &self,
        instance: &ProcessInstance,
        parent: Option<Pid>,
        options: SubmitOptions,
    ) -> Result<()> {
        let pid = instance.pid();
        let mut node = NewNode::new(pid.as_uuid(), NodeType::Process);
        node.process_type = Some(instance.type_name().to_string());
        node.label = options.label;
        node.description = options.description;

        let store = &self.inner.store;
        store.create_node(node).await?;
        store
            .set_process_state(pid.as_uuid(), ProcessState::Created)
            .await?;
        if let Some(parent) = parent {
            store
                .add_link(LinkRecord {
                    source: parent.as_uuid(),
                    target: pid.as_uuid(),
                    link_type: LinkType::Call,
                    label: "CALL".to_string(),
                })
                .await?;
        }
        Ok(())
    }

    async fn checkpoint_waiting(&self, instance: &ProcessInstance) -> Result<()> {
        self.inner
            .store
            .set_process_state(instance.pid().as_uuid(), ProcessState::Waiting)
            .await?;
        self.inner.persister.save_checkpoint(instance, None).await
    }

    /// Stop, destroy, store outputs, seal and record the finish.
    async fn complete(&self, instance: &mut ProcessInstance) -> Result<Outputs> {
        let pid = instance.pid();
        if let Err(e) = instance.stop().and_then(|()| instance.destroy()) {
            return Err(self.fail_instance(instance, e).await);
        }

        let outputs = instance.context().outputs();
        let store = &self.inner.store;
        store
            .set_attr(
                pid.as_uuid(),
                OUTPUTS_ATTR,
                Value::Object(outputs.clone().into_iter().collect()),
            )
            .await?;
        store
            .set_process_state(pid.as_uuid(), ProcessState::Finished)
            .await?;
        store.seal_node(pid.as_uuid()).await?;
        instance.seal();

        self.inner.registry.mark_finished(pid);
        info!(pid = %pid, type_name = %instance.type_name(), "Process finished");
        Ok(outputs)
    }

    /// Take the failure path and record it; returns `error` for the caller.
    async fn fail_instance(&self, instance: &mut ProcessInstance, error: CoreError) -> CoreError {
        let pid = instance.pid();
        instance.fail(&error);
        error!(pid = %pid, type_name = %instance.type_name(), error = %error, "Process failed");

        let store = &self.inner.store;
        if let Err(e) = store
            .set_attr(pid.as_uuid(), EXCEPTION_ATTR, Value::String(error.to_string()))
            .await
        {
            warn!(pid = %pid, error = %e, "Failed to record exception on node");
        }
        if let Err(e) = store
            .set_process_state(pid.as_uuid(), ProcessState::Failed)
            .await
        {
            warn!(pid = %pid, error = %e, "Failed to record failed state on node");
        }

        self.inner.registry.mark_failed(pid, error.to_string());
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessContext, ProcessSpec, StepOutcome, ValueType};
    use crate::store::MemoryNodeStore;
    use serde_json::json;

    #[derive(Default)]
    struct Double;

    impl Process for Double {
        fn spec(&self) -> ProcessSpec {
            ProcessSpec::new()
                .input("x", ValueType::Integer)
                .output("result", ValueType::Integer)
                .outline(["double"])
        }

        fn run_step(&mut self, _: &str, cx: &mut ProcessContext) -> anyhow::Result<StepOutcome> {
            let x: i64 = cx.input_as("x")?;
            cx.out("result", x * 2)?;
            Ok(StepOutcome::Next)
        }
    }

    impl ProcessType for Double {
        const TYPE_NAME: &'static str = "tests.double";
    }

    fn runtime() -> Runtime {
        Runtime::builder()
            .store(Arc::new(MemoryNodeStore::new()))
            .build()
            .unwrap()
    }

    fn x(value: i64) -> Inputs {
        Inputs::from([("x".to_string(), json!(value))])
    }

    #[test]
    fn test_builder_requires_store() {
        let err = Runtime::builder().build().unwrap_err();
        assert!(err.to_string().contains("store is required"));
    }

    #[tokio::test]
    async fn test_run_seals_node_and_records_outputs() {
        let runtime = runtime();
        let (outputs, pid) = runtime.run_with_pid::<Double>(x(21)).await.unwrap();

        assert_eq!(outputs["result"], json!(42));
        let node = runtime.store().load_node(pid.as_uuid()).await.unwrap();
        assert!(node.sealed);
        assert_eq!(node.process_state, Some(ProcessState::Finished));
        assert_eq!(node.get_attr(OUTPUTS_ATTR), Some(&json!({"result": 42})));
        assert!(runtime.registry().has_finished(pid));
    }

    #[tokio::test]
    async fn test_submit_leaves_node_pending() {
        let runtime = runtime();
        let pid = runtime
            .submit_with::<Double>(x(1), SubmitOptions::labelled("double-me"))
            .await
            .unwrap();

        let node = runtime.store().load_node(pid.as_uuid()).await.unwrap();
        assert!(!node.sealed);
        assert_eq!(node.label, "double-me");
        assert_eq!(node.process_state, Some(ProcessState::Created));
        assert_eq!(
            runtime.store().list_pending_processes().await.unwrap(),
            vec![pid.as_uuid()]
        );
        assert!(!runtime.registry().has_finished(pid));
    }

    #[tokio::test]
    async fn test_tick_process_finishes_submitted() {
        let runtime = runtime();
        let pid = runtime.submit::<Double>(x(5)).await.unwrap();

        let outcome = runtime.tick_process(pid).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Finished));
        assert!(runtime.registry().has_finished(pid));
        assert!(runtime.store().list_pending_processes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_inputs_fail_before_node_is_created() {
        let runtime = runtime();
        let err = runtime.run::<Double>(Inputs::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert!(runtime
            .store()
            .list_nodes(NodeType::Process)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_spawn_returns_handle() {
        let runtime = runtime();
        let handle = runtime.spawn::<Double>(x(4)).unwrap();
        let pid = handle.pid();

        let outputs = handle.result().await.unwrap();
        assert_eq!(outputs["result"], json!(8));
        assert!(runtime.registry().has_finished(pid));
    }

    #[tokio::test]
    async fn test_unknown_type_name() {
        let runtime = runtime();
        let err = runtime
            .submit_named("tests.nope", Inputs::new(), SubmitOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_PROCESS_TYPE");
    }

    #[tokio::test]
    async fn test_missing_child_node_resolves_as_failed() {
        let runtime = runtime();
        let inputs = Inputs::from([
            ("x".to_string(), json!(1)),
            ("y".to_string(), json!(2)),
            ("z".to_string(), json!(3)),
        ]);
        let parent = runtime
            .submit::<crate::builtin::AddChain>(inputs)
            .await
            .unwrap();

        let outcome = runtime.tick_process(parent).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Suspended));
        let links = runtime.store().list_links(parent.as_uuid()).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, LinkType::Call);

        // The parent checkpoint already waits on the child
        let bundle = runtime.persister().load_checkpoint(parent, None).await.unwrap();
        assert_eq!(bundle.state(), ProcessState::Waiting);

        runtime.store().delete_node(links[0].target).await.unwrap();

        let outcome = runtime.tick_process(parent).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Failed(_)));
        let node = runtime.store().load_node(parent.as_uuid()).await.unwrap();
        assert_eq!(node.process_state, Some(ProcessState::Failed));
        assert!(runtime.registry().has_finished(parent));
    }
}
