// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checkpoint bundles: immutable snapshots of a suspended process.
//!
//! A bundle carries everything needed to rebuild the process: the registered
//! class name, inputs (with a SHA-256 digest so restoration can prove they are
//! bit-identical), `ctx`, the outline cursor, the pending wait condition,
//! outputs emitted so far, children and the process-private instance state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::process::instance::Snapshot;
use crate::process::{
    ChildOutcome, EmittedOutput, Inputs, Pid, ProcessCatalog, ProcessInstance, ProcessState,
    WaitOn,
};
use crate::stack::ExecutionContext;

/// Current bundle layout version.
pub const FORMAT_VERSION: u32 = 1;

/// Serialized snapshot of a process at a suspension point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    version: u32,
    class: String,
    pid: Pid,
    inputs: Inputs,
    inputs_digest: String,
    state: ProcessState,
    ctx: Map<String, Value>,
    cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wait_on: Option<WaitOn>,
    #[serde(default)]
    outputs: Vec<EmittedOutput>,
    #[serde(default)]
    children: Vec<Pid>,
    #[serde(default)]
    child_outcomes: BTreeMap<Pid, ChildOutcome>,
    #[serde(default)]
    instance_state: Value,
    created_at: DateTime<Utc>,
}

/// Hex SHA-256 over the canonical JSON encoding of `inputs`.
pub fn inputs_digest(inputs: &Inputs) -> Result<String> {
    let bytes = serde_json::to_vec(inputs)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

impl Bundle {
    /// Capture the current state of `instance`.
    pub fn capture(instance: &ProcessInstance) -> Result<Self> {
        let snapshot = instance.snapshot();
        let inputs = instance.context().inputs().clone();
        Ok(Self {
            version: FORMAT_VERSION,
            class: instance.type_name().to_string(),
            pid: instance.pid(),
            inputs_digest: inputs_digest(&inputs)?,
            inputs,
            state: snapshot.state,
            ctx: snapshot.ctx,
            cursor: snapshot.cursor,
            wait_on: snapshot.wait_on,
            outputs: snapshot.outputs,
            children: snapshot.children,
            child_outcomes: snapshot.child_outcomes,
            instance_state: instance.instance_state(),
            created_at: Utc::now(),
        })
    }

    /// Encode for storage as a node attribute.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a stored attribute. Anything that does not decode is a
    /// restoration failure for `pid`.
    pub fn from_value(pid: Pid, value: Value) -> Result<Self> {
        let bundle: Self =
            serde_json::from_value(value).map_err(|e| CoreError::StateRestoration {
                pid,
                reason: format!("checkpoint does not decode: {}", e),
            })?;

        if bundle.version != FORMAT_VERSION {
            return Err(CoreError::StateRestoration {
                pid,
                reason: format!(
                    "unsupported checkpoint version {} (expected {})",
                    bundle.version, FORMAT_VERSION
                ),
            });
        }
        if bundle.pid != pid {
            return Err(CoreError::StateRestoration {
                pid,
                reason: format!("checkpoint belongs to process '{}'", bundle.pid),
            });
        }
        Ok(bundle)
    }

    /// Rebuild a live process.
    ///
    /// The class is looked up in `catalog` and `on_create` receives the saved
    /// instance state. Outputs already emitted are restored, not re-emitted.
    pub fn unbundle(
        &self,
        catalog: &ProcessCatalog,
        execution: ExecutionContext,
    ) -> Result<ProcessInstance> {
        let digest = inputs_digest(&self.inputs)?;
        if digest != self.inputs_digest {
            return Err(CoreError::StateRestoration {
                pid: self.pid,
                reason: "inputs digest mismatch".to_string(),
            });
        }

        let process = catalog
            .instantiate(&self.class)
            .map_err(|e| CoreError::StateRestoration {
                pid: self.pid,
                reason: e.to_string(),
            })?;

        debug!(pid = %self.pid, class = %self.class, cursor = self.cursor, "Unbundling checkpoint");

        ProcessInstance::restore(
            process,
            &self.class,
            self.pid,
            self.inputs.clone(),
            Snapshot {
                state: self.state,
                ctx: self.ctx.clone(),
                cursor: self.cursor,
                wait_on: self.wait_on.clone(),
                outputs: self.outputs.clone(),
                children: self.children.clone(),
                child_outcomes: self.child_outcomes.clone(),
            },
            &self.instance_state,
            execution,
        )
    }

    /// Registered class name.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Inputs at creation.
    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Hex SHA-256 of the inputs.
    pub fn digest(&self) -> &str {
        &self.inputs_digest
    }

    /// State at capture time.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// `ctx` variables.
    pub fn ctx(&self) -> &Map<String, Value> {
        &self.ctx
    }

    /// Index of the next outline step.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Wait condition the process is suspended on.
    pub fn wait_on(&self) -> Option<&WaitOn> {
        self.wait_on.as_ref()
    }

    /// Outputs emitted before the checkpoint.
    pub fn outputs(&self) -> &[EmittedOutput] {
        &self.outputs
    }

    /// Unresolved children.
    pub fn children(&self) -> &[Pid] {
        &self.children
    }

    /// Process-private state.
    pub fn instance_state(&self) -> &Value {
        &self.instance_state
    }

    /// When the bundle was captured.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
