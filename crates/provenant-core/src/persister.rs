// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persister: maps checkpoint bundles to node attributes.
//!
//! A checkpoint is stored as the `checkpoint` attribute of the process node
//! (`checkpoint.<tag>` for tagged checkpoints). Saves are last-write-wins
//! with no locking; callers serialize saves per pid.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::bundle::Bundle;
use crate::error::{CoreError, Result};
use crate::process::{Pid, ProcessInstance};
use crate::store::NodeStore;

/// Attribute holding the untagged checkpoint.
pub const CHECKPOINT_ATTR: &str = "checkpoint";

/// Attribute key for a checkpoint with an optional tag.
pub fn checkpoint_key(tag: Option<&str>) -> String {
    match tag {
        Some(tag) => format!("{}.{}", CHECKPOINT_ATTR, tag),
        None => CHECKPOINT_ATTR.to_string(),
    }
}

/// Identifies one stored checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRef {
    /// Process id.
    pub pid: Pid,
    /// Optional tag.
    pub tag: Option<String>,
}

/// Durable save/restore of process state.
#[async_trait::async_trait]
pub trait Persister: Send + Sync {
    /// Capture `instance` and store it. Store failures, including
    /// `SealedWrite`, propagate unchanged.
    async fn save_checkpoint(&self, instance: &ProcessInstance, tag: Option<&str>) -> Result<()>;

    /// Load the bundle stored for `pid`.
    async fn load_checkpoint(&self, pid: Pid, tag: Option<&str>) -> Result<Bundle>;

    /// Remove one checkpoint.
    async fn delete_checkpoint(&self, pid: Pid, tag: Option<&str>) -> Result<()>;

    /// Remove every checkpoint of a process.
    async fn delete_process_checkpoints(&self, pid: Pid) -> Result<()>;

    /// Enumerate every stored checkpoint.
    async fn get_checkpoints(&self) -> Result<Vec<CheckpointRef>>;

    /// Enumerate the checkpoints of one process.
    async fn get_process_checkpoints(&self, pid: Pid) -> Result<Vec<CheckpointRef>>;
}

/// Persister writing into a [`NodeStore`].
///
/// Deleting and enumerating checkpoints is not supported: those calls return
/// [`CoreError::Unsupported`]. Checkpoints of finished processes stay on their
/// sealed nodes.
#[derive(Clone)]
pub struct DatabasePersister {
    store: Arc<dyn NodeStore>,
}

impl DatabasePersister {
    /// Create a persister over `store`.
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Persister for DatabasePersister {
    #[instrument(skip(self, instance), fields(pid = %instance.pid(), state = %instance.state()))]
    async fn save_checkpoint(&self, instance: &ProcessInstance, tag: Option<&str>) -> Result<()> {
        let bundle = Bundle::capture(instance)?;
        let key = checkpoint_key(tag);
        self.store
            .set_attr(instance.pid().as_uuid(), &key, bundle.to_value()?)
            .await?;
        debug!(key = %key, cursor = bundle.cursor(), "Checkpoint saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_checkpoint(&self, pid: Pid, tag: Option<&str>) -> Result<Bundle> {
        let value = self
            .store
            .get_attr(pid.as_uuid(), &checkpoint_key(tag))
            .await?
            .ok_or_else(|| CoreError::CheckpointNotFound {
                pid,
                tag: tag.map(str::to_string),
            })?;
        Bundle::from_value(pid, value)
    }

    async fn delete_checkpoint(&self, _pid: Pid, _tag: Option<&str>) -> Result<()> {
        Err(CoreError::Unsupported {
            operation: "delete_checkpoint",
        })
    }

    async fn delete_process_checkpoints(&self, _pid: Pid) -> Result<()> {
        Err(CoreError::Unsupported {
            operation: "delete_process_checkpoints",
        })
    }

    async fn get_checkpoints(&self) -> Result<Vec<CheckpointRef>> {
        Err(CoreError::Unsupported {
            operation: "get_checkpoints",
        })
    }

    async fn get_process_checkpoints(&self, _pid: Pid) -> Result<Vec<CheckpointRef>> {
        Err(CoreError::Unsupported {
            operation: "get_process_checkpoints",
        })
    }
}
