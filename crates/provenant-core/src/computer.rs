// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Computers: compute resources that remote codes run on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::Pid;
use crate::error::{CoreError, Result};
use crate::store::{NewNode, NodeStore, NodeType};

/// A configured compute resource, stored as a `computer` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computer {
    /// Unique name, also the node label.
    pub name: String,
    /// Host to connect to.
    pub hostname: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Transport plugin, e.g. `local` or `ssh`.
    pub transport_type: String,
    /// Scheduler plugin, e.g. `direct` or `slurm`.
    pub scheduler_type: String,
    /// Remote working directory.
    pub workdir: String,
}

impl Computer {
    /// A computer with the `local` transport and `direct` scheduler.
    pub fn localhost(name: impl Into<String>, workdir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: "localhost".to_string(),
            description: String::new(),
            transport_type: "local".to_string(),
            scheduler_type: "direct".to_string(),
            workdir: workdir.into(),
        }
    }

    /// Store as a new node. Names must be unique.
    pub async fn store(&self, store: &dyn NodeStore) -> Result<Uuid> {
        if self.name.trim().is_empty() {
            return Err(CoreError::validation("name", "must not be empty"));
        }
        if Self::find(store, &self.name).await?.is_some() {
            return Err(CoreError::validation(
                "name",
                format!("a computer named '{}' already exists", self.name),
            ));
        }

        let mut node = NewNode::new(Uuid::new_v4(), NodeType::Computer);
        node.label = self.name.clone();
        node.description = self.description.clone();
        if let Value::Object(attributes) = serde_json::to_value(self)? {
            node.attributes = attributes;
        }

        let record = store.create_node(node).await?;
        info!(uuid = %record.uuid, name = %self.name, "Computer stored");
        Ok(record.uuid)
    }

    /// Look up a stored computer by name.
    pub async fn find(store: &dyn NodeStore, name: &str) -> Result<Option<(Uuid, Computer)>> {
        for node in store.list_nodes(NodeType::Computer).await? {
            if node.label == name {
                let computer = serde_json::from_value(Value::Object(node.attributes))?;
                return Ok(Some((node.uuid, computer)));
            }
        }
        Ok(None)
    }
}

/// Delete a stored computer.
///
/// Fails with `NodeNotFound` for unknown ids and with a validation error when
/// `uuid` is not a computer node.
pub async fn delete_computer(store: &dyn NodeStore, uuid: Uuid) -> Result<()> {
    let node = store.load_node(uuid).await?;
    if node.node_type != NodeType::Computer {
        return Err(CoreError::validation(
            "computer",
            format!("node '{}' is a {} node", Pid::from(uuid), node.node_type.as_str()),
        ));
    }
    store.delete_node(uuid).await?;
    info!(uuid = %uuid, name = %node.label, "Computer deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNodeStore;

    #[tokio::test]
    async fn test_store_and_find() {
        let store = MemoryNodeStore::new();
        let computer = Computer::localhost("localhost", "/tmp/work");
        let uuid = computer.store(&store).await.unwrap();

        let (found_uuid, found) = Computer::find(&store, "localhost").await.unwrap().unwrap();
        assert_eq!(found_uuid, uuid);
        assert_eq!(found, computer);
        assert!(Computer::find(&store, "cluster").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = MemoryNodeStore::new();
        Computer::localhost("localhost", "/tmp").store(&store).await.unwrap();
        let err = Computer::localhost("localhost", "/scratch")
            .store(&store)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_delete_computer() {
        let store = MemoryNodeStore::new();
        let uuid = Computer::localhost("localhost", "/tmp")
            .store(&store)
            .await
            .unwrap();

        delete_computer(&store, uuid).await.unwrap();
        assert!(Computer::find(&store, "localhost").await.unwrap().is_none());
        assert!(delete_computer(&store, uuid).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_rejects_other_node_types() {
        let store = MemoryNodeStore::new();
        let node = NewNode::new(Uuid::new_v4(), NodeType::Code);
        let uuid = node.uuid;
        store.create_node(node).await.unwrap();

        let err = delete_computer(&store, uuid).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        store.load_node(uuid).await.unwrap();
    }
}
