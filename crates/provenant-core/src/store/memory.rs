// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory node store for tests and embedding.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Pid;
use crate::error::{CoreError, Result};
use crate::process::ProcessState;

use super::{LinkRecord, NewNode, NodeRecord, NodeStore, NodeType};

#[derive(Default)]
struct Inner {
    nodes: HashMap<Uuid, NodeRecord>,
    order: Vec<Uuid>,
    links: Vec<LinkRecord>,
}

impl Inner {
    fn node_mut(&mut self, uuid: Uuid) -> Result<&mut NodeRecord> {
        self.nodes.get_mut(&uuid).ok_or(CoreError::NodeNotFound {
            pid: Pid::from(uuid),
        })
    }
}

/// Node store held entirely in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemoryNodeStore {
    inner: RwLock<Inner>,
}

impl MemoryNodeStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl NodeStore for MemoryNodeStore {
    async fn create_node(&self, node: NewNode) -> Result<NodeRecord> {
        let mut inner = self.inner.write().await;
        if inner.nodes.contains_key(&node.uuid) {
            return Err(CoreError::Database {
                operation: "create_node".to_string(),
                details: format!("node '{}' already exists", node.uuid),
            });
        }

        let now = Utc::now();
        let record = NodeRecord {
            uuid: node.uuid,
            node_type: node.node_type,
            process_type: node.process_type,
            label: node.label,
            description: node.description,
            process_state: None,
            sealed: false,
            attributes: node.attributes,
            created_at: now,
            updated_at: now,
        };
        inner.order.push(record.uuid);
        inner.nodes.insert(record.uuid, record.clone());
        Ok(record)
    }

    async fn load_node(&self, uuid: Uuid) -> Result<NodeRecord> {
        self.inner
            .read()
            .await
            .nodes
            .get(&uuid)
            .cloned()
            .ok_or(CoreError::NodeNotFound {
                pid: Pid::from(uuid),
            })
    }

    async fn get_attr(&self, uuid: Uuid, key: &str) -> Result<Option<Value>> {
        let node = self.load_node(uuid).await?;
        Ok(node.attributes.get(key).cloned())
    }

    async fn set_attr(&self, uuid: Uuid, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.write().await;
        let node = inner.node_mut(uuid)?;
        if node.sealed {
            return Err(CoreError::SealedWrite {
                pid: Pid::from(uuid),
                key: key.to_string(),
            });
        }
        node.attributes.insert(key.to_string(), value);
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn seal_node(&self, uuid: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let node = inner.node_mut(uuid)?;
        node.sealed = true;
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn set_process_state(&self, uuid: Uuid, state: ProcessState) -> Result<()> {
        let mut inner = self.inner.write().await;
        let node = inner.node_mut(uuid)?;
        node.process_state = Some(state);
        node.updated_at = Utc::now();
        Ok(())
    }

    async fn list_pending_processes(&self) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|uuid| inner.nodes.get(uuid))
            .filter(|node| {
                node.node_type == NodeType::Process
                    && !node.sealed
                    && node.attributes.contains_key(crate::persister::CHECKPOINT_ATTR)
                    && !node.process_state.is_some_and(|s| s.is_terminal())
            })
            .map(|node| node.uuid)
            .collect())
    }

    async fn list_nodes(&self, node_type: NodeType) -> Result<Vec<NodeRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|uuid| inner.nodes.get(uuid))
            .filter(|node| node.node_type == node_type)
            .cloned()
            .collect())
    }

    async fn delete_node(&self, uuid: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.nodes.remove(&uuid).is_none() {
            return Err(CoreError::NodeNotFound {
                pid: Pid::from(uuid),
            });
        }
        inner.order.retain(|id| *id != uuid);
        inner
            .links
            .retain(|link| link.source != uuid && link.target != uuid);
        Ok(())
    }

    async fn add_link(&self, link: LinkRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        for end in [link.source, link.target] {
            if !inner.nodes.contains_key(&end) {
                return Err(CoreError::NodeNotFound {
                    pid: Pid::from(end),
                });
            }
        }
        inner.links.push(link);
        Ok(())
    }

    async fn list_links(&self, source: Uuid) -> Result<Vec<LinkRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .links
            .iter()
            .filter(|link| link.source == source)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
