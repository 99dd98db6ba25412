// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node store interfaces and backends.
//!
//! The node store is the durable provenance graph the engine writes into:
//! process, code and computer nodes with a JSON attribute map, a seal flag
//! and links between them. Checkpoints live in the `checkpoint` attribute
//! of process nodes.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryNodeStore;
pub use self::sqlite::SqliteNodeStore;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::process::ProcessState;

/// Kind of provenance node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// A process run.
    Process,
    /// An executable code.
    Code,
    /// A compute resource.
    Computer,
}

impl NodeType {
    /// Stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Code => "code",
            Self::Computer => "computer",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(Self::Process),
            "code" => Some(Self::Code),
            "computer" => Some(Self::Computer),
            _ => None,
        }
    }
}

/// Kind of link between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum LinkType {
    /// Parent process called the target process.
    Call,
}

impl LinkType {
    /// Stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(Self::Call),
            _ => None,
        }
    }
}

/// A node to be created.
#[derive(Debug, Clone)]
pub struct NewNode {
    /// Node identifier; for process nodes this is the pid.
    pub uuid: Uuid,
    /// Node kind.
    pub node_type: NodeType,
    /// Registered process type, for process nodes.
    pub process_type: Option<String>,
    /// Optional short label.
    pub label: String,
    /// Optional free-form description.
    pub description: String,
    /// Initial attributes.
    pub attributes: Map<String, Value>,
}

impl NewNode {
    /// A node of `node_type` with no label, description or attributes.
    pub fn new(uuid: Uuid, node_type: NodeType) -> Self {
        Self {
            uuid,
            node_type,
            process_type: None,
            label: String::new(),
            description: String::new(),
            attributes: Map::new(),
        }
    }
}

/// A stored node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Node identifier.
    pub uuid: Uuid,
    /// Node kind.
    pub node_type: NodeType,
    /// Registered process type, for process nodes.
    pub process_type: Option<String>,
    /// Short label.
    pub label: String,
    /// Free-form description.
    pub description: String,
    /// Process state, for process nodes.
    pub process_state: Option<ProcessState>,
    /// Sealed nodes reject attribute writes.
    pub sealed: bool,
    /// Attribute map.
    pub attributes: Map<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl NodeRecord {
    /// Attribute `key`, if set.
    pub fn get_attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Whether the node has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

/// A directed link between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    /// Source node.
    pub source: Uuid,
    /// Target node.
    pub target: Uuid,
    /// Link kind.
    pub link_type: LinkType,
    /// Link label.
    pub label: String,
}

/// Durable storage for provenance nodes.
#[async_trait::async_trait]
pub trait NodeStore: Send + Sync {
    /// Store a new node.
    async fn create_node(&self, node: NewNode) -> Result<NodeRecord>;

    /// Load a node. Fails with `NodeNotFound` if absent.
    async fn load_node(&self, uuid: Uuid) -> Result<NodeRecord>;

    /// Read one attribute. Fails with `NodeNotFound` if the node is absent.
    async fn get_attr(&self, uuid: Uuid, key: &str) -> Result<Option<Value>>;

    /// Write one attribute. Fails with `SealedWrite` on a sealed node.
    async fn set_attr(&self, uuid: Uuid, key: &str, value: Value) -> Result<()>;

    /// Seal a node. Sealing twice is a no-op.
    async fn seal_node(&self, uuid: Uuid) -> Result<()>;

    /// Update the process state column. Allowed on sealed nodes.
    async fn set_process_state(&self, uuid: Uuid, state: ProcessState) -> Result<()>;

    /// Unsealed process nodes with a checkpoint that are not in a terminal
    /// state, oldest first.
    async fn list_pending_processes(&self) -> Result<Vec<Uuid>>;

    /// All nodes of a kind, oldest first.
    async fn list_nodes(&self, node_type: NodeType) -> Result<Vec<NodeRecord>>;

    /// Remove a node and every link touching it.
    async fn delete_node(&self, uuid: Uuid) -> Result<()>;

    /// Store a link.
    async fn add_link(&self, link: LinkRecord) -> Result<()>;

    /// Outgoing links of `source`, in insertion order.
    async fn list_links(&self, source: Uuid) -> Result<Vec<LinkRecord>>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<()>;
}
