//! SQLite-backed node store.

use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::Pid;
use crate::error::{CoreError, Result};
use crate::process::ProcessState;

use super::{LinkRecord, LinkType, NewNode, NodeRecord, NodeStore, NodeType};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Delay before the first retry of a busy query; doubles on every attempt.
const RETRY_BASE_DELAY_MS: u64 = 20;

/// Default number of retries for busy/locked queries.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// SQLite-backed node store.
#[derive(Clone)]
pub struct SqliteNodeStore {
    pool: SqlitePool,
    max_retries: u32,
}

#[derive(sqlx::FromRow)]
struct NodeRow {
    uuid: String,
    node_type: String,
    process_type: Option<String>,
    label: String,
    description: String,
    process_state: Option<String>,
    sealed: bool,
    attributes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NodeRow> for NodeRecord {
    type Error = CoreError;

    fn try_from(row: NodeRow) -> Result<Self> {
        let decode = |details: String| CoreError::Database {
            operation: "decode_node".to_string(),
            details,
        };

        let uuid = Uuid::parse_str(&row.uuid).map_err(|e| decode(e.to_string()))?;
        let node_type = NodeType::parse(&row.node_type)
            .ok_or_else(|| decode(format!("unknown node type '{}'", row.node_type)))?;
        let process_state = row
            .process_state
            .as_deref()
            .map(|s| {
                ProcessState::parse(s).ok_or_else(|| decode(format!("unknown process state '{}'", s)))
            })
            .transpose()?;
        let attributes: Map<String, Value> = serde_json::from_str(&row.attributes)?;

        Ok(NodeRecord {
            uuid,
            node_type,
            process_type: row.process_type,
            label: row.label,
            description: row.description,
            process_state,
            sealed: row.sealed,
            attributes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// What a guarded write found.
enum WriteOutcome {
    Written,
    Sealed,
    Missing,
}

fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_RECOVERY, SQLITE_BUSY_SNAPSHOT
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5" | "6" | "261" | "517"))
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

fn not_found(uuid: Uuid) -> CoreError {
    CoreError::NodeNotFound {
        pid: Pid::from(uuid),
    }
}

const NODE_COLUMNS: &str = "uuid, node_type, process_type, label, description, process_state, \
                            sealed, attributes, created_at, updated_at";

impl SqliteNodeStore {
    /// Create a store over an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override how often busy/locked queries are retried.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Connect to `url`, creating the database if missing, and run migrations.
    ///
    /// In-memory URLs get a single connection so every query sees the same
    /// database.
    pub async fn connect(url: &str, max_retries: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Invalid SQLite URL {:?}: {}", url, e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", url, e),
            })?;

        Self::migrate(&pool).await?;
        Ok(Self::new(pool).with_max_retries(max_retries))
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file when missing, then
    /// runs all migrations.
    ///
    /// ```ignore
    /// let store = SqliteNodeStore::from_path(".data/provenance.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url, DEFAULT_MAX_RETRIES).await
    }

    /// Run embedded migrations against `pool`.
    pub async fn migrate(pool: &SqlitePool) -> Result<()> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| CoreError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })
    }

    /// Run `op`, retrying busy/locked failures with exponential backoff.
    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << attempt.min(6));
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Database busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(CoreError::Database {
                        operation: operation.to_string(),
                        details: e.to_string(),
                    });
                }
            }
        }
    }

    async fn fetch_node(&self, uuid: Uuid) -> std::result::Result<Option<NodeRow>, sqlx::Error> {
        sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {} FROM nodes WHERE uuid = ?",
            NODE_COLUMNS
        ))
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    async fn insert_node(&self, node: &NewNode) -> std::result::Result<(), sqlx::Error> {
        let now = Utc::now();
        let attributes = serde_json::to_string(&node.attributes)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            r#"
            INSERT INTO nodes (uuid, node_type, process_type, label, description,
                               sealed, attributes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(node.uuid.to_string())
        .bind(node.node_type.as_str())
        .bind(node.process_type.as_deref())
        .bind(&node.label)
        .bind(&node.description)
        .bind(attributes)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn write_attr(
        &self,
        uuid: Uuid,
        key: &str,
        value: &Value,
    ) -> std::result::Result<WriteOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, bool)> =
            sqlx::query_as("SELECT attributes, sealed FROM nodes WHERE uuid = ?")
                .bind(uuid.to_string())
                .fetch_optional(&mut *tx)
                .await?;

        let Some((attributes, sealed)) = row else {
            return Ok(WriteOutcome::Missing);
        };
        if sealed {
            return Ok(WriteOutcome::Sealed);
        }

        let mut attributes: Map<String, Value> =
            serde_json::from_str(&attributes).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        attributes.insert(key.to_string(), value.clone());
        let encoded =
            serde_json::to_string(&attributes).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query("UPDATE nodes SET attributes = ?, updated_at = ? WHERE uuid = ?")
            .bind(encoded)
            .bind(Utc::now())
            .bind(uuid.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(WriteOutcome::Written)
    }

    async fn remove_node(&self, uuid: Uuid) -> std::result::Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM links WHERE source = ? OR target = ?")
            .bind(uuid.to_string())
            .bind(uuid.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM nodes WHERE uuid = ?")
            .bind(uuid.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl NodeStore for SqliteNodeStore {
    async fn create_node(&self, node: NewNode) -> Result<NodeRecord> {
        self.retrying("create_node", || self.insert_node(&node))
            .await?;
        debug!(uuid = %node.uuid, node_type = node.node_type.as_str(), "Node created");
        self.load_node(node.uuid).await
    }

    async fn load_node(&self, uuid: Uuid) -> Result<NodeRecord> {
        let row = self
            .retrying("load_node", || self.fetch_node(uuid))
            .await?
            .ok_or_else(|| not_found(uuid))?;
        NodeRecord::try_from(row)
    }

    async fn get_attr(&self, uuid: Uuid, key: &str) -> Result<Option<Value>> {
        let mut node = self.load_node(uuid).await?;
        Ok(node.attributes.remove(key))
    }

    async fn set_attr(&self, uuid: Uuid, key: &str, value: Value) -> Result<()> {
        match self
            .retrying("set_attr", || self.write_attr(uuid, key, &value))
            .await?
        {
            WriteOutcome::Written => Ok(()),
            WriteOutcome::Sealed => Err(CoreError::SealedWrite {
                pid: Pid::from(uuid),
                key: key.to_string(),
            }),
            WriteOutcome::Missing => Err(not_found(uuid)),
        }
    }

    async fn seal_node(&self, uuid: Uuid) -> Result<()> {
        let result = self
            .retrying("seal_node", || {
                sqlx::query("UPDATE nodes SET sealed = 1, updated_at = ? WHERE uuid = ?")
                    .bind(Utc::now())
                    .bind(uuid.to_string())
                    .execute(&self.pool)
            })
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(uuid));
        }
        debug!(uuid = %uuid, "Node sealed");
        Ok(())
    }

    async fn set_process_state(&self, uuid: Uuid, state: ProcessState) -> Result<()> {
        let result = self
            .retrying("set_process_state", || {
                sqlx::query("UPDATE nodes SET process_state = ?, updated_at = ? WHERE uuid = ?")
                    .bind(state.as_str())
                    .bind(Utc::now())
                    .bind(uuid.to_string())
                    .execute(&self.pool)
            })
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(uuid));
        }
        Ok(())
    }

    async fn list_pending_processes(&self) -> Result<Vec<Uuid>> {
        let rows: Vec<(String,)> = self
            .retrying("list_pending_processes", || {
                sqlx::query_as(
                    r#"
                    SELECT uuid FROM nodes
                    WHERE node_type = 'process'
                      AND sealed = 0
                      AND json_extract(attributes, '$.checkpoint') IS NOT NULL
                      AND (process_state IS NULL
                           OR process_state NOT IN ('finished', 'failed', 'stopped', 'destroyed'))
                    ORDER BY id ASC
                    "#,
                )
                .fetch_all(&self.pool)
            })
            .await?;

        rows.into_iter()
            .map(|(uuid,)| {
                Uuid::parse_str(&uuid).map_err(|e| CoreError::Database {
                    operation: "list_pending_processes".to_string(),
                    details: e.to_string(),
                })
            })
            .collect()
    }

    async fn list_nodes(&self, node_type: NodeType) -> Result<Vec<NodeRecord>> {
        let query = format!(
            "SELECT {} FROM nodes WHERE node_type = ? ORDER BY id ASC",
            NODE_COLUMNS
        );
        let rows = self
            .retrying("list_nodes", || {
                sqlx::query_as::<_, NodeRow>(&query)
                    .bind(node_type.as_str())
                    .fetch_all(&self.pool)
            })
            .await?;

        rows.into_iter().map(NodeRecord::try_from).collect()
    }

    async fn delete_node(&self, uuid: Uuid) -> Result<()> {
        let deleted = self
            .retrying("delete_node", || self.remove_node(uuid))
            .await?;
        if deleted == 0 {
            return Err(not_found(uuid));
        }
        debug!(uuid = %uuid, "Node deleted");
        Ok(())
    }

    async fn add_link(&self, link: LinkRecord) -> Result<()> {
        self.retrying("add_link", || {
            sqlx::query(
                r#"
                INSERT INTO links (source, target, link_type, label)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(link.source.to_string())
            .bind(link.target.to_string())
            .bind(link.link_type.as_str())
            .bind(&link.label)
            .execute(&self.pool)
        })
        .await?;
        Ok(())
    }

    async fn list_links(&self, source: Uuid) -> Result<Vec<LinkRecord>> {
        let rows: Vec<(String, String, String)> = self
            .retrying("list_links", || {
                sqlx::query_as(
                    "SELECT target, link_type, label FROM links WHERE source = ? ORDER BY id ASC",
                )
                .bind(source.to_string())
                .fetch_all(&self.pool)
            })
            .await?;

        rows.into_iter()
            .map(|(target, link_type, label)| {
                let decode = |details: String| CoreError::Database {
                    operation: "list_links".to_string(),
                    details,
                };
                Ok(LinkRecord {
                    source,
                    target: Uuid::parse_str(&target).map_err(|e| decode(e.to_string()))?,
                    link_type: LinkType::parse(&link_type)
                        .ok_or_else(|| decode(format!("unknown link type '{}'", link_type)))?,
                    label,
                })
            })
            .collect()
    }

    async fn health_check(&self) -> Result<()> {
        self.retrying("health_check", || {
            sqlx::query("SELECT 1").execute(&self.pool)
        })
        .await?;
        Ok(())
    }
}
