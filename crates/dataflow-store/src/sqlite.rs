//! A durable `sqlite`-backed [`Store`], behind the `sqlite` feature flag.
//!
//! Tables follow the persisted wire shapes (`dataflows`, `nodes`, `data`,
//! `commands`); structured columns (`config_json`, `metadata_json`, ...) are
//! stored as serialized JSON text, the same flexible-schema-over-a-typed-row
//! approach the Store contract already assumes (`config` is explicitly an
//! opaque per-type object). Gating the backend behind a Cargo feature keeps
//! the default build free of the `sqlx` dependency tree.

use crate::traits::{AppliedBatch, DataFilter, DataflowFilter, NodeFilter, Page, Store};
use async_trait::async_trait;
use dataflow_kernel::error::StoreError;
use dataflow_kernel::ids::{DataId, DataflowId, NodeId};
use dataflow_kernel::model::command::{Command, CommandPayload};
use dataflow_kernel::model::data::{ContentType, DataItem};
use dataflow_kernel::model::dataflow::{Dataflow, DataflowStatus};
use dataflow_kernel::model::node::{Node, NodeStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(uri: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(uri)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        const STATEMENTS: &[&str] = &[
            r#"CREATE TABLE IF NOT EXISTS dataflows (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                parent_id TEXT,
                metadata_json TEXT NOT NULL,
                sequence INTEGER NOT NULL DEFAULT 0
            )"#,
            r#"CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                dataflow_id TEXT NOT NULL,
                type TEXT NOT NULL,
                parent_id TEXT,
                ancestor_path_json TEXT NOT NULL,
                status TEXT NOT NULL,
                config_json TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_nodes_dataflow ON nodes (dataflow_id)",
            r#"CREATE TABLE IF NOT EXISTS data (
                id TEXT PRIMARY KEY,
                dataflow_id TEXT NOT NULL,
                node_id TEXT,
                data_type TEXT NOT NULL,
                key TEXT,
                content_blob TEXT NOT NULL,
                content_type TEXT NOT NULL,
                discriminator TEXT,
                metadata_json TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_data_dataflow ON data (dataflow_id)",
            r#"CREATE TABLE IF NOT EXISTS commands (
                dataflow_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                command_id TEXT NOT NULL,
                type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                applied_at TEXT,
                PRIMARY KEY (dataflow_id, seq)
            )"#,
        ];
        for statement in STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn invalid(e: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidPayload(e.to_string())
}

fn parse_id<T: std::str::FromStr<Err = uuid::Error>>(s: &str) -> Result<T, StoreError> {
    s.parse().map_err(invalid)
}

fn enum_to_str<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn enum_from_str<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).map_err(invalid)
}

fn row_to_dataflow(row: &SqliteRow) -> Result<Dataflow, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Dataflow {
        id: parse_id(&row.try_get::<String, _>("id").map_err(backend)?)?,
        owner: row.try_get("owner").map_err(backend)?,
        status: enum_from_str(&status)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
        parent_dataflow_id: row
            .try_get::<Option<String>, _>("parent_id")
            .map_err(backend)?
            .as_deref()
            .map(parse_id)
            .transpose()?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata_json").map_err(backend)?)
            .map_err(invalid)?,
    })
}

fn row_to_node(row: &SqliteRow) -> Result<Node, StoreError> {
    let status: String = row.try_get("status").map_err(backend)?;
    Ok(Node {
        id: parse_id(&row.try_get::<String, _>("id").map_err(backend)?)?,
        dataflow_id: parse_id(&row.try_get::<String, _>("dataflow_id").map_err(backend)?)?,
        node_type: row.try_get("type").map_err(backend)?,
        status: enum_from_str(&status)?,
        config: serde_json::from_str(&row.try_get::<String, _>("config_json").map_err(backend)?)
            .map_err(invalid)?,
        parent_node_id: row
            .try_get::<Option<String>, _>("parent_id")
            .map_err(backend)?
            .as_deref()
            .map(parse_id)
            .transpose()?,
        ancestor_path: serde_json::from_str(
            &row.try_get::<String, _>("ancestor_path_json").map_err(backend)?,
        )
        .map_err(invalid)?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata_json").map_err(backend)?)
            .map_err(invalid)?,
    })
}

fn row_to_data(row: &SqliteRow) -> Result<DataItem, StoreError> {
    let content_type: String = row.try_get("content_type").map_err(backend)?;
    Ok(DataItem {
        id: parse_id(&row.try_get::<String, _>("id").map_err(backend)?)?,
        dataflow_id: parse_id(&row.try_get::<String, _>("dataflow_id").map_err(backend)?)?,
        data_type: enum_from_str(&row.try_get::<String, _>("data_type").map_err(backend)?)?,
        node_id: row
            .try_get::<Option<String>, _>("node_id")
            .map_err(backend)?
            .as_deref()
            .map(parse_id)
            .transpose()?,
        key: row.try_get("key").map_err(backend)?,
        content: serde_json::from_str(&row.try_get::<String, _>("content_blob").map_err(backend)?)
            .map_err(invalid)?,
        content_type: ContentType::from_str(&content_type),
        discriminator: row.try_get("discriminator").map_err(backend)?,
        metadata: serde_json::from_str(&row.try_get::<String, _>("metadata_json").map_err(backend)?)
            .map_err(invalid)?,
    })
}

async fn fetch_node(conn: &mut SqliteConnection, id: NodeId) -> Result<Node, StoreError> {
    let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(conn)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    row_to_node(&row)
}

async fn update_node(conn: &mut SqliteConnection, node: &Node) -> Result<(), StoreError> {
    sqlx::query("UPDATE nodes SET status = ?, metadata_json = ? WHERE id = ?")
        .bind(enum_to_str(&node.status))
        .bind(serde_json::to_string(&node.metadata).map_err(invalid)?)
        .bind(node.id.to_string())
        .execute(conn)
        .await
        .map_err(backend)?;
    Ok(())
}

async fn apply_one(
    conn: &mut SqliteConnection,
    dataflow: DataflowId,
    payload: &CommandPayload,
) -> Result<(Option<Node>, Option<DataItem>), StoreError> {
    match payload {
        CommandPayload::CreateNode {
            node_id,
            node_type,
            parent_node_id,
            status,
            config,
            metadata,
            ancestor_path,
        } => {
            let node = Node {
                id: *node_id,
                dataflow_id: dataflow,
                node_type: node_type.clone(),
                status: *status,
                config: config.clone(),
                parent_node_id: *parent_node_id,
                ancestor_path: ancestor_path.clone(),
                metadata: metadata.clone(),
            };
            sqlx::query(
                "INSERT INTO nodes (id, dataflow_id, type, parent_id, ancestor_path_json, status, config_json, metadata_json) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(node.id.to_string())
            .bind(dataflow.to_string())
            .bind(&node.node_type)
            .bind(node.parent_node_id.map(|p| p.to_string()))
            .bind(serde_json::to_string(&node.ancestor_path).map_err(invalid)?)
            .bind(enum_to_str(&node.status))
            .bind(serde_json::to_string(&node.config).map_err(invalid)?)
            .bind(serde_json::to_string(&node.metadata).map_err(invalid)?)
            .execute(conn)
            .await
            .map_err(backend)?;
            Ok((Some(node), None))
        }
        CommandPayload::UpdateNodeStatus {
            node_id,
            status,
            reason,
        } => {
            let mut node = fetch_node(conn, *node_id).await?;
            node.transition(*status).map_err(invalid)?;
            if let Some(reason) = reason {
                node.metadata
                    .insert("status_reason".to_string(), serde_json::json!(reason));
            }
            update_node(conn, &node).await?;
            Ok((Some(node), None))
        }
        CommandPayload::CreateData {
            data_id,
            data_type,
            node_id,
            key,
            content,
            content_type,
            discriminator,
            metadata,
        } => {
            if data_type.requires_node_id() && node_id.is_none() {
                return Err(StoreError::InvalidPayload(format!(
                    "{data_type:?} requires node_id"
                )));
            }
            let item = DataItem {
                id: *data_id,
                dataflow_id: dataflow,
                data_type: *data_type,
                node_id: *node_id,
                key: key.clone(),
                content: content.clone(),
                content_type: content_type.clone(),
                discriminator: discriminator.clone(),
                metadata: metadata.clone(),
            };
            sqlx::query(
                "INSERT INTO data (id, dataflow_id, node_id, data_type, key, content_blob, content_type, discriminator, metadata_json) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(item.id.to_string())
            .bind(dataflow.to_string())
            .bind(item.node_id.map(|n| n.to_string()))
            .bind(enum_to_str(&item.data_type))
            .bind(&item.key)
            .bind(serde_json::to_string(&item.content).map_err(invalid)?)
            .bind(item.content_type.as_str())
            .bind(&item.discriminator)
            .bind(serde_json::to_string(&item.metadata).map_err(invalid)?)
            .execute(conn)
            .await
            .map_err(backend)?;
            Ok((None, Some(item)))
        }
        CommandPayload::CompleteNode { node_id, message } => {
            let mut node = fetch_node(conn, *node_id).await?;
            node.transition(NodeStatus::Completed).map_err(invalid)?;
            if let Some(message) = message {
                node.metadata
                    .insert("completion_message".to_string(), serde_json::json!(message));
            }
            update_node(conn, &node).await?;
            Ok((Some(node), None))
        }
        CommandPayload::FailNode {
            node_id,
            error_code,
            error_message,
        } => {
            let mut node = fetch_node(conn, *node_id).await?;
            node.transition(NodeStatus::Failed).map_err(invalid)?;
            node.metadata
                .insert("error_code".to_string(), serde_json::json!(error_code));
            node.metadata
                .insert("error_message".to_string(), serde_json::json!(error_message));
            update_node(conn, &node).await?;
            Ok((Some(node), None))
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_dataflow(&self, dataflow: Dataflow) -> Result<Dataflow, StoreError> {
        sqlx::query(
            "INSERT INTO dataflows (id, owner, status, created_at, updated_at, parent_id, metadata_json, sequence) VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(dataflow.id.to_string())
        .bind(&dataflow.owner)
        .bind(enum_to_str(&dataflow.status))
        .bind(dataflow.created_at)
        .bind(dataflow.updated_at)
        .bind(dataflow.parent_dataflow_id.map(|p| p.to_string()))
        .bind(serde_json::to_string(&dataflow.metadata).map_err(invalid)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(dataflow)
    }

    async fn get_dataflow(&self, id: DataflowId) -> Result<Dataflow, StoreError> {
        let row = sqlx::query("SELECT * FROM dataflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row_to_dataflow(&row)
    }

    async fn list_dataflows(
        &self,
        filter: DataflowFilter,
        page: Page,
    ) -> Result<Vec<Dataflow>, StoreError> {
        let page = page.capped();
        let status = filter.status.map(|s| enum_to_str(&s));
        let rows = sqlx::query(
            "SELECT * FROM dataflows \
             WHERE (?1 IS NULL OR owner = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY created_at LIMIT ?3 OFFSET ?4",
        )
        .bind(&filter.owner)
        .bind(&status)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(row_to_dataflow).collect()
    }

    async fn update_dataflow_status(
        &self,
        id: DataflowId,
        status: DataflowStatus,
    ) -> Result<Dataflow, StoreError> {
        let mut dataflow = self.get_dataflow(id).await?;
        dataflow
            .transition(status)
            .map_err(|(from, to)| StoreError::InvalidPayload(format!("{from:?} -> {to:?}")))?;
        sqlx::query("UPDATE dataflows SET status = ?, updated_at = ? WHERE id = ?")
            .bind(enum_to_str(&dataflow.status))
            .bind(dataflow.updated_at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(dataflow)
    }

    async fn get_node(&self, id: NodeId) -> Result<Node, StoreError> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        row_to_node(&row)
    }

    async fn list_nodes(
        &self,
        dataflow: DataflowId,
        filter: NodeFilter,
    ) -> Result<Vec<Node>, StoreError> {
        let rows = sqlx::query("SELECT * FROM nodes WHERE dataflow_id = ?")
            .bind(dataflow.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let mut out = Vec::new();
        for row in &rows {
            let node = row_to_node(row)?;
            if filter
                .parent_node_id
                .as_ref()
                .is_some_and(|p| *p != node.parent_node_id)
            {
                continue;
            }
            if filter.status.is_some_and(|s| s != node.status) {
                continue;
            }
            if filter
                .node_type
                .as_deref()
                .is_some_and(|t| t != node.node_type)
            {
                continue;
            }
            out.push(node);
        }
        Ok(out)
    }

    async fn get_data(&self, id: DataId, resolve_references: bool) -> Result<DataItem, StoreError> {
        let row = sqlx::query("SELECT * FROM data WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let item = row_to_data(&row)?;
        if !resolve_references || !item.is_reference() {
            return Ok(item);
        }
        let target_id = item
            .reference_target()
            .ok_or_else(|| StoreError::InvalidPayload("unresolvable reference".to_string()))?;
        let target_row = sqlx::query("SELECT * FROM data WHERE id = ?")
            .bind(target_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(target_id.to_string()))?;
        let target = row_to_data(&target_row)?;
        if target.is_reference() {
            return Err(StoreError::InvalidPayload(
                "reference chain longer than one hop".to_string(),
            ));
        }
        Ok(DataItem {
            content: target.content,
            content_type: target.content_type,
            ..item
        })
    }

    async fn list_data(
        &self,
        dataflow: DataflowId,
        filter: DataFilter,
    ) -> Result<Vec<DataItem>, StoreError> {
        let rows = sqlx::query("SELECT * FROM data WHERE dataflow_id = ?")
            .bind(dataflow.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        let mut out = Vec::new();
        for row in &rows {
            let item = row_to_data(row)?;
            if filter.node_id.is_some_and(|n| Some(n) != item.node_id) {
                continue;
            }
            if filter.data_type.is_some_and(|t| t != item.data_type) {
                continue;
            }
            if filter
                .key
                .as_deref()
                .is_some_and(|k| Some(k) != item.key.as_deref())
            {
                continue;
            }
            out.push(item);
        }
        Ok(out)
    }

    async fn append_commands(
        &self,
        dataflow: DataflowId,
        sequence_expected: u64,
        payloads: Vec<CommandPayload>,
    ) -> Result<AppliedBatch, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        // The CAS check runs inside the transaction so concurrent writers
        // serialize on the dataflow row.
        let row = sqlx::query("SELECT sequence FROM dataflows WHERE id = ?")
            .bind(dataflow.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        let current = match row {
            Some(row) => row.try_get::<i64, _>("sequence").map_err(backend)? as u64,
            None => return Err(StoreError::NotFound(dataflow.to_string())),
        };
        if current != sequence_expected {
            return Err(StoreError::Conflict {
                expected: sequence_expected,
                actual: current,
            });
        }

        let mut batch = AppliedBatch::default();
        let mut seq = sequence_expected;
        for payload in payloads {
            let (node, item) = apply_one(&mut tx, dataflow, &payload).await?;
            let mut command = Command::new(dataflow, seq, payload);
            command.applied = true;
            let type_name = match &command.payload {
                CommandPayload::CreateNode { .. } => "create_node",
                CommandPayload::UpdateNodeStatus { .. } => "update_node_status",
                CommandPayload::CreateData { .. } => "create_data",
                CommandPayload::CompleteNode { .. } => "complete_node",
                CommandPayload::FailNode { .. } => "fail_node",
            };
            sqlx::query(
                "INSERT INTO commands (dataflow_id, seq, command_id, type, payload_json, applied_at) VALUES (?, ?, ?, ?, ?, datetime('now'))",
            )
            .bind(dataflow.to_string())
            .bind(seq as i64)
            .bind(command.id.to_string())
            .bind(type_name)
            .bind(serde_json::to_string(&command.payload).map_err(invalid)?)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
            batch.commands.push(command);
            if let Some(node) = node {
                batch.nodes.push(node);
            }
            if let Some(item) = item {
                batch.data.push(item);
            }
            seq += 1;
        }
        sqlx::query("UPDATE dataflows SET sequence = ? WHERE id = ?")
            .bind(seq as i64)
            .bind(dataflow.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(batch)
    }

    async fn current_sequence(&self, dataflow: DataflowId) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT sequence FROM dataflows WHERE id = ?")
            .bind(dataflow.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>("sequence").map_err(backend)? as u64),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn round_trips_a_dataflow() {
        let s = store().await;
        let df = s.create_dataflow(Dataflow::new("alice")).await.unwrap();
        let loaded = s.get_dataflow(df.id).await.unwrap();
        assert_eq!(loaded.owner, "alice");
        assert_eq!(loaded.status, DataflowStatus::Pending);
    }

    #[tokio::test]
    async fn applies_node_and_data_commands_in_one_transaction() {
        let s = store().await;
        let df = s.create_dataflow(Dataflow::new("alice")).await.unwrap();
        let node_id = NodeId::new();
        let batch = s
            .append_commands(
                df.id,
                0,
                vec![
                    CommandPayload::CreateNode {
                        node_id,
                        node_type: "func".into(),
                        parent_node_id: None,
                        status: NodeStatus::Pending,
                        config: json!({"func_id": "echo"}),
                        metadata: Default::default(),
                        ancestor_path: vec![],
                    },
                    CommandPayload::CreateData {
                        data_id: DataId::new(),
                        data_type: dataflow_kernel::model::data::DataType::NodeInput,
                        node_id: Some(node_id),
                        key: Some("default".into()),
                        content: json!({"v": 1}),
                        content_type: ContentType::Json,
                        discriminator: None,
                        metadata: Default::default(),
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(batch.nodes.len(), 1);
        assert_eq!(batch.data.len(), 1);

        let node = s.get_node(node_id).await.unwrap();
        assert_eq!(node.node_type, "func");
        assert_eq!(s.current_sequence(df.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn sequence_mismatch_is_a_conflict() {
        let s = store().await;
        let df = s.create_dataflow(Dataflow::new("alice")).await.unwrap();
        let err = s.append_commands(df.id, 7, vec![]).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 7, actual: 0 }));
    }

    #[tokio::test]
    async fn illegal_transition_rolls_the_batch_back() {
        let s = store().await;
        let df = s.create_dataflow(Dataflow::new("alice")).await.unwrap();
        let node_id = NodeId::new();
        s.append_commands(
            df.id,
            0,
            vec![CommandPayload::CreateNode {
                node_id,
                node_type: "func".into(),
                parent_node_id: None,
                status: NodeStatus::Pending,
                config: json!({}),
                metadata: Default::default(),
                ancestor_path: vec![],
            }],
        )
        .await
        .unwrap();

        // pending -> completed skips running and must be rejected; the
        // sequence counter must not advance for a failed batch
        let err = s
            .append_commands(
                df.id,
                1,
                vec![CommandPayload::CompleteNode { node_id, message: None }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPayload(_)));
        assert_eq!(s.current_sequence(df.id).await.unwrap(), 1);
        assert_eq!(s.get_node(node_id).await.unwrap().status, NodeStatus::Pending);
    }

    #[tokio::test]
    async fn reference_dereferences_one_hop() {
        let s = store().await;
        let df = s.create_dataflow(Dataflow::new("alice")).await.unwrap();
        let target_id = DataId::new();
        let ref_id = DataId::new();
        s.append_commands(
            df.id,
            0,
            vec![
                CommandPayload::CreateData {
                    data_id: target_id,
                    data_type: dataflow_kernel::model::data::DataType::WorkflowInput,
                    node_id: None,
                    key: None,
                    content: json!({"blob": "large"}),
                    content_type: ContentType::Json,
                    discriminator: None,
                    metadata: Default::default(),
                },
                CommandPayload::CreateData {
                    data_id: ref_id,
                    data_type: dataflow_kernel::model::data::DataType::WorkflowInput,
                    node_id: None,
                    key: None,
                    content: json!(target_id.to_string()),
                    content_type: ContentType::Reference,
                    discriminator: None,
                    metadata: Default::default(),
                },
            ],
        )
        .await
        .unwrap();

        let resolved = s.get_data(ref_id, true).await.unwrap();
        assert_eq!(resolved.content, json!({"blob": "large"}));
        assert!(s.get_data(ref_id, false).await.unwrap().is_reference());
    }
}
