// SPDX-License-Identifier: MIT

//! SQLite-backed execution store

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::ExecutionStore;
use crate::flow::engine::types::{Execution, ExecutionStatus, NodeRunResult};
use crate::flow::Result;
use crate::sdk::{FlowError, NodeError, StoreError};

const EXECUTION_COLUMNS: &str = "id, workflow_id, workflow_version, status, started_at, stopped_at, data, error, idempotency_key, trigger_data";

/// Fixed-width timestamps so lexical order matches time order
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json(s: Option<String>) -> Value {
    s.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::from)?;
        Self::init(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workflow_version INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                stopped_at TEXT,
                data TEXT,
                error TEXT,
                idempotency_key TEXT,
                trigger_data TEXT
            );

            CREATE TABLE IF NOT EXISTS node_results (
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT,
                output TEXT,
                error TEXT,
                started_at TEXT,
                stopped_at TEXT,
                PRIMARY KEY (execution_id, node_id),
                FOREIGN KEY (execution_id) REFERENCES executions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_executions_workflow
                ON executions(workflow_id, started_at DESC);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_idempotency
                ON executions(workflow_id, idempotency_key)
                WHERE idempotency_key IS NOT NULL;
            "#,
        )
        .map_err(StoreError::from)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<Execution> {
        let status: String = row.get(3)?;
        let status = status.parse::<ExecutionStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(StoreError::Corrupt(e)),
            )
        })?;

        Ok(Execution {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            workflow_version: row.get(2)?,
            status,
            started_at: parse_ts(&row.get::<_, String>(4)?)?,
            stopped_at: row
                .get::<_, Option<String>>(5)?
                .map(|s| parse_ts(&s))
                .transpose()?,
            data: parse_json(row.get(6)?),
            error: row.get(7)?,
            idempotency_key: row.get(8)?,
            trigger_data: parse_json(row.get(9)?),
            node_results: BTreeMap::new(),
        })
    }

    fn row_to_node_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRunResult> {
        let status: String = row.get(1)?;
        let status = status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(StoreError::Corrupt(e)),
            )
        })?;
        let error: Option<String> = row.get(4)?;

        Ok(NodeRunResult {
            node_id: row.get(0)?,
            status,
            input: parse_json(row.get(2)?),
            output: parse_json(row.get(3)?),
            error: error.and_then(|e| serde_json::from_str::<NodeError>(&e).ok()),
            started_at: row
                .get::<_, Option<String>>(5)?
                .map(|s| parse_ts(&s))
                .transpose()?,
            stopped_at: row
                .get::<_, Option<String>>(6)?
                .map(|s| parse_ts(&s))
                .transpose()?,
        })
    }

    fn load_node_results(
        conn: &Connection,
        execution: &mut Execution,
    ) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare(
            "SELECT node_id, status, input, output, error, started_at, stopped_at
             FROM node_results WHERE execution_id = ?1",
        )?;
        let results = stmt
            .query_map([execution.id.as_str()], Self::row_to_node_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        execution.node_results = results
            .into_iter()
            .map(|r| (r.node_id.clone(), r))
            .collect();
        Ok(())
    }

    fn write_node_result(
        tx: &Transaction<'_>,
        execution_id: &str,
        result: &NodeRunResult,
    ) -> Result<()> {
        let error = result
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            "INSERT INTO node_results
             (execution_id, node_id, status, input, output, error, started_at, stopped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(execution_id, node_id) DO UPDATE SET
                status = excluded.status,
                input = excluded.input,
                output = excluded.output,
                error = excluded.error,
                started_at = excluded.started_at,
                stopped_at = excluded.stopped_at",
            params![
                execution_id,
                result.node_id,
                result.status.as_str(),
                serde_json::to_string(&result.input)?,
                serde_json::to_string(&result.output)?,
                error,
                result.started_at.as_ref().map(format_ts),
                result.stopped_at.as_ref().map(format_ts),
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn fetch(conn: &Connection, sql: &str, args: &[&str]) -> Result<Vec<Execution>> {
        let mut stmt = conn.prepare(sql).map_err(StoreError::from)?;
        let mut executions = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), Self::row_to_execution)
            .map_err(StoreError::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)?;
        for execution in &mut executions {
            Self::load_node_results(conn, execution).map_err(StoreError::from)?;
        }
        Ok(executions)
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn create(&self, execution: &Execution) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(StoreError::from)?;
        tx.execute(
            &format!(
                "INSERT INTO executions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                EXECUTION_COLUMNS
            ),
            params![
                execution.id,
                execution.workflow_id,
                execution.workflow_version,
                execution.status.as_str(),
                format_ts(&execution.started_at),
                execution.stopped_at.as_ref().map(format_ts),
                serde_json::to_string(&execution.data)?,
                execution.error,
                execution.idempotency_key,
                serde_json::to_string(&execution.trigger_data)?,
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::Duplicate(format!("Execution '{}'", execution.id))
            } else {
                StoreError::from(e)
            }
        })?;
        for result in execution.node_results.values() {
            Self::write_node_result(&tx, &execution.id, result)?;
        }
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let changed = tx
            .execute(
                "UPDATE executions SET
                    status = ?2, stopped_at = ?3, data = ?4, error = ?5
                 WHERE id = ?1",
                params![
                    execution.id,
                    execution.status.as_str(),
                    execution.stopped_at.as_ref().map(format_ts),
                    serde_json::to_string(&execution.data)?,
                    execution.error,
                ],
            )
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(FlowError::ExecutionNotFound(execution.id.clone()));
        }
        for result in execution.node_results.values() {
            Self::write_node_result(&tx, &execution.id, result)?;
        }
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Execution>> {
        let conn = self.conn.lock().await;
        let execution = conn
            .query_row(
                &format!("SELECT {} FROM executions WHERE id = ?1", EXECUTION_COLUMNS),
                [id],
                Self::row_to_execution,
            )
            .optional()
            .map_err(StoreError::from)?;

        match execution {
            Some(mut execution) => {
                Self::load_node_results(&conn, &mut execution).map_err(StoreError::from)?;
                Ok(Some(execution))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, workflow_id: &str) -> Result<Vec<Execution>> {
        let conn = self.conn.lock().await;
        Self::fetch(
            &conn,
            &format!(
                "SELECT {} FROM executions WHERE workflow_id = ?1
                 ORDER BY started_at DESC, rowid DESC",
                EXECUTION_COLUMNS
            ),
            &[workflow_id],
        )
    }

    async fn put_node_result(&self, execution_id: &str, result: &NodeRunResult) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM executions WHERE id = ?1",
                [execution_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        if exists.is_none() {
            return Err(FlowError::ExecutionNotFound(execution_id.to_string()));
        }
        Self::write_node_result(&tx, execution_id, result)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    async fn find_by_idempotency_key(
        &self,
        workflow_id: &str,
        key: &str,
    ) -> Result<Option<Execution>> {
        let conn = self.conn.lock().await;
        let mut found = Self::fetch(
            &conn,
            &format!(
                "SELECT {} FROM executions WHERE workflow_id = ?1 AND idempotency_key = ?2",
                EXECUTION_COLUMNS
            ),
            &[workflow_id, key],
        )?;
        Ok(found.pop())
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM executions
                 WHERE status IN ('success', 'error', 'canceled')
                   AND stopped_at IS NOT NULL AND stopped_at < ?1",
                [format_ts(&before)],
            )
            .map_err(StoreError::from)?;
        if removed > 0 {
            log::info!("Pruned {} executions stopped before {}", removed, before);
        }
        Ok(removed)
    }
}
