//! Alert definition storage.
//!
//! Definitions live in a single SQLite file separate from the daily metric
//! partitions; the engine reads a snapshot of enabled alerts at the start
//! of every evaluation cycle.

use crate::error::StoreError;
use crate::AlertSource;
use anyhow::Result;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use vigil_common::types::AlertDefinition;

const DEFINITIONS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    product_type TEXT NOT NULL,
    function_type TEXT NOT NULL,
    function_column TEXT,
    query TEXT,
    metric_id TEXT NOT NULL,
    group_by_key TEXT,
    threshold_type TEXT NOT NULL,
    threshold_condition TEXT NOT NULL,
    threshold_value REAL,
    threshold_window INTEGER,
    threshold_cooldown INTEGER,
    disabled INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_alerts_enabled ON alerts(disabled);
";

pub struct AlertDefinitionStore {
    conn: Mutex<Connection>,
}

impl AlertDefinitionStore {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(DEFINITIONS_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts a definition and returns its assigned id.
    pub fn insert_alert(&self, alert: &AlertDefinition) -> Result<i64> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO alerts (project_id, name, product_type, function_type,
                 function_column, query, metric_id, group_by_key, threshold_type,
                 threshold_condition, threshold_value, threshold_window,
                 threshold_cooldown, disabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                alert.project_id,
                alert.name,
                alert.product_type,
                alert.function_type.to_string(),
                alert.function_column,
                alert.query,
                alert.metric_id,
                alert.group_by_key,
                alert.threshold_type.to_string(),
                alert.threshold_condition.to_string(),
                alert.threshold_value,
                alert.threshold_window,
                alert.threshold_cooldown,
                alert.disabled as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_disabled(&self, alert_id: i64, disabled: bool) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "UPDATE alerts SET disabled = ?2 WHERE id = ?1",
            params![alert_id, disabled as i64],
        )?;
        Ok(())
    }

    fn list_enabled(&self) -> Result<Vec<AlertDefinition>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, name, product_type, function_type,
                    function_column, query, metric_id, group_by_key, threshold_type,
                    threshold_condition, threshold_value, threshold_window,
                    threshold_cooldown, disabled
             FROM alerts WHERE disabled = 0 ORDER BY id",
        )?;
        let mut alerts = Vec::new();
        let mut iter = stmt.query([])?;
        while let Some(row) = iter.next()? {
            let function_type: String = row.get(4)?;
            let threshold_type: String = row.get(9)?;
            let threshold_condition: String = row.get(10)?;
            alerts.push(AlertDefinition {
                id: row.get(0)?,
                project_id: row.get(1)?,
                name: row.get(2)?,
                product_type: row.get(3)?,
                function_type: function_type.parse().map_err(|_| StoreError::InvalidColumn {
                    column: "function_type",
                    value: function_type.clone(),
                })?,
                function_column: row.get(5)?,
                query: row.get(6)?,
                metric_id: row.get(7)?,
                group_by_key: row.get(8)?,
                threshold_type: threshold_type.parse().map_err(|_| {
                    StoreError::InvalidColumn {
                        column: "threshold_type",
                        value: threshold_type.clone(),
                    }
                })?,
                threshold_condition: threshold_condition.parse().map_err(|_| {
                    StoreError::InvalidColumn {
                        column: "threshold_condition",
                        value: threshold_condition.clone(),
                    }
                })?,
                threshold_value: row.get(11)?,
                threshold_window: row.get(12)?,
                threshold_cooldown: row.get(13)?,
                disabled: row.get::<_, i64>(14)? != 0,
            });
        }
        Ok(alerts)
    }
}

impl AlertSource for AlertDefinitionStore {
    fn list_enabled_alerts(&self) -> Result<Vec<AlertDefinition>> {
        self.list_enabled()
    }
}
