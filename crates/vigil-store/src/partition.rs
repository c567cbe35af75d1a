use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const PARTITION_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS points (
    product TEXT NOT NULL,
    project_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    value REAL,
    labels TEXT NOT NULL DEFAULT '{}',
    block_number INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_points_product_time
    ON points(product, project_id, timestamp);

CREATE TABLE IF NOT EXISTS metric_history (
    metric_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    group_key TEXT NOT NULL,
    state TEXT NOT NULL,
    PRIMARY KEY (metric_id, timestamp, group_key)
);

CREATE TABLE IF NOT EXISTS block_checkpoints (
    metric_id TEXT PRIMARY KEY,
    last_block_number INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_state_changes (
    project_id INTEGER NOT NULL,
    alert_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    group_key TEXT NOT NULL,
    state TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_state_alert_time
    ON alert_state_changes(project_id, alert_id, timestamp);
";

/// One SQLite database per calendar day, WAL mode, with a cached
/// connection map. The partition key doubles as the checkpoint partition
/// identifier exposed to clients.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let path = self.partition_path(&key);
            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(PARTITION_SCHEMA)?;
            tracing::info!(partition = %key, "Created new partition");
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conns = self.lock_connections();
        let conn = conns
            .get(key)
            .ok_or_else(|| crate::error::StoreError::PartitionNotFound(key.to_string()))?;
        f(conn)
    }

    /// Keys of partitions on disk whose day overlaps `[from, to]`, loading
    /// their connections as a side effect.
    pub fn partitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let from_date = from.date_naive();
        let to_date = to.date_naive();
        let mut keys = Vec::new();
        let mut date = from_date;
        while date <= to_date {
            let key = date.format("%Y-%m-%d").to_string();
            let path = self.partition_path(&key);
            if path.exists() {
                let mut conns = self.lock_connections();
                if !conns.contains_key(&key) {
                    let conn = Connection::open(&path)?;
                    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                    conn.execute_batch(PARTITION_SCHEMA)?;
                    conns.insert(key.clone(), conn);
                }
                keys.push(key);
            }
            date = date.succ_opt().unwrap_or(date);
        }
        Ok(keys)
    }

    /// Removes partitions older than `retention_days`, including WAL/SHM
    /// auxiliary files. Returns the number of partitions removed.
    pub fn cleanup_older_than(&self, retention_days: u32) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let cutoff_date = cutoff.date_naive();
        let mut removed = 0u32;

        let mut expired: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    if date < cutoff_date {
                        expired.push((date_str.to_string(), entry.path()));
                    }
                }
            }
        }

        // Best-effort: log failures, keep going.
        for (date_str, db_path) in &expired {
            {
                let mut conns = self.lock_connections();
                conns.remove(date_str.as_str());
            }

            if let Err(e) = std::fs::remove_file(db_path) {
                tracing::error!(partition = %date_str, error = %e, "Failed to remove partition file");
                continue;
            }
            for suffix in ["-wal", "-shm"] {
                let aux = self.data_dir.join(format!("{date_str}.db{suffix}"));
                if aux.exists() {
                    if let Err(e) = std::fs::remove_file(&aux) {
                        tracing::warn!(path = %aux.display(), error = %e, "Failed to remove auxiliary file");
                    }
                }
            }

            tracing::info!(partition = %date_str, "Removed expired partition");
            removed += 1;
        }

        Ok(removed)
    }
}
