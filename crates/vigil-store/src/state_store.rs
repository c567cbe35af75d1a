//! Alert state history backed by the daily partitions.

use crate::engine::SqliteMetricStore;
use crate::AlertStateStore;
use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;
use std::collections::HashMap;
use vigil_common::types::{AlertState, AlertStateChange};

impl AlertStateStore for SqliteMetricStore {
    /// Most recent `alerting` transition per group over the lookback
    /// window, inclusive at both ends: a row written at exactly `to` by
    /// an earlier run of the same evaluation minute must anchor the
    /// cooldown on replay. Silent and normal transitions are not
    /// cooldown anchors.
    fn last_alerting_states(
        &self,
        project_id: i64,
        alert_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AlertStateChange>> {
        let mut latest: HashMap<String, i64> = HashMap::new();
        for key in self.partitions().partitions_in_range(from, to)? {
            self.partitions().with_partition(&key, |conn| {
                let mut stmt = conn.prepare(
                    "SELECT group_key, MAX(timestamp) FROM alert_state_changes
                     WHERE project_id = ?1 AND alert_id = ?2
                       AND timestamp >= ?3 AND timestamp <= ?4
                       AND state = ?5
                     GROUP BY group_key",
                )?;
                let mut iter = stmt.query(params![
                    project_id,
                    alert_id,
                    from.timestamp(),
                    to.timestamp(),
                    AlertState::Alerting.to_string(),
                ])?;
                while let Some(row) = iter.next()? {
                    let group_key: String = row.get(0)?;
                    let ts: i64 = row.get(1)?;
                    let entry = latest.entry(group_key).or_insert(ts);
                    *entry = (*entry).max(ts);
                }
                Ok(())
            })?;
        }

        let mut changes: Vec<AlertStateChange> = latest
            .into_iter()
            .map(|(group_key, ts)| AlertStateChange {
                timestamp: Utc.timestamp_opt(ts, 0).single().unwrap_or(from),
                alert_id,
                group_by_key: group_key,
                state: AlertState::Alerting,
            })
            .collect();
        changes.sort_by(|a, b| a.group_by_key.cmp(&b.group_by_key));
        Ok(changes)
    }

    fn append_state_changes(&self, project_id: i64, changes: &[AlertStateChange]) -> Result<()> {
        for change in changes {
            let key = self.partitions().get_or_create(change.timestamp)?;
            self.partitions().with_partition(&key, |conn| {
                conn.execute(
                    "INSERT INTO alert_state_changes
                         (project_id, alert_id, timestamp, group_key, state)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        project_id,
                        change.alert_id,
                        change.timestamp.timestamp(),
                        change.group_by_key,
                        change.state.to_string(),
                    ],
                )?;
                Ok(())
            })?;
        }
        Ok(())
    }
}
