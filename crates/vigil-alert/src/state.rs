//! Cooldown-gated alert state machine.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use vigil_common::types::{AlertState, AlertStateChange};

/// Decides the state to record for one (alert, group) this cycle.
///
/// A false condition is `Normal`. A true condition is `Alerting` only when
/// `cur_date` is strictly past the group's last `Alerting` timestamp plus
/// the cooldown; inside the cooldown it is `AlertingSilently`, which is
/// persisted but fires no notification. A group with no prior alert uses
/// the unix epoch as its baseline, so any non-negative cooldown still
/// alerts immediately.
pub fn next_state_change(
    cur_date: DateTime<Utc>,
    alerting: bool,
    alert_id: i64,
    group_key: &str,
    last_alerts: &HashMap<String, DateTime<Utc>>,
    cooldown: Duration,
) -> AlertStateChange {
    let mut state = AlertState::Normal;
    if alerting {
        let baseline = last_alerts
            .get(group_key)
            .copied()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        state = if cur_date > baseline + cooldown {
            AlertState::Alerting
        } else {
            AlertState::AlertingSilently
        };
    }

    AlertStateChange {
        timestamp: cur_date,
        alert_id,
        group_by_key: group_key.to_string(),
        state,
    }
}
