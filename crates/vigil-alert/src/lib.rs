//! Metric-alert evaluation engine.
//!
//! The [`scheduler::AlertScheduler`] ticks on a fixed cadence, lists the
//! enabled alert definitions, and evaluates each one on a bounded worker
//! pool. Per alert, the [`evaluator::Evaluator`] runs the full pipeline:
//! incremental partial-aggregate merge through the metric store, bucket
//! re-aggregation over the threshold window, optional anomaly-bound
//! enrichment, condition evaluation, and the cooldown-gated state machine
//! ([`state`]). An alert that transitions to `Alerting` dispatches one
//! notification per group; every evaluated group appends a state change,
//! including `Normal`.

pub mod error;
pub mod evaluator;
pub mod scheduler;
pub mod state;
