//! Observability metrics for the pipeline.
//!
//! Metrics are exported via the `metrics` crate facade. Names and label
//! keys are constants so emit sites and dashboards stay consistent.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `faultline_incidents_attempted_total` | Counter | Incident documents presented to the store |
//! | `faultline_batches_dropped_total` | Counter | Batch inserts that failed at the store |
//! | `faultline_shards_live` | Gauge | Currently live producer shards |
//! | `faultline_repair_ticks_total` | Counter | Scheduler ticks by outcome |
//! | `faultline_repairs_scheduled_total` | Counter | Repair timers registered |
//! | `faultline_repairs_persisted_total` | Counter | Repair records inserted |
//! | `faultline_repairs_duplicate_total` | Counter | Repair inserts rejected by the unique constraint |
//! | `faultline_repairs_gate_skipped_total` | Counter | Candidates dropped by the p-fix gate |

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: incident documents presented to the store (best-effort
    /// accounting; failed batches still count as attempted).
    pub const INCIDENTS_ATTEMPTED_TOTAL: &str = "faultline_incidents_attempted_total";
    /// Counter: batch inserts that failed at the store level.
    pub const BATCHES_DROPPED_TOTAL: &str = "faultline_batches_dropped_total";
    /// Gauge: currently live producer shards.
    pub const SHARDS_LIVE: &str = "faultline_shards_live";
    /// Counter: scheduler ticks by outcome.
    pub const REPAIR_TICKS_TOTAL: &str = "faultline_repair_ticks_total";
    /// Counter: repair timers registered.
    pub const REPAIRS_SCHEDULED_TOTAL: &str = "faultline_repairs_scheduled_total";
    /// Counter: repair records inserted.
    pub const REPAIRS_PERSISTED_TOTAL: &str = "faultline_repairs_persisted_total";
    /// Counter: repair inserts rejected by the unique constraint.
    pub const REPAIRS_DUPLICATE_TOTAL: &str = "faultline_repairs_duplicate_total";
    /// Counter: candidates dropped by the p-fix gate.
    pub const REPAIRS_GATE_SKIPPED_TOTAL: &str = "faultline_repairs_gate_skipped_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Shard index.
    pub const SHARD: &str = "shard";
    /// Outcome status (completed, skipped, error).
    pub const STATUS: &str = "status";
}
