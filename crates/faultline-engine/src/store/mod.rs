//! Pluggable persistence for pipeline records.
//!
//! The [`DocumentStore`] trait defines the persistence layer for run
//! descriptors, incident events, and repair events. The store is an
//! external collaborator; the engine only relies on the operations below
//! plus one correctness fence: the unique `(run, incident)` constraint on
//! repairs, surfaced as [`RepairInsert::Duplicate`] rather than an error.
//!
//! ## Design Principles
//!
//! - **Best-effort writes**: The producer treats insert failures as
//!   attempted work; the trait never promises exactly-once
//! - **Uniqueness as an outcome**: Duplicate repairs are an expected
//!   result, not a failure
//! - **Testability**: In-memory implementation for tests and development

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use faultline_core::event::{IncidentEvent, Issue, RepairEvent, RunDescriptor};
use faultline_core::{IncidentId, RunId};

use crate::error::Result;

/// Result of a repair insert against the unique `(run, incident)` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairInsert {
    /// The record was persisted.
    Inserted,
    /// A repair for this `(run, incident)` pair already exists.
    Duplicate,
}

impl RepairInsert {
    /// Returns true if the record was persisted.
    #[must_use]
    pub const fn is_inserted(self) -> bool {
        matches!(self, Self::Inserted)
    }

    /// Returns true if the unique constraint rejected the record.
    #[must_use]
    pub const fn is_duplicate(self) -> bool {
        matches!(self, Self::Duplicate)
    }
}

/// Projection of an incident returned by the recent-incidents query.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentSample {
    /// Store-assigned identifier.
    pub id: IncidentId,
    /// Generation instant.
    pub timestamp: DateTime<Utc>,
    /// The issue subdocument, for policy filtering.
    pub issue: Issue,
}

/// Sort direction for an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKey {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
    /// 2d-sphere geo index on a `[lon, lat]` pair.
    GeoSphere,
}

/// A physical index a networked backend should maintain.
///
/// The in-memory store ignores these hints; its queries scan.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Logical collection the index belongs to.
    pub collection: &'static str,
    /// Field/direction pairs, in key order.
    pub keys: Vec<(&'static str, IndexKey)>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Whether the index skips documents missing the keyed fields.
    pub sparse: bool,
    /// Expire documents this many days after the first key's timestamp.
    pub ttl_days: Option<u32>,
}

/// The indexes required by the persisted state layout.
///
/// `repair_ttl_days > 0` additionally requests time-based pruning of the
/// repair collection.
#[must_use]
pub fn index_specs(repair_ttl_days: u32) -> Vec<IndexSpec> {
    let mut specs = vec![
        IndexSpec {
            collection: "incidents",
            keys: vec![("timestamp", IndexKey::Asc)],
            unique: false,
            sparse: false,
            ttl_days: None,
        },
        IndexSpec {
            collection: "incidents",
            keys: vec![("geo", IndexKey::GeoSphere)],
            unique: false,
            sparse: true,
            ttl_days: None,
        },
        IndexSpec {
            collection: "incidents",
            keys: vec![("runId", IndexKey::Asc), ("timestamp", IndexKey::Desc)],
            unique: false,
            sparse: false,
            ttl_days: None,
        },
        IndexSpec {
            collection: "incidents",
            keys: vec![("city", IndexKey::Asc), ("timestamp", IndexKey::Desc)],
            unique: false,
            sparse: false,
            ttl_days: None,
        },
        IndexSpec {
            collection: "repairs",
            keys: vec![("runId", IndexKey::Asc), ("incidentId", IndexKey::Asc)],
            unique: true,
            sparse: false,
            ttl_days: None,
        },
        IndexSpec {
            collection: "repairs",
            keys: vec![("runId", IndexKey::Asc), ("decidedAt", IndexKey::Desc)],
            unique: false,
            sparse: false,
            ttl_days: None,
        },
        IndexSpec {
            collection: "runs",
            keys: vec![("runId", IndexKey::Asc)],
            unique: true,
            sparse: false,
            ttl_days: None,
        },
    ];

    if repair_ttl_days > 0 {
        specs.push(IndexSpec {
            collection: "repairs",
            keys: vec![("decidedAt", IndexKey::Asc)],
            unique: false,
            sparse: false,
            ttl_days: Some(repair_ttl_days),
        });
    }

    specs
}

/// Storage abstraction for pipeline records.
///
/// All methods are `Send + Sync` to support concurrent access from shard
/// tasks, timer tasks, and the control surface.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Shallow connectivity check used before a run is established.
    async fn ping(&self) -> Result<()>;

    /// Applies the physical index layout. No-op for backends without
    /// physical indexes.
    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> Result<()>;

    /// Persists a new run descriptor. The run id must be unused.
    async fn insert_run(&self, descriptor: &RunDescriptor) -> Result<()>;

    /// Closes an open run descriptor. A descriptor transitions from open
    /// to closed exactly once; closing an already-closed run is an error.
    async fn close_run(&self, run_id: &RunId, ended_at: DateTime<Utc>) -> Result<()>;

    /// Bulk-inserts a batch of incident events, returning the number
    /// persisted.
    async fn insert_incidents(&self, events: &[IncidentEvent]) -> Result<usize>;

    /// Returns up to `limit` incidents of `run_id` with
    /// `timestamp >= since`, newest first, projected to
    /// `(id, timestamp, issue)`.
    async fn recent_incidents(
        &self,
        run_id: &RunId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IncidentSample>>;

    /// Inserts a repair record, classifying unique-constraint rejection
    /// as [`RepairInsert::Duplicate`].
    async fn insert_repair(&self, repair: &RepairEvent) -> Result<RepairInsert>;

    /// Counts persisted repair records for a run.
    async fn count_repairs(&self, run_id: &RunId) -> Result<u64>;
}
