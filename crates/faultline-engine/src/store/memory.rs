//! In-memory store implementation.
//!
//! Backs tests, development, and the `memory://` store URI. Enforces the
//! same correctness fences a networked document store would: unique run
//! ids, open-to-closed descriptor transitions, and the unique
//! `(run, incident)` constraint on repairs.
//!
//! ## Limitations
//!
//! - **No durability**: All state is lost when the process exits
//! - **Single-process only**: No cross-process coordination

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use faultline_core::event::{IncidentEvent, RepairEvent, RunDescriptor};
use faultline_core::{IncidentId, RunId};

use super::{DocumentStore, IncidentSample, IndexSpec, RepairInsert};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

#[derive(Debug, Default)]
struct MemoryInner {
    runs: HashMap<RunId, RunDescriptor>,
    incidents: Vec<(IncidentId, IncidentEvent)>,
    repairs: Vec<RepairEvent>,
    repair_keys: HashSet<(RunId, IncidentId)>,
    indexes: Vec<IndexSpec>,
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    fail_incident_inserts: AtomicBool,
    fail_run_inserts: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled, every incident batch insert fails with a storage
    /// error. Used to exercise the producer's best-effort accounting.
    pub fn set_fail_incident_inserts(&self, fail: bool) {
        self.fail_incident_inserts.store(fail, Ordering::SeqCst);
    }

    /// When enabled, run descriptor inserts fail with a storage error.
    /// Used to exercise the start-time resource-error path.
    pub fn set_fail_run_inserts(&self, fail: bool) {
        self.fail_run_inserts.store(fail, Ordering::SeqCst);
    }

    /// Total incident events persisted across all runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn incident_count(&self) -> Result<usize> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.incidents.len())
    }

    /// All persisted incidents for a run with their assigned ids, in
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn incidents_for(&self, run_id: &RunId) -> Result<Vec<(IncidentId, IncidentEvent)>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .incidents
            .iter()
            .filter(|(_, e)| &e.run_id == run_id)
            .cloned()
            .collect())
    }

    /// All persisted repairs for a run, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn repairs_for(&self, run_id: &RunId) -> Result<Vec<RepairEvent>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner
            .repairs
            .iter()
            .filter(|r| &r.run_id == run_id)
            .cloned()
            .collect())
    }

    /// The run descriptor, if the run exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn run(&self, run_id: &RunId) -> Result<Option<RunDescriptor>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.runs.get(run_id).cloned())
    }

    /// The index specs last applied via `ensure_indexes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn applied_indexes(&self) -> Result<Vec<IndexSpec>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.indexes.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_indexes(&self, specs: &[IndexSpec]) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.indexes = specs.to_vec();
        Ok(())
    }

    async fn insert_run(&self, descriptor: &RunDescriptor) -> Result<()> {
        if self.fail_run_inserts.load(Ordering::SeqCst) {
            return Err(Error::storage("injected run insert failure"));
        }
        let mut inner = self.inner.write().map_err(poison_err)?;
        if inner.runs.contains_key(&descriptor.run_id) {
            return Err(Error::storage(format!(
                "duplicate run id: {}",
                descriptor.run_id
            )));
        }
        inner
            .runs
            .insert(descriptor.run_id.clone(), descriptor.clone());
        Ok(())
    }

    async fn close_run(&self, run_id: &RunId, ended_at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let Some(descriptor) = inner.runs.get_mut(run_id) else {
            return Err(Error::RunNotFound {
                run_id: run_id.clone(),
            });
        };
        if descriptor.ended_at.is_some() {
            return Err(Error::storage(format!("run already closed: {run_id}")));
        }
        descriptor.ended_at = Some(ended_at);
        Ok(())
    }

    async fn insert_incidents(&self, events: &[IncidentEvent]) -> Result<usize> {
        if self.fail_incident_inserts.load(Ordering::SeqCst) {
            return Err(Error::storage("injected incident insert failure"));
        }
        let mut inner = self.inner.write().map_err(poison_err)?;
        for event in events {
            let id = IncidentId::new(Ulid::new().to_string());
            inner.incidents.push((id, event.clone()));
        }
        Ok(events.len())
    }

    async fn recent_incidents(
        &self,
        run_id: &RunId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IncidentSample>> {
        let inner = self.inner.read().map_err(poison_err)?;
        let mut samples: Vec<IncidentSample> = inner
            .incidents
            .iter()
            .filter(|(_, e)| &e.run_id == run_id && e.timestamp >= since)
            .map(|(id, e)| IncidentSample {
                id: id.clone(),
                timestamp: e.timestamp,
                issue: e.issue.clone(),
            })
            .collect();
        // Newest first; ties broken by id so the order is total.
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        samples.truncate(limit);
        Ok(samples)
    }

    async fn insert_repair(&self, repair: &RepairEvent) -> Result<RepairInsert> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let key = (repair.run_id.clone(), repair.incident_id.clone());
        if inner.repair_keys.contains(&key) {
            return Ok(RepairInsert::Duplicate);
        }
        inner.repair_keys.insert(key);
        inner.repairs.push(repair.clone());
        Ok(RepairInsert::Inserted)
    }

    async fn count_repairs(&self, run_id: &RunId) -> Result<u64> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.repairs.iter().filter(|r| &r.run_id == run_id).count() as u64)
    }
}
