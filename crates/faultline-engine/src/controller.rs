//! The run controller: one start/stop/status lifecycle for the pipeline.
//!
//! A run is an owned object created by start and dropped by stop. The
//! controller holds it behind a read-write lock so status snapshots never
//! block on run activity; start and stop serialize on a separate lifecycle
//! lock so the descriptor insert and the shard spawn cannot race.
//!
//! Stop ordering: scheduler first, then the shard shutdown signal, then a
//! bounded drain, then a best-effort descriptor close that never masks the
//! transition back to idle.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use faultline_core::catalog::Catalog;
use faultline_core::event::{RunDescriptor, RunParams};
use faultline_core::observability::shard_span;
use faultline_core::rng::{entropy_seed, DeterministicRng};
use faultline_core::RunId;

use crate::error::{Error, Result};
use crate::history::ThroughputWindow;
use crate::metrics::names;
use crate::producer::{run_shard, split_rate, RunGuard, ShardContext};
use crate::repair::{
    RepairConfig, RepairOverrides, RepairScheduler, SchedulerRunContext, SchedulerStatus,
};
use crate::store::DocumentStore;

/// Resource caps and ambient settings for the controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum aggregate rate, records per second.
    pub max_rate: u64,
    /// Maximum records per bulk insert.
    pub max_batch: u64,
    /// Maximum producer shards.
    pub max_shards: u64,
    /// Moving-average window, seconds.
    pub window_secs: usize,
    /// Bounded guard interval for shard drain on stop.
    pub stop_drain: Duration,
    /// Configured repair scheduler defaults.
    pub repair_defaults: RepairConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_rate: 1_000_000,
            max_batch: 50_000,
            max_shards: 128,
            window_secs: 10,
            stop_drain: Duration::from_secs(2),
            repair_defaults: RepairConfig::default(),
        }
    }
}

/// Parameters for one start request.
#[derive(Debug, Clone, PartialEq)]
pub struct StartParams {
    /// Aggregate target insert rate, records per second.
    pub rate: u64,
    /// Maximum records per bulk insert.
    pub batch: u64,
    /// Number of producer shards. Must not exceed the rate.
    pub shards: u64,
    /// Jitter spread multiplier, `0.2..=5.0`.
    pub spread_factor: f64,
    /// Optional seed for reproducible generation.
    pub seed: Option<u32>,
    /// Optional operator note persisted in the descriptor.
    pub note: Option<String>,
    /// Whether to start the repair scheduler alongside the producers.
    pub repairs_enabled: bool,
    /// Call-site repair configuration overrides.
    pub repair_overrides: RepairOverrides,
}

impl StartParams {
    fn run_params(&self) -> RunParams {
        RunParams {
            rate: self.rate,
            batch: self.batch,
            shards: self.shards,
            spread_factor: self.spread_factor,
            seed: self.seed,
            repairs_enabled: self.repairs_enabled,
        }
    }
}

/// Point-in-time producer snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerStatus {
    /// True while a run is active.
    pub running: bool,
    /// The active run, if any.
    pub run_id: Option<RunId>,
    /// When the active run opened.
    pub started_at: Option<DateTime<Utc>>,
    /// Effective aggregate rate.
    pub rate: Option<u64>,
    /// Effective batch limit.
    pub batch: Option<u64>,
    /// Effective shard count.
    pub shards: Option<u64>,
    /// Effective spread multiplier.
    pub spread_factor: Option<f64>,
    /// Seed in effect, when reproducible.
    pub seed: Option<u32>,
    /// Whether repairs were requested for this run.
    pub repairs_enabled: Option<bool>,
    /// Shards currently live.
    pub live_shards: usize,
    /// Size of the loaded catalog.
    pub catalog_size: usize,
    /// Configured moving-average window, seconds.
    pub window_secs: usize,
    /// Per-tick buckets currently held.
    pub window_len: usize,
    /// Moving-average attempted insert rate.
    pub moving_average: u64,
    /// Batch inserts that failed at the store; lets operators distinguish
    /// attempted-but-lost work inside the best-effort moving average.
    pub dropped_batches: u64,
    /// Operator note for the active run.
    pub note: Option<String>,
}

/// Combined controller snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    /// Producer pool snapshot.
    pub producer: ProducerStatus,
    /// Repair scheduler snapshot.
    pub scheduler: SchedulerStatus,
}

struct ActiveRun {
    run_id: RunId,
    started_at: DateTime<Utc>,
    params: StartParams,
    window: Arc<ThroughputWindow>,
    shutdown: watch::Sender<bool>,
    live_shards: Arc<AtomicUsize>,
    dropped_batches: Arc<AtomicU64>,
    shard_tasks: Vec<JoinHandle<()>>,
    run_guard: Arc<RunGuard>,
}

/// The run controller. One instance lives for the process.
pub struct RunController {
    catalog: Arc<Catalog>,
    store: Arc<dyn DocumentStore>,
    config: ControllerConfig,
    scheduler: RepairScheduler,
    lifecycle: tokio::sync::Mutex<()>,
    active: RwLock<Option<ActiveRun>>,
}

impl RunController {
    /// Creates an idle controller over the given catalog and store.
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn DocumentStore>,
        config: ControllerConfig,
    ) -> Self {
        let scheduler =
            RepairScheduler::new(Arc::clone(&store), config.repair_defaults.clone());
        Self {
            catalog,
            store,
            config,
            scheduler,
            lifecycle: tokio::sync::Mutex::new(()),
            active: RwLock::new(None),
        }
    }

    fn validate(&self, params: &StartParams) -> Result<()> {
        if params.rate < 1 || params.rate > self.config.max_rate {
            return Err(Error::invalid_argument(format!(
                "rate must be between 1 and {}",
                self.config.max_rate
            )));
        }
        if params.batch < 1 || params.batch > self.config.max_batch {
            return Err(Error::invalid_argument(format!(
                "batch must be between 1 and {}",
                self.config.max_batch
            )));
        }
        if params.shards < 1 || params.shards > self.config.max_shards {
            return Err(Error::invalid_argument(format!(
                "shards must be between 1 and {}",
                self.config.max_shards
            )));
        }
        if params.shards > params.rate {
            return Err(Error::invalid_argument("rate must be >= shards"));
        }
        if !(0.2..=5.0).contains(&params.spread_factor) {
            return Err(Error::invalid_argument(
                "spread factor must be between 0.2 and 5.0",
            ));
        }
        Ok(())
    }

    /// Starts a run.
    ///
    /// Idempotent when an identical run is already active. Establishes a
    /// new run identity, persists the descriptor, spawns the shard set,
    /// and optionally starts the repair scheduler.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error on out-of-range parameters or
    /// when a different run is active, and a resource error when the
    /// store is unreachable or the descriptor insert fails (in which case
    /// no start-side effects remain).
    pub async fn start(&self, params: StartParams) -> Result<ControllerStatus> {
        self.validate(&params)?;
        let _lifecycle = self.lifecycle.lock().await;

        let already_running = {
            let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
            match active.as_ref() {
                Some(run) if run.params == params => {
                    tracing::info!(
                        run_id = %run.run_id,
                        "start ignored; identical run already active"
                    );
                    true
                }
                Some(_) => {
                    return Err(Error::invalid_argument(
                        "a run with different parameters is active; stop it first",
                    ));
                }
                None => false,
            }
        };
        if already_running {
            return Ok(self.status());
        }

        let started_at = Utc::now();
        let seed_material = params.seed.unwrap_or_else(entropy_seed);
        let run_id = RunId::derive(started_at, seed_material);

        let descriptor = RunDescriptor {
            run_id: run_id.clone(),
            started_at,
            ended_at: None,
            params: params.run_params(),
            catalog_size: self.catalog.len(),
            note: params.note.clone(),
        };

        self.store
            .ping()
            .await
            .map_err(|e| Error::resource(format!("store unreachable: {e}")))?;
        self.store
            .insert_run(&descriptor)
            .await
            .map_err(|e| Error::resource(format!("failed to persist run descriptor: {e}")))?;

        let rng = Arc::new(Mutex::new(DeterministicRng::from_seed(params.seed)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shard_count = usize::try_from(params.shards).unwrap_or(usize::MAX);
        let live_shards = Arc::new(AtomicUsize::new(shard_count));
        #[allow(clippy::cast_precision_loss)]
        gauge!(names::SHARDS_LIVE).set(shard_count as f64);
        let window = Arc::new(ThroughputWindow::new());
        let dropped_batches = Arc::new(AtomicU64::new(0));
        let run_guard = Arc::new(RunGuard::new());
        let run_started = tokio::time::Instant::now();

        let mut shard_tasks = Vec::with_capacity(shard_count);
        for (index, shard_rate) in split_rate(params.rate, params.shards).into_iter().enumerate() {
            let span = shard_span(run_id.as_str(), index as u64);
            let ctx = ShardContext {
                shard_index: index as u64,
                shard_rate,
                batch_limit: params.batch,
                spread_factor: params.spread_factor,
                run_id: run_id.clone(),
                catalog: Arc::clone(&self.catalog),
                rng: Arc::clone(&rng),
                store: Arc::clone(&self.store),
                window: Arc::clone(&window),
                run_started,
                shutdown: shutdown_rx.clone(),
                live_shards: Arc::clone(&live_shards),
                dropped_batches: Arc::clone(&dropped_batches),
                run_guard: Arc::clone(&run_guard),
            };
            shard_tasks.push(tokio::spawn(run_shard(ctx).instrument(span)));
        }

        if params.repairs_enabled {
            let ctx = SchedulerRunContext {
                run_id: Some(run_id.clone()),
                seed: params.seed,
            };
            if let Err(err) = self.scheduler.start(&ctx, Some(&params.repair_overrides)) {
                let _ = shutdown_tx.send(true);
                return Err(err);
            }
        }

        tracing::info!(
            run_id = %run_id,
            rate = params.rate,
            batch = params.batch,
            shards = params.shards,
            repairs = params.repairs_enabled,
            "run started"
        );

        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = Some(ActiveRun {
            run_id,
            started_at,
            params,
            window,
            shutdown: shutdown_tx,
            live_shards,
            dropped_batches,
            shard_tasks,
            run_guard,
        });
        drop(active);

        Ok(self.status())
    }

    /// Stops the active run, if any. Idempotent; always returns a status.
    ///
    /// Cancels the scheduler first, signals the shards, waits up to the
    /// configured guard interval for them to drain, then closes the run
    /// descriptor best-effort (a close failure is logged, never blocks the
    /// transition to idle).
    pub async fn stop(&self) -> ControllerStatus {
        let _lifecycle = self.lifecycle.lock().await;

        let run = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            active.take()
        };
        let Some(run) = run else {
            return self.status();
        };

        self.scheduler.stop().await;
        let _ = run.shutdown.send(true);

        let deadline = tokio::time::Instant::now() + self.config.stop_drain;
        for task in run.shard_tasks {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::warn!(run_id = %run.run_id, "stop drain interval elapsed with shards live");
                break;
            }
            if tokio::time::timeout(deadline - now, task).await.is_err() {
                tracing::warn!(run_id = %run.run_id, "shard did not drain within the guard interval");
            }
        }
        // Any straggler exits at its next tick via the identity guard.
        run.run_guard.invalidate();

        if let Err(err) = self.store.close_run(&run.run_id, Utc::now()).await {
            tracing::warn!(
                run_id = %run.run_id,
                error = %err,
                "failed to close run descriptor"
            );
        }

        tracing::info!(run_id = %run.run_id, "run stopped");
        self.status()
    }

    /// Non-blocking combined snapshot.
    pub fn status(&self) -> ControllerStatus {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        let producer = match active.as_ref() {
            Some(run) => ProducerStatus {
                running: true,
                run_id: Some(run.run_id.clone()),
                started_at: Some(run.started_at),
                rate: Some(run.params.rate),
                batch: Some(run.params.batch),
                shards: Some(run.params.shards),
                spread_factor: Some(run.params.spread_factor),
                seed: run.params.seed,
                repairs_enabled: Some(run.params.repairs_enabled),
                live_shards: run.live_shards.load(Ordering::SeqCst),
                catalog_size: self.catalog.len(),
                window_secs: self.config.window_secs,
                window_len: run.window.len(),
                moving_average: run.window.moving_average(self.config.window_secs),
                dropped_batches: run.dropped_batches.load(Ordering::SeqCst),
                note: run.params.note.clone(),
            },
            None => ProducerStatus {
                running: false,
                run_id: None,
                started_at: None,
                rate: None,
                batch: None,
                shards: None,
                spread_factor: None,
                seed: None,
                repairs_enabled: None,
                live_shards: 0,
                catalog_size: self.catalog.len(),
                window_secs: self.config.window_secs,
                window_len: 0,
                moving_average: 0,
                dropped_batches: 0,
                note: None,
            },
        };
        ControllerStatus {
            producer,
            scheduler: self.scheduler.status(),
        }
    }

    /// Count of persisted repair records for the active run; `None` when
    /// no run is active or the count query fails.
    pub async fn persisted_repairs(&self) -> Option<u64> {
        let run_id = {
            let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
            active.as_ref().map(|run| run.run_id.clone())
        }?;
        self.store.count_repairs(&run_id).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use faultline_core::catalog::Location;

    fn test_catalog() -> Arc<Catalog> {
        let entries = vec![
            Location {
                name: "Alpha".to_string(),
                lat: 40.7,
                lon: -74.0,
                weight: 1.0,
                sigma_km: 5.0,
            },
            Location {
                name: "Beta".to_string(),
                lat: 34.1,
                lon: -118.2,
                weight: 3.0,
                sigma_km: 10.0,
            },
        ];
        Arc::new(Catalog::from_entries(entries).unwrap())
    }

    fn controller(store: Arc<MemoryStore>) -> RunController {
        RunController::new(test_catalog(), store, ControllerConfig::default())
    }

    fn params(rate: u64, shards: u64) -> StartParams {
        StartParams {
            rate,
            batch: 10,
            shards,
            spread_factor: 1.0,
            seed: Some(42),
            note: None,
            repairs_enabled: false,
            repair_overrides: RepairOverrides::default(),
        }
    }

    #[tokio::test]
    async fn start_rejects_more_shards_than_rate() {
        let controller = controller(Arc::new(MemoryStore::new()));
        let err = controller.start(params(3, 5)).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "invalid argument: rate must be >= shards");
    }

    #[tokio::test]
    async fn start_rejects_out_of_range_parameters() {
        let controller = controller(Arc::new(MemoryStore::new()));

        let mut p = params(10, 2);
        p.rate = 0;
        assert!(controller.start(p).await.unwrap_err().is_validation());

        let mut p = params(10, 2);
        p.batch = 0;
        assert!(controller.start(p).await.unwrap_err().is_validation());

        let mut p = params(2_000_000, 2);
        p.rate = 2_000_000;
        assert!(controller.start(p).await.unwrap_err().is_validation());

        let mut p = params(10, 2);
        p.spread_factor = 0.1;
        assert!(controller.start(p).await.unwrap_err().is_validation());

        let mut p = params(10, 2);
        p.spread_factor = 5.1;
        assert!(controller.start(p).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn start_persists_descriptor_and_stop_closes_it() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(Arc::clone(&store));

        let status = controller.start(params(4, 2)).await?;
        assert!(status.producer.running);
        let run_id = status.producer.run_id.clone().unwrap();

        let descriptor = store.run(&run_id)?.expect("descriptor persisted");
        assert!(descriptor.ended_at.is_none());
        assert_eq!(descriptor.params.rate, 4);
        assert_eq!(descriptor.catalog_size, 2);

        let status = controller.stop().await;
        assert!(!status.producer.running);
        assert_eq!(status.producer.live_shards, 0);

        let descriptor = store.run(&run_id)?.expect("descriptor still present");
        assert!(descriptor.ended_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn start_twice_with_same_params_is_a_noop() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(Arc::clone(&store));

        let first = controller.start(params(4, 2)).await?;
        let second = controller.start(params(4, 2)).await?;
        assert_eq!(first.producer.run_id, second.producer.run_id);

        // Only one descriptor exists.
        let run_id = first.producer.run_id.unwrap();
        assert!(store.run(&run_id)?.is_some());

        controller.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn start_with_different_params_while_running_is_rejected() -> anyhow::Result<()> {
        let controller = controller(Arc::new(MemoryStore::new()));
        controller.start(params(4, 2)).await?;

        let err = controller.start(params(6, 2)).await.unwrap_err();
        assert!(err.is_validation());

        controller.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn stop_is_idempotent() -> anyhow::Result<()> {
        let controller = controller(Arc::new(MemoryStore::new()));
        controller.start(params(4, 2)).await?;

        let first = controller.stop().await;
        let second = controller.stop().await;
        assert!(!first.producer.running);
        assert!(!second.producer.running);
        assert_eq!(first.producer.live_shards, second.producer.live_shards);
        assert_eq!(first.scheduler.phase, second.scheduler.phase);
        Ok(())
    }

    #[tokio::test]
    async fn stop_without_start_returns_idle_status() {
        let controller = controller(Arc::new(MemoryStore::new()));
        let status = controller.stop().await;
        assert!(!status.producer.running);
        assert_eq!(status.producer.moving_average, 0);
        assert_eq!(status.producer.catalog_size, 2);
    }

    #[tokio::test]
    async fn status_reports_catalog_and_window_config_when_idle() {
        let controller = controller(Arc::new(MemoryStore::new()));
        let status = controller.status();
        assert!(!status.producer.running);
        assert_eq!(status.producer.window_secs, 10);
        assert_eq!(status.producer.catalog_size, 2);
        assert!(status.producer.run_id.is_none());
    }

    #[tokio::test]
    async fn persisted_repairs_is_none_without_a_run() {
        let controller = controller(Arc::new(MemoryStore::new()));
        assert_eq!(controller.persisted_repairs().await, None);
    }

    #[tokio::test]
    async fn descriptor_insert_failure_aborts_start_without_side_effects() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(Arc::clone(&store));

        store.set_fail_run_inserts(true);
        let err = controller.start(params(2, 1)).await.unwrap_err();
        assert!(matches!(err, Error::Resource { .. }));
        assert!(!controller.status().producer.running);
        assert_eq!(store.incident_count()?, 0);

        // The failure leaves the controller able to start normally.
        store.set_fail_run_inserts(false);
        let status = controller.start(params(2, 1)).await?;
        assert!(status.producer.running);
        controller.stop().await;
        Ok(())
    }
}
