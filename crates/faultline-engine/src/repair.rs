//! The delayed-repair scheduler.
//!
//! On a fixed cadence, samples recent incidents of the current run,
//! filters them through the infrastructure policy, walks them in a
//! deterministic permutation, and schedules de-duplicated repair records
//! at log-normally delayed instants.
//!
//! ## State machine
//!
//! `idle -> running -> stopping -> idle`. Start on an already-running run
//! id is a no-op; stop cancels the cadence task and every outstanding
//! delay timer, losing in-flight repairs by design.
//!
//! ## Determinism
//!
//! The scheduler owns a dedicated RNG reseeded at start (falling back to
//! a fixed constant when the run carries no seed); given a seed and
//! identical store contents, candidate selection order is reproducible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::Instrument;

use faultline_core::event::{repair_dedup_key, EventKind, IssueCategory, RepairEvent};
use faultline_core::observability::scheduler_span;
use faultline_core::rng::DeterministicRng;
use faultline_core::{IncidentId, RunId};

use crate::error::{Error, Result};
use crate::metrics::{labels, names};
use crate::policy;
use crate::store::{DocumentStore, RepairInsert};

/// Seed used when the run context carries none.
const FALLBACK_SEED: u32 = 1_000_003;

/// Delay millis are clamped so they fit the timer width of the platforms
/// the original generator ran on.
const MAX_TIMER_DELAY_MS: u64 = i32::MAX as u64;

/// How many times the per-tick budget to oversample from the store.
const SAMPLE_FACTOR: usize = 5;

/// Bounded wait for an in-flight tick to finish during stop.
const STOP_TICK_WAIT: Duration = Duration::from_secs(1);

/// Scheduler configuration. Precedence: call-site override > configured
/// default > these built-in fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepairConfig {
    /// Interval between ticks, milliseconds.
    pub cadence_ms: u64,
    /// Maximum repair candidates emitted per tick.
    pub budget_per_tick: usize,
    /// How far back into incident history to sample, seconds.
    pub recent_window_sec: u64,
    /// Median of the log-normal delay, seconds.
    pub delay_median_sec: f64,
    /// 95th percentile of the log-normal delay, seconds.
    pub delay_p95_sec: f64,
    /// Uniform additive jitter in +/- this range, seconds.
    pub delay_jitter_sec: i64,
    /// Gate probability that a candidate actually schedules.
    pub p_fix_probability: f64,
    /// Hard cap on the resulting delay, seconds.
    pub max_delay_sec: u64,
    /// Policy identifier stamped on persisted records.
    pub policy: String,
    /// Policy version identifier, part of the deterministic key.
    pub version: String,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            cadence_ms: 1000,
            budget_per_tick: 5,
            recent_window_sec: 30,
            delay_median_sec: 60.0,
            delay_p95_sec: 150.0,
            delay_jitter_sec: 10,
            p_fix_probability: 0.92,
            max_delay_sec: 300,
            policy: "infra-repair".to_string(),
            version: "v1".to_string(),
        }
    }
}

impl RepairConfig {
    /// Applies call-site overrides on top of this configuration.
    #[must_use]
    pub fn merged(&self, overrides: &RepairOverrides) -> Self {
        Self {
            cadence_ms: overrides.cadence_ms.unwrap_or(self.cadence_ms),
            budget_per_tick: overrides.budget_per_tick.unwrap_or(self.budget_per_tick),
            recent_window_sec: overrides.recent_window_sec.unwrap_or(self.recent_window_sec),
            delay_median_sec: overrides.delay_median_sec.unwrap_or(self.delay_median_sec),
            delay_p95_sec: overrides.delay_p95_sec.unwrap_or(self.delay_p95_sec),
            delay_jitter_sec: overrides.delay_jitter_sec.unwrap_or(self.delay_jitter_sec),
            p_fix_probability: overrides.p_fix_probability.unwrap_or(self.p_fix_probability),
            max_delay_sec: overrides.max_delay_sec.unwrap_or(self.max_delay_sec),
            policy: overrides.policy.clone().unwrap_or_else(|| self.policy.clone()),
            version: overrides.version.clone().unwrap_or_else(|| self.version.clone()),
        }
    }
}

/// Per-call overrides of [`RepairConfig`], all optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepairOverrides {
    /// Overrides [`RepairConfig::cadence_ms`].
    pub cadence_ms: Option<u64>,
    /// Overrides [`RepairConfig::budget_per_tick`].
    pub budget_per_tick: Option<usize>,
    /// Overrides [`RepairConfig::recent_window_sec`].
    pub recent_window_sec: Option<u64>,
    /// Overrides [`RepairConfig::delay_median_sec`].
    pub delay_median_sec: Option<f64>,
    /// Overrides [`RepairConfig::delay_p95_sec`].
    pub delay_p95_sec: Option<f64>,
    /// Overrides [`RepairConfig::delay_jitter_sec`].
    pub delay_jitter_sec: Option<i64>,
    /// Overrides [`RepairConfig::p_fix_probability`].
    pub p_fix_probability: Option<f64>,
    /// Overrides [`RepairConfig::max_delay_sec`].
    pub max_delay_sec: Option<u64>,
    /// Overrides [`RepairConfig::policy`].
    pub policy: Option<String>,
    /// Overrides [`RepairConfig::version`].
    pub version: Option<String>,
}

/// The scheduler's externally visible phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    /// No run is being scheduled.
    Idle,
    /// Ticks and timers are active.
    Running,
    /// Stop has been requested; draining the in-flight tick.
    Stopping,
}

/// Monotonic counters written by ticks and timer completions, read by
/// status snapshots. Stale reads are fine; atomics rule out torn reads.
#[derive(Debug, Default)]
struct SchedulerCounters {
    scheduled: AtomicU64,
    persisted: AtomicU64,
    duplicates_ignored: AtomicU64,
    skipped_by_gate: AtomicU64,
}

impl SchedulerCounters {
    fn reset(&self) {
        self.scheduled.store(0, Ordering::SeqCst);
        self.persisted.store(0, Ordering::SeqCst);
        self.duplicates_ignored.store(0, Ordering::SeqCst);
        self.skipped_by_gate.store(0, Ordering::SeqCst);
    }
}

/// Point-in-time scheduler snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// Current phase.
    pub phase: SchedulerPhase,
    /// Run being scheduled, when running.
    pub run_id: Option<RunId>,
    /// Active policy identifier, when running.
    pub policy: Option<String>,
    /// Active policy version, when running.
    pub version: Option<String>,
    /// Repair timers registered since start.
    pub scheduled: u64,
    /// Repair records persisted since start.
    pub persisted: u64,
    /// Inserts rejected by the unique constraint since start.
    pub duplicates_ignored: u64,
    /// Candidates dropped by the p-fix gate since start.
    pub skipped_by_gate: u64,
    /// Timers currently scheduled but not yet fired.
    pub in_flight: usize,
}

/// Run identity handed to the scheduler at start.
///
/// Mirrors the run state the control layer holds; a context without a run
/// id is rejected with an invalid-argument error.
#[derive(Debug, Clone)]
pub struct SchedulerRunContext {
    /// The run to schedule repairs for.
    pub run_id: Option<RunId>,
    /// The run's seed, when started reproducibly.
    pub seed: Option<u32>,
}

struct PendingRepair {
    handle: JoinHandle<()>,
    due_at: DateTime<Utc>,
}

struct TickShared {
    run_id: RunId,
    config: RepairConfig,
    store: Arc<dyn DocumentStore>,
    rng: Mutex<DeterministicRng>,
    tick_in_flight: AtomicBool,
    timers: Mutex<HashMap<IncidentId, PendingRepair>>,
    counters: Arc<SchedulerCounters>,
}

struct RunningState {
    shared: Arc<TickShared>,
    cadence_task: JoinHandle<()>,
}

enum SchedulerState {
    Idle,
    Running(RunningState),
    Stopping,
}

/// The repair scheduler. One instance lives for the process; each start
/// binds it to one run.
pub struct RepairScheduler {
    store: Arc<dyn DocumentStore>,
    defaults: RepairConfig,
    counters: Arc<SchedulerCounters>,
    state: Mutex<SchedulerState>,
}

impl RepairScheduler {
    /// Creates an idle scheduler with the given configured defaults.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, defaults: RepairConfig) -> Self {
        Self {
            store,
            defaults,
            counters: Arc::new(SchedulerCounters::default()),
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    /// Starts scheduling repairs for the given run.
    ///
    /// Idempotent when already running the same run id. Must be called
    /// from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an invalid-argument error when the context carries no run
    /// id, when a different run is already being scheduled, or while a
    /// previous stop is still draining.
    pub fn start(
        &self,
        ctx: &SchedulerRunContext,
        overrides: Option<&RepairOverrides>,
    ) -> Result<SchedulerStatus> {
        let Some(run_id) = ctx.run_id.clone() else {
            return Err(Error::invalid_argument(
                "repair scheduler requires an active run id",
            ));
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match &*state {
            SchedulerState::Running(running) if running.shared.run_id == run_id => {
                return Ok(self.status_of(&state));
            }
            SchedulerState::Running(_) => {
                return Err(Error::invalid_argument(
                    "repair scheduler already running a different run",
                ));
            }
            SchedulerState::Stopping => {
                return Err(Error::invalid_argument("repair scheduler is stopping"));
            }
            SchedulerState::Idle => {}
        }

        let config = match overrides {
            Some(overrides) => self.defaults.merged(overrides),
            None => self.defaults.clone(),
        };
        let seed = ctx.seed.unwrap_or(FALLBACK_SEED);
        self.counters.reset();

        let shared = Arc::new(TickShared {
            run_id: run_id.clone(),
            config,
            store: Arc::clone(&self.store),
            rng: Mutex::new(DeterministicRng::from_seed(Some(seed))),
            tick_in_flight: AtomicBool::new(false),
            timers: Mutex::new(HashMap::new()),
            counters: Arc::clone(&self.counters),
        });
        let cadence_task = tokio::spawn(cadence_loop(Arc::clone(&shared)));

        tracing::info!(run_id = %run_id, seed, "repair scheduler started");
        *state = SchedulerState::Running(RunningState {
            shared,
            cadence_task,
        });
        Ok(self.status_of(&state))
    }

    /// Stops the scheduler: cancels the cadence task, waits up to one
    /// second for an in-flight tick, and cancels every outstanding delay
    /// timer. Repairs not yet fired are lost by design. Idempotent.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, SchedulerState::Stopping) {
                SchedulerState::Running(running) => running,
                other => {
                    // Idle stays idle; a concurrent stop keeps draining.
                    *state = other;
                    return;
                }
            }
        };

        running.cadence_task.abort();

        let deadline = tokio::time::Instant::now() + STOP_TICK_WAIT;
        while running.shared.tick_in_flight.load(Ordering::SeqCst)
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (cancelled, earliest_due) = {
            let mut timers = running
                .shared
                .timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let earliest_due = timers.values().map(|pending| pending.due_at).min();
            let cancelled = timers.len();
            for (_, pending) in timers.drain() {
                pending.handle.abort();
            }
            (cancelled, earliest_due)
        };

        tracing::info!(
            run_id = %running.shared.run_id,
            cancelled_timers = cancelled,
            earliest_due = ?earliest_due,
            "repair scheduler stopped; unfired repairs are lost"
        );

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = SchedulerState::Idle;
    }

    /// Non-blocking status snapshot.
    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.status_of(&state)
    }

    fn status_of(&self, state: &SchedulerState) -> SchedulerStatus {
        let (phase, running) = match state {
            SchedulerState::Idle => (SchedulerPhase::Idle, None),
            SchedulerState::Running(running) => (SchedulerPhase::Running, Some(running)),
            SchedulerState::Stopping => (SchedulerPhase::Stopping, None),
        };
        let in_flight = running.map_or(0, |r| {
            r.shared
                .timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        });
        SchedulerStatus {
            phase,
            run_id: running.map(|r| r.shared.run_id.clone()),
            policy: running.map(|r| r.shared.config.policy.clone()),
            version: running.map(|r| r.shared.config.version.clone()),
            scheduled: self.counters.scheduled.load(Ordering::SeqCst),
            persisted: self.counters.persisted.load(Ordering::SeqCst),
            duplicates_ignored: self.counters.duplicates_ignored.load(Ordering::SeqCst),
            skipped_by_gate: self.counters.skipped_by_gate.load(Ordering::SeqCst),
            in_flight,
        }
    }
}

async fn cadence_loop(shared: Arc<TickShared>) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(shared.config.cadence_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        run_tick(&shared)
            .instrument(scheduler_span("tick", shared.run_id.as_str()))
            .await;
    }
}

/// One scheduler tick. Overlapping ticks are dropped by the reentrancy
/// guard; store-read failures skip the tick and the next cadence retries.
async fn run_tick(shared: &Arc<TickShared>) {
    if shared.tick_in_flight.swap(true, Ordering::SeqCst) {
        counter!(names::REPAIR_TICKS_TOTAL, labels::STATUS => "reentrant_skip").increment(1);
        return;
    }
    let outcome = tick_inner(shared).await;
    shared.tick_in_flight.store(false, Ordering::SeqCst);
    match outcome {
        Ok(()) => {
            counter!(names::REPAIR_TICKS_TOTAL, labels::STATUS => "completed").increment(1);
        }
        Err(err) => {
            tracing::warn!(error = %err, "repair tick skipped");
            counter!(names::REPAIR_TICKS_TOTAL, labels::STATUS => "store_error").increment(1);
        }
    }
}

async fn tick_inner(shared: &Arc<TickShared>) -> Result<()> {
    let config = &shared.config;
    let since = Utc::now()
        - chrono::Duration::seconds(i64::try_from(config.recent_window_sec).unwrap_or(i64::MAX));
    let pool = shared
        .store
        .recent_incidents(
            &shared.run_id,
            since,
            config.budget_per_tick.saturating_mul(SAMPLE_FACTOR),
        )
        .await?;

    let candidates: Vec<_> = pool
        .iter()
        .filter(|sample| policy::is_infrastructure(&sample.issue))
        .collect();
    if candidates.is_empty() {
        return Ok(());
    }

    let order = {
        let mut rng = shared.rng.lock().unwrap_or_else(PoisonError::into_inner);
        permutation(candidates.len(), &mut rng)
    };

    let mut emitted = 0;
    for idx in order {
        if emitted >= config.budget_per_tick {
            break;
        }
        let sample = candidates[idx];
        emitted += 1;

        let key = repair_dedup_key(
            &shared.run_id,
            IssueCategory::Infrastructure,
            &sample.id,
            &config.version,
        );
        tracing::info!(
            kind = "WOULD_FIX",
            key = %key,
            incident_id = %sample.id,
            issue_type = sample.issue.detail.type_tag(),
            "repair candidate selected"
        );

        let delay_ms = {
            let mut rng = shared.rng.lock().unwrap_or_else(PoisonError::into_inner);
            if !rng.chance(config.p_fix_probability) {
                shared
                    .counters
                    .skipped_by_gate
                    .fetch_add(1, Ordering::SeqCst);
                counter!(names::REPAIRS_GATE_SKIPPED_TOTAL).increment(1);
                continue;
            }
            let base = i64::try_from(
                rng.log_normal_seconds(config.delay_median_sec, config.delay_p95_sec),
            )
            .unwrap_or(i64::MAX);
            let jitter = rng.uniform_jitter(config.delay_jitter_sec);
            let max_delay = i64::try_from(config.max_delay_sec).unwrap_or(i64::MAX);
            let delay_sec = base.saturating_add(jitter).clamp(1, max_delay.max(1));
            #[allow(clippy::cast_sign_loss)]
            let delay_ms = (delay_sec as u64).saturating_mul(1000);
            delay_ms.min(MAX_TIMER_DELAY_MS)
        };

        let mut timers = shared.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if timers.contains_key(&sample.id) {
            // At most one scheduled repair per incident per run.
            continue;
        }
        let due_at = Utc::now()
            + chrono::Duration::milliseconds(i64::try_from(delay_ms).unwrap_or(i64::MAX));
        let handle = tokio::spawn(
            fire_repair(Arc::clone(shared), sample.id.clone(), delay_ms)
                .instrument(scheduler_span("fire_repair", shared.run_id.as_str())),
        );
        timers.insert(sample.id.clone(), PendingRepair { handle, due_at });
        shared.counters.scheduled.fetch_add(1, Ordering::SeqCst);
        counter!(names::REPAIRS_SCHEDULED_TOTAL).increment(1);
    }

    Ok(())
}

/// One-shot delay timer: sleeps, inserts the repair record, classifies the
/// outcome, and always removes its in-flight entry.
async fn fire_repair(shared: Arc<TickShared>, incident_id: IncidentId, delay_ms: u64) {
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    let config = &shared.config;
    let repair = RepairEvent {
        kind: EventKind::Repair,
        run_id: shared.run_id.clone(),
        incident_id: incident_id.clone(),
        decided_at: Utc::now(),
        category: IssueCategory::Infrastructure,
        policy: config.policy.clone(),
        policy_version: config.version.clone(),
        reason: format!("scheduled infrastructure repair ({})", config.policy),
        dedup_key: repair_dedup_key(
            &shared.run_id,
            IssueCategory::Infrastructure,
            &incident_id,
            &config.version,
        ),
    };

    match shared.store.insert_repair(&repair).await {
        Ok(RepairInsert::Inserted) => {
            shared.counters.persisted.fetch_add(1, Ordering::SeqCst);
            counter!(names::REPAIRS_PERSISTED_TOTAL).increment(1);
        }
        Ok(RepairInsert::Duplicate) => {
            shared
                .counters
                .duplicates_ignored
                .fetch_add(1, Ordering::SeqCst);
            counter!(names::REPAIRS_DUPLICATE_TOTAL).increment(1);
            tracing::debug!(incident_id = %incident_id, "duplicate repair ignored");
        }
        Err(err) => {
            tracing::warn!(
                incident_id = %incident_id,
                error = %err,
                "repair insert failed; dropped"
            );
        }
    }

    shared
        .timers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&incident_id);
}

/// Fisher-Yates permutation of `0..len` driven by the uniform stream.
fn permutation(len: usize, rng: &mut DeterministicRng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    for i in (1..len).rev() {
        let j = rng.uniform_index(i + 1);
        indices.swap(i, j);
    }
    indices
}
