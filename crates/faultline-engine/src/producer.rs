//! The sharded producer pool.
//!
//! A run spawns `K` shard tasks, each sustaining a fraction of the
//! aggregate target rate with one cooperative tick per second. Each tick
//! builds its batches from the run's shared RNG, bulk-inserts them, and
//! reports attempted counts into the throughput window.
//!
//! Accounting is best-effort by design: a batch that fails at the store
//! still counts as attempted (the failure is logged and surfaced via the
//! dropped-batches counter), and the shard keeps going. Forward progress
//! over precision.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::time::Instant;

use faultline_core::catalog::Catalog;
use faultline_core::event::{generate_incident, IncidentEvent};
use faultline_core::rng::DeterministicRng;
use faultline_core::RunId;

use crate::history::ThroughputWindow;
use crate::metrics::{labels, names};
use crate::store::DocumentStore;

/// Splits an aggregate rate across `shards` producers: every shard gets
/// `rate / shards`, and the first `rate % shards` shards get one extra.
///
/// # Panics
///
/// Panics if `shards` is zero; callers validate `1 <= shards <= rate`.
#[must_use]
pub fn split_rate(rate: u64, shards: u64) -> Vec<u64> {
    assert!(shards > 0, "shards must be positive");
    let base = rate / shards;
    let remainder = rate % shards;
    (0..shards)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Batch sizes for one shard tick: `max(1, ceil(shard_rate / batch))`
/// inserts whose sizes sum to `shard_rate`, each at most `batch`, the last
/// truncated.
#[must_use]
pub fn batch_plan(shard_rate: u64, batch: u64) -> Vec<u64> {
    assert!(batch > 0, "batch must be positive");
    if shard_rate == 0 {
        return vec![0];
    }
    let batches = shard_rate.div_ceil(batch);
    (0..batches)
        .map(|i| {
            if i + 1 == batches {
                shard_rate - batch * (batches - 1)
            } else {
                batch
            }
        })
        .collect()
}

/// Guard against state corruption: cleared when the run's identity is torn
/// down, fatal to any shard that observes it mid-run.
#[derive(Debug, Default)]
pub(crate) struct RunGuard {
    invalidated: AtomicBool,
}

impl RunGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::SeqCst)
    }
}

/// Everything one shard task needs, owned for the task's lifetime.
pub(crate) struct ShardContext {
    pub shard_index: u64,
    pub shard_rate: u64,
    pub batch_limit: u64,
    pub spread_factor: f64,
    pub run_id: RunId,
    pub catalog: Arc<Catalog>,
    pub rng: Arc<Mutex<DeterministicRng>>,
    pub store: Arc<dyn DocumentStore>,
    pub window: Arc<ThroughputWindow>,
    pub run_started: Instant,
    pub shutdown: watch::Receiver<bool>,
    pub live_shards: Arc<AtomicUsize>,
    pub dropped_batches: Arc<AtomicU64>,
    pub run_guard: Arc<RunGuard>,
}

/// One shard's cooperative tick loop, targeting one tick per second.
///
/// Exits when the shutdown signal fires (after completing the current
/// tick) or when the run guard reports a torn-down run identity.
pub(crate) async fn run_shard(mut ctx: ShardContext) {
    let plan = batch_plan(ctx.shard_rate, ctx.batch_limit);
    let tick_budget = Duration::from_millis(1000);

    loop {
        let tick_started = Instant::now();

        if !ctx.run_guard.is_valid() {
            tracing::error!("run identity cleared while shard was live; exiting");
            break;
        }

        let tick_index = ctx.run_started.elapsed().as_secs();
        let mut attempted: u64 = 0;

        for &size in &plan {
            let batch = build_batch(&ctx, size);
            if let Err(err) = ctx.store.insert_incidents(&batch).await {
                tracing::warn!(error = %err, size, "batch insert failed; continuing");
                ctx.dropped_batches.fetch_add(1, Ordering::SeqCst);
                counter!(
                    names::BATCHES_DROPPED_TOTAL,
                    labels::SHARD => ctx.shard_index.to_string(),
                )
                .increment(1);
            }
            // Best-effort accounting: attempted regardless of outcome.
            attempted += size;
        }

        ctx.window.record(tick_index, attempted);
        counter!(names::INCIDENTS_ATTEMPTED_TOTAL).increment(attempted);

        let sleep_for = tick_budget.saturating_sub(tick_started.elapsed());
        tokio::select! {
            _ = ctx.shutdown.changed() => break,
            () = tokio::time::sleep(sleep_for) => {}
        }
        if *ctx.shutdown.borrow() {
            break;
        }
    }

    let remaining = ctx.live_shards.fetch_sub(1, Ordering::SeqCst) - 1;
    #[allow(clippy::cast_precision_loss)]
    gauge!(names::SHARDS_LIVE).set(remaining as f64);
    tracing::debug!("shard exited");
}

/// Builds one batch under a single RNG lock so the shard's draw sequence
/// stays contiguous within the batch.
fn build_batch(ctx: &ShardContext, size: u64) -> Vec<IncidentEvent> {
    let mut rng = ctx.rng.lock().unwrap_or_else(PoisonError::into_inner);
    (0..size)
        .map(|_| {
            generate_incident(
                &ctx.catalog,
                ctx.spread_factor,
                &mut rng,
                &ctx.run_id,
                chrono::Utc::now(),
            )
        })
        .collect()
}
