//! Observability infrastructure for faultline.
//!
//! Structured logging with consistent spans. Initialization is idempotent
//! so tests and embedded uses can call it freely.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops. Log levels come from `RUST_LOG`
/// (default `info`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for producer-shard operations.
#[must_use]
pub fn shard_span(run_id: &str, shard: u64) -> Span {
    tracing::info_span!("shard", run_id = run_id, shard = shard)
}

/// Creates a span for repair-scheduler operations.
#[must_use]
pub fn scheduler_span(operation: &str, run_id: &str) -> Span {
    tracing::info_span!("repair_scheduler", op = operation, run_id = run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = shard_span("run-1", 3);
        let _guard = span.enter();
        tracing::info!("message inside shard span");

        let span = scheduler_span("tick", "run-1");
        let _guard = span.enter();
        tracing::info!("message inside scheduler span");
    }
}
