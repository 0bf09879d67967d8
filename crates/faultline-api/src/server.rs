//! Router and request handlers for the control surface.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use faultline_engine::controller::{ProducerStatus, RunController, StartParams};
use faultline_engine::repair::{RepairOverrides, SchedulerStatus};

use crate::error::ApiResult;

/// An HTTP `/stop` races the engine drain against this ceiling; the
/// response is sent either way.
const STOP_CEILING: Duration = Duration::from_secs(5);

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The run controller.
    pub controller: Arc<RunController>,
}

/// Response shape shared by `/status`, `/start`, and `/stop`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Always true; errors use the `{ok:false}` shape.
    pub ok: bool,
    /// Producer pool snapshot.
    pub producer: ProducerStatus,
    /// Repair scheduler snapshot.
    pub scheduler: SchedulerStatus,
    /// Repair records persisted for the current run; null when no run is
    /// active or the count query fails.
    pub persisted_count: Option<u64>,
}

/// `POST /start` request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Aggregate target insert rate, records per second.
    pub rate: u64,
    /// Maximum records per bulk insert.
    pub batch: u64,
    /// Number of producer shards.
    pub shards: u64,
    /// Jitter spread multiplier.
    pub spread: f64,
    /// Optional seed for reproducible generation.
    pub seed: Option<u32>,
    /// Optional operator note.
    pub note: Option<String>,
    /// Start the repair scheduler alongside the producers.
    pub repairs_enabled: Option<bool>,
    /// Repair configuration overrides.
    pub repair_config: Option<RepairOverrides>,
}

impl StartRequest {
    fn into_params(self) -> StartParams {
        StartParams {
            rate: self.rate,
            batch: self.batch,
            shards: self.shards,
            spread_factor: self.spread,
            seed: self.seed,
            note: self.note,
            repairs_enabled: self.repairs_enabled.unwrap_or(false),
            repair_overrides: self.repair_config.unwrap_or_default(),
        }
    }
}

async fn status_response(controller: &RunController) -> StatusResponse {
    let status = controller.status();
    let persisted_count = controller.persisted_repairs().await;
    StatusResponse {
        ok: true,
        producer: status.producer,
        scheduler: status.scheduler,
        persisted_count,
    }
}

/// `GET /healthz` — liveness probe.
async fn healthz() -> impl IntoResponse {
    "ok"
}

/// `GET /status` — non-blocking combined snapshot.
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(status_response(&state.controller).await)
}

/// `POST /start` — establish a run (idempotent for identical parameters).
async fn post_start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<StatusResponse>> {
    state.controller.start(request.into_params()).await?;
    Ok(Json(status_response(&state.controller).await))
}

/// `POST /stop` — tear the run down. Always succeeds while the process is
/// alive; a drain that outlasts the ceiling finishes in the background.
async fn post_stop(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let controller = Arc::clone(&state.controller);
    let drain = tokio::spawn(async move { controller.stop().await });
    if tokio::time::timeout(STOP_CEILING, drain).await.is_err() {
        tracing::warn!("stop exceeded the response ceiling; drain continues in the background");
    }
    Json(status_response(&state.controller).await)
}

/// Builds the application router.
///
/// CORS is enabled only when an allowed origin is configured; an invalid
/// origin value disables CORS with an error log rather than failing open.
pub fn router(state: Arc<AppState>, allowed_origin: Option<&str>) -> Router {
    let mut router = Router::new()
        .route("/status", get(get_status))
        .route("/start", post(post_start))
        .route("/stop", post(post_stop))
        .route("/healthz", get(healthz));

    if let Some(origin) = allowed_origin {
        match origin.parse::<HeaderValue>() {
            Ok(value) => {
                router = router.layer(
                    CorsLayer::new()
                        .allow_origin(AllowOrigin::exact(value))
                        .allow_methods([Method::GET, Method::POST])
                        .allow_headers([header::CONTENT_TYPE]),
                );
            }
            Err(_) => {
                tracing::error!(origin = %origin, "invalid CORS origin; CORS disabled");
            }
        }
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
