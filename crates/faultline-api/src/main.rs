//! `faultline-api` binary entrypoint.
//!
//! Loads configuration from environment variables, loads the location
//! catalog, opens the document store, and serves the control surface.
//! Exits 0 on clean shutdown and 1 on fatal startup error.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use faultline_api::config::Config;
use faultline_api::server::{self, AppState};
use faultline_core::catalog::Catalog;
use faultline_core::observability::init_logging;
use faultline_engine::controller::RunController;
use faultline_engine::store::memory::MemoryStore;
use faultline_engine::store::{index_specs, DocumentStore};

fn open_store(uri: &str) -> Result<Arc<dyn DocumentStore>> {
    if uri.starts_with("memory://") {
        tracing::warn!(uri = %uri, "using in-memory document store; state is not durable");
        return Ok(Arc::new(MemoryStore::new()));
    }
    anyhow::bail!("unsupported store URI scheme: {uri} (this build supports memory://)")
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(config.log_format);

    let catalog = Arc::new(
        Catalog::load(&config.catalog_path)
            .with_context(|| format!("loading catalog {}", config.catalog_path.display()))?,
    );
    tracing::info!(
        locations = catalog.len(),
        path = %config.catalog_path.display(),
        "location catalog loaded"
    );

    let store = open_store(&config.store_uri)?;
    store
        .ensure_indexes(&index_specs(config.repair_ttl_days))
        .await
        .context("applying index layout")?;

    let controller = Arc::new(RunController::new(
        catalog,
        Arc::clone(&store),
        config.controller_config(),
    ));
    let state = Arc::new(AppState { controller });
    let router = server::router(state, config.allowed_origin.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(port = config.port, "starting faultline control surface");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, router).await.context("server error")?;

    Ok(())
}
