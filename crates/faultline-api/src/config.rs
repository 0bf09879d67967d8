//! Server configuration, loaded from environment variables.

use std::path::PathBuf;

use faultline_core::observability::LogFormat;
use faultline_engine::controller::ControllerConfig;
use faultline_engine::{Error, Result};

/// Configuration for the faultline control surface.
///
/// The database and collection names are forwarded to networked store
/// backends; the in-memory backend ignores them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control port.
    pub port: u16,
    /// Store connection URI. This build supports `memory://`.
    pub store_uri: String,
    /// Logical database name.
    pub database: String,
    /// Incident collection name.
    pub incidents_collection: String,
    /// Repair collection name.
    pub repairs_collection: String,
    /// CORS allowed origin; CORS is disabled when unset.
    pub allowed_origin: Option<String>,
    /// Moving-average window, seconds.
    pub window_secs: usize,
    /// Path to the location catalog JSON.
    pub catalog_path: PathBuf,
    /// Cap on producer shards.
    pub max_shards: u64,
    /// Cap on batch size.
    pub max_batch: u64,
    /// Cap on aggregate rate.
    pub max_rate: u64,
    /// Request a TTL index pruning repairs after this many days; zero
    /// disables pruning.
    pub repair_ttl_days: u32,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5050,
            store_uri: "memory://local".to_string(),
            database: "faultline".to_string(),
            incidents_collection: "incidents".to_string(),
            repairs_collection: "repairs".to_string(),
            allowed_origin: None,
            window_secs: 10,
            catalog_path: PathBuf::from("data/cities.json"),
            max_shards: 128,
            max_batch: 50_000,
            max_rate: 1_000_000,
            repair_ttl_days: 0,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `FAULTLINE_PORT`
    /// - `FAULTLINE_STORE_URI`
    /// - `FAULTLINE_DB`
    /// - `FAULTLINE_INCIDENTS_COLLECTION`
    /// - `FAULTLINE_REPAIRS_COLLECTION`
    /// - `FAULTLINE_ALLOWED_ORIGIN`
    /// - `FAULTLINE_MA_WINDOW_SECS`
    /// - `FAULTLINE_CATALOG_PATH`
    /// - `FAULTLINE_MAX_SHARDS`
    /// - `FAULTLINE_MAX_BATCH`
    /// - `FAULTLINE_MAX_RATE`
    /// - `FAULTLINE_REPAIR_TTL_DAYS`
    /// - `FAULTLINE_LOG_FORMAT` (`json` | `pretty`)
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("FAULTLINE_PORT")? {
            config.port = port;
        }
        if let Some(uri) = env_string("FAULTLINE_STORE_URI") {
            config.store_uri = uri;
        }
        if let Some(db) = env_string("FAULTLINE_DB") {
            config.database = db;
        }
        if let Some(name) = env_string("FAULTLINE_INCIDENTS_COLLECTION") {
            config.incidents_collection = name;
        }
        if let Some(name) = env_string("FAULTLINE_REPAIRS_COLLECTION") {
            config.repairs_collection = name;
        }
        config.allowed_origin = env_string("FAULTLINE_ALLOWED_ORIGIN");
        if let Some(secs) = env_usize("FAULTLINE_MA_WINDOW_SECS")? {
            if secs == 0 {
                return Err(Error::invalid_argument(
                    "FAULTLINE_MA_WINDOW_SECS must be greater than 0",
                ));
            }
            config.window_secs = secs;
        }
        if let Some(path) = env_string("FAULTLINE_CATALOG_PATH") {
            config.catalog_path = PathBuf::from(path);
        }
        if let Some(cap) = env_u64("FAULTLINE_MAX_SHARDS")? {
            config.max_shards = cap;
        }
        if let Some(cap) = env_u64("FAULTLINE_MAX_BATCH")? {
            config.max_batch = cap;
        }
        if let Some(cap) = env_u64("FAULTLINE_MAX_RATE")? {
            config.max_rate = cap;
        }
        if let Some(days) = env_u32("FAULTLINE_REPAIR_TTL_DAYS")? {
            config.repair_ttl_days = days;
        }
        if let Some(format) = env_string("FAULTLINE_LOG_FORMAT") {
            config.log_format = parse_log_format(&format)?;
        }

        Ok(config)
    }

    /// The engine configuration this server config implies.
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_rate: self.max_rate,
            max_batch: self.max_batch,
            max_shards: self.max_shards,
            window_secs: self.window_secs,
            ..ControllerConfig::default()
        }
    }
}

fn parse_log_format(value: &str) -> Result<LogFormat> {
    match value.to_ascii_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "pretty" => Ok(LogFormat::Pretty),
        _ => Err(Error::invalid_argument(format!(
            "FAULTLINE_LOG_FORMAT must be json or pretty (got {value})"
        ))),
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::invalid_argument(format!("{name} must be a u16: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::invalid_argument(format!("{name} must be a u32: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::invalid_argument(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::invalid_argument(format!("{name} must be a usize: {e}")))
}
