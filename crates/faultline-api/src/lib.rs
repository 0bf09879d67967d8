//! # faultline-api
//!
//! The thin HTTP control surface over the faultline pipeline:
//!
//! - `GET /status` — combined producer/scheduler snapshot
//! - `POST /start` — establish a run
//! - `POST /stop` — tear the run down
//! - `GET /healthz` — liveness probe
//!
//! The hard logic lives in `faultline-engine`; this crate maps requests
//! and errors to JSON, loads configuration from the environment, and owns
//! the binary entrypoint.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod server;
