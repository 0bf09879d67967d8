//! Strongly-typed identifiers for faultline entities.
//!
//! Identifiers are distinct newtypes so a run id can never be passed where
//! an incident id is expected. A [`RunId`] is derived from the run's start
//! instant and seed material, so two runs started at different instants or
//! with different seeds never collide, and the id alone tells an operator
//! when the run began.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unique identifier for one logical run of the generator.
///
/// Stable for the lifetime of the run; derived from the start instant
/// (millisecond precision) and the seed material in effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Derives a run id from the start instant and seed material.
    #[must_use]
    pub fn derive(started_at: DateTime<Utc>, seed_material: u32) -> Self {
        Self(format!(
            "run-{}-{seed_material:08x}",
            started_at.timestamp_millis()
        ))
    }

    /// Wraps an existing run id string (e.g. read back from the store).
    #[must_use]
    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A store-assigned identifier for one persisted incident event.
///
/// Opaque to the engine; the repair scheduler keys its in-flight timer
/// table and the repair uniqueness constraint on this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    /// Wraps a store-assigned identifier.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
