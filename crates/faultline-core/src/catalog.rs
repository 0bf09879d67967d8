//! The weighted location catalog.
//!
//! Loaded once at startup from a JSON file and immutable for the process
//! lifetime. Each entry carries a sampling weight (roughly, population)
//! and a spread radius `sigma_km` used to jitter generated incidents
//! around the location's center.
//!
//! The JSON field names (`lat`, `lng`, `sigmaKm`) match the output of the
//! catalog conversion tooling.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rng::DeterministicRng;

/// Degrees of latitude/longitude per kilometer, the deliberately simple
/// conversion used when jittering coordinates.
pub const DEGREES_PER_KM: f64 = 0.009;

/// One immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Human-readable location name (city).
    pub name: String,
    /// Latitude of the location center, degrees.
    pub lat: f64,
    /// Longitude of the location center, degrees.
    #[serde(rename = "lng")]
    pub lon: f64,
    /// Sampling weight; entries with `weight <= 0` are dropped at load.
    pub weight: f64,
    /// Gaussian spread radius around the center, kilometers.
    #[serde(rename = "sigmaKm")]
    pub sigma_km: f64,
}

impl Location {
    fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.weight.is_finite()
            && self.weight > 0.0
            && self.sigma_km.is_finite()
            && self.sigma_km >= 0.0
    }
}

/// The loaded catalog: validated entries plus a cumulative-weight prefix
/// for weighted sampling by binary search.
#[derive(Debug)]
pub struct Catalog {
    entries: Vec<Location>,
    prefix: Vec<f64>,
    total_weight: f64,
}

impl Catalog {
    /// Builds a catalog from raw entries, dropping invalid ones.
    ///
    /// # Errors
    ///
    /// Returns an error if no valid entry remains.
    pub fn from_entries(raw: Vec<Location>) -> Result<Self> {
        let entries: Vec<Location> = raw.into_iter().filter(Location::is_valid).collect();
        if entries.is_empty() {
            return Err(Error::catalog("no valid locations in catalog"));
        }

        let mut prefix = Vec::with_capacity(entries.len());
        let mut total_weight = 0.0;
        for entry in &entries {
            total_weight += entry.weight;
            prefix.push(total_weight);
        }

        Ok(Self {
            entries,
            prefix,
            total_weight,
        })
    }

    /// Loads and validates the catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if no
    /// valid entry remains after validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::catalog_with_source(format!("failed to read catalog {}", path.display()), e)
        })?;
        let raw: Vec<Location> = serde_json::from_slice(&bytes).map_err(|e| {
            Error::serialization(format!("failed to parse catalog {}: {e}", path.display()))
        })?;
        Self::from_entries(raw)
    }

    /// Number of entries in the catalog. Never zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; an empty catalog fails construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all entry weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Entries in load order.
    #[must_use]
    pub fn entries(&self) -> &[Location] {
        &self.entries
    }

    /// Picks one location, weighted by entry weight.
    ///
    /// Draws `r = uniform() * total_weight` and binary-searches the
    /// cumulative prefix for the entry whose interval contains `r`.
    pub fn pick<'a>(&'a self, rng: &mut DeterministicRng) -> &'a Location {
        let r = rng.uniform() * self.total_weight;
        let idx = self.prefix.partition_point(|&p| p <= r);
        &self.entries[idx.min(self.entries.len() - 1)]
    }

    /// Jitters a location's coordinates by two independent Gaussian draws
    /// (latitude first, then longitude), scaled by `sigma_km * spread_factor`
    /// and converted to degrees.
    pub fn jitter(
        location: &Location,
        spread_factor: f64,
        rng: &mut DeterministicRng,
    ) -> (f64, f64) {
        let scale = location.sigma_km * spread_factor * DEGREES_PER_KM;
        let lat = location.lat + rng.standard_normal() * scale;
        let lon = location.lon + rng.standard_normal() * scale;
        (lat, lon)
    }
}
