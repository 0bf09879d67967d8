//! Event shapes persisted by the pipeline.
//!
//! Three record kinds exist: incident events (one per generated fault),
//! repair events (one per successful repair emission), and run descriptors
//! (one per logical run). All wire shapes are camelCase JSON.
//!
//! The issue taxonomy is a closed tagged union over the known telecom
//! issue variants, with a catch-all variant so records written by a newer
//! generator still deserialize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Location};
use crate::id::{IncidentId, RunId};
use crate::rng::DeterministicRng;

/// Discriminator persisted on every event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A generated fault.
    Incident,
    /// A scheduled repair that fired and persisted.
    Repair,
}

/// Issue category tags. The repair policy selects on `Infrastructure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    /// Physical-plant and network-core faults.
    Infrastructure,
    /// Subscriber-facing service complaints.
    Consumer,
    /// Enterprise and wholesale account impact.
    Business,
    /// Regulatory and public-safety obligations.
    Federal,
    /// Faults in newer service layers (IoT, edge).
    EmergingTech,
}

/// The known issue variants, dispatched on the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IssueDetail {
    /// Severed fiber span.
    FiberCut {
        /// Length of the affected span.
        #[serde(rename = "segmentKm")]
        segment_km: f64,
    },
    /// Cell site running on batteries after grid loss.
    TowerPowerFailure {
        /// Estimated battery runtime remaining.
        #[serde(rename = "batteryMinutes")]
        battery_minutes: u32,
    },
    /// Saturated backhaul link.
    BackhaulCongestion {
        /// Link utilization at detection time.
        #[serde(rename = "utilizationPct")]
        utilization_pct: u8,
    },
    /// Subscriber billing complaint.
    BillingDispute {
        /// Disputed amount.
        #[serde(rename = "amountUsd")]
        amount_usd: f64,
    },
    /// Elevated call-drop rate in an area.
    DroppedCalls {
        /// Calls dropped in the detection window.
        #[serde(rename = "affectedCalls")]
        affected_calls: u32,
    },
    /// Degraded mobile data throughput.
    SlowData {
        /// Measured downlink throughput.
        #[serde(rename = "throughputMbps")]
        throughput_mbps: f64,
    },
    /// Enterprise SLA violated.
    SlaBreach {
        /// Minutes outside the committed service level.
        #[serde(rename = "breachMinutes")]
        breach_minutes: u32,
    },
    /// Wholesale trunk group out of service.
    TrunkOutage {
        /// Circuits affected.
        circuits: u32,
    },
    /// Emergency-call routing impairment.
    E911Outage {
        /// FIPS code of the affected county.
        #[serde(rename = "countyCode")]
        county_code: u32,
    },
    /// Customer proprietary network information exposure.
    CpniExposure {
        /// Subscriber records involved.
        records: u32,
    },
    /// IoT aggregation gateway fault.
    IotGatewayFault {
        /// Devices dropped from the gateway.
        devices: u32,
    },
    /// Edge compute node in degraded mode.
    EdgeNodeDegraded {
        /// Observed round-trip latency.
        #[serde(rename = "latencyMs")]
        latency_ms: u32,
    },
    /// Catch-all for tags this build does not know.
    #[serde(other)]
    Unknown,
}

impl IssueDetail {
    /// The wire `type` tag for this variant.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::FiberCut { .. } => "fiber_cut",
            Self::TowerPowerFailure { .. } => "tower_power_failure",
            Self::BackhaulCongestion { .. } => "backhaul_congestion",
            Self::BillingDispute { .. } => "billing_dispute",
            Self::DroppedCalls { .. } => "dropped_calls",
            Self::SlowData { .. } => "slow_data",
            Self::SlaBreach { .. } => "sla_breach",
            Self::TrunkOutage { .. } => "trunk_outage",
            Self::E911Outage { .. } => "e911_outage",
            Self::CpniExposure { .. } => "cpni_exposure",
            Self::IotGatewayFault { .. } => "iot_gateway_fault",
            Self::EdgeNodeDegraded { .. } => "edge_node_degraded",
            Self::Unknown => "unknown",
        }
    }

    /// The category this variant belongs to. Unknown tags are treated as
    /// consumer noise, never as infrastructure.
    #[must_use]
    pub fn category(&self) -> IssueCategory {
        match self {
            Self::FiberCut { .. }
            | Self::TowerPowerFailure { .. }
            | Self::BackhaulCongestion { .. } => IssueCategory::Infrastructure,
            Self::BillingDispute { .. } | Self::DroppedCalls { .. } | Self::SlowData { .. } => {
                IssueCategory::Consumer
            }
            Self::SlaBreach { .. } | Self::TrunkOutage { .. } => IssueCategory::Business,
            Self::E911Outage { .. } | Self::CpniExposure { .. } => IssueCategory::Federal,
            Self::IotGatewayFault { .. } | Self::EdgeNodeDegraded { .. } => {
                IssueCategory::EmergingTech
            }
            Self::Unknown => IssueCategory::Consumer,
        }
    }
}

/// Number of concrete (non-catch-all) issue variants the builder draws from.
const ISSUE_VARIANTS: usize = 12;

/// The opaque issue subdocument attached to every incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Variant-specific shape, tagged by `type`.
    #[serde(flatten)]
    pub detail: IssueDetail,
    /// Category tag, denormalized for query-side filtering.
    pub category: IssueCategory,
    /// Severity on a 1 (minor) to 5 (critical) scale.
    pub severity: u8,
}

impl Issue {
    /// Draws one issue shape from the RNG stream.
    ///
    /// Consumption order: variant index, severity, then the variant's
    /// payload draws. Part of the determinism contract.
    pub fn draw(rng: &mut DeterministicRng) -> Self {
        let variant = rng.uniform_index(ISSUE_VARIANTS);
        #[allow(clippy::cast_possible_truncation)]
        let severity = 1 + rng.uniform_index(5) as u8;
        let detail = match variant {
            0 => IssueDetail::FiberCut {
                segment_km: round2(0.2 + rng.uniform() * 24.0),
            },
            1 => IssueDetail::TowerPowerFailure {
                battery_minutes: draw_u32(rng, 10, 480),
            },
            2 => IssueDetail::BackhaulCongestion {
                #[allow(clippy::cast_possible_truncation)]
                utilization_pct: (85 + rng.uniform_index(15)) as u8,
            },
            3 => IssueDetail::BillingDispute {
                amount_usd: round2(5.0 + rng.uniform() * 495.0),
            },
            4 => IssueDetail::DroppedCalls {
                affected_calls: draw_u32(rng, 20, 5_000),
            },
            5 => IssueDetail::SlowData {
                throughput_mbps: round2(0.1 + rng.uniform() * 4.9),
            },
            6 => IssueDetail::SlaBreach {
                breach_minutes: draw_u32(rng, 5, 240),
            },
            7 => IssueDetail::TrunkOutage {
                circuits: draw_u32(rng, 1, 96),
            },
            8 => IssueDetail::E911Outage {
                county_code: draw_u32(rng, 1_000, 56_045),
            },
            9 => IssueDetail::CpniExposure {
                records: draw_u32(rng, 1, 10_000),
            },
            10 => IssueDetail::IotGatewayFault {
                devices: draw_u32(rng, 5, 2_500),
            },
            _ => IssueDetail::EdgeNodeDegraded {
                latency_ms: draw_u32(rng, 40, 900),
            },
        };
        let category = detail.category();
        Self {
            detail,
            category,
            severity,
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[allow(clippy::cast_possible_truncation)]
fn draw_u32(rng: &mut DeterministicRng, lo: u32, hi: u32) -> u32 {
    lo + rng.uniform_index((hi - lo + 1) as usize) as u32
}

/// GeoJSON-style point, `coordinates = [lon, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Always `"Point"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Longitude, then latitude.
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    /// Builds a point from longitude and latitude.
    #[must_use]
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [lon, lat],
        }
    }
}

/// One generated incident, immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentEvent {
    /// Always [`EventKind::Incident`].
    pub kind: EventKind,
    /// Generation instant.
    pub timestamp: DateTime<Utc>,
    /// Jittered latitude.
    pub lat: f64,
    /// Jittered longitude.
    pub lon: f64,
    /// Geo-typed copy of the point for spatial indexing.
    pub geo: GeoPoint,
    /// Source location name.
    pub city: String,
    /// Source location weight.
    pub weight: f64,
    /// Source location spread radius, kilometers.
    pub sigma_km: f64,
    /// The issue subdocument.
    pub issue: Issue,
    /// Owning run.
    pub run_id: RunId,
}

/// Builds one incident event from a sampled location and the RNG stream.
///
/// Pure apart from the RNG: deterministic under the seed, the location,
/// and the jittered point.
#[must_use]
pub fn build_incident(
    location: &Location,
    point: (f64, f64),
    rng: &mut DeterministicRng,
    run_id: &RunId,
    at: DateTime<Utc>,
) -> IncidentEvent {
    let (lat, lon) = point;
    IncidentEvent {
        kind: EventKind::Incident,
        timestamp: at,
        lat,
        lon,
        geo: GeoPoint::new(lon, lat),
        city: location.name.clone(),
        weight: location.weight,
        sigma_km: location.sigma_km,
        issue: Issue::draw(rng),
        run_id: run_id.clone(),
    }
}

/// Samples a location, jitters it, and builds the incident in one step.
#[must_use]
pub fn generate_incident(
    catalog: &Catalog,
    spread_factor: f64,
    rng: &mut DeterministicRng,
    run_id: &RunId,
    at: DateTime<Utc>,
) -> IncidentEvent {
    let location = catalog.pick(rng).clone();
    let point = Catalog::jitter(&location, spread_factor, rng);
    build_incident(&location, point, rng, run_id, at)
}

/// One repair emission, immutable once persisted.
///
/// At most one repair ever persists per `(run_id, incident_id)` pair;
/// the store enforces this with a unique constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairEvent {
    /// Always [`EventKind::Repair`].
    pub kind: EventKind,
    /// Owning run.
    pub run_id: RunId,
    /// The incident this repair references.
    pub incident_id: IncidentId,
    /// The single authoritative instant: when the repair fired and was
    /// persisted.
    pub decided_at: DateTime<Utc>,
    /// Policy category; currently always infrastructure.
    pub category: IssueCategory,
    /// Policy identifier.
    pub policy: String,
    /// Policy version identifier.
    pub policy_version: String,
    /// Human-readable reason.
    pub reason: String,
    /// Deterministic correlation key, see [`repair_dedup_key`].
    pub dedup_key: String,
}

/// Builds the deterministic key `(run, category, incident, policy version)`
/// used for log correlation and duplicate detection.
#[must_use]
pub fn repair_dedup_key(
    run_id: &RunId,
    category: IssueCategory,
    incident_id: &IncidentId,
    policy_version: &str,
) -> String {
    let category = match category {
        IssueCategory::Infrastructure => "infrastructure",
        IssueCategory::Consumer => "consumer",
        IssueCategory::Business => "business",
        IssueCategory::Federal => "federal",
        IssueCategory::EmergingTech => "emerging_tech",
    };
    format!("{run_id}:{category}:{incident_id}:{policy_version}")
}

/// Effective producer parameters persisted in the run descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    /// Aggregate target insert rate, records per second.
    pub rate: u64,
    /// Maximum records per bulk insert.
    pub batch: u64,
    /// Number of producer shards.
    pub shards: u64,
    /// Jitter spread multiplier.
    pub spread_factor: f64,
    /// Seed, when the run was started reproducibly.
    pub seed: Option<u32>,
    /// Whether the repair scheduler was requested.
    pub repairs_enabled: bool,
}

/// One record per logical run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDescriptor {
    /// Unique run identifier.
    pub run_id: RunId,
    /// When the run opened.
    pub started_at: DateTime<Utc>,
    /// When the run closed; null while open.
    pub ended_at: Option<DateTime<Utc>>,
    /// Effective parameters.
    pub params: RunParams,
    /// Size of the loaded location catalog.
    pub catalog_size: usize,
    /// Optional operator note.
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Location;

    fn test_location() -> Location {
        Location {
            name: "Testville".to_string(),
            lat: 41.9,
            lon: -87.6,
            weight: 7.0,
            sigma_km: 12.0,
        }
    }

    #[test]
    fn issue_draw_is_deterministic() {
        let draw = |seed| {
            let mut rng = DeterministicRng::from_seed(Some(seed));
            (0..100).map(|_| Issue::draw(&mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
        assert_ne!(draw(42), draw(43));
    }

    #[test]
    fn issue_categories_match_variants() {
        let mut rng = DeterministicRng::from_seed(Some(5));
        for _ in 0..500 {
            let issue = Issue::draw(&mut rng);
            assert_eq!(issue.category, issue.detail.category());
            assert!((1..=5).contains(&issue.severity));
        }
    }

    #[test]
    fn all_categories_appear_over_many_draws() {
        use std::collections::HashSet;
        let mut rng = DeterministicRng::from_seed(Some(8));
        let seen: HashSet<IssueCategory> =
            (0..1_000).map(|_| Issue::draw(&mut rng).category).collect();
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn issue_serializes_with_type_tag() {
        let issue = Issue {
            detail: IssueDetail::FiberCut { segment_km: 3.5 },
            category: IssueCategory::Infrastructure,
            severity: 4,
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "fiber_cut");
        assert_eq!(json["category"], "infrastructure");
        assert_eq!(json["segmentKm"], 3.5);
    }

    #[test]
    fn unknown_issue_tag_deserializes_to_catch_all() {
        let json = r#"{"type":"quantum_link_flap","category":"consumer","severity":2}"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.detail, IssueDetail::Unknown);
        assert_eq!(issue.detail.type_tag(), "unknown");
    }

    #[test]
    fn incident_builder_is_deterministic_under_seed() {
        let location = test_location();
        let run_id = RunId::from_string("run-test-1");
        let at = Utc::now();
        let build = || {
            let mut rng = DeterministicRng::from_seed(Some(42));
            let point = Catalog::jitter(&location, 1.0, &mut rng);
            build_incident(&location, point, &mut rng, &run_id, at)
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn incident_geo_holds_lon_lat_order() {
        let location = test_location();
        let run_id = RunId::from_string("run-test-1");
        let mut rng = DeterministicRng::from_seed(Some(1));
        let event = build_incident(&location, (40.0, -73.0), &mut rng, &run_id, Utc::now());
        assert_eq!(event.geo.coordinates, [-73.0, 40.0]);
        assert_eq!(event.geo.kind, "Point");
        assert_eq!(event.kind, EventKind::Incident);
    }

    #[test]
    fn incident_wire_shape_is_camel_case() {
        let location = test_location();
        let run_id = RunId::from_string("run-test-1");
        let mut rng = DeterministicRng::from_seed(Some(1));
        let event = build_incident(&location, (40.0, -73.0), &mut rng, &run_id, Utc::now());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "incident");
        assert!(json.get("sigmaKm").is_some());
        assert!(json.get("runId").is_some());
    }

    #[test]
    fn repair_dedup_key_shape() {
        let run_id = RunId::from_string("run-1700000000000-0000002a");
        let incident = IncidentId::new("01J0ABC");
        let key = repair_dedup_key(&run_id, IssueCategory::Infrastructure, &incident, "v1");
        assert_eq!(key, "run-1700000000000-0000002a:infrastructure:01J0ABC:v1");
    }
}
