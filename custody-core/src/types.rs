use crate::error::RoutePlanError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Sentinel shown in place of a next checkpoint once a part has reached the
/// end of its route plan.
pub const DELIVERED: &str = "DELIVERED";

// ─── Location codes ───────────────────────────────────────────

/// The four recognized location families. Every checkpoint code starts with
/// one of these prefixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationKind {
    Factory,
    Hub,
    Warehouse,
    Store,
}

impl LocationKind {
    pub const ALL: [LocationKind; 4] = [
        LocationKind::Factory,
        LocationKind::Hub,
        LocationKind::Warehouse,
        LocationKind::Store,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            LocationKind::Factory => "FACTORY_",
            LocationKind::Hub => "HUB_",
            LocationKind::Warehouse => "WAREHOUSE_",
            LocationKind::Store => "STORE_",
        }
    }

    /// Classify a location code by prefix. The code must carry something after
    /// the prefix (`HUB_` alone is not a location).
    pub fn of(location: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            location.len() > kind.prefix().len() && location.starts_with(kind.prefix())
        })
    }

    /// Minimum clearance a handler needs to touch items at this kind of site.
    pub fn required_clearance(self) -> ClearanceLevel {
        match self {
            LocationKind::Factory => ClearanceLevel::Level3,
            LocationKind::Hub => ClearanceLevel::Level2,
            LocationKind::Warehouse | LocationKind::Store => ClearanceLevel::Level1,
        }
    }
}

/// WGS84 coordinate attached to a scan.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

// ─── Route plan ───────────────────────────────────────────────

/// Ordered, duplicate-free list of checkpoints with a position index.
///
/// The list is the canonical order; the index only exists so membership and
/// position lookups don't walk the plan on every scan.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct RoutePlan {
    stops: Vec<String>,
    index: HashMap<String, usize>,
}

impl RoutePlan {
    pub const MIN_STOPS: usize = 2;

    pub fn new<I, S>(stops: I) -> Result<Self, RoutePlanError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stops: Vec<String> = stops.into_iter().map(Into::into).collect();
        if stops.len() < Self::MIN_STOPS {
            return Err(RoutePlanError::TooShort { len: stops.len() });
        }
        let mut index = HashMap::with_capacity(stops.len());
        for (pos, stop) in stops.iter().enumerate() {
            if LocationKind::of(stop).is_none() {
                return Err(RoutePlanError::UnrecognizedLocation(stop.clone()));
            }
            if index.insert(stop.clone(), pos).is_some() {
                return Err(RoutePlanError::DuplicateCheckpoint(stop.clone()));
            }
        }
        Ok(Self { stops, index })
    }

    pub fn position(&self, checkpoint: &str) -> Option<usize> {
        self.index.get(checkpoint).copied()
    }

    pub fn get(&self, pos: usize) -> Option<&str> {
        self.stops.get(pos).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn first(&self) -> &str {
        &self.stops[0]
    }

    pub fn last(&self) -> &str {
        &self.stops[self.stops.len() - 1]
    }

    pub fn stops(&self) -> &[String] {
        &self.stops
    }

    /// What becomes allowed after a confirmed scan at `pos`.
    pub fn next_after(&self, pos: usize) -> NextAllowed {
        match self.stops.get(pos + 1) {
            Some(stop) => NextAllowed::Checkpoint(stop.clone()),
            None => NextAllowed::Delivered,
        }
    }
}

impl TryFrom<Vec<String>> for RoutePlan {
    type Error = RoutePlanError;

    fn try_from(stops: Vec<String>) -> Result<Self, Self::Error> {
        RoutePlan::new(stops)
    }
}

impl From<RoutePlan> for Vec<String> {
    fn from(plan: RoutePlan) -> Self {
        plan.stops
    }
}

impl PartialEq for RoutePlan {
    fn eq(&self, other: &Self) -> bool {
        self.stops == other.stops
    }
}

/// Next checkpoint a part may be scanned at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NextAllowed {
    Checkpoint(String),
    Delivered,
}

impl NextAllowed {
    pub fn checkpoint(&self) -> Option<&str> {
        match self {
            NextAllowed::Checkpoint(c) => Some(c),
            NextAllowed::Delivered => None,
        }
    }
}

impl fmt::Display for NextAllowed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextAllowed::Checkpoint(c) => f.write_str(c),
            NextAllowed::Delivered => f.write_str(DELIVERED),
        }
    }
}

// ─── Parts ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartStatus {
    Active,
    Flagged,
    Stolen,
    Delivered,
    Quarantine,
}

impl PartStatus {
    /// Statuses that stop custody verification before any location comparison.
    pub fn blocks_custody(self) -> bool {
        matches!(self, PartStatus::Flagged | PartStatus::Stolen)
    }
}

impl fmt::Display for PartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PartStatus::Active => "ACTIVE",
            PartStatus::Flagged => "FLAGGED",
            PartStatus::Stolen => "STOLEN",
            PartStatus::Delivered => "DELIVERED",
            PartStatus::Quarantine => "QUARANTINE",
        };
        f.write_str(s)
    }
}

/// Ledger record for one physical part.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub part_id: String,
    /// 64-hex-char digest identifying this physical instance.
    pub fingerprint: String,
    pub issuer_signature: String,
    pub route_plan: RoutePlan,
    pub current_checkpoint: String,
    pub next_allowed: NextAllowed,
    pub status: PartStatus,
    /// Visual reference model, if the part has one on file.
    pub visual_model_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ─── Scans ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanMethod {
    CodeScan,
    ManualAudit,
    VisualInspection,
}

/// One observation of a part at a location. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanEvent {
    pub scan_id: Uuid,
    pub part_id: String,
    pub location: String,
    pub geo: Option<GeoPoint>,
    pub timestamp: DateTime<Utc>,
    pub method: ScanMethod,
    pub handler_id: String,
}

// ─── Handlers ─────────────────────────────────────────────────

/// Ordered clearance tiers. Declaration order is the authorization order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClearanceLevel {
    #[serde(rename = "LEVEL_1")]
    Level1,
    #[serde(rename = "LEVEL_2")]
    Level2,
    #[serde(rename = "LEVEL_3")]
    Level3,
    #[serde(rename = "LEVEL_4")]
    Level4,
}

impl ClearanceLevel {
    pub fn rank(self) -> u8 {
        match self {
            ClearanceLevel::Level1 => 1,
            ClearanceLevel::Level2 => 2,
            ClearanceLevel::Level3 => 3,
            ClearanceLevel::Level4 => 4,
        }
    }
}

impl fmt::Display for ClearanceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LEVEL_{}", self.rank())
    }
}

impl FromStr for ClearanceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LEVEL_1" => Ok(ClearanceLevel::Level1),
            "LEVEL_2" => Ok(ClearanceLevel::Level2),
            "LEVEL_3" => Ok(ClearanceLevel::Level3),
            "LEVEL_4" => Ok(ClearanceLevel::Level4),
            other => Err(format!("unknown clearance level '{other}'")),
        }
    }
}

/// A courier or operator who physically handles parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    pub handler_id: String,
    pub name: String,
    /// Exact location codes or `PREFIX*` wildcards.
    pub authorized_regions: Vec<String>,
    /// Lower-case weekday name → `"HH:MM-HH:MM"` or `"OFF"`.
    pub shift_schedule: BTreeMap<String, String>,
    pub clearance: ClearanceLevel,
    pub active: bool,
}

// ─── Issuer keys ──────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssuerKeyRecord {
    pub issuer_id: String,
    /// Hex-encoded Ed25519 verifying key (32 bytes).
    pub public_key: String,
    pub revoked: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl IssuerKeyRecord {
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && self.valid_until.map_or(true, |until| at <= until)
    }
}

// ─── Anomalies ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    CloneAttack,
    ImpossibleTravel,
    TimeAnomaly,
    StatisticalOutlier,
    /// Administrative flag, not produced by the detector.
    Flagged,
}

impl AnomalyType {
    pub fn severity(self) -> Severity {
        match self {
            AnomalyType::CloneAttack => Severity::Critical,
            AnomalyType::ImpossibleTravel => Severity::High,
            AnomalyType::TimeAnomaly => Severity::Medium,
            AnomalyType::StatisticalOutlier => Severity::Medium,
            AnomalyType::Flagged => Severity::High,
        }
    }
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyType::CloneAttack => "CLONE_ATTACK",
            AnomalyType::ImpossibleTravel => "IMPOSSIBLE_TRAVEL",
            AnomalyType::TimeAnomaly => "TIME_ANOMALY",
            AnomalyType::StatisticalOutlier => "STATISTICAL_OUTLIER",
            AnomalyType::Flagged => "FLAGGED",
        };
        f.write_str(s)
    }
}

/// Persisted audit record of one detected anomaly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    pub anomaly_id: Uuid,
    pub part_id: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub evidence: serde_json::Value,
    pub detected_at: DateTime<Utc>,
}

impl AnomalyFinding {
    pub fn new(
        part_id: &str,
        anomaly_type: AnomalyType,
        evidence: serde_json::Value,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            anomaly_id: Uuid::now_v7(),
            part_id: part_id.to_string(),
            anomaly_type,
            severity: anomaly_type.severity(),
            evidence,
            detected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_plan_rejects_duplicates_and_short_plans() {
        assert!(matches!(
            RoutePlan::new(["FACTORY_X"]),
            Err(RoutePlanError::TooShort { len: 1 })
        ));
        assert!(matches!(
            RoutePlan::new(["FACTORY_X", "HUB_A", "FACTORY_X"]),
            Err(RoutePlanError::DuplicateCheckpoint(c)) if c == "FACTORY_X"
        ));
        assert!(matches!(
            RoutePlan::new(["FACTORY_X", "DEPOT_A"]),
            Err(RoutePlanError::UnrecognizedLocation(c)) if c == "DEPOT_A"
        ));
    }

    #[test]
    fn route_plan_index_matches_order() {
        let plan = RoutePlan::new(["FACTORY_X", "HUB_BERLIN", "WAREHOUSE_DE"]).unwrap();
        assert_eq!(plan.position("HUB_BERLIN"), Some(1));
        assert_eq!(plan.position("STORE_NOWHERE"), None);
        assert_eq!(
            plan.next_after(0),
            NextAllowed::Checkpoint("HUB_BERLIN".into())
        );
        assert_eq!(plan.next_after(2), NextAllowed::Delivered);
    }

    #[test]
    fn route_plan_serde_goes_through_validation() {
        let plan: RoutePlan = serde_json::from_str(r#"["FACTORY_X","HUB_A"]"#).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(serde_json::from_str::<RoutePlan>(r#"["HUB_A","HUB_A"]"#).is_err());
    }

    #[test]
    fn location_prefix_needs_a_suffix() {
        assert_eq!(LocationKind::of("HUB_BERLIN"), Some(LocationKind::Hub));
        assert_eq!(LocationKind::of("HUB_"), None);
        assert_eq!(LocationKind::of("hub_berlin"), None);
    }

    #[test]
    fn clearance_levels_are_strictly_ordered() {
        assert!(ClearanceLevel::Level1 < ClearanceLevel::Level2);
        assert!(ClearanceLevel::Level3 < ClearanceLevel::Level4);
        assert_eq!("LEVEL_3".parse::<ClearanceLevel>(), Ok(ClearanceLevel::Level3));
        assert!("LEVEL_5".parse::<ClearanceLevel>().is_err());
        assert_eq!(
            serde_json::to_string(&ClearanceLevel::Level2).unwrap(),
            "\"LEVEL_2\""
        );
    }

    #[test]
    fn geo_range_check() {
        assert!(GeoPoint::new(52.52, 13.40).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
    }
}
