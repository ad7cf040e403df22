use crate::outcome::CheckOutcome;
use crate::risk::RiskAssessment;
use crate::types::*;
use crate::verdict::FinalVerdict;
use crate::visual::VisualReference;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything persisted about one completed verification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub verdict_id: Uuid,
    pub scan_id: Uuid,
    pub part_id: Option<String>,
    pub verdict: FinalVerdict,
    pub assessment: RiskAssessment,
    pub outcomes: Vec<CheckOutcome>,
    pub created_at: DateTime<Utc>,
}

/// Record-store collaborator.
///
/// The verification core reads and writes ledger state exclusively through
/// this trait; storage engine details stay behind it. Scan history and the
/// anomaly log are append-only and must keep per-part append order under
/// concurrent writers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ── Ledger reads ──

    async fn get_part(&self, part_id: &str) -> Result<Option<Part>>;
    async fn get_handler(&self, handler_id: &str) -> Result<Option<Handler>>;
    async fn get_issuer_key(&self, issuer_id: &str) -> Result<Option<IssuerKeyRecord>>;
    async fn get_visual_reference(&self, model_id: &str) -> Result<Option<VisualReference>>;

    // ── Scan history (append-only, bounded per part) ──

    /// Most recent scans first, at most `limit`.
    async fn get_recent_scans(&self, part_id: &str, limit: usize) -> Result<Vec<ScanEvent>>;
    async fn append_scan(&self, scan: &ScanEvent) -> Result<()>;

    // ── Anomaly log (append-only) ──

    async fn append_anomaly(&self, finding: &AnomalyFinding) -> Result<()>;

    // ── Part position and status ──

    /// Advance a part only if its current checkpoint still equals
    /// `expected_current`. Returns `false` when the stage moved underneath
    /// the caller (or the part vanished).
    async fn update_part_stage(
        &self,
        part_id: &str,
        expected_current: &str,
        new_current: &str,
        next_allowed: &NextAllowed,
    ) -> Result<bool>;

    /// Replace the route plan, guarded the same way as `update_part_stage`.
    async fn update_route_plan(
        &self,
        part_id: &str,
        expected_current: &str,
        plan: &RoutePlan,
        next_allowed: &NextAllowed,
    ) -> Result<bool>;

    async fn update_part_status(&self, part_id: &str, status: PartStatus) -> Result<bool>;

    // ── Verdicts ──

    async fn save_verdict(&self, record: &VerdictRecord) -> Result<()>;
}
