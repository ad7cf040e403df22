//! Operator actions on the ledger: status changes and reroutes.

use crate::custody::{CustodyTracker, RerouteReceipt, RerouteRequest};
use crate::error::ServiceError;
use crate::store::RecordStore;
use crate::types::{AnomalyFinding, AnomalyType, PartStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub part_id: String,
    pub status: PartStatus,
    pub reason: String,
    pub operator_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReceipt {
    pub part_id: String,
    pub previous: PartStatus,
    pub status: PartStatus,
    pub reason: String,
    pub operator_id: String,
    pub changed_at: DateTime<Utc>,
    /// A FLAGGED anomaly was written to the log.
    pub anomaly_recorded: bool,
}

pub struct AdminService {
    store: Arc<dyn RecordStore>,
    tracker: Arc<CustodyTracker>,
}

impl AdminService {
    pub fn new(store: Arc<dyn RecordStore>, tracker: Arc<CustodyTracker>) -> Self {
        Self { store, tracker }
    }

    pub async fn set_status(&self, change: &StatusChange) -> Result<StatusReceipt, ServiceError> {
        if change.operator_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("operator id is required".into()));
        }
        if change.reason.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "status change reason is required".into(),
            ));
        }

        // Same lock as custody advances, so a scan never sees a half-applied change.
        let _guard = self.tracker.locks().acquire(&change.part_id).await;

        let part = self
            .store
            .get_part(&change.part_id)
            .await
            .map_err(|e| ServiceError::internal("status change: part lookup failed", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("part '{}'", change.part_id)))?;

        let updated = self
            .store
            .update_part_status(&change.part_id, change.status)
            .await
            .map_err(|e| ServiceError::internal("status change: update failed", e))?;
        if !updated {
            return Err(ServiceError::NotFound(format!("part '{}'", change.part_id)));
        }

        let changed_at = Utc::now();
        let mut anomaly_recorded = false;
        if change.status == PartStatus::Flagged {
            let finding = AnomalyFinding::new(
                &change.part_id,
                AnomalyType::Flagged,
                serde_json::json!({
                    "reason": change.reason,
                    "operator_id": change.operator_id,
                    "previous_status": part.status,
                }),
                changed_at,
            );
            match self.store.append_anomaly(&finding).await {
                Ok(()) => anomaly_recorded = true,
                Err(e) => warn!(
                    part_id = %change.part_id,
                    error = %e,
                    "failed to record flag in anomaly log"
                ),
            }
        }

        info!(
            part_id = %change.part_id,
            operator_id = %change.operator_id,
            from = %part.status,
            to = %change.status,
            "part status changed"
        );
        Ok(StatusReceipt {
            part_id: change.part_id.clone(),
            previous: part.status,
            status: change.status,
            reason: change.reason.clone(),
            operator_id: change.operator_id.clone(),
            changed_at,
            anomaly_recorded,
        })
    }

    pub async fn reroute(&self, request: &RerouteRequest) -> Result<RerouteReceipt, ServiceError> {
        self.tracker.reroute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;
    use crate::types::{NextAllowed, Part, RoutePlan, Severity};

    fn part() -> Part {
        Part {
            part_id: "P-1".into(),
            fingerprint: "cd".repeat(32),
            issuer_signature: String::new(),
            route_plan: RoutePlan::new(["FACTORY_X", "HUB_A", "STORE_B"]).unwrap(),
            current_checkpoint: "FACTORY_X".into(),
            next_allowed: NextAllowed::Checkpoint("HUB_A".into()),
            status: PartStatus::Active,
            visual_model_id: None,
            updated_at: Utc::now(),
        }
    }

    async fn service() -> (Arc<MemoryStore>, AdminService) {
        let store = Arc::new(MemoryStore::new());
        store.put_part(part()).await;
        let tracker = Arc::new(CustodyTracker::new(store.clone()));
        (store.clone(), AdminService::new(store, tracker))
    }

    fn change(status: PartStatus) -> StatusChange {
        StatusChange {
            part_id: "P-1".into(),
            status,
            reason: "reported by customs".into(),
            operator_id: "OPS-1".into(),
        }
    }

    #[tokio::test]
    async fn test_flagging_writes_anomaly_and_blocks_custody() {
        let (store, admin) = service().await;
        let receipt = admin.set_status(&change(PartStatus::Flagged)).await.unwrap();
        assert_eq!(receipt.previous, PartStatus::Active);
        assert!(receipt.anomaly_recorded);

        let findings = store.anomalies_for("P-1").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].anomaly_type, AnomalyType::Flagged);
        assert_eq!(findings[0].severity, Severity::High);

        let tracker = CustodyTracker::new(store.clone());
        let outcome = tracker.verify("P-1", "HUB_A").await.unwrap();
        assert!(outcome.is_critical_failure());
    }

    #[tokio::test]
    async fn test_quarantine_writes_no_anomaly() {
        let (store, admin) = service().await;
        let receipt = admin
            .set_status(&change(PartStatus::Quarantine))
            .await
            .unwrap();
        assert!(!receipt.anomaly_recorded);
        assert!(store.anomalies_for("P-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_missing_part_and_blank_fields() {
        let (_, admin) = service().await;
        let mut unknown = change(PartStatus::Stolen);
        unknown.part_id = "P-404".into();
        assert!(matches!(
            admin.set_status(&unknown).await,
            Err(ServiceError::NotFound(_))
        ));

        let mut blank = change(PartStatus::Stolen);
        blank.reason = "  ".into();
        assert!(matches!(
            admin.set_status(&blank).await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }
}
