//! End-to-end scan verification.
//!
//! Digital path: route → custody gate → {identity, anomaly, marketplace}
//! in parallel → access → risk → verdict. Visual path: route → location
//! check → visual inspection → access → visual risk → verdict.
//!
//! Each request runs on its own tokio task. If the caller goes away the
//! task still finishes, so custody advances and audit records stay
//! consistent, but nothing partial is ever handed back.

use crate::access::AccessAuthorizer;
use crate::admin::AdminService;
use crate::anomaly::AnomalyDetector;
use crate::config::{PipelineConfig, VerifierConfig};
use crate::custody::{invalid_location_outcome, validate_scan_location, CustodyTracker};
use crate::error::{ConfigError, ServiceError};
use crate::identity::IdentityVerifier;
use crate::marketplace::MarketplaceLookup;
use crate::outcome::{CheckKind, CheckOutcome};
use crate::risk::{RiskAggregator, RiskAssessment};
use crate::route::{select_route, DigitalCode, RouteDecision, ScanRoute};
use crate::store::{RecordStore, VerdictRecord};
use crate::types::{GeoPoint, ScanEvent, ScanMethod};
use crate::verdict::{FinalVerdict, ReasoningService, ScanPath, SynthesisRequest, VerdictSynthesizer};
use crate::visual::{VisualEvidence, VisualInspector};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One scan as submitted by a handler's device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSubmission {
    pub part_id: String,
    /// `partId|fingerprint|signature`, when a code was readable.
    pub code: Option<String>,
    pub location: String,
    pub geo: Option<GeoPoint>,
    pub handler_id: String,
    pub method: ScanMethod,
    /// Defaults to the time of submission.
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub visual: VisualEvidence,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub scan_id: Uuid,
    pub part_id: String,
    pub path: ScanPath,
    pub route: RouteDecision,
    pub outcomes: Vec<CheckOutcome>,
    pub assessment: RiskAssessment,
    pub verdict: FinalVerdict,
    pub completed_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn outcome(&self, kind: CheckKind) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }
}

struct Inner {
    store: Arc<dyn RecordStore>,
    custody: Arc<CustodyTracker>,
    identity: IdentityVerifier,
    anomaly: AnomalyDetector,
    access: AccessAuthorizer,
    risk: RiskAggregator,
    synthesizer: VerdictSynthesizer,
    visual: VisualInspector,
    marketplace: Arc<dyn MarketplaceLookup>,
    config: PipelineConfig,
}

#[derive(Clone)]
pub struct VerificationPipeline {
    inner: Arc<Inner>,
}

impl VerificationPipeline {
    /// Wire up the checks. Fails if `config` does not validate, so the
    /// aggregator never runs with weights that do not sum to 1.0.
    pub fn new(
        store: Arc<dyn RecordStore>,
        reasoning: Arc<dyn ReasoningService>,
        marketplace: Arc<dyn MarketplaceLookup>,
        config: VerifierConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let reasoning_timeout = config.pipeline.reasoning_timeout();
        Ok(Self {
            inner: Arc::new(Inner {
                custody: Arc::new(CustodyTracker::new(store.clone())),
                identity: IdentityVerifier::new(store.clone()),
                anomaly: AnomalyDetector::new(store.clone(), config.anomaly),
                access: AccessAuthorizer::new(store.clone()),
                risk: RiskAggregator::new(config.risk),
                synthesizer: VerdictSynthesizer::new(reasoning.clone(), reasoning_timeout),
                visual: VisualInspector::new(store.clone(), reasoning, reasoning_timeout),
                marketplace,
                config: config.pipeline,
                store,
            }),
        })
    }

    /// The tracker owning per-part custody locks.
    pub fn custody(&self) -> Arc<CustodyTracker> {
        self.inner.custody.clone()
    }

    /// Operator service sharing this pipeline's custody locks.
    pub fn admin(&self) -> AdminService {
        AdminService::new(self.inner.store.clone(), self.custody())
    }

    pub async fn submit(
        &self,
        submission: ScanSubmission,
    ) -> Result<VerificationReport, ServiceError> {
        if submission.handler_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("handler id is required".into()));
        }
        if submission.location.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("location is required".into()));
        }
        let decision = select_route(submission.code.as_deref());
        if !decision.is_digital() && submission.part_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "a part id is required when no usable code is present".into(),
            ));
        }

        let pipeline = self.clone();
        let task = tokio::spawn(async move { pipeline.run(submission, decision).await });
        match task.await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(ServiceError::internal("verification failed", e)),
            Err(e) => Err(ServiceError::internal("verification task aborted", e.into())),
        }
    }

    async fn run(
        &self,
        submission: ScanSubmission,
        decision: RouteDecision,
    ) -> Result<VerificationReport> {
        let scan_id = Uuid::now_v7();

        let (part_id, path, outcomes, assessment) = match &decision.route {
            ScanRoute::Digital(code) => {
                let (outcomes, assessment) = self.run_digital(scan_id, code, &submission).await;
                (code.part_id.clone(), ScanPath::Digital, outcomes, assessment)
            }
            ScanRoute::Visual { reason, .. } => {
                info!(part_id = %submission.part_id, %reason, "routing scan to visual inspection");
                let (outcomes, assessment) = self.run_visual(scan_id, &submission).await;
                (submission.part_id.clone(), ScanPath::Visual, outcomes, assessment)
            }
        };

        let request = SynthesisRequest {
            scan_id,
            part_id: Some(part_id.clone()),
            path,
            location: submission.location.clone(),
            outcomes,
            assessment,
        };
        let verdict = self.inner.synthesizer.synthesize(&request).await;
        let SynthesisRequest {
            outcomes,
            assessment,
            ..
        } = request;

        info!(
            %scan_id,
            part_id = %part_id,
            score = assessment.overall_score,
            level = %assessment.level,
            verdict = %verdict.verdict,
            "verification complete"
        );

        let record = VerdictRecord {
            verdict_id: Uuid::now_v7(),
            scan_id,
            part_id: Some(part_id.clone()),
            verdict: verdict.clone(),
            assessment: assessment.clone(),
            outcomes: outcomes.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.inner.store.save_verdict(&record).await {
            warn!(%scan_id, error = %e, "failed to persist verdict");
        }

        Ok(VerificationReport {
            scan_id,
            part_id,
            path,
            route: decision,
            outcomes,
            assessment,
            verdict,
            completed_at: record.created_at,
        })
    }

    async fn run_digital(
        &self,
        scan_id: Uuid,
        code: &DigitalCode,
        submission: &ScanSubmission,
    ) -> (Vec<CheckOutcome>, RiskAssessment) {
        let inner = &self.inner;
        let part_id = code.part_id.as_str();
        if !submission.part_id.is_empty() && submission.part_id != code.part_id {
            warn!(
                submitted = %submission.part_id,
                coded = %code.part_id,
                "submitted part id differs from code; using code"
            );
        }
        let at = submission.timestamp.unwrap_or_else(Utc::now);
        let scan = ScanEvent {
            scan_id,
            part_id: code.part_id.clone(),
            location: submission.location.clone(),
            geo: submission.geo,
            timestamp: at,
            method: submission.method,
            handler_id: submission.handler_id.clone(),
        };

        // Custody is a gate: it runs alone, before anything else.
        let custody = match validate_scan_location(&scan.location, scan.geo.as_ref()) {
            Err(reason) => invalid_location_outcome(&scan.location, reason),
            Ok(_) => inner
                .custody
                .verify(part_id, &scan.location)
                .await
                .unwrap_or_else(|e| degraded(CheckKind::Custody, e)),
        };

        let identity = async {
            let part = inner.store.get_part(part_id).await?;
            inner
                .identity
                .verify(part.as_ref(), &code.fingerprint, &code.issuer_signature, at)
                .await
        };
        let anomaly = inner.anomaly.detect(&scan, inner.config.history_limit);
        let marketplace = tokio::time::timeout(
            inner.config.marketplace_timeout(),
            inner.marketplace.lookup(part_id, &code.fingerprint),
        );
        let (identity, anomaly, marketplace) = tokio::join!(identity, anomaly, marketplace);

        let identity = identity.unwrap_or_else(|e| degraded(CheckKind::Identity, e));
        let anomaly = anomaly.unwrap_or_else(|e| degraded(CheckKind::Anomaly, e));
        let marketplace = match marketplace {
            Ok(Ok(signal)) => signal.into_outcome(),
            Ok(Err(e)) => degraded(CheckKind::Marketplace, e),
            Err(_) => {
                warn!(part_id, "marketplace lookup timed out");
                CheckOutcome::unavailable(CheckKind::Marketplace, "marketplace lookup timed out")
            }
        };

        self.record_scan(&scan).await;

        let access = inner
            .access
            .verify(&scan.handler_id, &scan.location, at)
            .await
            .unwrap_or_else(|e| degraded(CheckKind::Access, e));

        let outcomes = vec![custody, identity, anomaly, access, marketplace];
        let assessment = inner.risk.aggregate(&outcomes);
        (outcomes, assessment)
    }

    async fn run_visual(
        &self,
        scan_id: Uuid,
        submission: &ScanSubmission,
    ) -> (Vec<CheckOutcome>, RiskAssessment) {
        let inner = &self.inner;
        let at = submission.timestamp.unwrap_or_else(Utc::now);
        let scan = ScanEvent {
            scan_id,
            part_id: submission.part_id.clone(),
            location: submission.location.clone(),
            geo: submission.geo,
            timestamp: at,
            method: submission.method,
            handler_id: submission.handler_id.clone(),
        };

        let location = validate_scan_location(&scan.location, scan.geo.as_ref())
            .err()
            .map(|reason| invalid_location_outcome(&scan.location, reason));

        let visual = inner
            .visual
            .inspect(&scan.part_id, &submission.visual)
            .await
            .unwrap_or_else(|e| degraded(CheckKind::Visual, e));

        self.record_scan(&scan).await;

        let access = inner
            .access
            .verify(&scan.handler_id, &scan.location, at)
            .await
            .unwrap_or_else(|e| degraded(CheckKind::Access, e));

        // A bad location leads the report; it carries no visual weight.
        let outcomes: Vec<CheckOutcome> = location.into_iter().chain([visual, access]).collect();
        let assessment = inner.risk.aggregate_visual(&outcomes);
        (outcomes, assessment)
    }

    async fn record_scan(&self, scan: &ScanEvent) {
        if let Err(e) = self.inner.store.append_scan(scan).await {
            warn!(
                part_id = %scan.part_id,
                scan_id = %scan.scan_id,
                error = %e,
                "failed to append scan to history"
            );
        }
    }
}

/// A check that hit an internal fault. The cause is logged, never returned.
fn degraded(kind: CheckKind, err: anyhow::Error) -> CheckOutcome {
    warn!(check = %kind, error = ?err, "check could not complete");
    CheckOutcome::unavailable(kind, format!("{kind} check unavailable"))
}
