//! Shared fixtures for integration tests.
//!
//! All ledger data is built explicitly here; nothing in the library knows
//! about these ids.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use custody_core::config::VerifierConfig;
use custody_core::identity::{derive_fingerprint, IssuerSignature, SignatureStatus};
use custody_core::marketplace::{MarketplaceLookup, MarketplaceSignal, NoListingMarketplace};
use custody_core::pipeline::{ScanSubmission, VerificationPipeline};
use custody_core::store::{RecordStore, VerdictRecord};
use custody_core::types::*;
use custody_core::verdict::{ReasoningService, SynthesisRequest, SynthesizedVerdict, Verdict};
use custody_core::visual::{DescriptionMatch, VisualEvidence, VisualReference};
use custody_core::MemoryStore;
use ed25519_dalek::{Signer, SigningKey};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const ISSUER: &str = "OEM_SIEMENS";
pub const HANDLER: &str = "H-100";

pub fn issuer_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

pub fn issuer_key_record() -> IssuerKeyRecord {
    IssuerKeyRecord {
        issuer_id: ISSUER.into(),
        public_key: hex::encode(issuer_key().verifying_key().to_bytes()),
        revoked: false,
        valid_from: Utc::now() - ChronoDuration::days(30),
        valid_until: None,
    }
}

pub fn sign_as(issuer: &str, fingerprint: &str) -> String {
    IssuerSignature {
        status: SignatureStatus::Valid,
        issuer_id: issuer.into(),
        signature: issuer_key().sign(fingerprint.as_bytes()).to_bytes(),
    }
    .encode()
}

/// Part sitting at `route[current]`.
pub fn part(part_id: &str, route: &[&str], current: usize) -> Part {
    let plan = RoutePlan::new(route.iter().copied()).unwrap();
    let fingerprint = derive_fingerprint(&format!("serial-{part_id}"));
    Part {
        part_id: part_id.into(),
        issuer_signature: sign_as(ISSUER, &fingerprint),
        fingerprint,
        current_checkpoint: route[current].into(),
        next_allowed: plan.next_after(current),
        route_plan: plan,
        status: PartStatus::Active,
        visual_model_id: None,
        updated_at: Utc::now(),
    }
}

pub fn berlin_route() -> Vec<&'static str> {
    vec!["FACTORY_X", "HUB_BERLIN", "WAREHOUSE_DE"]
}

pub fn code_for(part: &Part) -> String {
    format!(
        "{}|{}|{}",
        part.part_id, part.fingerprint, part.issuer_signature
    )
}

/// Handler on duty around the clock, every day.
pub fn handler(regions: &[&str], clearance: ClearanceLevel) -> Handler {
    let shift_schedule: BTreeMap<String, String> = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ]
    .iter()
    .map(|d| (d.to_string(), "00:00-23:59".to_string()))
    .collect();
    Handler {
        handler_id: HANDLER.into(),
        name: "Robin Vogel".into(),
        authorized_regions: regions.iter().map(|r| r.to_string()).collect(),
        shift_schedule,
        clearance,
        active: true,
    }
}

pub async fn seeded_store(parts: Vec<Part>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.put_issuer_key(issuer_key_record()).await;
    store
        .put_handler(handler(
            &["FACTORY_*", "HUB_*", "WAREHOUSE_*", "STORE_*"],
            ClearanceLevel::Level3,
        ))
        .await;
    for p in parts {
        store.put_part(p).await;
    }
    store
}

pub fn servo_reference() -> VisualReference {
    VisualReference {
        model_id: "MDL_SERVO_001".into(),
        part_name: "Industrial Servo Motor".into(),
        manufacturer: "Siemens".into(),
        description: "High-torque servo motor with matte black housing".into(),
        key_features: serde_json::json!({ "rivets": 4, "label_position": "top_right" }),
        color: Some("Black".into()),
        material: Some("Aluminum Alloy".into()),
    }
}

pub fn submission(part: &Part, location: &str) -> ScanSubmission {
    ScanSubmission {
        part_id: part.part_id.clone(),
        code: Some(code_for(part)),
        location: location.into(),
        geo: None,
        handler_id: HANDLER.into(),
        method: ScanMethod::CodeScan,
        timestamp: None,
        visual: VisualEvidence::default(),
    }
}

// ─── Collaborator fakes ───────────────────────────────────────

pub struct ScriptedReasoner {
    pub delay: Duration,
    pub verdict: Option<SynthesizedVerdict>,
    pub comparison: Option<DescriptionMatch>,
    pub calls: AtomicUsize,
}

impl ScriptedReasoner {
    pub fn authentic() -> Self {
        Self {
            delay: Duration::ZERO,
            verdict: Some(SynthesizedVerdict {
                verdict: Verdict::Authentic,
                confidence: 93.0,
                reasoning: "custody, identity and access all verified".into(),
                critical_findings: Vec::new(),
                recommended_action: "Proceed with shipment".into(),
            }),
            comparison: Some(DescriptionMatch {
                match_score: 85.0,
                verdict: Verdict::Authentic,
                reasoning: "housing and rivets match".into(),
                discrepancies: Vec::new(),
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn offline() -> Self {
        Self {
            verdict: None,
            comparison: None,
            ..Self::authentic()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::authentic()
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn synthesize_verdict(&self, _request: &SynthesisRequest) -> Result<SynthesizedVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match &self.verdict {
            Some(v) => Ok(v.clone()),
            None => bail!("connection refused"),
        }
    }

    async fn compare_description(
        &self,
        _description: &str,
        _reference: &VisualReference,
    ) -> Result<DescriptionMatch> {
        tokio::time::sleep(self.delay).await;
        match &self.comparison {
            Some(m) => Ok(m.clone()),
            None => bail!("connection refused"),
        }
    }
}

pub struct StalledMarketplace;

#[async_trait]
impl MarketplaceLookup for StalledMarketplace {
    async fn lookup(&self, _part_id: &str, _fingerprint: &str) -> Result<MarketplaceSignal> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        bail!("unreachable")
    }
}

/// Delegates to a [`MemoryStore`] but can be told to fail audit writes or
/// handler reads.
pub struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    pub fail_audit_writes: bool,
    pub fail_handler_reads: bool,
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn get_part(&self, part_id: &str) -> Result<Option<Part>> {
        self.inner.get_part(part_id).await
    }

    async fn get_handler(&self, handler_id: &str) -> Result<Option<Handler>> {
        if self.fail_handler_reads {
            bail!("handler table lock timeout on shard db-7.internal");
        }
        self.inner.get_handler(handler_id).await
    }

    async fn get_issuer_key(&self, issuer_id: &str) -> Result<Option<IssuerKeyRecord>> {
        self.inner.get_issuer_key(issuer_id).await
    }

    async fn get_visual_reference(&self, model_id: &str) -> Result<Option<VisualReference>> {
        self.inner.get_visual_reference(model_id).await
    }

    async fn get_recent_scans(&self, part_id: &str, limit: usize) -> Result<Vec<ScanEvent>> {
        self.inner.get_recent_scans(part_id, limit).await
    }

    async fn append_scan(&self, scan: &ScanEvent) -> Result<()> {
        if self.fail_audit_writes {
            bail!("scan log unavailable");
        }
        self.inner.append_scan(scan).await
    }

    async fn append_anomaly(&self, finding: &AnomalyFinding) -> Result<()> {
        if self.fail_audit_writes {
            bail!("anomaly log unavailable");
        }
        self.inner.append_anomaly(finding).await
    }

    async fn update_part_stage(
        &self,
        part_id: &str,
        expected_current: &str,
        new_current: &str,
        next_allowed: &NextAllowed,
    ) -> Result<bool> {
        self.inner
            .update_part_stage(part_id, expected_current, new_current, next_allowed)
            .await
    }

    async fn update_route_plan(
        &self,
        part_id: &str,
        expected_current: &str,
        plan: &RoutePlan,
        next_allowed: &NextAllowed,
    ) -> Result<bool> {
        self.inner
            .update_route_plan(part_id, expected_current, plan, next_allowed)
            .await
    }

    async fn update_part_status(&self, part_id: &str, status: PartStatus) -> Result<bool> {
        self.inner.update_part_status(part_id, status).await
    }

    async fn save_verdict(&self, record: &VerdictRecord) -> Result<()> {
        if self.fail_audit_writes {
            bail!("verdict table unavailable");
        }
        self.inner.save_verdict(record).await
    }
}

pub fn pipeline_with(
    store: Arc<dyn RecordStore>,
    reasoner: Arc<dyn ReasoningService>,
    marketplace: Arc<dyn MarketplaceLookup>,
) -> VerificationPipeline {
    VerificationPipeline::new(store, reasoner, marketplace, VerifierConfig::default()).unwrap()
}

pub fn pipeline(store: Arc<MemoryStore>) -> VerificationPipeline {
    pipeline_with(
        store,
        Arc::new(ScriptedReasoner::authentic()),
        Arc::new(NoListingMarketplace),
    )
}
