use crate::store::{RecordStore, VerdictRecord};
use crate::types::*;
use crate::visual::VisualReference;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Default number of scans retained per part.
pub const DEFAULT_SCAN_RETENTION: usize = 10;

#[derive(Default)]
struct Ledger {
    parts: HashMap<String, Part>,
    handlers: HashMap<String, Handler>,
    issuer_keys: HashMap<String, IssuerKeyRecord>,
    visual_refs: HashMap<String, VisualReference>,
}

/// In-process record store.
///
/// Ledger tables sit behind one lock; scan history, anomalies and verdicts
/// each have their own so audit writes don't contend with part reads.
pub struct MemoryStore {
    ledger: RwLock<Ledger>,
    scans: RwLock<HashMap<String, VecDeque<ScanEvent>>>,
    anomalies: RwLock<Vec<AnomalyFinding>>,
    verdicts: RwLock<Vec<VerdictRecord>>,
    scan_retention: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_scan_retention(DEFAULT_SCAN_RETENTION)
    }

    pub fn with_scan_retention(scan_retention: usize) -> Self {
        Self {
            ledger: RwLock::new(Ledger::default()),
            scans: RwLock::new(HashMap::new()),
            anomalies: RwLock::new(Vec::new()),
            verdicts: RwLock::new(Vec::new()),
            scan_retention: scan_retention.max(1),
        }
    }

    // ── Loading ──

    pub async fn put_part(&self, part: Part) {
        self.ledger
            .write()
            .await
            .parts
            .insert(part.part_id.clone(), part);
    }

    pub async fn put_handler(&self, handler: Handler) {
        self.ledger
            .write()
            .await
            .handlers
            .insert(handler.handler_id.clone(), handler);
    }

    pub async fn put_issuer_key(&self, key: IssuerKeyRecord) {
        self.ledger
            .write()
            .await
            .issuer_keys
            .insert(key.issuer_id.clone(), key);
    }

    pub async fn put_visual_reference(&self, reference: VisualReference) {
        self.ledger
            .write()
            .await
            .visual_refs
            .insert(reference.model_id.clone(), reference);
    }

    // ── Inspection ──

    pub async fn anomalies_for(&self, part_id: &str) -> Vec<AnomalyFinding> {
        self.anomalies
            .read()
            .await
            .iter()
            .filter(|a| a.part_id == part_id)
            .cloned()
            .collect()
    }

    pub async fn verdicts(&self) -> Vec<VerdictRecord> {
        self.verdicts.read().await.clone()
    }

    /// Full retained history, oldest timestamp first.
    pub async fn scan_history(&self, part_id: &str) -> Vec<ScanEvent> {
        self.scans
            .read()
            .await
            .get(part_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_part(&self, part_id: &str) -> Result<Option<Part>> {
        Ok(self.ledger.read().await.parts.get(part_id).cloned())
    }

    async fn get_handler(&self, handler_id: &str) -> Result<Option<Handler>> {
        Ok(self.ledger.read().await.handlers.get(handler_id).cloned())
    }

    async fn get_issuer_key(&self, issuer_id: &str) -> Result<Option<IssuerKeyRecord>> {
        Ok(self.ledger.read().await.issuer_keys.get(issuer_id).cloned())
    }

    async fn get_visual_reference(&self, model_id: &str) -> Result<Option<VisualReference>> {
        Ok(self.ledger.read().await.visual_refs.get(model_id).cloned())
    }

    async fn get_recent_scans(&self, part_id: &str, limit: usize) -> Result<Vec<ScanEvent>> {
        let scans = self.scans.read().await;
        let mut recent: Vec<ScanEvent> = scans
            .get(part_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn append_scan(&self, scan: &ScanEvent) -> Result<()> {
        let mut scans = self.scans.write().await;
        let queue = scans.entry(scan.part_id.clone()).or_default();
        // Kept in timestamp order so eviction drops the oldest observation,
        // not the earliest insert.
        let at = queue.partition_point(|s| s.timestamp <= scan.timestamp);
        queue.insert(at, scan.clone());
        while queue.len() > self.scan_retention {
            queue.pop_front();
        }
        Ok(())
    }

    async fn append_anomaly(&self, finding: &AnomalyFinding) -> Result<()> {
        self.anomalies.write().await.push(finding.clone());
        Ok(())
    }

    async fn update_part_stage(
        &self,
        part_id: &str,
        expected_current: &str,
        new_current: &str,
        next_allowed: &NextAllowed,
    ) -> Result<bool> {
        let mut ledger = self.ledger.write().await;
        let Some(part) = ledger.parts.get_mut(part_id) else {
            return Ok(false);
        };
        if part.current_checkpoint != expected_current {
            return Ok(false);
        }
        part.current_checkpoint = new_current.to_string();
        part.next_allowed = next_allowed.clone();
        part.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_route_plan(
        &self,
        part_id: &str,
        expected_current: &str,
        plan: &RoutePlan,
        next_allowed: &NextAllowed,
    ) -> Result<bool> {
        let mut ledger = self.ledger.write().await;
        let Some(part) = ledger.parts.get_mut(part_id) else {
            return Ok(false);
        };
        if part.current_checkpoint != expected_current {
            return Ok(false);
        }
        part.route_plan = plan.clone();
        part.next_allowed = next_allowed.clone();
        part.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_part_status(&self, part_id: &str, status: PartStatus) -> Result<bool> {
        let mut ledger = self.ledger.write().await;
        match ledger.parts.get_mut(part_id) {
            Some(part) => {
                part.status = status;
                part.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_verdict(&self, record: &VerdictRecord) -> Result<()> {
        self.verdicts.write().await.push(record.clone());
        Ok(())
    }
}
