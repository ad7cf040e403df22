//! Visual inspection for scans that carry no usable code.
//!
//! A free-text description of the item is compared against the reference
//! record for its model by the reasoning service. Nothing here is
//! cryptographic, so the result is always scored with an uncertainty penalty.

use crate::outcome::{CheckDetail, CheckKind, CheckOutcome, Confidence};
use crate::store::RecordStore;
use crate::verdict::{ReasoningService, Verdict};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const UNKNOWN_MODEL: &str = "MDL_UNKNOWN_001";
/// Minimum description match score for a visual pass.
pub const MATCH_THRESHOLD: f64 = 70.0;

/// Ground-truth appearance of one part model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisualReference {
    pub model_id: String,
    pub part_name: String,
    pub manufacturer: String,
    pub description: String,
    #[serde(default)]
    pub key_features: serde_json::Value,
    pub color: Option<String>,
    pub material: Option<String>,
}

/// Reasoning service answer to a description comparison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DescriptionMatch {
    pub match_score: f64,
    pub verdict: Verdict,
    pub reasoning: String,
    #[serde(default)]
    pub discrepancies: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisualDetail {
    pub model_id: String,
    pub image_ref: Option<String>,
    pub match_score: Option<f64>,
    pub verdict: Option<Verdict>,
    pub reasoning: Option<String>,
    pub discrepancies: Vec<String>,
}

/// Best-guess model id from a part id: `PART_SERVO_123` → `MDL_SERVO_001`.
pub fn derive_visual_model(part_id: &str) -> String {
    match part_id.split('_').nth(1) {
        Some(category) if !category.is_empty() => format!("MDL_{category}_001"),
        _ => UNKNOWN_MODEL.to_string(),
    }
}

/// What the caller supplied in place of a code.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualEvidence {
    pub description: Option<String>,
    pub image_ref: Option<String>,
}

pub struct VisualInspector {
    store: Arc<dyn RecordStore>,
    reasoning: Arc<dyn ReasoningService>,
    timeout: Duration,
}

impl VisualInspector {
    pub fn new(
        store: Arc<dyn RecordStore>,
        reasoning: Arc<dyn ReasoningService>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            reasoning,
            timeout,
        }
    }

    /// Resolve the reference model for `part_id`, preferring the ledger's
    /// recorded model over the derived guess.
    pub async fn model_for(&self, part_id: &str) -> Result<String> {
        let recorded = self
            .store
            .get_part(part_id)
            .await?
            .and_then(|p| p.visual_model_id);
        Ok(recorded.unwrap_or_else(|| derive_visual_model(part_id)))
    }

    pub async fn inspect(&self, part_id: &str, evidence: &VisualEvidence) -> Result<CheckOutcome> {
        let model_id = self.model_for(part_id).await?;
        let mut detail = VisualDetail {
            model_id: model_id.clone(),
            image_ref: evidence.image_ref.clone(),
            match_score: None,
            verdict: None,
            reasoning: None,
            discrepancies: Vec::new(),
        };

        let Some(description) = evidence
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        else {
            return Ok(CheckOutcome::fail(
                CheckKind::Visual,
                Confidence::ZERO,
                "no item description supplied",
                CheckDetail::Visual(detail),
            ));
        };

        let Some(reference) = self.store.get_visual_reference(&model_id).await? else {
            info!(part_id, model_id = %model_id, "no visual reference on file");
            return Ok(CheckOutcome::fail(
                CheckKind::Visual,
                Confidence::ZERO,
                format!("no visual reference for model {model_id}"),
                CheckDetail::Visual(detail),
            ));
        };

        let compared = tokio::time::timeout(
            self.timeout,
            self.reasoning.compare_description(description, &reference),
        )
        .await;
        let found = match compared {
            Ok(Ok(m)) => m,
            Ok(Err(e)) => {
                warn!(part_id, model_id = %model_id, error = %e, "description comparison failed");
                return Ok(unavailable(detail));
            }
            Err(_) => {
                warn!(part_id, model_id = %model_id, "description comparison timed out");
                return Ok(unavailable(detail));
            }
        };

        let score = Confidence::new(found.match_score);
        detail.match_score = Some(score.value());
        detail.verdict = Some(found.verdict);
        detail.reasoning = Some(found.reasoning);
        detail.discrepancies = found.discrepancies;

        let outcome = if found.verdict == Verdict::Counterfeit {
            CheckOutcome::fail(
                CheckKind::Visual,
                score,
                "item judged counterfeit",
                CheckDetail::Visual(detail),
            )
            .critical()
        } else if score.value() >= MATCH_THRESHOLD {
            CheckOutcome::pass(CheckKind::Visual, score, CheckDetail::Visual(detail))
        } else {
            CheckOutcome::fail(
                CheckKind::Visual,
                score,
                format!("description match {score} below threshold"),
                CheckDetail::Visual(detail),
            )
        };
        Ok(outcome)
    }
}

fn unavailable(detail: VisualDetail) -> CheckOutcome {
    CheckOutcome::fail(
        CheckKind::Visual,
        Confidence::ZERO,
        "visual comparison unavailable",
        CheckDetail::Visual(detail),
    )
}
