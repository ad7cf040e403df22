//! Final verdict synthesis through an external reasoning service.
//!
//! The service sees every outcome plus the risk assessment and names a
//! verdict. It is never trusted to be up: failures, timeouts and
//! out-of-range answers all collapse to a fixed fallback verdict.

use crate::outcome::{CheckOutcome, Confidence};
use crate::risk::RiskAssessment;
use crate::visual::{DescriptionMatch, VisualReference};
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const FALLBACK_CONFIDENCE: f64 = 50.0;
pub const FALLBACK_REASONING: &str = "reasoning service unavailable";
pub const FALLBACK_FINDING: &str = "synthesis failed";
pub const FALLBACK_ACTION: &str = "MANUAL_REVIEW";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Authentic,
    Counterfeit,
    Suspicious,
    NeedsReview,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Authentic => "AUTHENTIC",
            Verdict::Counterfeit => "COUNTERFEIT",
            Verdict::Suspicious => "SUSPICIOUS",
            Verdict::NeedsReview => "NEEDS_REVIEW",
        };
        f.write_str(s)
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
            "AUTHENTIC" => Ok(Verdict::Authentic),
            "COUNTERFEIT" => Ok(Verdict::Counterfeit),
            "SUSPICIOUS" => Ok(Verdict::Suspicious),
            "NEEDS_REVIEW" => Ok(Verdict::NeedsReview),
            other => Err(format!("unknown verdict '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanPath {
    Digital,
    Visual,
}

/// Everything the reasoning service is shown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub scan_id: Uuid,
    pub part_id: Option<String>,
    pub path: ScanPath,
    pub location: String,
    pub outcomes: Vec<CheckOutcome>,
    pub assessment: RiskAssessment,
}

/// Raw answer from the reasoning service, before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedVerdict {
    pub verdict: Verdict,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub critical_findings: Vec<String>,
    pub recommended_action: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictSource {
    ReasoningService,
    Fallback,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub verdict: Verdict,
    pub confidence: Confidence,
    pub reasoning: String,
    pub critical_findings: Vec<String>,
    pub recommended_action: String,
    pub source: VerdictSource,
}

impl FinalVerdict {
    pub fn fallback() -> Self {
        Self {
            verdict: Verdict::NeedsReview,
            confidence: Confidence::new(FALLBACK_CONFIDENCE),
            reasoning: FALLBACK_REASONING.to_string(),
            critical_findings: vec![FALLBACK_FINDING.to_string()],
            recommended_action: FALLBACK_ACTION.to_string(),
            source: VerdictSource::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == VerdictSource::Fallback
    }

    fn accept(raw: SynthesizedVerdict) -> Result<Self> {
        if !raw.confidence.is_finite() || !(0.0..=100.0).contains(&raw.confidence) {
            bail!("confidence {} outside [0, 100]", raw.confidence);
        }
        Ok(Self {
            verdict: raw.verdict,
            confidence: Confidence::new(raw.confidence),
            reasoning: raw.reasoning,
            critical_findings: raw.critical_findings,
            recommended_action: raw.recommended_action,
            source: VerdictSource::ReasoningService,
        })
    }
}

/// External reasoning collaborator.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn synthesize_verdict(&self, request: &SynthesisRequest) -> Result<SynthesizedVerdict>;

    async fn compare_description(
        &self,
        description: &str,
        reference: &VisualReference,
    ) -> Result<DescriptionMatch>;
}

pub struct VerdictSynthesizer {
    service: Arc<dyn ReasoningService>,
    timeout: Duration,
}

impl VerdictSynthesizer {
    pub fn new(service: Arc<dyn ReasoningService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub fn service(&self) -> Arc<dyn ReasoningService> {
        self.service.clone()
    }

    /// Always returns a verdict; the fallback stands in for any failure.
    pub async fn synthesize(&self, request: &SynthesisRequest) -> FinalVerdict {
        let answer = tokio::time::timeout(self.timeout, self.service.synthesize_verdict(request)).await;
        let result = match answer {
            Ok(Ok(raw)) => FinalVerdict::accept(raw),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(anyhow::anyhow!(
                "no answer within {} ms",
                self.timeout.as_millis()
            )),
        };
        match result {
            Ok(verdict) => {
                debug!(scan_id = %request.scan_id, verdict = %verdict.verdict, "verdict synthesized");
                verdict
            }
            Err(e) => {
                warn!(scan_id = %request.scan_id, error = %e, "verdict synthesis degraded to fallback");
                FinalVerdict::fallback()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskConfig;
    use crate::risk::RiskAggregator;

    struct Scripted {
        delay: Duration,
        answer: Option<SynthesizedVerdict>,
    }

    #[async_trait]
    impl ReasoningService for Scripted {
        async fn synthesize_verdict(&self, _: &SynthesisRequest) -> Result<SynthesizedVerdict> {
            tokio::time::sleep(self.delay).await;
            match &self.answer {
                Some(a) => Ok(a.clone()),
                None => bail!("model returned prose"),
            }
        }

        async fn compare_description(
            &self,
            _: &str,
            _: &VisualReference,
        ) -> Result<DescriptionMatch> {
            bail!("not scripted")
        }
    }

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            scan_id: Uuid::now_v7(),
            part_id: Some("P-1".into()),
            path: ScanPath::Digital,
            location: "HUB_A".into(),
            outcomes: Vec::new(),
            assessment: RiskAggregator::new(RiskConfig::default()).aggregate(&[]),
        }
    }

    fn answer(confidence: f64) -> SynthesizedVerdict {
        SynthesizedVerdict {
            verdict: Verdict::Authentic,
            confidence,
            reasoning: "all checks clean".into(),
            critical_findings: Vec::new(),
            recommended_action: "APPROVE".into(),
        }
    }

    fn synthesizer(delay_ms: u64, answer: Option<SynthesizedVerdict>) -> VerdictSynthesizer {
        VerdictSynthesizer::new(
            Arc::new(Scripted {
                delay: Duration::from_millis(delay_ms),
                answer,
            }),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_verdict_parsing() {
        assert_eq!("needs review".parse::<Verdict>(), Ok(Verdict::NeedsReview));
        assert_eq!("Counterfeit".parse::<Verdict>(), Ok(Verdict::Counterfeit));
        assert!("GENUINE".parse::<Verdict>().is_err());
    }

    #[tokio::test]
    async fn test_service_answer_is_used() {
        let v = synthesizer(0, Some(answer(92.0))).synthesize(&request()).await;
        assert_eq!(v.verdict, Verdict::Authentic);
        assert_eq!(v.source, VerdictSource::ReasoningService);
    }

    #[tokio::test]
    async fn test_error_and_bad_confidence_fall_back() {
        let v = synthesizer(0, None).synthesize(&request()).await;
        assert!(v.is_fallback());

        let v = synthesizer(0, Some(answer(140.0))).synthesize(&request()).await;
        assert_eq!(v, FinalVerdict::fallback());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let v = synthesizer(5_000, Some(answer(92.0)))
            .synthesize(&request())
            .await;
        assert_eq!(v.verdict, Verdict::NeedsReview);
        assert_eq!(v.confidence.value(), FALLBACK_CONFIDENCE);
        assert_eq!(v.reasoning, FALLBACK_REASONING);
        assert_eq!(v.critical_findings, vec![FALLBACK_FINDING.to_string()]);
    }
}
