//! Weighted risk aggregation over check outcomes.

use crate::config::RiskConfig;
use crate::outcome::{CheckKind, CheckOutcome, Confidence};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    fn from_score(score: f64, critical_failure: bool) -> Self {
        if critical_failure || score < 25.0 {
            RiskLevel::Critical
        } else if score < 50.0 {
            RiskLevel::High
        } else if score < 75.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn recommendation(self) -> &'static str {
        match self {
            RiskLevel::Low => "Approve: custody chain and identity verified.",
            RiskLevel::Medium => "Hold for secondary review within 24 hours.",
            RiskLevel::High => "Quarantine the part and escalate to the custody team.",
            RiskLevel::Critical => "Reject the part and contact security immediately.",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Soft-retry signal, distinct from pass/fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    RescanSuggested,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub check: CheckKind,
    pub passed: bool,
    pub confidence: Confidence,
    pub weight: f64,
    pub weighted: f64,
    pub critical_failure: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall_score: f64,
    pub level: RiskLevel,
    pub contributions: Vec<Contribution>,
    pub critical_failures: Vec<CheckKind>,
    pub penalty_applied: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<RecommendedAction>,
    /// Scored without cryptographic verification.
    pub visual_only: bool,
}

impl RiskAssessment {
    pub fn has_critical_failure(&self) -> bool {
        !self.critical_failures.is_empty()
    }

    /// Plain-text scorecard for operators.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        let title = if self.visual_only {
            "VISUAL RISK ASSESSMENT"
        } else {
            "RISK ASSESSMENT"
        };
        let _ = writeln!(out, "{title}");
        let _ = writeln!(out, "{}", "=".repeat(title.len()));
        let _ = writeln!(
            out,
            "Overall score: {:.1}/100  Level: {}",
            self.overall_score, self.level
        );
        let _ = writeln!(out);
        for c in &self.contributions {
            let mark = match (c.passed, c.critical_failure) {
                (true, _) => "PASS",
                (false, true) => "FAIL!",
                (false, false) => "FAIL",
            };
            let _ = writeln!(
                out,
                "  {:<12} {:<5} conf {:>5.1}  x {:.2} = {:>5.1}",
                c.check.label(),
                mark,
                c.confidence.value(),
                c.weight,
                c.weighted
            );
        }
        if self.penalty_applied > 0.0 {
            let _ = writeln!(out, "  penalties    -{:.1}", self.penalty_applied);
        }
        if !self.critical_failures.is_empty() {
            let names: Vec<&str> = self.critical_failures.iter().map(|k| k.label()).collect();
            let _ = writeln!(out, "Critical failures: {}", names.join(", "));
        }
        if self.action == Some(RecommendedAction::RescanSuggested) {
            let _ = writeln!(out, "Borderline score: rescan before a final decision.");
        }
        let _ = writeln!(out);
        let _ = write!(out, "Recommendation: {}", self.level.recommendation());
        out
    }
}

pub struct RiskAggregator {
    config: RiskConfig,
}

impl RiskAggregator {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn weight(&self, kind: CheckKind) -> f64 {
        let w = &self.config.weights;
        match kind {
            CheckKind::Identity => w.identity,
            CheckKind::Custody => w.custody,
            CheckKind::Anomaly => w.anomaly,
            CheckKind::Access => w.access,
            CheckKind::Marketplace | CheckKind::Visual => 0.0,
        }
    }

    fn visual_weight(&self, kind: CheckKind) -> f64 {
        let w = &self.config.visual_weights;
        match kind {
            CheckKind::Visual => w.visual,
            CheckKind::Access => w.access,
            _ => 0.0,
        }
    }

    /// Digital-path assessment.
    pub fn aggregate(&self, outcomes: &[CheckOutcome]) -> RiskAssessment {
        let (contributions, raw) = contributions(outcomes, |k| self.weight(k));
        let critical_failures = critical_kinds(outcomes);
        let penalty = self.config.critical_penalty * critical_failures.len() as f64;
        let overall = (raw - penalty).clamp(0.0, 100.0);

        let (low, high) = self.config.rescan_band;
        let action = (critical_failures.is_empty() && (low..=high).contains(&overall))
            .then_some(RecommendedAction::RescanSuggested);

        RiskAssessment {
            overall_score: overall,
            level: RiskLevel::from_score(overall, !critical_failures.is_empty()),
            contributions,
            critical_failures,
            penalty_applied: penalty,
            action,
            visual_only: false,
        }
    }

    /// Visual-path assessment: fixed weights and a flat uncertainty penalty.
    pub fn aggregate_visual(&self, outcomes: &[CheckOutcome]) -> RiskAssessment {
        let (contributions, raw) = contributions(outcomes, |k| self.visual_weight(k));
        let critical_failures = critical_kinds(outcomes);
        let penalty = self.config.visual_uncertainty_penalty;
        let overall = (raw - penalty).clamp(0.0, 100.0);

        RiskAssessment {
            overall_score: overall,
            level: RiskLevel::from_score(overall, !critical_failures.is_empty()),
            contributions,
            critical_failures,
            penalty_applied: penalty,
            action: None,
            visual_only: true,
        }
    }
}

fn contributions(
    outcomes: &[CheckOutcome],
    weight: impl Fn(CheckKind) -> f64,
) -> (Vec<Contribution>, f64) {
    let contributions: Vec<Contribution> = outcomes
        .iter()
        .map(|o| {
            let w = weight(o.kind);
            let earned = if o.passed { o.confidence.value() } else { 0.0 };
            Contribution {
                check: o.kind,
                passed: o.passed,
                confidence: o.confidence,
                weight: w,
                weighted: earned * w,
                critical_failure: o.is_critical_failure(),
            }
        })
        .collect();
    let total = contributions.iter().map(|c| c.weighted).sum();
    (contributions, total)
}

fn critical_kinds(outcomes: &[CheckOutcome]) -> Vec<CheckKind> {
    outcomes
        .iter()
        .filter(|o| o.is_critical_failure())
        .map(|o| o.kind)
        .collect()
}
