//! The shared result envelope every check produces.
//!
//! Each check fills the common fields (kind, passed, confidence, critical,
//! error) and attaches a kind-specific [`CheckDetail`].

use crate::access::AccessDetail;
use crate::anomaly::AnomalyDetail;
use crate::custody::CustodyDetail;
use crate::identity::IdentityDetail;
use crate::marketplace::MarketplaceDetail;
use crate::visual::VisualDetail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Confidence ───────────────────────────────────────────────

/// A score in `[0, 100]`. Construction clamps, NaN becomes 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    pub const ZERO: Confidence = Confidence(0.0);
    pub const FULL: Confidence = Confidence(100.0);

    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 100.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for Confidence {
    fn from(value: f64) -> Self {
        Confidence::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}%", self.0)
    }
}

// ─── Check kinds ──────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckKind {
    Custody,
    Identity,
    Anomaly,
    Access,
    Marketplace,
    Visual,
}

impl CheckKind {
    pub fn label(self) -> &'static str {
        match self {
            CheckKind::Custody => "custody",
            CheckKind::Identity => "identity",
            CheckKind::Anomaly => "anomaly",
            CheckKind::Access => "access",
            CheckKind::Marketplace => "marketplace",
            CheckKind::Visual => "visual",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind-specific evidence attached to an outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckDetail {
    Custody(CustodyDetail),
    Identity(IdentityDetail),
    Anomaly(AnomalyDetail),
    Access(AccessDetail),
    Marketplace(MarketplaceDetail),
    Visual(VisualDetail),
    /// The check could not produce kind-specific evidence (record missing,
    /// collaborator down, internal fault).
    Unavailable,
}

// ─── Outcome envelope ─────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    pub passed: bool,
    pub confidence: Confidence,
    /// A failure severe enough to override numeric risk scoring.
    pub critical: bool,
    pub error: Option<String>,
    pub detail: CheckDetail,
    pub checked_at: DateTime<Utc>,
}

impl CheckOutcome {
    pub fn pass(kind: CheckKind, confidence: impl Into<Confidence>, detail: CheckDetail) -> Self {
        Self {
            kind,
            passed: true,
            confidence: confidence.into(),
            critical: false,
            error: None,
            detail,
            checked_at: Utc::now(),
        }
    }

    pub fn fail(
        kind: CheckKind,
        confidence: impl Into<Confidence>,
        error: impl Into<String>,
        detail: CheckDetail,
    ) -> Self {
        Self {
            kind,
            passed: false,
            confidence: confidence.into(),
            critical: false,
            error: Some(error.into()),
            detail,
            checked_at: Utc::now(),
        }
    }

    /// Failed, critical, confidence 0. Used for missing records.
    pub fn critical_failure(kind: CheckKind, error: impl Into<String>, detail: CheckDetail) -> Self {
        Self::fail(kind, Confidence::ZERO, error, detail).critical()
    }

    /// The check itself could not run to completion.
    pub fn unavailable(kind: CheckKind, error: impl Into<String>) -> Self {
        Self::fail(kind, Confidence::ZERO, error, CheckDetail::Unavailable)
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn is_critical_failure(&self) -> bool {
        !self.passed && self.critical
    }
}
