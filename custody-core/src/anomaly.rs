//! Scan-history anomaly detection.
//!
//! Four independent sub-checks run against the part's recent history:
//! clone (same part seen elsewhere inside the clone window), impossible
//! travel, too-short time gap and a z-score test on inter-scan intervals.
//! Every counted anomaly costs 25 confidence points and is written to the
//! anomaly log on a best-effort basis.

use crate::config::AnomalyConfig;
use crate::geo::haversine_km;
use crate::outcome::{CheckDetail, CheckKind, CheckOutcome, Confidence};
use crate::store::RecordStore;
use crate::types::{AnomalyFinding, AnomalyType, ScanEvent};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PENALTY_PER_ANOMALY: f64 = 25.0;
/// Below this the intervals are treated as perfectly regular.
const MIN_STD_DEV_HOURS: f64 = 1e-9;

// ─── Sub-check evidence ───────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloneConflict {
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub minutes_ago: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CloneCheck {
    pub flagged: bool,
    pub conflicts: Vec<CloneConflict>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TravelCheck {
    pub flagged: bool,
    /// No coordinate on this scan or on any prior one.
    pub insufficient_data: bool,
    pub from_location: Option<String>,
    pub distance_km: Option<f64>,
    pub elapsed_hours: Option<f64>,
    pub velocity_kmh: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GapCheck {
    pub flagged: bool,
    pub previous_location: Option<String>,
    pub elapsed_minutes: Option<f64>,
    /// The short gap is already explained by a clone conflict with the same
    /// previous scan, so it is reported but not counted.
    pub subsumed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierCheck {
    pub flagged: bool,
    /// False when history was too short to run the test.
    pub evaluated: bool,
    pub intervals_hours: Vec<f64>,
    pub mean_hours: f64,
    pub std_dev_hours: f64,
    pub z_score: f64,
    pub score: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetail {
    pub clone: CloneCheck,
    pub travel: TravelCheck,
    pub gap: GapCheck,
    pub outlier: OutlierCheck,
    /// Distinct anomaly types that count against confidence.
    pub anomalies: Vec<AnomalyType>,
    pub history_considered: usize,
}

impl AnomalyDetail {
    pub fn confidence(&self) -> Confidence {
        Confidence::new(100.0 - PENALTY_PER_ANOMALY * self.anomalies.len() as f64)
    }

    pub fn has(&self, anomaly: AnomalyType) -> bool {
        self.anomalies.contains(&anomaly)
    }

    /// Evidence payload persisted alongside a finding.
    fn evidence(&self, anomaly: AnomalyType) -> serde_json::Value {
        let value = match anomaly {
            AnomalyType::CloneAttack => serde_json::to_value(&self.clone),
            AnomalyType::ImpossibleTravel => serde_json::to_value(&self.travel),
            AnomalyType::TimeAnomaly => serde_json::to_value(&self.gap),
            AnomalyType::StatisticalOutlier => serde_json::to_value(&self.outlier),
            AnomalyType::Flagged => Ok(serde_json::Value::Null),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    pub fn into_outcome(self) -> CheckOutcome {
        let confidence = self.confidence();
        if self.anomalies.is_empty() {
            return CheckOutcome::pass(CheckKind::Anomaly, confidence, CheckDetail::Anomaly(self));
        }
        let summary = self
            .anomalies
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let critical = self.has(AnomalyType::CloneAttack);
        let outcome = CheckOutcome::fail(
            CheckKind::Anomaly,
            confidence,
            format!("anomalies detected: {summary}"),
            CheckDetail::Anomaly(self),
        );
        if critical {
            outcome.critical()
        } else {
            outcome
        }
    }
}

// ─── Analysis ─────────────────────────────────────────────────

fn minutes_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 60_000.0
}

/// Run all four sub-checks. `history` holds prior scans of the same part,
/// in any order, excluding `scan` itself.
pub fn analyze(config: &AnomalyConfig, scan: &ScanEvent, history: &[ScanEvent]) -> AnomalyDetail {
    let mut prior: Vec<&ScanEvent> = history.iter().collect();
    prior.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let clone = check_clone(config, scan, &prior);
    let travel = check_travel(config, scan, &prior);
    let mut gap = check_gap(config, scan, &prior);
    let outlier = check_outlier(config, scan, &prior);

    if gap.flagged && clone.flagged {
        gap.subsumed = gap
            .previous_location
            .as_deref()
            .is_some_and(|loc| loc != scan.location);
    }

    let mut anomalies = Vec::new();
    if clone.flagged {
        anomalies.push(AnomalyType::CloneAttack);
    }
    if travel.flagged {
        anomalies.push(AnomalyType::ImpossibleTravel);
    }
    if gap.flagged && !gap.subsumed {
        anomalies.push(AnomalyType::TimeAnomaly);
    }
    if outlier.flagged {
        anomalies.push(AnomalyType::StatisticalOutlier);
    }

    AnomalyDetail {
        clone,
        travel,
        gap,
        outlier,
        anomalies,
        history_considered: prior.len(),
    }
}

fn check_clone(config: &AnomalyConfig, scan: &ScanEvent, prior: &[&ScanEvent]) -> CloneCheck {
    let conflicts: Vec<CloneConflict> = prior
        .iter()
        .filter(|p| p.location != scan.location)
        .filter_map(|p| {
            let minutes_ago = minutes_between(scan.timestamp, p.timestamp);
            (minutes_ago.abs() <= config.clone_window_minutes).then(|| CloneConflict {
                location: p.location.clone(),
                timestamp: p.timestamp,
                minutes_ago,
            })
        })
        .collect();
    CloneCheck {
        flagged: !conflicts.is_empty(),
        conflicts,
    }
}

fn check_travel(config: &AnomalyConfig, scan: &ScanEvent, prior: &[&ScanEvent]) -> TravelCheck {
    let previous = prior.iter().find_map(|p| p.geo.map(|g| (*p, g)));
    let (Some(here), Some((previous, there))) = (scan.geo, previous) else {
        return TravelCheck {
            insufficient_data: true,
            reason: Some("insufficient data".into()),
            ..TravelCheck::default()
        };
    };

    let distance_km = haversine_km(&there, &here);
    let elapsed_hours = minutes_between(scan.timestamp, previous.timestamp) / 60.0;
    let mut check = TravelCheck {
        from_location: Some(previous.location.clone()),
        distance_km: Some(distance_km),
        elapsed_hours: Some(elapsed_hours),
        ..TravelCheck::default()
    };

    if elapsed_hours <= 0.0 {
        check.flagged = true;
        check.reason = Some("scan time precedes previous scan".into());
        return check;
    }
    let velocity = distance_km / elapsed_hours;
    check.velocity_kmh = Some(velocity);
    if velocity > config.max_velocity_kmh {
        check.flagged = true;
        check.reason = Some(format!(
            "{velocity:.0} km/h exceeds {:.0} km/h",
            config.max_velocity_kmh
        ));
    }
    check
}

fn check_gap(config: &AnomalyConfig, scan: &ScanEvent, prior: &[&ScanEvent]) -> GapCheck {
    let Some(previous) = prior.first() else {
        return GapCheck::default();
    };
    let elapsed = minutes_between(scan.timestamp, previous.timestamp);
    GapCheck {
        flagged: elapsed < config.min_scan_gap_minutes,
        previous_location: Some(previous.location.clone()),
        elapsed_minutes: Some(elapsed),
        subsumed: false,
    }
}

fn check_outlier(config: &AnomalyConfig, scan: &ScanEvent, prior: &[&ScanEvent]) -> OutlierCheck {
    if prior.len() < config.outlier_min_history {
        return OutlierCheck::default();
    }
    let mut times: Vec<DateTime<Utc>> = prior.iter().map(|p| p.timestamp).collect();
    times.push(scan.timestamp);
    times.sort();

    let intervals: Vec<f64> = times
        .windows(2)
        .map(|w| minutes_between(w[1], w[0]) / 60.0)
        .collect();
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    let variance = intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let latest = intervals.last().copied().unwrap_or(mean);
    let z_score = if std_dev > MIN_STD_DEV_HOURS {
        (latest - mean) / std_dev
    } else {
        0.0
    };
    let score = (z_score.abs() / 3.0).min(1.0);

    OutlierCheck {
        flagged: score > config.outlier_threshold,
        evaluated: true,
        intervals_hours: intervals,
        mean_hours: mean,
        std_dev_hours: std_dev,
        z_score,
        score,
    }
}

// ─── Detector ─────────────────────────────────────────────────

pub struct AnomalyDetector {
    store: Arc<dyn RecordStore>,
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(store: Arc<dyn RecordStore>, config: AnomalyConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Analyze `scan` against at most `history_limit` prior scans.
    pub async fn detect(&self, scan: &ScanEvent, history_limit: usize) -> Result<CheckOutcome> {
        let history: Vec<ScanEvent> = self
            .store
            .get_recent_scans(&scan.part_id, history_limit)
            .await?
            .into_iter()
            .filter(|s| s.scan_id != scan.scan_id)
            .collect();

        let detail = analyze(&self.config, scan, &history);
        debug!(
            part_id = %scan.part_id,
            history = detail.history_considered,
            anomalies = detail.anomalies.len(),
            "anomaly analysis complete"
        );
        if !detail.anomalies.is_empty() {
            info!(part_id = %scan.part_id, anomalies = ?detail.anomalies, "anomalies detected");
        }

        self.record_findings(scan, &detail).await;
        Ok(detail.into_outcome())
    }

    async fn record_findings(&self, scan: &ScanEvent, detail: &AnomalyDetail) {
        for &anomaly in &detail.anomalies {
            let finding =
                AnomalyFinding::new(&scan.part_id, anomaly, detail.evidence(anomaly), scan.timestamp);
            if let Err(e) = self.store.append_anomaly(&finding).await {
                warn!(
                    part_id = %scan.part_id,
                    anomaly = %anomaly,
                    error = %e,
                    "failed to record anomaly finding"
                );
            }
        }
    }
}
