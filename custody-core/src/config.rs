//! Verifier configuration.
//!
//! Defaults mirror the production thresholds. Every value can be overridden
//! from `CUSTODY_*` environment variables (a `.env` file is honoured) or from
//! a YAML document.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Top-level configuration for the verification pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub anomaly: AnomalyConfig,
    pub risk: RiskConfig,
    pub pipeline: PipelineConfig,
}

impl VerifierConfig {
    /// Build from the environment, falling back to defaults for anything
    /// unset or unparsable. The merged result must still validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let d = Self::default();
        let config = Self {
            anomaly: AnomalyConfig {
                clone_window_minutes: env_or(
                    "CUSTODY_CLONE_WINDOW_MINUTES",
                    d.anomaly.clone_window_minutes,
                ),
                max_velocity_kmh: env_or("CUSTODY_MAX_VELOCITY_KMH", d.anomaly.max_velocity_kmh),
                min_scan_gap_minutes: env_or(
                    "CUSTODY_MIN_SCAN_GAP_MINUTES",
                    d.anomaly.min_scan_gap_minutes,
                ),
                outlier_min_history: env_or(
                    "CUSTODY_OUTLIER_MIN_HISTORY",
                    d.anomaly.outlier_min_history,
                ),
                outlier_threshold: env_or("CUSTODY_OUTLIER_THRESHOLD", d.anomaly.outlier_threshold),
            },
            risk: RiskConfig {
                weights: RiskWeights {
                    identity: env_or("CUSTODY_WEIGHT_IDENTITY", d.risk.weights.identity),
                    custody: env_or("CUSTODY_WEIGHT_CUSTODY", d.risk.weights.custody),
                    anomaly: env_or("CUSTODY_WEIGHT_ANOMALY", d.risk.weights.anomaly),
                    access: env_or("CUSTODY_WEIGHT_ACCESS", d.risk.weights.access),
                },
                critical_penalty: env_or("CUSTODY_CRITICAL_PENALTY", d.risk.critical_penalty),
                visual_uncertainty_penalty: env_or(
                    "CUSTODY_VISUAL_UNCERTAINTY_PENALTY",
                    d.risk.visual_uncertainty_penalty,
                ),
                ..d.risk
            },
            pipeline: PipelineConfig {
                history_limit: env_or("CUSTODY_HISTORY_LIMIT", d.pipeline.history_limit),
                reasoning_timeout_ms: env_or(
                    "CUSTODY_REASONING_TIMEOUT_MS",
                    d.pipeline.reasoning_timeout_ms,
                ),
                marketplace_timeout_ms: env_or(
                    "CUSTODY_MARKETPLACE_TIMEOUT_MS",
                    d.pipeline.marketplace_timeout_ms,
                ),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.risk.weights.validate()?;
        self.risk.visual_weights.validate()?;

        positive("anomaly.clone_window_minutes", self.anomaly.clone_window_minutes)?;
        positive("anomaly.max_velocity_kmh", self.anomaly.max_velocity_kmh)?;
        positive("anomaly.min_scan_gap_minutes", self.anomaly.min_scan_gap_minutes)?;
        positive("risk.critical_penalty", self.risk.critical_penalty)?;
        positive("pipeline.history_limit", self.pipeline.history_limit as f64)?;
        positive("pipeline.reasoning_timeout_ms", self.pipeline.reasoning_timeout_ms as f64)?;
        positive(
            "pipeline.marketplace_timeout_ms",
            self.pipeline.marketplace_timeout_ms as f64,
        )?;
        within("anomaly.outlier_threshold", self.anomaly.outlier_threshold, 0.0, 1.0)?;
        within(
            "risk.visual_uncertainty_penalty",
            self.risk.visual_uncertainty_penalty,
            0.0,
            100.0,
        )?;
        if self.risk.rescan_band.0 > self.risk.rescan_band.1 {
            return Err(ConfigError::OutOfRange {
                field: "risk.rescan_band",
                value: self.risk.rescan_band.0,
                min: 0.0,
                max: self.risk.rescan_band.1,
            });
        }
        Ok(())
    }
}

// ─── Anomaly ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Scans at another location inside this window count as a clone.
    pub clone_window_minutes: f64,
    pub max_velocity_kmh: f64,
    pub min_scan_gap_minutes: f64,
    /// Historical scans needed before the outlier test runs.
    pub outlier_min_history: usize,
    pub outlier_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            clone_window_minutes: 120.0,
            max_velocity_kmh: 800.0,
            min_scan_gap_minutes: 30.0,
            outlier_min_history: 3,
            outlier_threshold: 0.7,
        }
    }
}

impl AnomalyConfig {
    pub fn max_velocity_kmh(mut self, kmh: f64) -> Self {
        self.max_velocity_kmh = kmh;
        self
    }

    pub fn min_scan_gap_minutes(mut self, minutes: f64) -> Self {
        self.min_scan_gap_minutes = minutes;
        self
    }

    pub fn clone_window_minutes(mut self, minutes: f64) -> Self {
        self.clone_window_minutes = minutes;
        self
    }
}

// ─── Risk ─────────────────────────────────────────────────────

/// Aggregation weights for the digital path. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub identity: f64,
    pub custody: f64,
    pub anomaly: f64,
    pub access: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            identity: 0.25,
            custody: 0.30,
            anomaly: 0.25,
            access: 0.20,
        }
    }
}

impl RiskWeights {
    pub fn sum(&self) -> f64 {
        self.identity + self.custody + self.anomaly + self.access
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, w) in [
            ("risk.weights.identity", self.identity),
            ("risk.weights.custody", self.custody),
            ("risk.weights.anomaly", self.anomaly),
            ("risk.weights.access", self.access),
        ] {
            within(field, w, 0.0, 1.0)?;
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSum { sum });
        }
        Ok(())
    }
}

/// Fixed weights for the visual-only path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualWeights {
    pub visual: f64,
    pub access: f64,
}

impl Default for VisualWeights {
    fn default() -> Self {
        Self {
            visual: 0.70,
            access: 0.30,
        }
    }
}

impl VisualWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.visual + self.access;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSum { sum });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub weights: RiskWeights,
    /// Flat deduction per failed critical check.
    pub critical_penalty: f64,
    pub visual_weights: VisualWeights,
    /// Deduction applied to every visual-only assessment.
    pub visual_uncertainty_penalty: f64,
    /// Inclusive score band that asks for a rescan when nothing critical failed.
    pub rescan_band: (f64, f64),
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            critical_penalty: 30.0,
            visual_weights: VisualWeights::default(),
            visual_uncertainty_penalty: 10.0,
            rescan_band: (35.0, 45.0),
        }
    }
}

impl RiskConfig {
    pub fn weights(mut self, weights: RiskWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn critical_penalty(mut self, penalty: f64) -> Self {
        self.critical_penalty = penalty;
        self
    }
}

// ─── Pipeline ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trailing scans fetched per part for anomaly analysis.
    pub history_limit: usize,
    pub reasoning_timeout_ms: u64,
    pub marketplace_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            reasoning_timeout_ms: 25_000,
            marketplace_timeout_ms: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_millis(self.reasoning_timeout_ms)
    }

    pub fn marketplace_timeout(&self) -> Duration {
        Duration::from_millis(self.marketplace_timeout_ms)
    }

    pub fn reasoning_timeout_ms(mut self, ms: u64) -> Self {
        self.reasoning_timeout_ms = ms;
        self
    }

    pub fn marketplace_timeout_ms(mut self, ms: u64) -> Self {
        self.marketplace_timeout_ms = ms;
        self
    }
}

// ─── Helpers ──────────────────────────────────────────────────

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn within(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}
