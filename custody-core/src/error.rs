//! Error types for the verification core.
//!
//! Check failures are not errors: they travel as [`crate::outcome::CheckOutcome`]
//! values. The types here cover configuration, route-plan well-formedness and
//! the caller-facing service boundary.

use thiserror::Error;

/// Why a checkpoint list is not a usable route plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutePlanError {
    #[error("route plan needs at least 2 checkpoints, got {len}")]
    TooShort { len: usize },

    #[error("checkpoint '{0}' appears more than once")]
    DuplicateCheckpoint(String),

    #[error("checkpoint '{0}' does not use a recognized location prefix")]
    UnrecognizedLocation(String),
}

/// Invalid verifier configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("risk weights must sum to 1.0, got {sum}")]
    WeightsDoNotSum { sum: f64 },

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("config parse error: {0}")]
    Parse(String),
}

/// Errors surfaced to whoever calls into the core.
///
/// `Internal` deliberately carries no detail; the cause is logged where it is
/// converted.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal service error")]
    Internal,
}

impl ServiceError {
    /// Log an unexpected fault and collapse it to the opaque boundary error.
    pub fn internal(context: &str, err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "{context}");
        ServiceError::Internal
    }
}

impl From<RoutePlanError> for ServiceError {
    fn from(err: RoutePlanError) -> Self {
        ServiceError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn internal_error_hides_cause() {
        let err = ServiceError::internal("store exploded", anyhow!("password=hunter2"));
        assert_eq!(err.to_string(), "internal service error");
    }

    #[test]
    fn route_plan_error_maps_to_invalid_request() {
        let err: ServiceError = RoutePlanError::TooShort { len: 1 }.into();
        assert!(matches!(err, ServiceError::InvalidRequest(msg) if msg.contains("at least 2")));
    }
}
