//! Chain-of-custody tracking ("rolling checkpoint").
//!
//! A part may only advance from route index `i` to `i + 1`. The tracker is
//! the only component that moves a part; every advance happens under a
//! per-part lock and is persisted with a compare-and-swap on the expected
//! current checkpoint, so two racing scans can never both succeed.

use crate::error::ServiceError;
use crate::outcome::{CheckDetail, CheckKind, CheckOutcome, Confidence};
use crate::store::RecordStore;
use crate::types::{GeoPoint, LocationKind, NextAllowed, Part, PartStatus, RoutePlan};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

// ─── Diagnostics ──────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustodyViolation {
    PartNotFound,
    /// Part is FLAGGED or STOLEN; no location comparison was made.
    PartBlocked,
    BackwardsMovement,
    SkippedCheckpoint,
    UnauthorizedLocation,
    /// Ledger position is inconsistent with the route plan.
    CorruptRoutePlan,
    /// Location code or coordinate is malformed.
    InvalidLocation,
    /// Another writer moved the part between read and update.
    StaleCheckpoint,
}

impl CustodyViolation {
    pub fn message(self) -> &'static str {
        match self {
            CustodyViolation::PartNotFound => "part not found in ledger",
            CustodyViolation::PartBlocked => "part is flagged or reported stolen",
            CustodyViolation::BackwardsMovement => "scan at an earlier or current checkpoint",
            CustodyViolation::SkippedCheckpoint => "scan skips one or more checkpoints",
            CustodyViolation::UnauthorizedLocation => "location is not on the route plan",
            CustodyViolation::CorruptRoutePlan => "ledger position does not match route plan",
            CustodyViolation::InvalidLocation => "malformed location or coordinate",
            CustodyViolation::StaleCheckpoint => "checkpoint changed during verification",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustodyDetail {
    pub location: String,
    pub current_checkpoint: Option<String>,
    /// What the ledger allowed before this scan.
    pub expected_next: Option<String>,
    /// What the ledger allows after this scan.
    pub next_allowed: Option<String>,
    pub sequence_valid: bool,
    pub violation: Option<CustodyViolation>,
    pub part_status: Option<PartStatus>,
}

// ─── State machine ────────────────────────────────────────────

/// Where a part sits on its route plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CustodyState {
    At(usize),
    Delivered,
    Error,
}

/// Derive the state from ledger fields. Anything that breaks the
/// `next_allowed == plan[index(current) + 1]` invariant is `Error`.
pub fn state_of(part: &Part) -> CustodyState {
    let Some(pos) = part.route_plan.position(&part.current_checkpoint) else {
        return CustodyState::Error;
    };
    if part.next_allowed != part.route_plan.next_after(pos) {
        return CustodyState::Error;
    }
    match part.next_allowed {
        NextAllowed::Delivered => CustodyState::Delivered,
        NextAllowed::Checkpoint(_) => CustodyState::At(pos),
    }
}

/// A permitted one-step advance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advance {
    pub from: String,
    pub to: String,
    pub next_allowed: NextAllowed,
}

/// Decide whether a scan at `location` may advance `part`.
pub fn plan_transition(part: &Part, location: &str) -> Result<Advance, CustodyViolation> {
    if part.status.blocks_custody() {
        return Err(CustodyViolation::PartBlocked);
    }
    let current = match state_of(part) {
        CustodyState::At(pos) => pos,
        // Nothing lies ahead of the last checkpoint.
        CustodyState::Delivered => part.route_plan.len() - 1,
        CustodyState::Error => return Err(CustodyViolation::CorruptRoutePlan),
    };
    let Some(target) = part.route_plan.position(location) else {
        return Err(CustodyViolation::UnauthorizedLocation);
    };
    if target <= current {
        return Err(CustodyViolation::BackwardsMovement);
    }
    if target > current + 1 {
        return Err(CustodyViolation::SkippedCheckpoint);
    }
    Ok(Advance {
        from: part.current_checkpoint.clone(),
        to: location.to_string(),
        next_allowed: part.route_plan.next_after(target),
    })
}

/// Location code must carry a recognized prefix; coordinates must be in range.
pub fn validate_scan_location(
    location: &str,
    geo: Option<&GeoPoint>,
) -> Result<LocationKind, String> {
    let Some(kind) = LocationKind::of(location) else {
        let prefixes: Vec<&str> = LocationKind::ALL.iter().map(|k| k.prefix()).collect();
        return Err(format!(
            "location '{location}' must start with one of {}",
            prefixes.join(", ")
        ));
    };
    if let Some(point) = geo {
        if !point.is_valid() {
            return Err(format!(
                "coordinate ({}, {}) out of range",
                point.latitude, point.longitude
            ));
        }
    }
    Ok(kind)
}

// ─── Per-part locks ───────────────────────────────────────────

/// Registry of async mutexes keyed by part id. Entries are dropped once no
/// task holds or waits on them.
#[derive(Default)]
pub struct PartLocks {
    inner: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub struct PartLockGuard<'a> {
    locks: &'a PartLocks,
    part_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PartLocks {
    pub async fn acquire(&self, part_id: &str) -> PartLockGuard<'_> {
        let lock = {
            let mut map = self.inner.lock();
            map.entry(part_id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        PartLockGuard {
            locks: self,
            part_id: part_id.to_string(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Drop for PartLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock();
        if map
            .get(&self.part_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.part_id);
        }
    }
}

// ─── Reroute ──────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RerouteRequest {
    pub part_id: String,
    pub new_route: Vec<String>,
    pub reason: String,
    pub operator_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RerouteReceipt {
    pub part_id: String,
    pub previous_route: Vec<String>,
    pub new_route: Vec<String>,
    pub current_checkpoint: String,
    pub next_allowed: NextAllowed,
    pub reason: String,
    pub operator_id: String,
    pub rerouted_at: DateTime<Utc>,
}

// ─── Tracker ──────────────────────────────────────────────────

pub struct CustodyTracker {
    store: Arc<dyn RecordStore>,
    locks: PartLocks,
}

impl CustodyTracker {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: PartLocks::default(),
        }
    }

    pub fn locks(&self) -> &PartLocks {
        &self.locks
    }

    /// Verify a scan of `part_id` at `location` and advance the part on success.
    ///
    /// The ledger record is re-read under the part lock so the decision is
    /// never made on a stale snapshot.
    pub async fn verify(&self, part_id: &str, location: &str) -> Result<CheckOutcome> {
        let _guard = self.locks.acquire(part_id).await;

        let Some(part) = self.store.get_part(part_id).await? else {
            warn!(part_id, location, "custody check on unknown part");
            return Ok(CheckOutcome::critical_failure(
                CheckKind::Custody,
                CustodyViolation::PartNotFound.message(),
                CheckDetail::Custody(CustodyDetail {
                    location: location.to_string(),
                    current_checkpoint: None,
                    expected_next: None,
                    next_allowed: None,
                    sequence_valid: false,
                    violation: Some(CustodyViolation::PartNotFound),
                    part_status: None,
                }),
            ));
        };

        let advance = match plan_transition(&part, location) {
            Ok(advance) => advance,
            Err(violation) => {
                info!(part_id, location, ?violation, "custody violation");
                return Ok(violation_outcome(&part, location, violation));
            }
        };

        let swapped = self
            .store
            .update_part_stage(part_id, &advance.from, &advance.to, &advance.next_allowed)
            .await?;
        if !swapped {
            warn!(part_id, location, "checkpoint moved underneath custody check");
            return Ok(violation_outcome(
                &part,
                location,
                CustodyViolation::StaleCheckpoint,
            ));
        }

        debug!(
            part_id,
            from = %advance.from,
            to = %advance.to,
            next = %advance.next_allowed,
            "checkpoint advanced"
        );
        Ok(CheckOutcome::pass(
            CheckKind::Custody,
            Confidence::FULL,
            CheckDetail::Custody(CustodyDetail {
                location: location.to_string(),
                current_checkpoint: Some(advance.to.clone()),
                expected_next: Some(part.next_allowed.to_string()),
                next_allowed: Some(advance.next_allowed.to_string()),
                sequence_valid: true,
                violation: None,
                part_status: Some(part.status),
            }),
        ))
    }

    /// Replace a part's route plan. The new plan must be well formed, must
    /// contain the current checkpoint and must continue past it.
    pub async fn reroute(&self, request: &RerouteRequest) -> Result<RerouteReceipt, ServiceError> {
        if request.operator_id.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("operator id is required".into()));
        }
        if request.reason.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("reroute reason is required".into()));
        }
        let plan = RoutePlan::new(request.new_route.iter().cloned())?;

        let _guard = self.locks.acquire(&request.part_id).await;

        let part = self
            .store
            .get_part(&request.part_id)
            .await
            .map_err(|e| ServiceError::internal("reroute: part lookup failed", e))?
            .ok_or_else(|| ServiceError::NotFound(format!("part '{}'", request.part_id)))?;

        if part.status == PartStatus::Delivered || state_of(&part) == CustodyState::Delivered {
            return Err(ServiceError::InvalidRequest(
                "part has already been delivered".into(),
            ));
        }
        let Some(pos) = plan.position(&part.current_checkpoint) else {
            return Err(ServiceError::InvalidRequest(format!(
                "new route must include current checkpoint '{}'",
                part.current_checkpoint
            )));
        };
        let next_allowed = plan.next_after(pos);
        if next_allowed == NextAllowed::Delivered {
            return Err(ServiceError::InvalidRequest(format!(
                "new route must continue past current checkpoint '{}'",
                part.current_checkpoint
            )));
        }

        let swapped = self
            .store
            .update_route_plan(
                &request.part_id,
                &part.current_checkpoint,
                &plan,
                &next_allowed,
            )
            .await
            .map_err(|e| ServiceError::internal("reroute: plan update failed", e))?;
        if !swapped {
            return Err(ServiceError::InvalidRequest(
                "part moved while rerouting; retry".into(),
            ));
        }

        info!(
            part_id = %request.part_id,
            operator_id = %request.operator_id,
            reason = %request.reason,
            next = %next_allowed,
            "route plan replaced"
        );
        Ok(RerouteReceipt {
            part_id: request.part_id.clone(),
            previous_route: part.route_plan.stops().to_vec(),
            new_route: plan.stops().to_vec(),
            current_checkpoint: part.current_checkpoint,
            next_allowed,
            reason: request.reason.clone(),
            operator_id: request.operator_id.clone(),
            rerouted_at: Utc::now(),
        })
    }
}

fn violation_outcome(part: &Part, location: &str, violation: CustodyViolation) -> CheckOutcome {
    let detail = CheckDetail::Custody(CustodyDetail {
        location: location.to_string(),
        current_checkpoint: Some(part.current_checkpoint.clone()),
        expected_next: Some(part.next_allowed.to_string()),
        next_allowed: Some(part.next_allowed.to_string()),
        sequence_valid: false,
        violation: Some(violation),
        part_status: Some(part.status),
    });
    let outcome = CheckOutcome::fail(
        CheckKind::Custody,
        Confidence::ZERO,
        violation.message(),
        detail,
    );
    if violation == CustodyViolation::PartBlocked {
        outcome.critical()
    } else {
        outcome
    }
}

/// Outcome for a scan whose location never reached the state machine.
pub fn invalid_location_outcome(location: &str, reason: String) -> CheckOutcome {
    CheckOutcome::fail(
        CheckKind::Custody,
        Confidence::ZERO,
        reason,
        CheckDetail::Custody(CustodyDetail {
            location: location.to_string(),
            current_checkpoint: None,
            expected_next: None,
            next_allowed: None,
            sequence_valid: false,
            violation: Some(CustodyViolation::InvalidLocation),
            part_status: None,
        }),
    )
}
