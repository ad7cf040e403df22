//! Handler authorization: region, shift and clearance.

use crate::outcome::{CheckDetail, CheckKind, CheckOutcome, Confidence};
use crate::store::RecordStore;
use crate::types::{ClearanceLevel, Handler, LocationKind};
use anyhow::Result;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const REGION_POINTS: f64 = 40.0;
const SHIFT_POINTS: f64 = 40.0;
const CLEARANCE_POINTS: f64 = 20.0;
const NO_REGION: &str = "None";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessDetail {
    pub handler_name: Option<String>,
    pub region_authorized: bool,
    /// Authorized pattern that admitted the location.
    pub matched_region: Option<String>,
    /// Diagnostic on region failure.
    pub closest_region: Option<String>,
    pub shift_valid: bool,
    pub weekday: String,
    pub shift_window: Option<String>,
    pub clearance_level: Option<ClearanceLevel>,
    pub required_clearance: ClearanceLevel,
    pub clearance_ok: bool,
}

// ── Region ──

/// `"HUB_*"` matches any location starting with `HUB_`; anything else must
/// match exactly.
pub fn region_matches(pattern: &str, location: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => location.starts_with(prefix),
        None => pattern == location,
    }
}

fn closest_region(regions: &[String], location: &str) -> String {
    let common = |pattern: &str| {
        pattern
            .trim_end_matches('*')
            .bytes()
            .zip(location.bytes())
            .take_while(|(a, b)| a == b)
            .count()
    };
    let same_kind = LocationKind::of(location).and_then(|kind| {
        regions
            .iter()
            .filter(|r| r.starts_with(kind.prefix()))
            .max_by_key(|r| common(r))
    });
    same_kind
        .or_else(|| regions.first())
        .cloned()
        .unwrap_or_else(|| NO_REGION.to_string())
}

// ── Shift ──

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftEntry {
    Off,
    /// Inclusive minute-of-day bounds. `start > end` wraps past midnight.
    Window { start: u32, end: u32 },
}

impl ShiftEntry {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("OFF") {
            return Ok(ShiftEntry::Off);
        }
        let (start, end) = raw
            .split_once('-')
            .ok_or_else(|| format!("shift '{raw}' is not HH:MM-HH:MM"))?;
        Ok(ShiftEntry::Window {
            start: parse_clock(start)?,
            end: parse_clock(end)?,
        })
    }

    pub fn contains(self, minute_of_day: u32) -> bool {
        match self {
            ShiftEntry::Off => false,
            ShiftEntry::Window { start, end } if start <= end => {
                (start..=end).contains(&minute_of_day)
            }
            ShiftEntry::Window { start, end } => minute_of_day >= start || minute_of_day <= end,
        }
    }
}

fn parse_clock(raw: &str) -> Result<u32, String> {
    let raw = raw.trim();
    let (h, m) = raw
        .split_once(':')
        .ok_or_else(|| format!("'{raw}' is not HH:MM"))?;
    let h: u32 = h.parse().map_err(|_| format!("bad hour in '{raw}'"))?;
    let m: u32 = m.parse().map_err(|_| format!("bad minute in '{raw}'"))?;
    if h > 23 || m > 59 {
        return Err(format!("'{raw}' is not a time of day"));
    }
    Ok(h * 60 + m)
}

pub fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn shift_for<'a>(handler: &'a Handler, day: &str) -> Option<&'a str> {
    handler
        .shift_schedule
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(day))
        .map(|(_, window)| window.as_str())
}

// ── Authorizer ──

pub struct AccessAuthorizer {
    store: Arc<dyn RecordStore>,
}

impl AccessAuthorizer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn verify(
        &self,
        handler_id: &str,
        location: &str,
        scan_time: DateTime<Utc>,
    ) -> Result<CheckOutcome> {
        let required = LocationKind::of(location)
            .map(LocationKind::required_clearance)
            .unwrap_or(ClearanceLevel::Level1);
        let weekday = weekday_key(scan_time.weekday());

        let handler = match self.store.get_handler(handler_id).await? {
            Some(h) if h.active => h,
            found => {
                let error = if found.is_some() {
                    "handler is inactive"
                } else {
                    "handler not found"
                };
                info!(handler_id, location, error, "access denied");
                return Ok(CheckOutcome::critical_failure(
                    CheckKind::Access,
                    error,
                    CheckDetail::Access(AccessDetail {
                        handler_name: found.map(|h| h.name),
                        region_authorized: false,
                        matched_region: None,
                        closest_region: None,
                        shift_valid: false,
                        weekday: weekday.to_string(),
                        shift_window: None,
                        clearance_level: None,
                        required_clearance: required,
                        clearance_ok: false,
                    }),
                ));
            }
        };

        Ok(evaluate(&handler, location, scan_time, required))
    }
}

/// Score a known, active handler against a scan.
pub fn evaluate(
    handler: &Handler,
    location: &str,
    scan_time: DateTime<Utc>,
    required: ClearanceLevel,
) -> CheckOutcome {
    let matched_region = handler
        .authorized_regions
        .iter()
        .find(|r| region_matches(r, location))
        .cloned();
    let region_ok = matched_region.is_some();
    let closest = (!region_ok).then(|| closest_region(&handler.authorized_regions, location));

    let weekday = weekday_key(scan_time.weekday());
    let window = shift_for(handler, weekday);
    let minute_of_day = scan_time.hour() * 60 + scan_time.minute();
    let shift_ok = match window.map(ShiftEntry::parse) {
        Some(Ok(entry)) => entry.contains(minute_of_day),
        Some(Err(reason)) => {
            debug!(handler_id = %handler.handler_id, weekday, %reason, "unparsable shift entry");
            false
        }
        None => false,
    };

    let clearance_ok = handler.clearance >= required;

    let mut failures = Vec::new();
    if !region_ok {
        failures.push(format!("location {location} outside authorized regions"));
    }
    if !shift_ok {
        failures.push(format!("scan outside {weekday} shift"));
    }
    if !clearance_ok {
        failures.push(format!("{} below required {required}", handler.clearance));
    }

    let confidence = Confidence::new(
        if region_ok { REGION_POINTS } else { 0.0 }
            + if shift_ok { SHIFT_POINTS } else { 0.0 }
            + if clearance_ok { CLEARANCE_POINTS } else { 0.0 },
    );
    let detail = CheckDetail::Access(AccessDetail {
        handler_name: Some(handler.name.clone()),
        region_authorized: region_ok,
        matched_region,
        closest_region: closest,
        shift_valid: shift_ok,
        weekday: weekday.to_string(),
        shift_window: window.map(str::to_string),
        clearance_level: Some(handler.clearance),
        required_clearance: required,
        clearance_ok,
    });

    if failures.is_empty() {
        CheckOutcome::pass(CheckKind::Access, confidence, detail)
    } else {
        CheckOutcome::fail(CheckKind::Access, confidence, failures.join("; "), detail)
    }
}
