//! Scan routing: digital audit when a well-formed code is present, visual
//! audit otherwise.

use crate::outcome::Confidence;
use serde::{Deserialize, Serialize};

pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Fields carried by a well-formed structured code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalCode {
    pub part_id: String,
    pub fingerprint: String,
    pub issuer_signature: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "route", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanRoute {
    Digital(DigitalCode),
    Visual {
        reason: String,
        /// The caller must supply a photo or description to continue.
        requires_user_input: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: ScanRoute,
    pub confidence: Confidence,
}

impl RouteDecision {
    pub fn is_digital(&self) -> bool {
        matches!(self.route, ScanRoute::Digital(_))
    }

    fn visual(reason: impl Into<String>) -> Self {
        Self {
            route: ScanRoute::Visual {
                reason: reason.into(),
                requires_user_input: true,
            },
            confidence: Confidence::ZERO,
        }
    }
}

/// Classify a scan by its optional `partId|fingerprint|signature` payload.
pub fn select_route(code: Option<&str>) -> RouteDecision {
    let Some(code) = code else {
        return RouteDecision::visual("no structured code present");
    };

    let fields: Vec<&str> = code.split('|').collect();
    if fields.len() != 3 {
        return RouteDecision::visual(format!(
            "structured code has {} fields, expected 3",
            fields.len()
        ));
    }
    if fields.iter().any(|f| f.trim().is_empty()) {
        return RouteDecision::visual("structured code contains empty fields");
    }

    let fingerprint = fields[1].trim();
    if !is_fingerprint(fingerprint) {
        return RouteDecision::visual(format!(
            "fingerprint must be {FINGERPRINT_HEX_LEN} hex characters"
        ));
    }

    RouteDecision {
        route: ScanRoute::Digital(DigitalCode {
            part_id: fields[0].trim().to_string(),
            fingerprint: fingerprint.to_string(),
            issuer_signature: fields[2].trim().to_string(),
        }),
        confidence: Confidence::FULL,
    }
}

pub fn is_fingerprint(candidate: &str) -> bool {
    candidate.len() == FINGERPRINT_HEX_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> String {
        "0f".repeat(32)
    }

    #[test]
    fn well_formed_code_routes_digital() {
        let code = format!("PART_SERVO_1|{}|VALID_SIG_OEM_A_abcd", fp());
        let decision = select_route(Some(&code));
        assert_eq!(decision.confidence, Confidence::FULL);
        match decision.route {
            ScanRoute::Digital(d) => {
                assert_eq!(d.part_id, "PART_SERVO_1");
                assert_eq!(d.fingerprint, fp());
                assert_eq!(d.issuer_signature, "VALID_SIG_OEM_A_abcd");
            }
            other => panic!("expected digital route, got {other:?}"),
        }
    }

    #[test]
    fn malformed_codes_route_visual() {
        let cases = [
            None,
            Some("only|two".to_string()),
            Some(format!("a|{}|c|d", fp())),
            Some(format!("|{}|sig", fp())),
            Some("P|deadbeef|sig".to_string()),
            Some(format!("P|{}zz|sig", &fp()[..62])),
        ];
        for code in cases {
            let decision = select_route(code.as_deref());
            assert!(!decision.is_digital(), "{code:?} should be visual");
            assert_eq!(decision.confidence, Confidence::ZERO);
            assert!(matches!(
                decision.route,
                ScanRoute::Visual {
                    requires_user_input: true,
                    ..
                }
            ));
        }
    }
}
