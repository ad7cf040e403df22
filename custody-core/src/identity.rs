//! Part identity: ledger fingerprint match plus issuer signature.
//!
//! Signatures travel as `<STATUS>_SIG_<ISSUER>_<NONCE>` where `NONCE` is the
//! hex encoding of an Ed25519 signature over the fingerprint. The status tag
//! is carried for the record only; the outcome always comes from the
//! cryptographic check.

use crate::outcome::{CheckDetail, CheckKind, CheckOutcome, Confidence};
use crate::store::RecordStore;
use crate::types::{IssuerKeyRecord, Part};
use anyhow::Result;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey, SIGNATURE_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

pub const SIGNATURE_ALGORITHM: &str = "Ed25519";
const SIG_MARKER: &str = "_SIG_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureStatus {
    Valid,
    Invalid,
}

/// Parsed form of an issuer signature string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuerSignature {
    pub status: SignatureStatus,
    pub issuer_id: String,
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl IssuerSignature {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (status, rest) = raw
            .split_once(SIG_MARKER)
            .ok_or_else(|| format!("signature is missing the '{SIG_MARKER}' marker"))?;
        let status = match status {
            "VALID" => SignatureStatus::Valid,
            "INVALID" => SignatureStatus::Invalid,
            other => return Err(format!("unknown signature status '{other}'")),
        };
        // Issuer ids may themselves contain underscores.
        let (issuer_id, nonce) = rest
            .rsplit_once('_')
            .ok_or_else(|| "signature is missing the nonce".to_string())?;
        if issuer_id.is_empty() {
            return Err("signature names no issuer".into());
        }
        let bytes = hex::decode(nonce).map_err(|e| format!("signature nonce is not hex: {e}"))?;
        let signature: [u8; SIGNATURE_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            format!(
                "signature nonce is {} bytes, expected {SIGNATURE_LENGTH}",
                b.len()
            )
        })?;
        Ok(Self {
            status,
            issuer_id: issuer_id.to_string(),
            signature,
        })
    }

    /// Render in the wire format accepted by [`IssuerSignature::parse`].
    pub fn encode(&self) -> String {
        let status = match self.status {
            SignatureStatus::Valid => "VALID",
            SignatureStatus::Invalid => "INVALID",
        };
        format!(
            "{status}{SIG_MARKER}{}_{}",
            self.issuer_id,
            hex::encode(self.signature)
        )
    }
}

/// SHA-256 of a manufacturer serial, hex encoded. Used when provisioning parts.
pub fn derive_fingerprint(serial: &str) -> String {
    hex::encode(Sha256::digest(serial.as_bytes()))
}

/// Compare fingerprints without short-circuiting on the first differing byte.
pub fn fingerprints_match(presented: &str, ledger: &str) -> bool {
    let presented = presented.to_ascii_lowercase();
    let ledger = ledger.to_ascii_lowercase();
    presented.as_bytes().ct_eq(ledger.as_bytes()).into()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityDetail {
    /// Presented fingerprint matches the ledger.
    pub serial_valid: bool,
    /// Issuer signature verified against a live key.
    pub oem_verified: bool,
    pub issuer_id: Option<String>,
    pub signature_status: Option<SignatureStatus>,
    pub algorithm: String,
}

impl IdentityDetail {
    fn new(serial_valid: bool) -> Self {
        Self {
            serial_valid,
            oem_verified: false,
            issuer_id: None,
            signature_status: None,
            algorithm: SIGNATURE_ALGORITHM.to_string(),
        }
    }
}

pub struct IdentityVerifier {
    store: Arc<dyn RecordStore>,
}

impl IdentityVerifier {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn verify(
        &self,
        part: Option<&Part>,
        fingerprint: &str,
        signature: &str,
        at: DateTime<Utc>,
    ) -> Result<CheckOutcome> {
        let Some(part) = part else {
            return Ok(CheckOutcome::critical_failure(
                CheckKind::Identity,
                "part not found in ledger",
                CheckDetail::Identity(IdentityDetail::new(false)),
            ));
        };

        if !fingerprints_match(fingerprint, &part.fingerprint) {
            info!(part_id = %part.part_id, "fingerprint mismatch");
            return Ok(CheckOutcome::critical_failure(
                CheckKind::Identity,
                "fingerprint does not match ledger",
                CheckDetail::Identity(IdentityDetail::new(false)),
            ));
        }

        let mut detail = IdentityDetail::new(true);
        let parsed = match IssuerSignature::parse(signature) {
            Ok(parsed) => parsed,
            Err(reason) => {
                debug!(part_id = %part.part_id, %reason, "malformed issuer signature");
                return Ok(CheckOutcome::fail(
                    CheckKind::Identity,
                    Confidence::ZERO,
                    format!("malformed issuer signature: {reason}"),
                    CheckDetail::Identity(detail),
                ));
            }
        };
        detail.issuer_id = Some(parsed.issuer_id.clone());
        detail.signature_status = Some(parsed.status);

        let key = match self.store.get_issuer_key(&parsed.issuer_id).await? {
            Some(key) => key,
            None => {
                warn!(part_id = %part.part_id, issuer_id = %parsed.issuer_id, "no key on record for issuer");
                return Ok(CheckOutcome::critical_failure(
                    CheckKind::Identity,
                    format!("no key on record for issuer '{}'", parsed.issuer_id),
                    CheckDetail::Identity(detail),
                ));
            }
        };
        if let Err(reason) = usable_key(&key, at) {
            warn!(part_id = %part.part_id, issuer_id = %parsed.issuer_id, %reason, "issuer key unusable");
            return Ok(CheckOutcome::critical_failure(
                CheckKind::Identity,
                reason,
                CheckDetail::Identity(detail),
            ));
        }
        let verifying_key = match decode_key(&key.public_key) {
            Ok(vk) => vk,
            Err(reason) => {
                warn!(issuer_id = %key.issuer_id, %reason, "issuer key record is corrupt");
                return Ok(CheckOutcome::critical_failure(
                    CheckKind::Identity,
                    reason,
                    CheckDetail::Identity(detail),
                ));
            }
        };

        let message = part.fingerprint.to_ascii_lowercase();
        let signature = Signature::from_bytes(&parsed.signature);
        match verifying_key.verify_strict(message.as_bytes(), &signature) {
            Ok(()) => {
                detail.oem_verified = true;
                Ok(CheckOutcome::pass(
                    CheckKind::Identity,
                    Confidence::FULL,
                    CheckDetail::Identity(detail),
                ))
            }
            Err(_) => {
                info!(part_id = %part.part_id, issuer_id = %parsed.issuer_id, "issuer signature rejected");
                Ok(CheckOutcome::fail(
                    CheckKind::Identity,
                    Confidence::ZERO,
                    "issuer signature does not verify",
                    CheckDetail::Identity(detail),
                ))
            }
        }
    }
}

fn usable_key(key: &IssuerKeyRecord, at: DateTime<Utc>) -> Result<(), String> {
    if key.revoked {
        return Err(format!("issuer key '{}' is revoked", key.issuer_id));
    }
    if !key.is_valid_at(at) {
        return Err(format!(
            "issuer key '{}' is outside its validity window",
            key.issuer_id
        ));
    }
    Ok(())
}

fn decode_key(public_key: &str) -> Result<VerifyingKey, String> {
    let bytes = hex::decode(public_key).map_err(|e| format!("issuer key is not hex: {e}"))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| "issuer key must be 32 bytes".to_string())?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| format!("issuer key rejected: {e}"))
}
