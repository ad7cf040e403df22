//! Marketplace listing signals.
//!
//! Signals are informational: they appear in the assessment and in the
//! context handed to verdict synthesis but carry no aggregation weight.

use crate::outcome::{CheckDetail, CheckKind, CheckOutcome};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    ListingMatch,
    NoListingFound,
    /// Listed, but priced far from the reference.
    PriceAnomaly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceVariance {
    Normal,
    BelowMarket,
    AboveMarket,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceSignal {
    pub source: String,
    pub status: ListingStatus,
    pub price_variance: Option<PriceVariance>,
    pub confidence: f64,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceDetail {
    pub source: String,
    pub status: ListingStatus,
    pub price_variance: Option<PriceVariance>,
    pub note: Option<String>,
}

impl MarketplaceSignal {
    pub fn into_outcome(self) -> CheckOutcome {
        let confidence = self.confidence;
        let status = self.status;
        let detail = CheckDetail::Marketplace(MarketplaceDetail {
            source: self.source,
            status: self.status,
            price_variance: self.price_variance,
            note: self.note,
        });
        match status {
            ListingStatus::PriceAnomaly => CheckOutcome::fail(
                CheckKind::Marketplace,
                confidence,
                "marketplace price deviates from reference",
                detail,
            ),
            ListingStatus::ListingMatch | ListingStatus::NoListingFound => {
                CheckOutcome::pass(CheckKind::Marketplace, confidence, detail)
            }
        }
    }
}

/// Externally owned marketplace lookup.
#[async_trait]
pub trait MarketplaceLookup: Send + Sync {
    async fn lookup(&self, part_id: &str, fingerprint: &str) -> Result<MarketplaceSignal>;
}

/// Lookup used when no marketplace feed is wired in. Unknown items are not
/// held against the part.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoListingMarketplace;

#[async_trait]
impl MarketplaceLookup for NoListingMarketplace {
    async fn lookup(&self, _part_id: &str, _fingerprint: &str) -> Result<MarketplaceSignal> {
        Ok(MarketplaceSignal {
            source: "none".into(),
            status: ListingStatus::NoListingFound,
            price_variance: None,
            confidence: 50.0,
            note: Some("item not found in public catalogs".into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Confidence;

    #[tokio::test]
    async fn test_no_listing_passes_at_half_confidence() {
        let outcome = NoListingMarketplace
            .lookup("P-1", "ff")
            .await
            .unwrap()
            .into_outcome();
        assert!(outcome.passed);
        assert_eq!(outcome.confidence, Confidence::new(50.0));
        assert_eq!(outcome.kind, CheckKind::Marketplace);
    }

    #[test]
    fn test_price_anomaly_fails_softly() {
        let outcome = MarketplaceSignal {
            source: "auction-feed".into(),
            status: ListingStatus::PriceAnomaly,
            price_variance: Some(PriceVariance::BelowMarket),
            confidence: 80.0,
            note: None,
        }
        .into_outcome();
        assert!(!outcome.passed);
        assert!(!outcome.critical);
    }
}
