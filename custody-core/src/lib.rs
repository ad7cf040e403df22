//! Custody-chain verification core.
//!
//! Verifies a physical part scan against its ledger record: rolling
//! checkpoint custody, fingerprint and issuer signature, scan-history
//! anomalies and handler authorization. Outcomes are folded into a weighted
//! risk assessment and handed to a reasoning service for the final verdict.
//!
//! Storage, reasoning and marketplace data are collaborators behind traits
//! ([`store::RecordStore`], [`verdict::ReasoningService`],
//! [`marketplace::MarketplaceLookup`]).

pub mod access;
pub mod admin;
pub mod anomaly;
pub mod config;
pub mod custody;
pub mod error;
pub mod geo;
pub mod identity;
pub mod marketplace;
pub mod outcome;
pub mod pipeline;
pub mod reasoning_http;
pub mod risk;
pub mod route;
pub mod sentinel;
pub mod store;
pub mod store_memory;
pub mod telemetry;
pub mod types;
pub mod verdict;
pub mod visual;

pub use config::VerifierConfig;
pub use error::{ConfigError, RoutePlanError, ServiceError};
pub use outcome::{CheckDetail, CheckKind, CheckOutcome, Confidence};
pub use pipeline::{ScanSubmission, VerificationPipeline, VerificationReport};
pub use risk::{RiskAssessment, RiskLevel};
pub use store::RecordStore;
pub use store_memory::MemoryStore;
pub use verdict::{FinalVerdict, Verdict};
