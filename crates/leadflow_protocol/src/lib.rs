//! Canonical types and constants shared across the Leadflow crates.
//!
//! Everything that crosses a crate boundary lives here: the lead data model,
//! evidence and analysis types, queue wire payloads, the audit-log row, the
//! idempotency key derivations, and the metrics registry.

pub mod defaults;
pub mod idempotency;
pub mod metrics;
pub mod types;

pub use metrics::PipelineMetrics;
pub use types::{
    AnalysisResult, ClaimType, CompanyData, CrmSyncLog, Decision, DlqEntry, Evidence,
    EvidenceSource, GroundingStatus, Intent, Lead, LeadStatus, QueueJob,
};
