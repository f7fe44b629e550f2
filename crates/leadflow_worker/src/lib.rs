//! Lead worker: consumes the durable queue and drives each lead through
//! enrichment, AI analysis, grounding, and the MCP.

mod cancel;
mod dlq;
mod processor;
mod providers;
mod worker;

pub use cancel::CancellationToken;
pub use dlq::DlqProcessor;
pub use processor::{ingest, LeadProcessor, ProcessDisposition};
pub use providers::{
    AiProvider, EnrichmentProvider, FailingEnrichment, RuleBasedAi, ScriptedAi, StaticEnrichment,
};
pub use worker::{LeadWorker, WorkerConfig};
