//! Single-job processing: load, enrich, analyse, ground, persist, sync.

use crate::providers::{AiProvider, EnrichmentProvider};
use anyhow::Result;
use leadflow_db::LeadStore;
use leadflow_mcp::{McpOrchestrator, McpStatus};
use leadflow_protocol::metrics::{
    AI_ANALYSIS_DURATION_SECONDS, LEADS_PROCESSED_TOTAL, MCP_GROUNDING_DECISIONS_TOTAL,
};
use leadflow_protocol::types::{CompanyData, GroundingStatus, Lead, LeadStatus, QueueJob};
use leadflow_protocol::PipelineMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What the consumer loop should do with the queue job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessDisposition {
    /// Done (success or terminal); acknowledge the job.
    Ack,
    /// Retryable failure; fail the job with this error and delay floor.
    Retry {
        error: String,
        min_delay: Option<Duration>,
    },
}

/// Everything one job needs, wired once per worker.
pub struct LeadProcessor {
    leads: LeadStore,
    ai: Arc<dyn AiProvider>,
    enrichment: Arc<dyn EnrichmentProvider>,
    orchestrator: Arc<McpOrchestrator>,
    metrics: Arc<PipelineMetrics>,
    /// Wall-clock cap for one job end-to-end.
    pub job_timeout: Duration,
}

impl LeadProcessor {
    pub fn new(
        leads: LeadStore,
        ai: Arc<dyn AiProvider>,
        enrichment: Arc<dyn EnrichmentProvider>,
        orchestrator: Arc<McpOrchestrator>,
        metrics: Arc<PipelineMetrics>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            leads,
            ai,
            enrichment,
            orchestrator,
            metrics,
            job_timeout,
        }
    }

    fn count_lead(&self, status: LeadStatus) {
        self.metrics
            .inc_counter(LEADS_PROCESSED_TOTAL, &[("status", status.as_str())]);
    }

    /// Process one leased job under the wall-clock cap.
    pub async fn process(&self, job: &QueueJob) -> ProcessDisposition {
        match tokio::time::timeout(self.job_timeout, self.process_inner(job)).await {
            Ok(disposition) => disposition,
            Err(_) => {
                warn!(job_id = job.id, lead_id = job.data.lead_id, "Job exceeded wall-clock cap");
                ProcessDisposition::Retry {
                    error: format!("job timed out after {:?}", self.job_timeout),
                    min_delay: None,
                }
            }
        }
    }

    async fn process_inner(&self, job: &QueueJob) -> ProcessDisposition {
        // 1. Load the lead; a missing row is non-retryable.
        let lead = match self.leads.find_by_id(job.data.lead_id).await {
            Ok(Some(lead)) => lead,
            Ok(None) => {
                error!(lead_id = job.data.lead_id, "Lead not found, dropping job");
                return ProcessDisposition::Ack;
            }
            Err(err) => {
                return ProcessDisposition::Retry {
                    error: format!("lead load failed: {err}"),
                    min_delay: None,
                };
            }
        };

        // 2. Enrichment; failures are logged and treated as absent.
        let enrichment = self.lookup_enrichment(&lead).await;

        // 3. AI analysis under a duration metric; provider failure falls back.
        let started = Instant::now();
        let raw = self
            .ai
            .analyze_lead(&lead, enrichment.as_ref())
            .await
            .unwrap_or_else(|err| {
                warn!(lead_id = lead.id, error = %err, "AI provider failed, using fallback");
                leadflow_grounding::fallback_analysis(&err.to_string())
            });
        self.metrics.observe_seconds(
            AI_ANALYSIS_DURATION_SECONDS,
            &[],
            started.elapsed().as_secs_f64(),
        );

        // 4. Ground and persist.
        let analysis = leadflow_grounding::validate(raw, enrichment.as_ref());
        let grounding = analysis
            .grounding_status
            .unwrap_or(GroundingStatus::Rejected);
        self.metrics.inc_counter(
            MCP_GROUNDING_DECISIONS_TOTAL,
            &[("status", grounding.as_str())],
        );
        if let Err(err) = self
            .leads
            .save_analysis(lead.id, &analysis, enrichment.as_ref())
            .await
        {
            return ProcessDisposition::Retry {
                error: format!("analysis persist failed: {err}"),
                min_delay: None,
            };
        }

        // 5. Hand over to the MCP.
        let report = self
            .orchestrator
            .execute(&lead, &analysis, enrichment.as_ref())
            .await;

        // 6. Map the outcome onto lead status and queue disposition.
        match report.status {
            McpStatus::Completed => {
                if let Err(err) = self.leads.update_status(lead.id, LeadStatus::SyncedToCrm).await
                {
                    return ProcessDisposition::Retry {
                        error: format!("status persist failed: {err}"),
                        min_delay: None,
                    };
                }
                self.count_lead(LeadStatus::SyncedToCrm);
                info!(
                    lead_id = lead.id,
                    execution_id = %report.execution_id,
                    actions = report.actions.len(),
                    "Lead synced to CRM"
                );
                ProcessDisposition::Ack
            }
            McpStatus::RejectedByGrounding => {
                let _ = self.leads.update_status(lead.id, LeadStatus::AiRejected).await;
                self.count_lead(LeadStatus::AiRejected);
                info!(lead_id = lead.id, "Lead rejected by grounding");
                ProcessDisposition::Ack
            }
            McpStatus::RateLimited => {
                let _ = self.leads.update_status(lead.id, LeadStatus::McpBlocked).await;
                self.count_lead(LeadStatus::McpBlocked);
                ProcessDisposition::Retry {
                    error: report
                        .errors
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "rate limited".to_string()),
                    min_delay: report.retry_after,
                }
            }
            McpStatus::Blocked => {
                let _ = self.leads.update_status(lead.id, LeadStatus::McpBlocked).await;
                self.count_lead(LeadStatus::McpBlocked);
                let error = report
                    .errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "blocked by MCP".to_string());
                if report.transient {
                    ProcessDisposition::Retry {
                        error,
                        min_delay: None,
                    }
                } else {
                    // Safety and validation blocks do not improve on retry.
                    warn!(lead_id = lead.id, error = %error, "Lead blocked, not retrying");
                    ProcessDisposition::Ack
                }
            }
        }
    }

    async fn lookup_enrichment(&self, lead: &Lead) -> Option<CompanyData> {
        let domain = lead.email_domain()?;
        match self.enrichment.company_by_domain(domain).await {
            Ok(company) => company,
            Err(err) => {
                warn!(lead_id = lead.id, domain, error = %err, "Enrichment lookup failed");
                None
            }
        }
    }
}

/// Ingress contract, modeled for the CLI seed path and tests: compute the
/// idempotency key, insert PENDING, enqueue the lead id. A duplicate ingest
/// returns the existing record unchanged and enqueues nothing.
pub async fn ingest(
    leads: &LeadStore,
    queue: &leadflow_queue::QueueClient,
    email: &str,
    campaign_id: &str,
    name: Option<&str>,
) -> Result<Lead> {
    let (lead, created) = leads.insert_pending(email, campaign_id, name).await?;
    if created {
        queue.enqueue(lead.id).await?;
    }
    Ok(lead)
}
