//! Dead-letter processor: drains the DLQ and marks leads permanently failed.

use crate::cancel::CancellationToken;
use leadflow_db::LeadStore;
use leadflow_protocol::metrics::LEADS_PROCESSED_TOTAL;
use leadflow_protocol::types::LeadStatus;
use leadflow_protocol::PipelineMetrics;
use leadflow_queue::QueueClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Drain loop over the DLQ. Runs alongside the consumer pool.
pub struct DlqProcessor {
    queue: Arc<QueueClient>,
    leads: LeadStore,
    metrics: Arc<PipelineMetrics>,
}

impl DlqProcessor {
    pub fn new(queue: Arc<QueueClient>, leads: LeadStore, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            queue,
            leads,
            metrics,
        }
    }

    /// Process DLQ entries until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("DLQ processor started");
        while !cancel.is_cancelled() {
            match self.drain_one().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(Duration::from_secs(1)).await,
                Err(err) => {
                    warn!(error = %err, "DLQ drain error, backing off");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
        info!("DLQ processor stopped");
    }

    /// Handle one entry. Returns false when the DLQ was empty.
    pub async fn drain_one(&self) -> anyhow::Result<bool> {
        let Some(leased) = self.queue.lease_dlq().await? else {
            return Ok(false);
        };
        let entry = &leased.entry;

        error!(
            lead_id = entry.lead_id,
            original_job_id = entry.original_job_id,
            attempts = entry.attempts_made,
            error = %entry.error,
            "Lead exhausted all retries"
        );
        self.leads
            .record_permanent_failure(entry.lead_id, &entry.error, entry.attempts_made)
            .await?;
        self.metrics.inc_counter(
            LEADS_PROCESSED_TOTAL,
            &[("status", LeadStatus::PermanentlyFailed.as_str())],
        );
        self.queue.ack_dlq(&leased).await?;
        Ok(true)
    }
}
