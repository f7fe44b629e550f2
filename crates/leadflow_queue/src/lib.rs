//! Durable queue client: lease-based delivery with retries and a DLQ.
//!
//! At-least-once delivery over the coordination store. Layout per queue
//! `<name>`:
//!
//! - `bull:<name>:id`       - job id counter
//! - `bull:<name>:wait`     - ready jobs (list, FIFO)
//! - `bull:<name>:active`   - leased jobs (list)
//! - `bull:<name>:delayed`  - retry-scheduled jobs (sorted set, score = due millis)
//! - `bull:<name>:lease:<id>` - lease heartbeat key with TTL
//!
//! The dead-letter queue reuses the same layout under `<name>-dlq`.
//! Redelivery can occur on lease expiry even without an explicit fail, so
//! consumers must be idempotent.

use chrono::Utc;
use leadflow_protocol::defaults::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_LEASE_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS,
};
use leadflow_protocol::types::{DlqEntry, JobData, QueueJob};
use leadflow_state_store::{KvBackend, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Queue operation result type.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Queue client errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Coordination store unreachable; the operation is retryable.
    #[error("Queue backend error: {0}")]
    Backend(#[from] StoreError),

    #[error("Queue codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl QueueError {
    /// True when the caller should back off and retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Backend(StoreError::Unavailable(_)))
    }
}

/// Enqueue/retry policy for one queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub lease_timeout_ms: u64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            lease_timeout_ms: DEFAULT_LEASE_TIMEOUT_MS,
        }
    }
}

/// A job held under lease. Carries the exact list entry so ack/fail can
/// remove it from the active lane.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: QueueJob,
    raw: String,
}

/// A DLQ entry held under lease.
#[derive(Debug, Clone)]
pub struct LeasedDlqEntry {
    pub entry: DlqEntry,
    raw: String,
}

/// Outcome of [`QueueClient::fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Retry scheduled after the given delay.
    Retried { delay_ms: u64 },
    /// Attempts exhausted; the job was published to the DLQ.
    DeadLettered,
}

/// Client for one named queue and its DLQ.
pub struct QueueClient {
    store: Arc<dyn KvBackend>,
    name: String,
    opts: QueueOptions,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl QueueClient {
    pub fn new(store: Arc<dyn KvBackend>, name: impl Into<String>, opts: QueueOptions) -> Self {
        Self {
            store,
            name: name.into(),
            opts,
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("bull:{}:{}", self.name, suffix)
    }

    fn dlq_key(&self, suffix: &str) -> String {
        format!("bull:{}-dlq:{}", self.name, suffix)
    }

    fn lease_key(&self, job_id: u64) -> String {
        self.key(&format!("lease:{job_id}"))
    }

    /// Enqueue a lead for processing. Blocks (errors) when the backend is
    /// unreachable; nothing is silently dropped.
    pub async fn enqueue(&self, lead_id: i64) -> Result<QueueJob> {
        let id = self.store.incr(&self.key("id")).await? as u64;
        let job = QueueJob {
            id,
            data: JobData { lead_id },
            attempts_made: 0,
            max_attempts: self.opts.max_attempts,
            first_seen_ms: now_millis(),
            last_error: None,
            base_delay_ms: self.opts.base_delay_ms,
            leased_at_ms: None,
        };
        self.store
            .lpush(&self.key("wait"), &serde_json::to_string(&job)?)
            .await?;
        debug!(job_id = id, lead_id, queue = %self.name, "Enqueued job");
        Ok(job)
    }

    /// Move retry-due jobs from the delayed lane back into the wait lane.
    async fn promote_due(&self) -> Result<()> {
        let due = self
            .store
            .zpop_due(&self.key("delayed"), now_millis())
            .await?;
        for raw in due {
            self.store.lpush(&self.key("wait"), &raw).await?;
        }
        Ok(())
    }

    /// Lease the next ready job, polling until `poll_timeout` elapses.
    ///
    /// Returns `Ok(None)` when nothing became available; callers loop and
    /// interleave their own shutdown checks between polls.
    pub async fn lease(&self, poll_timeout: Duration) -> Result<Option<LeasedJob>> {
        let deadline = tokio::time::Instant::now() + poll_timeout;
        loop {
            self.promote_due().await?;
            let moved = self
                .store
                .move_tail_to_head(&self.key("wait"), &self.key("active"))
                .await?;
            if let Some(raw) = moved {
                let mut job: QueueJob = serde_json::from_str(&raw)?;
                job.attempts_made += 1;
                job.leased_at_ms = Some(now_millis());
                self.store
                    .set_ex(
                        &self.lease_key(job.id),
                        "1",
                        (self.opts.lease_timeout_ms / 1_000).max(1),
                    )
                    .await?;
                debug!(job_id = job.id, attempt = job.attempts_made, "Leased job");
                return Ok(Some(LeasedJob { job, raw }));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Acknowledge successful processing; the job leaves the queue for good.
    pub async fn ack(&self, leased: &LeasedJob) -> Result<()> {
        self.store.lrem(&self.key("active"), &leased.raw).await?;
        Ok(())
    }

    /// Extend the lease on a long-running job.
    pub async fn renew_lease(&self, leased: &LeasedJob) -> Result<()> {
        self.store
            .set_ex(
                &self.lease_key(leased.job.id),
                "1",
                (self.opts.lease_timeout_ms / 1_000).max(1),
            )
            .await?;
        Ok(())
    }

    /// Record a processing failure.
    ///
    /// Schedules a retry at `max(backoff, min_delay)`; once attempts are
    /// exhausted the job is published to the DLQ instead.
    pub async fn fail(
        &self,
        leased: &LeasedJob,
        error: &str,
        min_delay: Option<Duration>,
    ) -> Result<FailOutcome> {
        self.store.lrem(&self.key("active"), &leased.raw).await?;

        let mut job = leased.job.clone();
        job.last_error = Some(error.to_string());
        job.leased_at_ms = None;

        if job.attempts_exhausted() {
            let entry = DlqEntry {
                original_job_id: job.id,
                lead_id: job.data.lead_id,
                error: error.to_string(),
                attempts_made: job.attempts_made,
                failed_at: Utc::now(),
            };
            self.store
                .lpush(&self.dlq_key("wait"), &serde_json::to_string(&entry)?)
                .await?;
            warn!(
                job_id = job.id,
                lead_id = job.data.lead_id,
                attempts = job.attempts_made,
                error,
                "Job exhausted retries, moved to DLQ"
            );
            return Ok(FailOutcome::DeadLettered);
        }

        let backoff = job.backoff_delay_ms();
        let delay_ms = match min_delay {
            Some(min) => backoff.max(min.as_millis() as u64),
            None => backoff,
        };
        self.store
            .zadd(
                &self.key("delayed"),
                now_millis() + delay_ms as i64,
                &serde_json::to_string(&job)?,
            )
            .await?;
        debug!(job_id = job.id, delay_ms, error, "Scheduled retry");
        Ok(FailOutcome::Retried { delay_ms })
    }

    /// Return expired active leases to the wait lane.
    ///
    /// A lease is expired when its heartbeat key is gone. Returns the number
    /// of jobs reclaimed.
    pub async fn reclaim_stalled(&self) -> Result<usize> {
        let active = self.store.lrange(&self.key("active")).await?;
        let mut reclaimed = 0;
        for raw in active {
            let job: QueueJob = match serde_json::from_str(&raw) {
                Ok(job) => job,
                Err(err) => {
                    warn!(error = %err, "Dropping unparseable active entry");
                    self.store.lrem(&self.key("active"), &raw).await?;
                    continue;
                }
            };
            if self.store.get(&self.lease_key(job.id)).await?.is_none() {
                self.store.lrem(&self.key("active"), &raw).await?;
                self.store.lpush(&self.key("wait"), &raw).await?;
                reclaimed += 1;
                warn!(job_id = job.id, "Reclaimed stalled lease");
            }
        }
        Ok(reclaimed)
    }

    /// Ready-jobs depth (wait lane only).
    pub async fn depth(&self) -> Result<usize> {
        Ok(self.store.llen(&self.key("wait")).await?)
    }

    pub async fn dlq_depth(&self) -> Result<usize> {
        Ok(self.store.llen(&self.dlq_key("wait")).await?)
    }

    /// Lease the next DLQ entry, if any.
    pub async fn lease_dlq(&self) -> Result<Option<LeasedDlqEntry>> {
        let moved = self
            .store
            .move_tail_to_head(&self.dlq_key("wait"), &self.dlq_key("active"))
            .await?;
        match moved {
            Some(raw) => {
                let entry: DlqEntry = serde_json::from_str(&raw)?;
                Ok(Some(LeasedDlqEntry { entry, raw }))
            }
            None => Ok(None),
        }
    }

    pub async fn ack_dlq(&self, leased: &LeasedDlqEntry) -> Result<()> {
        self.store.lrem(&self.dlq_key("active"), &leased.raw).await?;
        Ok(())
    }
}
