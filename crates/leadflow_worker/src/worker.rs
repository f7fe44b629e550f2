//! Worker node: a pool of consumer tasks over the durable queue.
//!
//! Each job is processed by a single task end-to-end. On shutdown the pool
//! refuses new leases, gives in-flight jobs a grace period, then aborts;
//! the queue redelivers anything cut off.

use crate::cancel::CancellationToken;
use crate::dlq::DlqProcessor;
use crate::processor::{LeadProcessor, ProcessDisposition};
use anyhow::Result;
use leadflow_protocol::defaults::{DEFAULT_CONCURRENCY, DEFAULT_SHUTDOWN_GRACE_SECS};
use leadflow_queue::QueueClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Worker configuration (plain data).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumer tasks leasing jobs in parallel.
    pub concurrency: usize,
    /// How long one lease poll blocks before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// Grace period for in-flight jobs on shutdown.
    pub shutdown_grace: Duration,
    /// Cadence of the stalled-lease reclaim sweep.
    pub reclaim_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            reclaim_interval: Duration::from_secs(30),
        }
    }
}

/// The lead worker: consumer pool plus DLQ processor and reclaim sweep.
pub struct LeadWorker {
    config: WorkerConfig,
    queue: Arc<QueueClient>,
    processor: Arc<LeadProcessor>,
    dlq: Arc<DlqProcessor>,
    cancel: CancellationToken,
}

impl LeadWorker {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<QueueClient>,
        processor: Arc<LeadProcessor>,
        dlq: Arc<DlqProcessor>,
    ) -> Self {
        Self {
            config,
            queue,
            processor,
            dlq,
            cancel: CancellationToken::new(),
        }
    }

    /// Token to request a graceful shutdown from outside (signal handler).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled. Returns once every task has wound down or the
    /// grace period expired.
    pub async fn run(&self) -> Result<()> {
        info!(concurrency = self.config.concurrency, "Worker starting");

        let mut handles = Vec::new();
        for slot in 0..self.config.concurrency {
            handles.push(tokio::spawn(consumer_loop(
                slot,
                self.queue.clone(),
                self.processor.clone(),
                self.cancel.clone(),
                self.config.poll_timeout,
            )));
        }

        let dlq = self.dlq.clone();
        let dlq_cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move {
            dlq.run(dlq_cancel).await;
        }));

        handles.push(tokio::spawn(reclaim_loop(
            self.queue.clone(),
            self.cancel.clone(),
            self.config.reclaim_interval,
        )));

        // Wait for cancellation, then give in-flight jobs the grace period.
        while !self.cancel.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        info!(grace = ?self.config.shutdown_grace, "Shutdown requested, draining in-flight jobs");

        let drain = async {
            for handle in &mut handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_grace, drain)
            .await
            .is_err()
        {
            warn!("Grace period expired, aborting outstanding jobs");
        }

        info!("Worker stopped");
        Ok(())
    }
}

async fn consumer_loop(
    slot: usize,
    queue: Arc<QueueClient>,
    processor: Arc<LeadProcessor>,
    cancel: CancellationToken,
    poll_timeout: Duration,
) {
    info!(slot, "Consumer started");
    while !cancel.is_cancelled() {
        let leased = match queue.lease(poll_timeout).await {
            Ok(Some(leased)) => leased,
            Ok(None) => continue,
            Err(err) if err.is_retryable() => {
                warn!(slot, error = %err, "Queue backend unreachable, backing off");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
            Err(err) => {
                warn!(slot, error = %err, "Lease failed");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        let disposition = processor.process(&leased.job).await;
        let result = match disposition {
            ProcessDisposition::Ack => queue.ack(&leased).await,
            ProcessDisposition::Retry { error, min_delay } => queue
                .fail(&leased, &error, min_delay)
                .await
                .map(|outcome| {
                    tracing::debug!(slot, job_id = leased.job.id, ?outcome, "Job failed");
                }),
        };
        if let Err(err) = result {
            warn!(slot, job_id = leased.job.id, error = %err, "Queue settle failed; lease will expire");
        }
    }
    info!(slot, "Consumer stopped");
}

async fn reclaim_loop(queue: Arc<QueueClient>, cancel: CancellationToken, interval: Duration) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(interval).await;
        match queue.reclaim_stalled().await {
            Ok(0) => {}
            Ok(reclaimed) => info!(reclaimed, "Returned stalled leases to the queue"),
            Err(err) => warn!(error = %err, "Stalled-lease reclaim failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
        assert!(config.shutdown_grace >= Duration::from_secs(1));
    }
}
