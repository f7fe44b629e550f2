//! Leadflow launcher.
//!
//! Subcommands:
//! - `worker`  - run the consumer pool (plus DLQ processor and reclaim sweep)
//! - `ingest`  - seed a lead through the ingress contract
//! - `status`  - queue depths at a glance

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use leadflow_db::{LeadStore, SyncLogStore};
use leadflow_logging::{init_logging, LogConfig};
use leadflow_mcp::{
    BreakerConfig, CircuitBreakerRegistry, CrmExecutor, IdempotencyStore, McpOrchestrator,
    MockExecutor, SalesforceConfig, SalesforceExecutor, TieredRateLimiter,
};
use leadflow_protocol::PipelineMetrics;
use leadflow_queue::{QueueClient, QueueOptions};
use leadflow_worker::{
    ingest, DlqProcessor, LeadProcessor, LeadWorker, RuleBasedAi, StaticEnrichment, WorkerConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod config;

use config::{AppConfig, CrmProvider};

#[derive(Parser, Debug)]
#[command(name = "leadflow", about = "Durable lead ingestion and CRM sync pipeline")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the lead worker until interrupted
    Worker,

    /// Ingest one lead (idempotent on email + campaign)
    Ingest {
        email: String,
        campaign_id: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// Show queue and DLQ depth
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "leadflow",
        verbose: cli.verbose,
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(async {
        let config = AppConfig::from_env()?;
        match cli.command {
            Commands::Worker => run_worker(config).await,
            Commands::Ingest {
                email,
                campaign_id,
                name,
            } => run_ingest(config, &email, &campaign_id, name.as_deref()).await,
            Commands::Status => run_status(config).await,
        }
    })
}

fn build_executor(config: &AppConfig) -> Result<Arc<dyn CrmExecutor>> {
    match config.crm_provider {
        CrmProvider::Mock => Ok(Arc::new(MockExecutor::new())),
        CrmProvider::Salesforce => {
            let base_url = config
                .salesforce_base_url
                .clone()
                .context("SALESFORCE_BASE_URL missing")?;
            let token = config
                .salesforce_access_token
                .clone()
                .context("SALESFORCE_ACCESS_TOKEN missing")?;
            let executor = SalesforceExecutor::new(SalesforceConfig::new(base_url, token))
                .map_err(|err| anyhow::anyhow!("Failed to build Salesforce executor: {err}"))?;
            Ok(Arc::new(executor))
        }
    }
}

async fn run_worker(config: AppConfig) -> Result<()> {
    let kv = leadflow_state_store::connect(&config.redis_url)
        .await
        .map_err(|err| anyhow::anyhow!("Coordination store: {err}"))?;
    let pool = leadflow_db::connect(&config.database_url).await?;
    let leads = LeadStore::new(pool.clone());
    let sync_log = SyncLogStore::new(pool);
    let queue = Arc::new(QueueClient::new(
        kv.clone(),
        config.queue_name.clone(),
        QueueOptions::default(),
    ));
    let metrics = Arc::new(PipelineMetrics::new());
    let executor = build_executor(&config)?;

    let orchestrator = Arc::new(McpOrchestrator::new(
        TieredRateLimiter::new(kv.clone(), config.rate_limits.clone()),
        CircuitBreakerRegistry::new(BreakerConfig::default()),
        IdempotencyStore::new(kv.clone()),
        executor,
        sync_log,
        metrics.clone(),
    ));
    let processor = Arc::new(LeadProcessor::new(
        leads.clone(),
        Arc::new(RuleBasedAi),
        Arc::new(StaticEnrichment::new()),
        orchestrator,
        metrics.clone(),
        Duration::from_secs(config.job_timeout_secs),
    ));
    let dlq = Arc::new(DlqProcessor::new(queue.clone(), leads, metrics));

    let worker = LeadWorker::new(
        WorkerConfig {
            concurrency: config.concurrency,
            ..WorkerConfig::default()
        },
        queue,
        processor,
        dlq,
    );

    let cancel = worker.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });

    worker.run().await
}

async fn run_ingest(
    config: AppConfig,
    email: &str,
    campaign_id: &str,
    name: Option<&str>,
) -> Result<()> {
    let kv = leadflow_state_store::connect(&config.redis_url)
        .await
        .map_err(|err| anyhow::anyhow!("Coordination store: {err}"))?;
    let pool = leadflow_db::connect(&config.database_url).await?;
    let leads = LeadStore::new(pool);
    let queue = QueueClient::new(kv, config.queue_name, QueueOptions::default());

    let lead = ingest(&leads, &queue, email, campaign_id, name).await?;
    println!("{}", serde_json::to_string_pretty(&lead)?);
    Ok(())
}

async fn run_status(config: AppConfig) -> Result<()> {
    let kv = leadflow_state_store::connect(&config.redis_url)
        .await
        .map_err(|err| anyhow::anyhow!("Coordination store: {err}"))?;
    let queue = QueueClient::new(kv, config.queue_name.clone(), QueueOptions::default());

    println!("queue: {}", config.queue_name);
    println!("  ready: {}", queue.depth().await.map_err(anyhow::Error::from)?);
    println!("  dlq:   {}", queue.dlq_depth().await.map_err(anyhow::Error::from)?);
    Ok(())
}
