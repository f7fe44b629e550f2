//! Orchestrator behavior against the mock executor: audit ordering,
//! grounding short-circuit, critical vs non-critical failures, and the
//! per-provider CRM bucket.

use chrono::Utc;
use leadflow_db::SyncLogStore;
use leadflow_mcp::{
    BreakerConfig, CircuitBreakerRegistry, CrmError, IdempotencyStore, McpOrchestrator, McpStatus,
    MockExecutor, RateLimitConfig, TieredRateLimiter,
};
use leadflow_protocol::types::{
    AnalysisResult, ClaimType, CompanyData, Decision, Evidence, EvidenceSource, GroundingStatus,
    Intent, Lead, LeadStatus,
};
use leadflow_protocol::PipelineMetrics;
use leadflow_state_store::MemoryBackend;
use serde_json::json;
use std::sync::Arc;

struct Setup {
    orchestrator: McpOrchestrator,
    executor: Arc<MockExecutor>,
    sync_log: SyncLogStore,
    metrics: Arc<PipelineMetrics>,
}

async fn setup(crm_provider_limit: u64) -> Setup {
    let kv = Arc::new(MemoryBackend::new());
    let pool = leadflow_db::connect_memory().await.unwrap();
    let sync_log = SyncLogStore::new(pool);
    let executor = Arc::new(MockExecutor::without_latency());
    let metrics = Arc::new(PipelineMetrics::new());

    let orchestrator = McpOrchestrator::new(
        TieredRateLimiter::new(
            kv.clone(),
            RateLimitConfig {
                lead_limit: 100,
                crm_provider_limit,
                ..RateLimitConfig::default()
            },
        ),
        CircuitBreakerRegistry::new(BreakerConfig::default()),
        IdempotencyStore::new(kv),
        executor.clone(),
        sync_log.clone(),
        metrics.clone(),
    );

    Setup {
        orchestrator,
        executor,
        sync_log,
        metrics,
    }
}

fn lead() -> Lead {
    Lead {
        id: 1,
        idempotency_key: "key".to_string(),
        email: "jane@acme.io".to_string(),
        campaign_id: "spring".to_string(),
        name: Some("Jane Doe".to_string()),
        enrichment_data: None,
        status: LeadStatus::Enriched,
        fit_score: None,
        intent: None,
        reasoning: None,
        evidence: vec![],
        grounding_status: None,
        grounding_errors: vec![],
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn valid_analysis() -> AnalysisResult {
    AnalysisResult {
        fit_score: 90,
        intent: Intent::HighFit,
        decision: Decision::RouteToSdr,
        reasoning: "grounded".to_string(),
        evidence: vec![Evidence {
            source: EvidenceSource::Marketo,
            field_path: "marketo.campaign_id".to_string(),
            value: json!("spring"),
            claim_type: ClaimType::Behavior,
        }],
        grounding_status: Some(GroundingStatus::Valid),
        grounding_errors: vec![],
    }
}

fn rejected_analysis() -> AnalysisResult {
    AnalysisResult {
        grounding_status: Some(GroundingStatus::Rejected),
        grounding_errors: vec!["unauthorized source: WEB_SEARCH".to_string()],
        ..valid_analysis()
    }
}

fn enrichment() -> CompanyData {
    CompanyData {
        name: "Acme".to_string(),
        domain: "acme.io".to_string(),
        employees: Some(250),
        industry: Some("Fintech".to_string()),
        tech_stack: vec!["rust".to_string()],
        geo: Some("EU".to_string()),
    }
}

#[tokio::test]
async fn test_completed_plan_audits_in_order() {
    let s = setup(1_000).await;
    let report = s
        .orchestrator
        .execute(&lead(), &valid_analysis(), Some(&enrichment()))
        .await;

    assert_eq!(report.status, McpStatus::Completed);
    assert!(!report.halt);
    assert_eq!(report.actions.len(), 4);
    assert!(report.actions.iter().all(|a| a.success));

    let rows = s
        .sync_log
        .fetch_by_execution_id(&report.execution_id)
        .await
        .unwrap();
    let actions: Vec<&str> = rows.iter().map(|r| r.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["upsert_lead", "set_lead_score", "sync_firmographics", "log_activity"]
    );

    // Downstream actions reference the upserted CRM record.
    let upsert_id = report.actions[0].crm_record_id.clone().unwrap();
    assert_eq!(rows[1].params["lead_id"], json!(upsert_id));
    assert_eq!(rows[3].params["related_to_id"], json!(upsert_id));
}

#[tokio::test]
async fn test_grounding_rejection_short_circuits() {
    let s = setup(1_000).await;
    let report = s
        .orchestrator
        .execute(&lead(), &rejected_analysis(), Some(&enrichment()))
        .await;

    assert_eq!(report.status, McpStatus::RejectedByGrounding);
    assert!(report.actions.is_empty());
    assert!(s.executor.calls().is_empty());
    assert!(s
        .sync_log
        .fetch_by_execution_id(&report.execution_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_critical_failure_halts_plan() {
    let s = setup(1_000).await;
    s.executor.fail_tool(
        "upsert_lead",
        CrmError::Server {
            status: 502,
            message: "bad gateway".to_string(),
        },
    );

    let report = s
        .orchestrator
        .execute(&lead(), &valid_analysis(), Some(&enrichment()))
        .await;

    assert_eq!(report.status, McpStatus::Blocked);
    assert!(report.halt);
    assert!(report.transient);
    assert_eq!(report.actions.len(), 1);
    // Nothing past the critical failure ran.
    assert_eq!(s.executor.calls_for("set_lead_score"), 0);
    assert_eq!(s.executor.calls_for("log_activity"), 0);
}

#[tokio::test]
async fn test_non_critical_client_failure_is_collected() {
    let s = setup(1_000).await;
    s.executor.fail_tool(
        "set_lead_score",
        CrmError::Client {
            status: 400,
            message: "bad score field".to_string(),
        },
    );

    let report = s
        .orchestrator
        .execute(&lead(), &valid_analysis(), Some(&enrichment()))
        .await;

    assert_eq!(report.status, McpStatus::Completed);
    assert!(!report.halt);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("bad score field"));
    // The rest of the plan still ran.
    assert_eq!(s.executor.calls_for("sync_firmographics"), 1);
    assert_eq!(s.executor.calls_for("log_activity"), 1);
}

#[tokio::test]
async fn test_crm_bucket_exhaustion_mid_plan_rate_limits() {
    // Two provider tokens: upsert_lead and set_lead_score consume them,
    // sync_firmographics trips the bucket.
    let s = setup(2).await;
    let report = s
        .orchestrator
        .execute(&lead(), &valid_analysis(), Some(&enrichment()))
        .await;

    assert_eq!(report.status, McpStatus::RateLimited);
    assert!(report.halt);
    assert!(report.transient);
    assert!(report.retry_after.is_some());
    assert_eq!(s.executor.calls_for("sync_firmographics"), 0);
    assert_eq!(
        s.metrics.counter_value(
            leadflow_protocol::metrics::MCP_RATE_LIMIT_VIOLATIONS_TOTAL,
            &[("limit_type", "crm_provider")],
        ),
        1
    );
}

#[tokio::test]
async fn test_breaker_open_fails_fast_on_remaining_calls() {
    let s = setup(1_000).await;
    s.executor.fail_tool(
        "log_activity",
        CrmError::Server {
            status: 503,
            message: "down".to_string(),
        },
    );

    // Default volume threshold is 10; drive enough executions to open the
    // log_activity breaker, then observe fail-fast.
    for _ in 0..10 {
        let _ = s
            .orchestrator
            .execute(&lead(), &valid_analysis(), Some(&enrichment()))
            .await;
    }
    let calls_before = s.executor.calls_for("log_activity");
    let report = s
        .orchestrator
        .execute(&lead(), &valid_analysis(), Some(&enrichment()))
        .await;

    // Breaker open: the executor was not invoked again for log_activity.
    assert_eq!(s.executor.calls_for("log_activity"), calls_before);
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("Circuit breaker open")));
}
