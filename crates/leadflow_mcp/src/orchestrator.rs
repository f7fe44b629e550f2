//! MCP orchestrator: drives safety, quotas, the action plan and auditing for
//! one lead.
//!
//! Single-flow by design - actions run strictly in plan order, so the audit
//! trail of one execution id is a contiguous, ordered sequence. Expected
//! failures come back inside the report; only infrastructure bugs would
//! surface as panics, and there are none of those on this path.

use crate::breaker::CircuitBreakerRegistry;
use crate::executor::{dispatch, CrmExecutor};
use crate::idempotency::IdempotencyStore;
use crate::plan::{build_action_plan, resolve_lead_id};
use crate::rate_limit::{RateLimitDecision, TieredRateLimiter};
use crate::redaction::PiiRedactor;
use crate::safety::SafetyGuard;
use crate::tools::ToolRegistry;
use crate::types::{ActionOutcome, CrmError, McpContext, McpStatus};
use leadflow_db::{NewSyncLog, SyncLogStore};
use leadflow_protocol::metrics::{
    MCP_ACTION_DURATION_SECONDS, MCP_ACTIONS_TOTAL, MCP_CIRCUIT_BREAKER_STATE,
    MCP_CRM_API_DURATION_SECONDS, MCP_RATE_LIMIT_VIOLATIONS_TOTAL, MCP_SAFETY_BLOCKS_TOTAL,
};
use leadflow_protocol::types::{AnalysisResult, CompanyData, GroundingStatus, Lead};
use leadflow_protocol::PipelineMetrics;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one MCP invocation.
#[derive(Debug, Clone)]
pub struct McpReport {
    pub status: McpStatus,
    pub execution_id: String,
    pub actions: Vec<ActionOutcome>,
    pub errors: Vec<String>,
    pub halt: bool,
    /// Minimum delay before a retry makes sense (rate limiting).
    pub retry_after: Option<Duration>,
    /// Whether the blocking failure was transient (retry may succeed).
    pub transient: bool,
}

impl McpReport {
    fn new(status: McpStatus, execution_id: String) -> Self {
        Self {
            status,
            execution_id,
            actions: vec![],
            errors: vec![],
            halt: false,
            retry_after: None,
            transient: false,
        }
    }
}

/// The MCP entry point: owns every safety and quota layer plus the executor.
pub struct McpOrchestrator {
    guard: SafetyGuard,
    registry: ToolRegistry,
    redactor: PiiRedactor,
    limiter: TieredRateLimiter,
    breakers: CircuitBreakerRegistry,
    idempotency: IdempotencyStore,
    executor: Arc<dyn CrmExecutor>,
    audit: SyncLogStore,
    metrics: Arc<PipelineMetrics>,
}

impl McpOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        limiter: TieredRateLimiter,
        breakers: CircuitBreakerRegistry,
        idempotency: IdempotencyStore,
        executor: Arc<dyn CrmExecutor>,
        audit: SyncLogStore,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let guard = SafetyGuard::new();
        let registry = ToolRegistry::new(&guard);
        Self {
            guard,
            registry,
            redactor: PiiRedactor::default(),
            limiter,
            breakers,
            idempotency,
            executor,
            audit,
            metrics,
        }
    }

    /// Execute the action plan for one grounded lead.
    pub async fn execute(
        &self,
        lead: &Lead,
        analysis: &AnalysisResult,
        enrichment: Option<&CompanyData>,
    ) -> McpReport {
        let grounding = analysis.grounding_status.unwrap_or(GroundingStatus::Valid);
        let ctx = McpContext::new(
            lead.id,
            lead.email.clone(),
            Some(lead.campaign_id.clone()),
            grounding,
        );

        if grounding == GroundingStatus::Rejected {
            debug!(lead_id = lead.id, "Grounding rejected, skipping CRM sync");
            return McpReport::new(McpStatus::RejectedByGrounding, ctx.execution_id);
        }

        if let Err(violation) = self.guard.check_context(&ctx) {
            warn!(lead_id = lead.id, reason = %violation.reason, "Safety guard blocked context");
            self.metrics.inc_counter(
                MCP_SAFETY_BLOCKS_TOTAL,
                &[("tool", "context"), ("reason", "context_check")],
            );
            let mut report = McpReport::new(McpStatus::Blocked, ctx.execution_id);
            report.halt = true;
            report.errors.push(violation.reason);
            return report;
        }

        let decision = self.limiter.check(lead.id, lead.email_domain()).await;
        if !decision.allowed {
            return self.rate_limited_report(&ctx, decision);
        }

        let mut report = McpReport::new(McpStatus::Completed, ctx.execution_id.clone());
        let mut crm_lead_id: Option<String> = None;
        let provider = self.executor.provider().to_string();

        for mut action in build_action_plan(lead, analysis, enrichment) {
            if let Some(id) = &crm_lead_id {
                resolve_lead_id(&mut action.params, id);
            }

            let spec = match self.registry.get(action.tool) {
                Some(spec) => spec.clone(),
                None => {
                    report.errors.push(format!("unknown tool: {}", action.tool));
                    if action.critical {
                        report.status = McpStatus::Blocked;
                        report.halt = true;
                        break;
                    }
                    continue;
                }
            };

            // Schema validation fails the call before any side effect.
            if let Err(error) = self.registry.validate_params(action.tool, &action.params) {
                self.metrics.inc_counter(
                    MCP_SAFETY_BLOCKS_TOTAL,
                    &[("tool", action.tool), ("reason", "schema")],
                );
                self.append_audit(&ctx, &spec.entity_type, &action, None, "validation_failed", 0, Some(error.as_str()), None, &provider)
                    .await;
                report.actions.push(ActionOutcome {
                    tool: action.tool.to_string(),
                    success: false,
                    cached: false,
                    crm_record_id: None,
                    error: Some(error.clone()),
                    duration_ms: 0,
                });
                report.errors.push(error);
                if action.critical {
                    report.status = McpStatus::Blocked;
                    report.halt = true;
                    break;
                }
                continue;
            }

            // Safety-guard decisions always halt.
            if let Err(violation) = self.guard.check_params(&action.params) {
                self.metrics.inc_counter(
                    MCP_SAFETY_BLOCKS_TOTAL,
                    &[("tool", action.tool), ("reason", "blocked_pattern")],
                );
                self.append_audit(&ctx, &spec.entity_type, &action, None, "safety_blocked", 0, Some(violation.reason.as_str()), None, &provider)
                    .await;
                report.actions.push(ActionOutcome {
                    tool: action.tool.to_string(),
                    success: false,
                    cached: false,
                    crm_record_id: None,
                    error: Some(violation.reason.clone()),
                    duration_ms: 0,
                });
                report.errors.push(violation.reason);
                report.status = McpStatus::Blocked;
                report.halt = true;
                break;
            }

            let idem_key = self.idempotency.action_key(
                spec.key_mode,
                &lead.email,
                Some(&lead.campaign_id),
                action.tool,
            );
            let check = self.idempotency.is_processed(&idem_key).await;
            if check.processed {
                let cached = check.result.unwrap_or(serde_json::Value::Null);
                let record_id = cached
                    .get("crm_record_id")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string);
                debug!(tool = action.tool, "Idempotent replay, serving cached result");
                self.metrics.inc_counter(
                    MCP_ACTIONS_TOTAL,
                    &[("tool", action.tool), ("status", "cached"), ("crm_provider", &provider)],
                );
                if action.tool == "upsert_lead" {
                    crm_lead_id = record_id.clone();
                }
                report.actions.push(ActionOutcome {
                    tool: action.tool.to_string(),
                    success: true,
                    cached: true,
                    crm_record_id: record_id,
                    error: None,
                    duration_ms: 0,
                });
                continue;
            }

            // One CRM-bucket token per executor call.
            let crm_decision = self.limiter.check_crm_provider(&provider).await;
            if !crm_decision.allowed {
                let rate_report = self.rate_limited_report(&ctx, crm_decision);
                report.status = rate_report.status;
                report.halt = true;
                report.retry_after = rate_report.retry_after;
                report.transient = true;
                report.errors.extend(rate_report.errors);
                break;
            }

            let operation = format!("{provider}:{}", action.tool);
            let started = Instant::now();
            let result = self
                .breakers
                .call(&operation, dispatch(self.executor.as_ref(), action.tool, &ctx, &action.params))
                .await;
            let elapsed = started.elapsed();
            let duration_ms = elapsed.as_millis() as i64;

            self.metrics.set_gauge(
                MCP_CIRCUIT_BREAKER_STATE,
                &[("crm_provider", &provider), ("operation", action.tool)],
                self.breakers.state_of(&operation).as_gauge(),
            );
            self.metrics.observe_seconds(
                MCP_ACTION_DURATION_SECONDS,
                &[("tool", action.tool), ("crm_provider", &provider)],
                elapsed.as_secs_f64(),
            );

            match result {
                Ok(result) => {
                    self.metrics.inc_counter(
                        MCP_ACTIONS_TOTAL,
                        &[("tool", action.tool), ("status", "success"), ("crm_provider", &provider)],
                    );
                    self.metrics.observe_seconds(
                        MCP_CRM_API_DURATION_SECONDS,
                        &[("crm_provider", &provider), ("operation", action.tool), ("status", "success")],
                        elapsed.as_secs_f64(),
                    );
                    self.append_audit(
                        &ctx,
                        &spec.entity_type,
                        &action,
                        result.crm_record_id.as_deref(),
                        "success",
                        duration_ms,
                        None,
                        Some(idem_key.as_str()),
                        &provider,
                    )
                    .await;

                    let stored = json!({
                        "crm_record_id": &result.crm_record_id,
                        "data": &result.data,
                    });
                    self.idempotency.store_result(&idem_key, &stored).await;

                    if action.tool == "upsert_lead" {
                        crm_lead_id = result.crm_record_id.clone();
                    }
                    report.actions.push(ActionOutcome {
                        tool: action.tool.to_string(),
                        success: true,
                        cached: false,
                        crm_record_id: result.crm_record_id,
                        error: None,
                        duration_ms,
                    });
                }
                Err(error) => {
                    let status_label = "failed";
                    self.metrics.inc_counter(
                        MCP_ACTIONS_TOTAL,
                        &[("tool", action.tool), ("status", status_label), ("crm_provider", &provider)],
                    );
                    self.metrics.observe_seconds(
                        MCP_CRM_API_DURATION_SECONDS,
                        &[("crm_provider", &provider), ("operation", action.tool), ("status", status_label)],
                        elapsed.as_secs_f64(),
                    );
                    let message = error.to_string();
                    self.append_audit(
                        &ctx,
                        &spec.entity_type,
                        &action,
                        None,
                        "failed",
                        duration_ms,
                        Some(message.as_str()),
                        Some(idem_key.as_str()),
                        &provider,
                    )
                    .await;

                    report.actions.push(ActionOutcome {
                        tool: action.tool.to_string(),
                        success: false,
                        cached: false,
                        crm_record_id: None,
                        error: Some(message.clone()),
                        duration_ms,
                    });
                    report.errors.push(message);

                    if action.critical {
                        report.status = McpStatus::Blocked;
                        report.halt = true;
                        report.transient = error.is_transient();
                        break;
                    }
                    if matches!(error, CrmError::BreakerOpen { .. }) {
                        // An open breaker will fail every remaining call too.
                        report.transient = true;
                    }
                }
            }
        }

        info!(
            lead_id = lead.id,
            execution_id = %report.execution_id,
            status = report.status.as_str(),
            actions = report.actions.len(),
            errors = report.errors.len(),
            "MCP execution finished"
        );
        report
    }

    fn rate_limited_report(&self, ctx: &McpContext, decision: RateLimitDecision) -> McpReport {
        for (tier, message) in &decision.violations {
            warn!(lead_id = ctx.lead_id, tier = tier.as_str(), "{message}");
            self.metrics.inc_counter(
                MCP_RATE_LIMIT_VIOLATIONS_TOTAL,
                &[("limit_type", tier.as_str())],
            );
        }
        let mut report = McpReport::new(McpStatus::RateLimited, ctx.execution_id.clone());
        report.halt = true;
        report.transient = true;
        report.retry_after = decision.retry_after_secs().map(Duration::from_secs);
        report.errors = decision
            .violations
            .into_iter()
            .map(|(_, message)| message)
            .collect();
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_audit(
        &self,
        ctx: &McpContext,
        entity_type: &str,
        action: &crate::plan::PlannedAction,
        entity_id: Option<&str>,
        result: &str,
        duration_ms: i64,
        error_message: Option<&str>,
        idempotency_key: Option<&str>,
        provider: &str,
    ) -> Option<i64> {
        let entry = NewSyncLog {
            action: action.tool.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.map(str::to_string),
            params: self.redactor.redact_params(&action.params),
            result: result.to_string(),
            mcp_execution_id: ctx.execution_id.clone(),
            idempotency_key: idempotency_key.map(str::to_string),
            mock: provider == "mock",
            lead_id: Some(ctx.lead_id),
            duration_ms,
            error_message: error_message.map(str::to_string),
        };
        match self.audit.append(&entry).await {
            Ok(id) => Some(id),
            Err(err) => {
                // Fail open: losing one audit row must not stall the lead.
                warn!(error = %err, tool = action.tool, "Failed to append audit row");
                None
            }
        }
    }
}
