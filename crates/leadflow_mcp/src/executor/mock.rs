//! Mock executor for local runs and tests.
//!
//! Simulates CRM latency (100-300 ms, deterministic spread), hands out
//! synthetic prefixed record ids, and records every call so tests can assert
//! exactly which executor methods ran.

use super::{
    AddNoteParams, AttachCampaignParams, ConvertLeadParams, CreateContactParams,
    CreateFollowUpParams, CreateOpportunityParams, CreateTaskParams, CrmExecutor, LeadUpsertParams,
    LinkContactParams, LogActivityParams, MatchAccountParams, SetLeadScoreParams,
    SetOpportunityValueParams, SyncFirmographicsParams, UpdateLeadFieldsParams,
    UpdateLeadStatusParams, UpdateOpportunityStageParams,
};
use crate::types::{CrmError, CrmResult, McpContext};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One recorded executor call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub tool: String,
    pub execution_id: String,
    pub params: Value,
}

/// In-memory executor. Always reports `mock = true`.
pub struct MockExecutor {
    sequence: AtomicU64,
    simulate_latency: bool,
    calls: Mutex<Vec<RecordedCall>>,
    scripted_failures: Mutex<HashMap<String, CrmError>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            simulate_latency: true,
            calls: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Disable the simulated latency (unit tests).
    pub fn without_latency() -> Self {
        Self {
            simulate_latency: false,
            ..Self::new()
        }
    }

    /// Make the next calls of `tool` fail with the given error.
    pub fn fail_tool(&self, tool: &str, error: CrmError) {
        self.scripted_failures
            .lock()
            .expect("mock lock poisoned")
            .insert(tool.to_string(), error);
    }

    pub fn clear_failures(&self) {
        self.scripted_failures
            .lock()
            .expect("mock lock poisoned")
            .clear();
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    pub fn calls_for(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .filter(|call| call.tool == tool)
            .count()
    }

    fn synth_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        // Letter-padded base36 keeps ids free of long digit runs, which the
        // audit layer treats as phone-number-shaped PII.
        format!("{prefix}{:A>12}", base36_upper(n))
    }

    async fn simulate(
        &self,
        tool: &str,
        ctx: &McpContext,
        prefix: &str,
        params: Value,
    ) -> Result<CrmResult, CrmError> {
        if let Some(error) = self
            .scripted_failures
            .lock()
            .expect("mock lock poisoned")
            .get(tool)
            .cloned()
        {
            self.record(tool, ctx, params);
            return Err(error);
        }

        if self.simulate_latency {
            // Deterministic spread over 100-300 ms.
            let n = self.sequence.load(Ordering::SeqCst);
            let jitter = (n * 37) % 200;
            tokio::time::sleep(Duration::from_millis(100 + jitter)).await;
        }

        let id = self.synth_id(prefix);
        self.record(tool, ctx, params);
        Ok(CrmResult::ok(id, true))
    }

    fn record(&self, tool: &str, ctx: &McpContext, params: Value) {
        self.calls.lock().expect("mock lock poisoned").push(RecordedCall {
            tool: tool.to_string(),
            execution_id: ctx.execution_id.clone(),
            params,
        });
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn base36_upper(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}

#[async_trait::async_trait]
impl CrmExecutor for MockExecutor {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn create_lead(
        &self,
        ctx: &McpContext,
        params: LeadUpsertParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("create_lead", ctx, "00Q", value).await
    }

    async fn upsert_lead(
        &self,
        ctx: &McpContext,
        params: LeadUpsertParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("upsert_lead", ctx, "00Q", value)
            .await
            .map(|result| result.with_data(json!({"upserted": true})))
    }

    async fn convert_lead(
        &self,
        ctx: &McpContext,
        params: ConvertLeadParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("convert_lead", ctx, "003", value).await
    }

    async fn update_lead_status(
        &self,
        ctx: &McpContext,
        params: UpdateLeadStatusParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("update_lead_status", ctx, "00Q", value).await
    }

    async fn update_lead_fields(
        &self,
        ctx: &McpContext,
        params: UpdateLeadFieldsParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("update_lead_fields", ctx, "00Q", value).await
    }

    async fn set_lead_score(
        &self,
        ctx: &McpContext,
        params: SetLeadScoreParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("set_lead_score", ctx, "00Q", value).await
    }

    async fn match_account(
        &self,
        ctx: &McpContext,
        params: MatchAccountParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("match_account", ctx, "001", value)
            .await
            .map(|result| result.with_data(json!({"matched": true})))
    }

    async fn create_contact(
        &self,
        ctx: &McpContext,
        params: CreateContactParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("create_contact", ctx, "003", value).await
    }

    async fn link_contact_to_account(
        &self,
        ctx: &McpContext,
        params: LinkContactParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("link_contact_to_account", ctx, "003", value).await
    }

    async fn create_opportunity(
        &self,
        ctx: &McpContext,
        params: CreateOpportunityParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("create_opportunity", ctx, "006", value).await
    }

    async fn update_opportunity_stage(
        &self,
        ctx: &McpContext,
        params: UpdateOpportunityStageParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("update_opportunity_stage", ctx, "006", value).await
    }

    async fn set_opportunity_value(
        &self,
        ctx: &McpContext,
        params: SetOpportunityValueParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("set_opportunity_value", ctx, "006", value).await
    }

    async fn attach_campaign(
        &self,
        ctx: &McpContext,
        params: AttachCampaignParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("attach_campaign", ctx, "701", value).await
    }

    async fn create_task(
        &self,
        ctx: &McpContext,
        params: CreateTaskParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("create_task", ctx, "00T", value).await
    }

    async fn log_activity(
        &self,
        ctx: &McpContext,
        params: LogActivityParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("log_activity", ctx, "00U", value).await
    }

    async fn add_note(
        &self,
        ctx: &McpContext,
        params: AddNoteParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("add_note", ctx, "002", value).await
    }

    async fn create_follow_up(
        &self,
        ctx: &McpContext,
        params: CreateFollowUpParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("create_follow_up", ctx, "00T", value).await
    }

    async fn sync_firmographics(
        &self,
        ctx: &McpContext,
        params: SyncFirmographicsParams,
    ) -> Result<CrmResult, CrmError> {
        let value = serde_json::to_value(&params).unwrap_or(Value::Null);
        self.simulate("sync_firmographics", ctx, "00Q", value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_protocol::types::GroundingStatus;

    fn ctx() -> McpContext {
        McpContext::new(1, "jane@acme.io", Some("spring".into()), GroundingStatus::Valid)
    }

    #[tokio::test]
    async fn test_synthetic_ids_have_crm_shape() {
        let executor = MockExecutor::without_latency();
        let result = executor
            .upsert_lead(
                &ctx(),
                LeadUpsertParams {
                    email: "jane@acme.io".into(),
                    first_name: Some("Jane".into()),
                    last_name: None,
                    company: None,
                },
            )
            .await
            .unwrap();

        let id = result.crm_record_id.unwrap();
        assert!(id.starts_with("00Q"));
        assert_eq!(id.len(), 15);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(result.mock);
    }

    #[tokio::test]
    async fn test_calls_are_recorded() {
        let executor = MockExecutor::without_latency();
        let ctx = ctx();
        executor
            .log_activity(
                &ctx,
                LogActivityParams {
                    related_to_id: "00Q000000000001".into(),
                    activity_type: "ai_analysis".into(),
                    description: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(executor.calls_for("log_activity"), 1);
        let calls = executor.calls();
        assert_eq!(calls[0].execution_id, ctx.execution_id);
        assert_eq!(calls[0].params["type"], "ai_analysis");
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let executor = MockExecutor::without_latency();
        executor.fail_tool(
            "upsert_lead",
            CrmError::Server {
                status: 503,
                message: "maintenance".into(),
            },
        );

        let err = executor
            .upsert_lead(
                &ctx(),
                LeadUpsertParams {
                    email: "a@b.c".into(),
                    first_name: None,
                    last_name: None,
                    company: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());

        executor.clear_failures();
        assert!(executor
            .upsert_lead(
                &ctx(),
                LeadUpsertParams {
                    email: "a@b.c".into(),
                    first_name: None,
                    last_name: None,
                    company: None,
                },
            )
            .await
            .is_ok());
    }
}
