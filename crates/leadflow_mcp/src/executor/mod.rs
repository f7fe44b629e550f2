//! Executor abstraction: one method per registered tool.
//!
//! Parameters are typed records deserialized from the validated JSON;
//! dispatch maps a tool name onto the matching executor method. Conforming
//! variants: [`MockExecutor`] (local/test) and [`SalesforceExecutor`].

mod mock;
mod salesforce;

pub use mock::{MockExecutor, RecordedCall};
pub use salesforce::{
    sanitize_field_value, validate_crm_id, QueryBuilder, SalesforceConfig, SalesforceExecutor,
};

use crate::types::{CrmError, CrmResult, McpContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Typed parameter records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadUpsertParams {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertLeadParams {
    pub lead_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLeadStatusParams {
    pub lead_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLeadFieldsParams {
    pub lead_id: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLeadScoreParams {
    pub lead_id: String,
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchAccountParams {
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContactParams {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkContactParams {
    pub contact_id: String,
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOpportunityParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOpportunityStageParams {
    pub opportunity_id: String,
    pub stage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOpportunityValueParams {
    pub opportunity_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachCampaignParams {
    pub lead_id: String,
    pub campaign_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskParams {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogActivityParams {
    pub related_to_id: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNoteParams {
    pub related_to_id: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFollowUpParams {
    pub related_to_id: String,
    pub due_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Firmographics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employees: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tech_stack: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFirmographicsParams {
    pub lead_id: String,
    pub firmographics: Firmographics,
}

// ============================================================================
// Executor trait
// ============================================================================

/// One conforming CRM implementation.
///
/// Every method is idempotent from the caller's side; at-least-once delivery
/// means any of these can run twice for the same logical action.
#[async_trait::async_trait]
pub trait CrmExecutor: Send + Sync {
    /// Provider tag used in metrics, breaker keys and audit rows.
    fn provider(&self) -> &str;

    async fn create_lead(&self, ctx: &McpContext, params: LeadUpsertParams)
        -> Result<CrmResult, CrmError>;
    async fn upsert_lead(&self, ctx: &McpContext, params: LeadUpsertParams)
        -> Result<CrmResult, CrmError>;
    async fn convert_lead(&self, ctx: &McpContext, params: ConvertLeadParams)
        -> Result<CrmResult, CrmError>;
    async fn update_lead_status(
        &self,
        ctx: &McpContext,
        params: UpdateLeadStatusParams,
    ) -> Result<CrmResult, CrmError>;
    async fn update_lead_fields(
        &self,
        ctx: &McpContext,
        params: UpdateLeadFieldsParams,
    ) -> Result<CrmResult, CrmError>;
    async fn set_lead_score(&self, ctx: &McpContext, params: SetLeadScoreParams)
        -> Result<CrmResult, CrmError>;
    async fn match_account(&self, ctx: &McpContext, params: MatchAccountParams)
        -> Result<CrmResult, CrmError>;
    async fn create_contact(&self, ctx: &McpContext, params: CreateContactParams)
        -> Result<CrmResult, CrmError>;
    async fn link_contact_to_account(
        &self,
        ctx: &McpContext,
        params: LinkContactParams,
    ) -> Result<CrmResult, CrmError>;
    async fn create_opportunity(
        &self,
        ctx: &McpContext,
        params: CreateOpportunityParams,
    ) -> Result<CrmResult, CrmError>;
    async fn update_opportunity_stage(
        &self,
        ctx: &McpContext,
        params: UpdateOpportunityStageParams,
    ) -> Result<CrmResult, CrmError>;
    async fn set_opportunity_value(
        &self,
        ctx: &McpContext,
        params: SetOpportunityValueParams,
    ) -> Result<CrmResult, CrmError>;
    async fn attach_campaign(&self, ctx: &McpContext, params: AttachCampaignParams)
        -> Result<CrmResult, CrmError>;
    async fn create_task(&self, ctx: &McpContext, params: CreateTaskParams)
        -> Result<CrmResult, CrmError>;
    async fn log_activity(&self, ctx: &McpContext, params: LogActivityParams)
        -> Result<CrmResult, CrmError>;
    async fn add_note(&self, ctx: &McpContext, params: AddNoteParams)
        -> Result<CrmResult, CrmError>;
    async fn create_follow_up(&self, ctx: &McpContext, params: CreateFollowUpParams)
        -> Result<CrmResult, CrmError>;
    async fn sync_firmographics(
        &self,
        ctx: &McpContext,
        params: SyncFirmographicsParams,
    ) -> Result<CrmResult, CrmError>;
}

fn decode<T: serde::de::DeserializeOwned>(tool: &str, params: &Value) -> Result<T, CrmError> {
    serde_json::from_value(params.clone())
        .map_err(|err| CrmError::Validation(format!("{tool}: {err}")))
}

/// Dispatch a validated parameter object to the matching executor method.
pub async fn dispatch(
    executor: &dyn CrmExecutor,
    tool: &str,
    ctx: &McpContext,
    params: &Value,
) -> Result<CrmResult, CrmError> {
    match tool {
        "create_lead" => executor.create_lead(ctx, decode(tool, params)?).await,
        "upsert_lead" => executor.upsert_lead(ctx, decode(tool, params)?).await,
        "convert_lead" => executor.convert_lead(ctx, decode(tool, params)?).await,
        "update_lead_status" => executor.update_lead_status(ctx, decode(tool, params)?).await,
        "update_lead_fields" => executor.update_lead_fields(ctx, decode(tool, params)?).await,
        "set_lead_score" => executor.set_lead_score(ctx, decode(tool, params)?).await,
        "match_account" => executor.match_account(ctx, decode(tool, params)?).await,
        "create_contact" => executor.create_contact(ctx, decode(tool, params)?).await,
        "link_contact_to_account" => {
            executor.link_contact_to_account(ctx, decode(tool, params)?).await
        }
        "create_opportunity" => executor.create_opportunity(ctx, decode(tool, params)?).await,
        "update_opportunity_stage" => {
            executor.update_opportunity_stage(ctx, decode(tool, params)?).await
        }
        "set_opportunity_value" => {
            executor.set_opportunity_value(ctx, decode(tool, params)?).await
        }
        "attach_campaign" => executor.attach_campaign(ctx, decode(tool, params)?).await,
        "create_task" => executor.create_task(ctx, decode(tool, params)?).await,
        "log_activity" => executor.log_activity(ctx, decode(tool, params)?).await,
        "add_note" => executor.add_note(ctx, decode(tool, params)?).await,
        "create_follow_up" => executor.create_follow_up(ctx, decode(tool, params)?).await,
        "sync_firmographics" => executor.sync_firmographics(ctx, decode(tool, params)?).await,
        other => Err(CrmError::Validation(format!("unknown tool: {other}"))),
    }
}
