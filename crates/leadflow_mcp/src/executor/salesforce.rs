//! Salesforce executor: REST wrapper with field sanitisation, identifier
//! validation and a guarded query builder.

use super::{
    AddNoteParams, AttachCampaignParams, ConvertLeadParams, CreateContactParams,
    CreateFollowUpParams, CreateOpportunityParams, CreateTaskParams, CrmExecutor,
    LeadUpsertParams, LinkContactParams, LogActivityParams, MatchAccountParams,
    SetLeadScoreParams, SetOpportunityValueParams, SyncFirmographicsParams,
    UpdateLeadFieldsParams, UpdateLeadStatusParams, UpdateOpportunityStageParams,
};
use crate::types::{CrmError, CrmResult, McpContext};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

// ============================================================================
// Sanitisation and validation
// ============================================================================

/// Escape a field value for embedding in CRM payloads and queries: control
/// characters are dropped, quotes and backslashes escaped.
pub fn sanitize_field_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Salesforce record ids are 15- or 18-character alphanumeric.
pub fn validate_crm_id(id: &str) -> Result<(), CrmError> {
    let valid = (id.len() == 15 || id.len() == 18) && id.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(CrmError::Validation(format!(
            "invalid CRM record id: '{id}'"
        )))
    }
}

/// SOQL-style query builder that refuses unsafe field names.
///
/// Field names outside `[A-Za-z_][A-Za-z0-9_]*` are rejected outright;
/// values pass through [`sanitize_field_value`].
pub struct QueryBuilder {
    object: String,
    fields: Vec<String>,
    conditions: Vec<String>,
    limit: Option<usize>,
}

fn is_safe_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl QueryBuilder {
    pub fn new(object: &str) -> Result<Self, CrmError> {
        if !is_safe_field_name(object) {
            return Err(CrmError::Validation(format!(
                "invalid object name: '{object}'"
            )));
        }
        Ok(Self {
            object: object.to_string(),
            fields: vec![],
            conditions: vec![],
            limit: None,
        })
    }

    pub fn select(mut self, field: &str) -> Result<Self, CrmError> {
        if !is_safe_field_name(field) {
            return Err(CrmError::Validation(format!(
                "invalid field name: '{field}'"
            )));
        }
        self.fields.push(field.to_string());
        Ok(self)
    }

    pub fn where_eq(mut self, field: &str, value: &str) -> Result<Self, CrmError> {
        if !is_safe_field_name(field) {
            return Err(CrmError::Validation(format!(
                "invalid field name: '{field}'"
            )));
        }
        self.conditions
            .push(format!("{field} = '{}'", sanitize_field_value(value)));
        Ok(self)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(self) -> Result<String, CrmError> {
        if self.fields.is_empty() {
            return Err(CrmError::Validation("query selects no fields".to_string()));
        }
        let mut query = format!("SELECT {} FROM {}", self.fields.join(", "), self.object);
        if !self.conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&self.conditions.join(" AND "));
        }
        if let Some(limit) = self.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        Ok(query)
    }
}

// ============================================================================
// REST executor
// ============================================================================

/// Connection settings for one Salesforce org.
#[derive(Debug, Clone)]
pub struct SalesforceConfig {
    pub base_url: String,
    pub access_token: String,
    pub api_version: String,
    pub timeout: Duration,
}

impl SalesforceConfig {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            api_version: "v59.0".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Real executor wrapping the Salesforce REST API.
pub struct SalesforceExecutor {
    config: SalesforceConfig,
    client: reqwest::Client,
}

impl SalesforceExecutor {
    pub fn new(config: SalesforceConfig) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| CrmError::Transport(err.to_string()))?;
        Ok(Self { config, client })
    }

    fn sobject_url(&self, object: &str, id: Option<&str>) -> String {
        let base = format!(
            "{}/services/data/{}/sobjects/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            object
        );
        match id {
            Some(id) => format!("{base}/{id}"),
            None => base,
        }
    }

    fn query_url(&self, soql: &str) -> String {
        format!(
            "{}/services/data/{}/query?q={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version,
            urlencode(soql)
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, CrmError> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    CrmError::Timeout(self.config.timeout)
                } else {
                    CrmError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        let message = body
            .get(0)
            .and_then(|e| e.get("message"))
            .or_else(|| body.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("request failed")
            .to_string();
        if status.is_client_error() {
            Err(CrmError::Client {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(CrmError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn create_record(&self, object: &str, fields: Value) -> Result<CrmResult, CrmError> {
        debug!(object, "Creating CRM record");
        let body = self
            .send(self.client.post(self.sobject_url(object, None)).json(&fields))
            .await?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(CrmResult::ok(id, false).with_data(body))
    }

    async fn patch_record(
        &self,
        object: &str,
        id: &str,
        fields: Value,
    ) -> Result<CrmResult, CrmError> {
        validate_crm_id(id)?;
        debug!(object, id, "Patching CRM record");
        self.send(self.client.patch(self.sobject_url(object, Some(id))).json(&fields))
            .await?;
        Ok(CrmResult::ok(id, false))
    }

    async fn run_query(&self, soql: String) -> Result<Value, CrmError> {
        debug!(query = %soql, "Running CRM query");
        self.send(self.client.get(self.query_url(&soql))).await
    }

    fn lead_fields(params: &LeadUpsertParams) -> Value {
        let mut fields = Map::new();
        fields.insert(
            "Email".to_string(),
            Value::String(sanitize_field_value(&params.email)),
        );
        if let Some(first) = &params.first_name {
            fields.insert(
                "FirstName".to_string(),
                Value::String(sanitize_field_value(first)),
            );
        }
        if let Some(last) = &params.last_name {
            fields.insert(
                "LastName".to_string(),
                Value::String(sanitize_field_value(last)),
            );
        }
        if let Some(company) = &params.company {
            fields.insert(
                "Company".to_string(),
                Value::String(sanitize_field_value(company)),
            );
        }
        Value::Object(fields)
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[async_trait::async_trait]
impl CrmExecutor for SalesforceExecutor {
    fn provider(&self) -> &str {
        "salesforce"
    }

    async fn create_lead(
        &self,
        _ctx: &McpContext,
        params: LeadUpsertParams,
    ) -> Result<CrmResult, CrmError> {
        self.create_record("Lead", Self::lead_fields(&params)).await
    }

    async fn upsert_lead(
        &self,
        _ctx: &McpContext,
        params: LeadUpsertParams,
    ) -> Result<CrmResult, CrmError> {
        // Find-or-create keyed by email; the query side is read-only.
        let soql = QueryBuilder::new("Lead")?
            .select("Id")?
            .where_eq("Email", &params.email)?
            .limit(1)
            .build()?;
        let found = self.run_query(soql).await?;
        let existing = found
            .get("records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .and_then(|record| record.get("Id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match existing {
            Some(id) => self.patch_record("Lead", &id, Self::lead_fields(&params)).await,
            None => self.create_record("Lead", Self::lead_fields(&params)).await,
        }
    }

    async fn convert_lead(
        &self,
        _ctx: &McpContext,
        params: ConvertLeadParams,
    ) -> Result<CrmResult, CrmError> {
        self.patch_record("Lead", &params.lead_id, json!({"Status": "Qualified"}))
            .await
    }

    async fn update_lead_status(
        &self,
        _ctx: &McpContext,
        params: UpdateLeadStatusParams,
    ) -> Result<CrmResult, CrmError> {
        self.patch_record(
            "Lead",
            &params.lead_id,
            json!({"Status": sanitize_field_value(&params.status)}),
        )
        .await
    }

    async fn update_lead_fields(
        &self,
        _ctx: &McpContext,
        params: UpdateLeadFieldsParams,
    ) -> Result<CrmResult, CrmError> {
        let mut fields = Map::new();
        for (key, value) in params.fields {
            if !is_safe_field_name(&key) {
                return Err(CrmError::Validation(format!("invalid field name: '{key}'")));
            }
            let value = match value {
                Value::String(s) => Value::String(sanitize_field_value(&s)),
                other => other,
            };
            fields.insert(key, value);
        }
        self.patch_record("Lead", &params.lead_id, Value::Object(fields))
            .await
    }

    async fn set_lead_score(
        &self,
        _ctx: &McpContext,
        params: SetLeadScoreParams,
    ) -> Result<CrmResult, CrmError> {
        let field = match params.score_type.as_deref() {
            Some("fit") | None => "Fit_Score__c",
            Some("engagement") => "Engagement_Score__c",
            Some(other) => {
                return Err(CrmError::Validation(format!(
                    "unknown score type: '{other}'"
                )))
            }
        };
        self.patch_record("Lead", &params.lead_id, json!({field: params.score}))
            .await
    }

    async fn match_account(
        &self,
        _ctx: &McpContext,
        params: MatchAccountParams,
    ) -> Result<CrmResult, CrmError> {
        let soql = QueryBuilder::new("Account")?
            .select("Id")?
            .select("Name")?
            .where_eq("Website", &params.domain)?
            .limit(1)
            .build()?;
        let body = self.run_query(soql).await?;
        let id = body
            .get("records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .and_then(|record| record.get("Id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(CrmResult::ok(id, false).with_data(body))
    }

    async fn create_contact(
        &self,
        _ctx: &McpContext,
        params: CreateContactParams,
    ) -> Result<CrmResult, CrmError> {
        let mut fields = Map::new();
        fields.insert(
            "Email".to_string(),
            Value::String(sanitize_field_value(&params.email)),
        );
        if let Some(first) = &params.first_name {
            fields.insert(
                "FirstName".to_string(),
                Value::String(sanitize_field_value(first)),
            );
        }
        if let Some(last) = &params.last_name {
            fields.insert(
                "LastName".to_string(),
                Value::String(sanitize_field_value(last)),
            );
        }
        if let Some(account_id) = &params.account_id {
            validate_crm_id(account_id)?;
            fields.insert("AccountId".to_string(), Value::String(account_id.clone()));
        }
        self.create_record("Contact", Value::Object(fields)).await
    }

    async fn link_contact_to_account(
        &self,
        _ctx: &McpContext,
        params: LinkContactParams,
    ) -> Result<CrmResult, CrmError> {
        validate_crm_id(&params.account_id)?;
        self.patch_record(
            "Contact",
            &params.contact_id,
            json!({"AccountId": params.account_id}),
        )
        .await
    }

    async fn create_opportunity(
        &self,
        _ctx: &McpContext,
        params: CreateOpportunityParams,
    ) -> Result<CrmResult, CrmError> {
        let mut fields = Map::new();
        fields.insert(
            "Name".to_string(),
            Value::String(sanitize_field_value(&params.name)),
        );
        if let Some(account_id) = &params.account_id {
            validate_crm_id(account_id)?;
            fields.insert("AccountId".to_string(), Value::String(account_id.clone()));
        }
        if let Some(stage) = &params.stage {
            fields.insert(
                "StageName".to_string(),
                Value::String(sanitize_field_value(stage)),
            );
        }
        if let Some(amount) = params.amount {
            fields.insert("Amount".to_string(), json!(amount));
        }
        self.create_record("Opportunity", Value::Object(fields)).await
    }

    async fn update_opportunity_stage(
        &self,
        _ctx: &McpContext,
        params: UpdateOpportunityStageParams,
    ) -> Result<CrmResult, CrmError> {
        self.patch_record(
            "Opportunity",
            &params.opportunity_id,
            json!({"StageName": sanitize_field_value(&params.stage)}),
        )
        .await
    }

    async fn set_opportunity_value(
        &self,
        _ctx: &McpContext,
        params: SetOpportunityValueParams,
    ) -> Result<CrmResult, CrmError> {
        self.patch_record(
            "Opportunity",
            &params.opportunity_id,
            json!({"Amount": params.amount}),
        )
        .await
    }

    async fn attach_campaign(
        &self,
        _ctx: &McpContext,
        params: AttachCampaignParams,
    ) -> Result<CrmResult, CrmError> {
        validate_crm_id(&params.lead_id)?;
        self.create_record(
            "CampaignMember",
            json!({
                "LeadId": params.lead_id,
                "CampaignId": sanitize_field_value(&params.campaign_id),
            }),
        )
        .await
    }

    async fn create_task(
        &self,
        _ctx: &McpContext,
        params: CreateTaskParams,
    ) -> Result<CrmResult, CrmError> {
        let mut fields = Map::new();
        fields.insert(
            "Subject".to_string(),
            Value::String(sanitize_field_value(&params.subject)),
        );
        if let Some(related) = &params.related_to_id {
            validate_crm_id(related)?;
            fields.insert("WhoId".to_string(), Value::String(related.clone()));
        }
        if let Some(due) = &params.due_date {
            fields.insert(
                "ActivityDate".to_string(),
                Value::String(sanitize_field_value(due)),
            );
        }
        self.create_record("Task", Value::Object(fields)).await
    }

    async fn log_activity(
        &self,
        _ctx: &McpContext,
        params: LogActivityParams,
    ) -> Result<CrmResult, CrmError> {
        validate_crm_id(&params.related_to_id)?;
        self.create_record(
            "Task",
            json!({
                "WhoId": params.related_to_id,
                "Subject": sanitize_field_value(&params.activity_type),
                "Description": params
                    .description
                    .as_deref()
                    .map(sanitize_field_value)
                    .unwrap_or_default(),
                "Status": "Completed",
            }),
        )
        .await
    }

    async fn add_note(
        &self,
        _ctx: &McpContext,
        params: AddNoteParams,
    ) -> Result<CrmResult, CrmError> {
        validate_crm_id(&params.related_to_id)?;
        self.create_record(
            "Note",
            json!({
                "ParentId": params.related_to_id,
                "Body": sanitize_field_value(&params.body),
            }),
        )
        .await
    }

    async fn create_follow_up(
        &self,
        _ctx: &McpContext,
        params: CreateFollowUpParams,
    ) -> Result<CrmResult, CrmError> {
        validate_crm_id(&params.related_to_id)?;
        self.create_record(
            "Task",
            json!({
                "WhoId": params.related_to_id,
                "ActivityDate": sanitize_field_value(&params.due_date),
                "Subject": params
                    .subject
                    .as_deref()
                    .map(sanitize_field_value)
                    .unwrap_or_else(|| "Follow up".to_string()),
            }),
        )
        .await
    }

    async fn sync_firmographics(
        &self,
        _ctx: &McpContext,
        params: SyncFirmographicsParams,
    ) -> Result<CrmResult, CrmError> {
        let firmographics = &params.firmographics;
        let mut fields = Map::new();
        if let Some(industry) = &firmographics.industry {
            fields.insert(
                "Industry".to_string(),
                Value::String(sanitize_field_value(industry)),
            );
        }
        if let Some(employees) = firmographics.employees {
            fields.insert("NumberOfEmployees".to_string(), json!(employees));
        }
        if let Some(geo) = &firmographics.geo {
            fields.insert("Geo__c".to_string(), Value::String(sanitize_field_value(geo)));
        }
        if !firmographics.tech_stack.is_empty() {
            fields.insert(
                "Tech_Stack__c".to_string(),
                Value::String(sanitize_field_value(&firmographics.tech_stack.join(";"))),
            );
        }
        self.patch_record("Lead", &params.lead_id, Value::Object(fields))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_field_value() {
        assert_eq!(sanitize_field_value("plain"), "plain");
        assert_eq!(sanitize_field_value("O'Brien"), "O\\'Brien");
        assert_eq!(sanitize_field_value(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(sanitize_field_value("line\nbreak\ttab"), "linebreaktab");
    }

    #[test]
    fn test_validate_crm_id() {
        assert!(validate_crm_id("00Q000000000001").is_ok());
        assert!(validate_crm_id("00Q000000000001AAB").is_ok());
        assert!(validate_crm_id("short").is_err());
        assert!(validate_crm_id("00Q0000000000-1").is_err());
        assert!(validate_crm_id("00Q0000000000012345").is_err());
    }

    #[test]
    fn test_query_builder_safe_path() {
        let soql = QueryBuilder::new("Lead")
            .unwrap()
            .select("Id")
            .unwrap()
            .where_eq("Email", "jane@acme.io")
            .unwrap()
            .limit(1)
            .build()
            .unwrap();
        assert_eq!(soql, "SELECT Id FROM Lead WHERE Email = 'jane@acme.io' LIMIT 1");
    }

    #[test]
    fn test_query_builder_escapes_values() {
        let soql = QueryBuilder::new("Lead")
            .unwrap()
            .select("Id")
            .unwrap()
            .where_eq("Email", "o'brien@acme.io' OR Name != '")
            .unwrap()
            .build()
            .unwrap();
        assert!(soql.contains("o\\'brien@acme.io\\' OR Name != \\'"));
    }

    #[test]
    fn test_query_builder_rejects_bad_field_names() {
        assert!(QueryBuilder::new("Lead; DROP TABLE").is_err());
        let builder = QueryBuilder::new("Lead").unwrap();
        assert!(builder.select("Id, Email").is_err());

        let builder = QueryBuilder::new("Lead").unwrap();
        assert!(builder.select("Id").unwrap().where_eq("Email='x'", "y").is_err());

        let builder = QueryBuilder::new("Lead").unwrap();
        assert!(builder.select("1field").is_err());
    }

    #[test]
    fn test_query_builder_requires_fields() {
        assert!(QueryBuilder::new("Lead").unwrap().build().is_err());
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("a b"), "a+b");
        assert_eq!(urlencode("a='x'"), "a%3D%27x%27");
    }
}
