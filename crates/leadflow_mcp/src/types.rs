//! Shared MCP types: execution context, executor results, error kinds,
//! and orchestrator outcomes.

use chrono::{DateTime, Utc};
use leadflow_protocol::types::GroundingStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Context every tool execution runs under. Built once per MCP invocation;
/// the execution id groups the audit rows it emits.
#[derive(Debug, Clone)]
pub struct McpContext {
    pub execution_id: String,
    pub lead_id: i64,
    pub lead_email: String,
    pub campaign_id: Option<String>,
    pub grounding_status: GroundingStatus,
    pub timestamp: DateTime<Utc>,
}

impl McpContext {
    pub fn new(
        lead_id: i64,
        lead_email: impl Into<String>,
        campaign_id: Option<String>,
        grounding_status: GroundingStatus,
    ) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            lead_id,
            lead_email: lead_email.into(),
            campaign_id,
            grounding_status,
            timestamp: Utc::now(),
        }
    }
}

/// Result of one executor call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    pub mock: bool,
}

impl CrmResult {
    pub fn ok(crm_record_id: impl Into<String>, mock: bool) -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            crm_record_id: Some(crm_record_id.into()),
            warnings: vec![],
            retry_after: None,
            mock,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Executor call failures, classified for retry and breaker decisions.
#[derive(Debug, Clone, Error)]
pub enum CrmError {
    /// 4xx-class fault: the request was wrong. Not a reliability signal.
    #[error("CRM client error ({status}): {message}")]
    Client { status: u16, message: String },

    /// 5xx-class fault: the CRM is unhealthy. Retryable.
    #[error("CRM server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The call exceeded its timeout. Retryable.
    #[error("CRM call timed out after {0:?}")]
    Timeout(Duration),

    /// The circuit breaker for this operation is open. Retryable later.
    #[error("Circuit breaker open for {operation}")]
    BreakerOpen { operation: String },

    /// Transport-level failure (DNS, TLS, connection reset). Retryable.
    #[error("CRM transport error: {0}")]
    Transport(String),

    /// Parameters failed validation before any side effect.
    #[error("Invalid parameters: {0}")]
    Validation(String),
}

impl CrmError {
    /// Client faults are excluded from breaker failure counts.
    pub fn is_client(&self) -> bool {
        matches!(self, CrmError::Client { .. } | CrmError::Validation(_))
    }

    /// True when a retry may succeed (5xx, timeout, breaker, transport).
    pub fn is_transient(&self) -> bool {
        !self.is_client()
    }
}

/// Outcome of one MCP invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum McpStatus {
    Completed,
    RejectedByGrounding,
    RateLimited,
    Blocked,
}

impl McpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            McpStatus::Completed => "COMPLETED",
            McpStatus::RejectedByGrounding => "REJECTED_BY_GROUNDING",
            McpStatus::RateLimited => "RATE_LIMITED",
            McpStatus::Blocked => "BLOCKED",
        }
    }
}

/// Per-action record inside an [`crate::McpReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub tool: String,
    pub success: bool,
    /// Result served from the idempotency store without an executor call.
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crm_record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(CrmError::Client { status: 400, message: "bad".into() }.is_client());
        assert!(CrmError::Validation("missing email".into()).is_client());
        assert!(!CrmError::Server { status: 503, message: "down".into() }.is_client());

        assert!(CrmError::Timeout(Duration::from_secs(10)).is_transient());
        assert!(CrmError::BreakerOpen { operation: "mock:upsert_lead".into() }.is_transient());
        assert!(!CrmError::Client { status: 404, message: "gone".into() }.is_transient());
    }

    #[test]
    fn test_context_gets_unique_execution_ids() {
        let a = McpContext::new(1, "a@b.c", None, GroundingStatus::Valid);
        let b = McpContext::new(1, "a@b.c", None, GroundingStatus::Valid);
        assert_ne!(a.execution_id, b.execution_id);
        assert!(!a.execution_id.is_empty());
    }
}
