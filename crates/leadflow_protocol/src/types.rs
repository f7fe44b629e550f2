//! Core data model: leads, evidence, analysis results, queue payloads,
//! and the append-only CRM audit row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Lead lifecycle
// ============================================================================

/// Lead status - lifecycle of a lead through the pipeline.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    /// Ingested, queued, not yet analysed
    #[default]
    Pending,
    /// Analysis persisted; awaiting (or undergoing) CRM sync
    Enriched,
    /// All planned CRM actions executed
    SyncedToCrm,
    /// Grounding rejected the AI analysis (terminal)
    AiRejected,
    /// The MCP blocked or rate-limited the sync
    McpBlocked,
    /// Delivery attempts exhausted; moved through the DLQ (terminal)
    PermanentlyFailed,
}

impl LeadStatus {
    pub const ALL: &'static [LeadStatus] = &[
        LeadStatus::Pending,
        LeadStatus::Enriched,
        LeadStatus::SyncedToCrm,
        LeadStatus::AiRejected,
        LeadStatus::McpBlocked,
        LeadStatus::PermanentlyFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Pending => "PENDING",
            LeadStatus::Enriched => "ENRICHED",
            LeadStatus::SyncedToCrm => "SYNCED_TO_CRM",
            LeadStatus::AiRejected => "AI_REJECTED",
            LeadStatus::McpBlocked => "MCP_BLOCKED",
            LeadStatus::PermanentlyFailed => "PERMANENTLY_FAILED",
        }
    }

    /// Terminal states accept no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::AiRejected | LeadStatus::PermanentlyFailed)
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(LeadStatus::Pending),
            "ENRICHED" => Ok(LeadStatus::Enriched),
            "SYNCED_TO_CRM" => Ok(LeadStatus::SyncedToCrm),
            "AI_REJECTED" => Ok(LeadStatus::AiRejected),
            "MCP_BLOCKED" => Ok(LeadStatus::McpBlocked),
            "PERMANENTLY_FAILED" => Ok(LeadStatus::PermanentlyFailed),
            _ => Err(format!("Invalid lead status: '{}'", s)),
        }
    }
}

/// Persistent lead record. Created on first ingest of `(email, campaign_id)`,
/// mutated only by the worker, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    /// `SHA256(lower(trim(email)) ":" lower(trim(campaign_id)))`, unique.
    pub idempotency_key: String,
    pub email: String,
    pub campaign_id: String,
    pub name: Option<String>,
    pub enrichment_data: Option<CompanyData>,
    pub status: LeadStatus,
    pub fit_score: Option<u8>,
    pub intent: Option<Intent>,
    pub reasoning: Option<String>,
    pub evidence: Vec<Evidence>,
    pub grounding_status: Option<GroundingStatus>,
    pub grounding_errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// The email domain, used as the account key for rate limiting and
    /// enrichment lookup.
    pub fn email_domain(&self) -> Option<&str> {
        self.email.rsplit_once('@').map(|(_, domain)| domain)
    }
}

// ============================================================================
// Evidence
// ============================================================================

/// Allowed origins for an AI evidence claim.
///
/// The set is closed; anything else deserializes into `Unauthorized` with the
/// original string preserved so the grounding validator can name it in its
/// rejection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EvidenceSource {
    Salesforce,
    Marketo,
    Product,
    Enrichment,
    Computed,
    Unauthorized(String),
}

impl EvidenceSource {
    pub fn as_str(&self) -> &str {
        match self {
            EvidenceSource::Salesforce => "SALESFORCE",
            EvidenceSource::Marketo => "MARKETO",
            EvidenceSource::Product => "PRODUCT",
            EvidenceSource::Enrichment => "ENRICHMENT",
            EvidenceSource::Computed => "COMPUTED",
            EvidenceSource::Unauthorized(raw) => raw.as_str(),
        }
    }

    pub fn is_authorized(&self) -> bool {
        !matches!(self, EvidenceSource::Unauthorized(_))
    }

    /// Sources that count as behavioral/computed backing for a high-intent
    /// verdict.
    pub fn is_behavioral(&self) -> bool {
        matches!(
            self,
            EvidenceSource::Product
                | EvidenceSource::Marketo
                | EvidenceSource::Computed
                | EvidenceSource::Salesforce
        )
    }
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EvidenceSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EvidenceSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "SALESFORCE" => EvidenceSource::Salesforce,
            "MARKETO" => EvidenceSource::Marketo,
            "PRODUCT" => EvidenceSource::Product,
            "ENRICHMENT" => EvidenceSource::Enrichment,
            "COMPUTED" => EvidenceSource::Computed,
            _ => EvidenceSource::Unauthorized(raw),
        })
    }
}

/// What kind of claim an evidence item supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimType {
    Firmographic,
    Behavior,
    Pipeline,
    Score,
}

impl ClaimType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::Firmographic => "FIRMOGRAPHIC",
            ClaimType::Behavior => "BEHAVIOR",
            ClaimType::Pipeline => "PIPELINE",
            ClaimType::Score => "SCORE",
        }
    }
}

/// One AI claim: `(source, field_path, value, claim_type)`.
///
/// `value` is opaque; the grounding validator only ever coerces it to a
/// string for substring comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub source: EvidenceSource,
    /// Namespaced, e.g. `enrichment.industry` or `marketo.campaign_id`.
    pub field_path: String,
    pub value: Value,
    pub claim_type: ClaimType,
}

impl Evidence {
    /// Last segment of the field path, used to index the enrichment record.
    pub fn field_name(&self) -> &str {
        self.field_path
            .rsplit_once('.')
            .map(|(_, name)| name)
            .unwrap_or(&self.field_path)
    }
}

// ============================================================================
// AI analysis
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    LowFit,
    MediumFit,
    HighFit,
    ManualReview,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::LowFit => "LOW_FIT",
            Intent::MediumFit => "MEDIUM_FIT",
            Intent::HighFit => "HIGH_FIT",
            Intent::ManualReview => "MANUAL_REVIEW",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    RouteToSdr,
    Nurture,
    Ignore,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::RouteToSdr => "ROUTE_TO_SDR",
            Decision::Nurture => "NURTURE",
            Decision::Ignore => "IGNORE",
        }
    }
}

/// Verdict of the grounding validator over one analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroundingStatus {
    Valid,
    Downgraded,
    Rejected,
}

impl GroundingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroundingStatus::Valid => "VALID",
            GroundingStatus::Downgraded => "DOWNGRADED",
            GroundingStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for GroundingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GroundingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(GroundingStatus::Valid),
            "DOWNGRADED" => Ok(GroundingStatus::Downgraded),
            "REJECTED" => Ok(GroundingStatus::Rejected),
            _ => Err(format!("Invalid grounding status: '{}'", s)),
        }
    }
}

/// What the AI collaborator returns for one lead.
///
/// `grounding_status` and `grounding_errors` are stamped by the validator,
/// never by the AI; deserialized payloads that carry them are overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub fit_score: u8,
    pub intent: Intent,
    pub decision: Decision,
    pub reasoning: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub grounding_status: Option<GroundingStatus>,
    #[serde(default)]
    pub grounding_errors: Vec<String>,
}

// ============================================================================
// Enrichment
// ============================================================================

/// Firmographic record returned by the enrichment provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyData {
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub employees: Option<i64>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub geo: Option<String>,
}

impl CompanyData {
    /// Index the record by field name, for the grounding conflict check.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::String(self.name.clone())),
            "domain" => Some(Value::String(self.domain.clone())),
            "employees" => self.employees.map(Value::from),
            "industry" => self.industry.clone().map(Value::String),
            "tech_stack" | "techStack" => Some(Value::Array(
                self.tech_stack.iter().cloned().map(Value::String).collect(),
            )),
            "geo" => self.geo.clone().map(Value::String),
            _ => None,
        }
    }
}

// ============================================================================
// Queue wire format
// ============================================================================

/// Payload carried by a queue job: the lead to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    #[serde(rename = "leadId")]
    pub lead_id: i64,
}

/// A job as stored in the queue lists (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: u64,
    pub data: JobData,
    #[serde(rename = "attemptsMade")]
    pub attempts_made: u32,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: u32,
    /// First enqueue time, epoch millis.
    #[serde(rename = "firstSeenMs")]
    pub first_seen_ms: i64,
    #[serde(rename = "lastError", skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(rename = "baseDelayMs")]
    pub base_delay_ms: u64,
    /// Set when a worker takes the lease; cleared on requeue.
    #[serde(rename = "leasedAtMs", skip_serializing_if = "Option::is_none")]
    pub leased_at_ms: Option<i64>,
}

impl QueueJob {
    /// Backoff delay before the next attempt: `base · 2^(attempts−1)`.
    pub fn backoff_delay_ms(&self) -> u64 {
        let exponent = self.attempts_made.saturating_sub(1).min(16);
        self.base_delay_ms.saturating_mul(1u64 << exponent)
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}

/// Entry published to the dead-letter queue when attempts are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    #[serde(rename = "originalJobId")]
    pub original_job_id: u64,
    #[serde(rename = "leadId")]
    pub lead_id: i64,
    pub error: String,
    #[serde(rename = "attemptsMade")]
    pub attempts_made: u32,
    #[serde(rename = "failedAt")]
    pub failed_at: DateTime<Utc>,
}

// ============================================================================
// Audit log
// ============================================================================

/// Append-only audit row, one per executor call.
///
/// `params` is stored after PII redaction; the raw parameters never reach
/// the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmSyncLog {
    pub id: i64,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub params: Value,
    pub result: String,
    pub mcp_execution_id: String,
    pub idempotency_key: Option<String>,
    pub mock: bool,
    pub lead_id: Option<i64>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lead_status_roundtrip() {
        for status in LeadStatus::ALL {
            assert_eq!(status.as_str().parse::<LeadStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn test_unknown_evidence_source_preserved() {
        let evidence: Evidence = serde_json::from_value(json!({
            "source": "WEB_SEARCH",
            "field_path": "web.result",
            "value": "anything",
            "claim_type": "BEHAVIOR"
        }))
        .unwrap();

        assert!(!evidence.source.is_authorized());
        assert_eq!(evidence.source.as_str(), "WEB_SEARCH");
    }

    #[test]
    fn test_evidence_field_name() {
        let evidence = Evidence {
            source: EvidenceSource::Enrichment,
            field_path: "enrichment.industry".to_string(),
            value: json!("Fintech"),
            claim_type: ClaimType::Firmographic,
        };
        assert_eq!(evidence.field_name(), "industry");

        let flat = Evidence {
            field_path: "industry".to_string(),
            ..evidence
        };
        assert_eq!(flat.field_name(), "industry");
    }

    #[test]
    fn test_job_backoff_schedule() {
        let mut job = QueueJob {
            id: 1,
            data: JobData { lead_id: 42 },
            attempts_made: 1,
            max_attempts: 5,
            first_seen_ms: 0,
            last_error: None,
            base_delay_ms: 1_000,
            leased_at_ms: None,
        };

        assert_eq!(job.backoff_delay_ms(), 1_000);
        job.attempts_made = 2;
        assert_eq!(job.backoff_delay_ms(), 2_000);
        job.attempts_made = 3;
        assert_eq!(job.backoff_delay_ms(), 4_000);
        job.attempts_made = 5;
        assert_eq!(job.backoff_delay_ms(), 16_000);
    }

    #[test]
    fn test_job_wire_format_field_names() {
        let job = QueueJob {
            id: 7,
            data: JobData { lead_id: 3 },
            attempts_made: 0,
            max_attempts: 5,
            first_seen_ms: 1,
            last_error: None,
            base_delay_ms: 1_000,
            leased_at_ms: None,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["data"]["leadId"], json!(3));
        assert_eq!(value["attemptsMade"], json!(0));
    }

    #[test]
    fn test_email_domain() {
        let lead = Lead {
            id: 1,
            idempotency_key: String::new(),
            email: "jane@acme.io".to_string(),
            campaign_id: "c1".to_string(),
            name: None,
            enrichment_data: None,
            status: LeadStatus::Pending,
            fit_score: None,
            intent: None,
            reasoning: None,
            evidence: vec![],
            grounding_status: None,
            grounding_errors: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(lead.email_domain(), Some("acme.io"));
    }
}
