//! Leadflow MCP - the safety and execution layer between a grounded AI
//! result and the CRM.
//!
//! Layers, outermost first:
//!
//! - **Safety guard**: blocked tool-name patterns, context integrity,
//!   recursive parameter scanning.
//! - **PII redactor**: field-name and content-based redaction applied to
//!   every audited parameter set.
//! - **Tiered rate limiter**: per-lead / per-account / global fixed-window
//!   buckets plus a per-provider CRM bucket.
//! - **Circuit breakers**: per executor+operation, client errors excluded.
//! - **Idempotency store**: windowed and stable action keys.
//! - **Tool registry**: schema-validated parameters dispatched to a
//!   provider-selected executor (mock or Salesforce).
//!
//! The orchestrator drives all of the above for one lead and reports a
//! tagged outcome; expected failures never cross this boundary as errors.

pub mod breaker;
pub mod executor;
pub mod idempotency;
pub mod orchestrator;
pub mod plan;
pub mod rate_limit;
pub mod redaction;
pub mod safety;
pub mod tools;
pub mod types;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreakerRegistry};
pub use executor::{dispatch, CrmExecutor, MockExecutor, SalesforceConfig, SalesforceExecutor};
pub use idempotency::{IdempotencyStore, KeyMode, ProcessedCheck};
pub use orchestrator::{McpOrchestrator, McpReport};
pub use plan::{build_action_plan, PlannedAction};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitTier, TieredRateLimiter};
pub use redaction::{PiiRedactor, RedactionStrategy};
pub use safety::{SafetyGuard, SafetyViolation};
pub use tools::{ToolCategory, ToolRegistry, ToolSpec};
pub use types::{CrmError, CrmResult, McpContext, McpStatus};
