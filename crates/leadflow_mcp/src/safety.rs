//! Safety guard: blocked tool patterns, context integrity, parameter scans.
//!
//! Everything here runs before any executor side effect. A violation is a
//! plain value the orchestrator turns into a blocked action; it is never an
//! error type.

use crate::types::McpContext;
use chrono::{Duration as ChronoDuration, Utc};
use leadflow_protocol::types::GroundingStatus;
use regex::RegexSet;
use serde_json::Value;

/// Tool names and embedded strings matching any of these are refused.
const BLOCKED_PATTERNS: &[&str] = &[
    r"(?i)^delete_",
    r"(?i)^mass_",
    r"(?i)schema_change",
    r"(?i)permission_change",
    r"(?i)execute.*query",
    r"(?i)bulk_export",
    r"(?i)^merge_",
    r"(?i)hard_delete",
    r"\$\{",
    r"(?i)__proto__|constructor|prototype",
];

/// Context timestamps older than this are stale.
const MAX_CONTEXT_AGE_MINS: i64 = 60;
/// Small allowance for clock skew on the young side.
const MAX_CONTEXT_SKEW_MINS: i64 = 1;

/// A single safety failure with enough detail for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyViolation {
    pub reason: String,
    /// JSON path of the offending parameter, when applicable.
    pub path: Option<String>,
}

impl SafetyViolation {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            path: None,
        }
    }

    fn at_path(reason: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            path: Some(path.into()),
        }
    }
}

/// Compiled guard. Construct once and share.
pub struct SafetyGuard {
    patterns: RegexSet,
}

impl SafetyGuard {
    pub fn new() -> Self {
        Self {
            patterns: RegexSet::new(BLOCKED_PATTERNS).expect("blocked patterns must compile"),
        }
    }

    /// Whether a tool name (or any string) trips a blocked pattern.
    pub fn matches_blocked_pattern(&self, value: &str) -> bool {
        self.patterns.is_match(value)
    }

    /// Validate the tool name itself.
    pub fn check_tool_name(&self, name: &str) -> Result<(), SafetyViolation> {
        if self.matches_blocked_pattern(name) {
            return Err(SafetyViolation::new(format!(
                "tool name '{name}' matches a blocked pattern"
            )));
        }
        Ok(())
    }

    /// Integrity checks that must hold before any execution.
    pub fn check_context(&self, ctx: &McpContext) -> Result<(), SafetyViolation> {
        if ctx.grounding_status == GroundingStatus::Rejected {
            return Err(SafetyViolation::new(
                "grounding rejected: no CRM mutation may execute",
            ));
        }
        if ctx.lead_email.trim().is_empty() {
            return Err(SafetyViolation::new("context missing lead email"));
        }
        if ctx.execution_id.trim().is_empty() {
            return Err(SafetyViolation::new("context missing execution id"));
        }
        if ctx.lead_id <= 0 {
            return Err(SafetyViolation::new("context missing lead id"));
        }

        let now = Utc::now();
        let age = now.signed_duration_since(ctx.timestamp);
        if age > ChronoDuration::minutes(MAX_CONTEXT_AGE_MINS) {
            return Err(SafetyViolation::new("context timestamp is stale"));
        }
        if age < -ChronoDuration::minutes(MAX_CONTEXT_SKEW_MINS) {
            return Err(SafetyViolation::new("context timestamp is in the future"));
        }
        Ok(())
    }

    /// Recursively scan a parameter object; every string is matched against
    /// the blocked set. The first violation reports its JSON path.
    pub fn check_params(&self, params: &Value) -> Result<(), SafetyViolation> {
        self.scan_value(params, "$")
    }

    fn scan_value(&self, value: &Value, path: &str) -> Result<(), SafetyViolation> {
        match value {
            Value::String(s) => {
                if self.matches_blocked_pattern(s) {
                    return Err(SafetyViolation::at_path(
                        format!("parameter value matches a blocked pattern: '{s}'"),
                        path,
                    ));
                }
                Ok(())
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.scan_value(item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
            Value::Object(map) => {
                for (key, item) in map {
                    if self.matches_blocked_pattern(key) {
                        return Err(SafetyViolation::at_path(
                            format!("parameter key matches a blocked pattern: '{key}'"),
                            format!("{path}.{key}"),
                        ));
                    }
                    self.scan_value(item, &format!("{path}.{key}"))?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl Default for SafetyGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> McpContext {
        McpContext::new(1, "jane@acme.io", Some("spring".into()), GroundingStatus::Valid)
    }

    #[test]
    fn test_blocked_tool_names() {
        let guard = SafetyGuard::new();
        for name in [
            "delete_lead",
            "DELETE_everything",
            "mass_update",
            "apply_schema_change",
            "permission_change",
            "execute_soql_query",
            "bulk_export",
            "merge_accounts",
            "hard_delete_lead",
        ] {
            assert!(guard.check_tool_name(name).is_err(), "{name} should be blocked");
        }
    }

    #[test]
    fn test_allowed_tool_names() {
        let guard = SafetyGuard::new();
        for name in ["upsert_lead", "set_lead_score", "log_activity", "sync_firmographics"] {
            assert!(guard.check_tool_name(name).is_ok(), "{name} should be allowed");
        }
    }

    #[test]
    fn test_template_injection_and_prototype_pollution() {
        let guard = SafetyGuard::new();
        assert!(guard.matches_blocked_pattern("${payload}"));
        assert!(guard.matches_blocked_pattern("__proto__"));
        assert!(guard.matches_blocked_pattern("some constructor trick"));
    }

    #[test]
    fn test_context_rejected_grounding() {
        let guard = SafetyGuard::new();
        let mut ctx = context();
        ctx.grounding_status = GroundingStatus::Rejected;
        let violation = guard.check_context(&ctx).unwrap_err();
        assert!(violation.reason.contains("grounding rejected"));
    }

    #[test]
    fn test_context_missing_fields() {
        let guard = SafetyGuard::new();

        let mut ctx = context();
        ctx.lead_email = "  ".into();
        assert!(guard.check_context(&ctx).is_err());

        let mut ctx = context();
        ctx.execution_id = String::new();
        assert!(guard.check_context(&ctx).is_err());

        let mut ctx = context();
        ctx.lead_id = 0;
        assert!(guard.check_context(&ctx).is_err());
    }

    #[test]
    fn test_context_timestamp_window() {
        let guard = SafetyGuard::new();

        let mut ctx = context();
        ctx.timestamp = Utc::now() - ChronoDuration::hours(2);
        assert!(guard.check_context(&ctx).is_err());

        let mut ctx = context();
        ctx.timestamp = Utc::now() + ChronoDuration::minutes(5);
        assert!(guard.check_context(&ctx).is_err());

        assert!(guard.check_context(&context()).is_ok());
    }

    #[test]
    fn test_param_scan_reports_path() {
        let guard = SafetyGuard::new();
        let params = json!({
            "email": "jane@acme.io",
            "nested": {
                "notes": ["fine", "please hard_delete this record"]
            }
        });
        let violation = guard.check_params(&params).unwrap_err();
        assert_eq!(violation.path.as_deref(), Some("$.nested.notes[1]"));
    }

    #[test]
    fn test_param_scan_clean() {
        let guard = SafetyGuard::new();
        let params = json!({"email": "jane@acme.io", "score": 90});
        assert!(guard.check_params(&params).is_ok());
    }
}
