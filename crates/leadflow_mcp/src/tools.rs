//! Tool registry - the bounded CRM action surface.
//!
//! Each tool carries a declarative parameter schema validated before
//! dispatch; schema failure fails the call before any side effect.
//! Registration refuses names matching the safety guard's blocked patterns.

use crate::idempotency::KeyMode;
use crate::safety::SafetyGuard;
use serde_json::Value;
use std::collections::HashMap;

/// Tool grouping, mirrored into audit entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    LeadLifecycle,
    FieldUpdates,
    AccountContact,
    SalesWorkflow,
    Activity,
    EnrichmentSync,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::LeadLifecycle => "lead_lifecycle",
            ToolCategory::FieldUpdates => "field_updates",
            ToolCategory::AccountContact => "account_contact",
            ToolCategory::SalesWorkflow => "sales_workflow",
            ToolCategory::Activity => "activity",
            ToolCategory::EnrichmentSync => "enrichment_sync",
        }
    }
}

/// Expected JSON kind of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

/// One schema field.
#[derive(Debug, Clone, Copy)]
pub struct ParamField {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

const fn req(name: &'static str, kind: ParamKind) -> ParamField {
    ParamField {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: ParamKind) -> ParamField {
    ParamField {
        name,
        kind,
        required: false,
    }
}

/// A registered tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    pub entity_type: &'static str,
    pub params: &'static [ParamField],
    pub dangerous: bool,
    /// How the idempotency key for this tool incorporates time.
    pub key_mode: KeyMode,
}

use ParamKind::{Integer, Number, Object, String as Str};

const BUILTIN_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "create_lead",
        description: "Create a new CRM lead",
        category: ToolCategory::LeadLifecycle,
        entity_type: "Lead",
        params: &[req("email", Str), opt("first_name", Str), opt("last_name", Str), opt("company", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "upsert_lead",
        description: "Create or update a CRM lead keyed by email",
        category: ToolCategory::LeadLifecycle,
        entity_type: "Lead",
        params: &[req("email", Str), opt("first_name", Str), opt("last_name", Str), opt("company", Str)],
        dangerous: false,
        key_mode: KeyMode::Stable,
    },
    ToolSpec {
        name: "convert_lead",
        description: "Convert a qualified lead",
        category: ToolCategory::LeadLifecycle,
        entity_type: "Lead",
        params: &[req("lead_id", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "update_lead_status",
        description: "Set the CRM lead status field",
        category: ToolCategory::FieldUpdates,
        entity_type: "Lead",
        params: &[req("lead_id", Str), req("status", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "update_lead_fields",
        description: "Patch arbitrary CRM lead fields",
        category: ToolCategory::FieldUpdates,
        entity_type: "Lead",
        params: &[req("lead_id", Str), req("fields", Object)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "set_lead_score",
        description: "Write a lead score",
        category: ToolCategory::FieldUpdates,
        entity_type: "Lead",
        params: &[req("lead_id", Str), req("score", Integer), opt("score_type", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "match_account",
        description: "Find the account matching a company domain",
        category: ToolCategory::AccountContact,
        entity_type: "Account",
        params: &[req("domain", Str)],
        dangerous: false,
        key_mode: KeyMode::Stable,
    },
    ToolSpec {
        name: "create_contact",
        description: "Create a CRM contact",
        category: ToolCategory::AccountContact,
        entity_type: "Contact",
        params: &[req("email", Str), opt("first_name", Str), opt("last_name", Str), opt("account_id", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "link_contact_to_account",
        description: "Associate a contact with an account",
        category: ToolCategory::AccountContact,
        entity_type: "Contact",
        params: &[req("contact_id", Str), req("account_id", Str)],
        dangerous: false,
        key_mode: KeyMode::Stable,
    },
    ToolSpec {
        name: "create_opportunity",
        description: "Open a sales opportunity",
        category: ToolCategory::SalesWorkflow,
        entity_type: "Opportunity",
        params: &[req("name", Str), opt("account_id", Str), opt("stage", Str), opt("amount", Number)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "update_opportunity_stage",
        description: "Move an opportunity to a new stage",
        category: ToolCategory::SalesWorkflow,
        entity_type: "Opportunity",
        params: &[req("opportunity_id", Str), req("stage", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "set_opportunity_value",
        description: "Write an opportunity amount",
        category: ToolCategory::SalesWorkflow,
        entity_type: "Opportunity",
        params: &[req("opportunity_id", Str), req("amount", Number)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "attach_campaign",
        description: "Attach a lead to a campaign",
        category: ToolCategory::SalesWorkflow,
        entity_type: "Campaign",
        params: &[req("lead_id", Str), req("campaign_id", Str)],
        dangerous: false,
        key_mode: KeyMode::Stable,
    },
    ToolSpec {
        name: "create_task",
        description: "Create a sales task",
        category: ToolCategory::Activity,
        entity_type: "Task",
        params: &[req("subject", Str), opt("related_to_id", Str), opt("due_date", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "log_activity",
        description: "Append an activity record",
        category: ToolCategory::Activity,
        entity_type: "Activity",
        params: &[req("related_to_id", Str), req("type", Str), opt("description", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "add_note",
        description: "Attach a note to a record",
        category: ToolCategory::Activity,
        entity_type: "Note",
        params: &[req("related_to_id", Str), req("body", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "create_follow_up",
        description: "Schedule a follow-up task",
        category: ToolCategory::Activity,
        entity_type: "Task",
        params: &[req("related_to_id", Str), req("due_date", Str), opt("subject", Str)],
        dangerous: false,
        key_mode: KeyMode::Windowed,
    },
    ToolSpec {
        name: "sync_firmographics",
        description: "Write enrichment firmographics onto the lead",
        category: ToolCategory::EnrichmentSync,
        entity_type: "Lead",
        params: &[req("lead_id", Str), req("firmographics", Object)],
        dangerous: false,
        key_mode: KeyMode::Stable,
    },
];

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<&'static str, ToolSpec>,
}

impl ToolRegistry {
    /// Create a registry with the full builtin surface registered.
    pub fn new(guard: &SafetyGuard) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        for spec in BUILTIN_TOOLS {
            registry
                .register(guard, spec.clone())
                .expect("builtin tool names must pass the safety guard");
        }
        registry
    }

    /// Register a tool; refused when the name trips a blocked pattern.
    pub fn register(&mut self, guard: &SafetyGuard, spec: ToolSpec) -> Result<(), String> {
        guard
            .check_tool_name(spec.name)
            .map_err(|violation| violation.reason)?;
        self.tools.insert(spec.name, spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list(&self) -> Vec<&ToolSpec> {
        let mut specs: Vec<_> = self.tools.values().collect();
        specs.sort_by_key(|spec| spec.name);
        specs
    }

    /// Validate a parameter object against the tool's schema.
    pub fn validate_params(&self, name: &str, params: &Value) -> Result<(), String> {
        let spec = self
            .tools
            .get(name)
            .ok_or_else(|| format!("unknown tool: {name}"))?;

        let Some(map) = params.as_object() else {
            return Err(format!("{name}: parameters must be an object"));
        };

        for field in spec.params {
            match map.get(field.name) {
                Some(value) if value.is_null() && !field.required => {}
                Some(value) => {
                    if !field.kind.matches(value) {
                        return Err(format!(
                            "{name}: parameter '{}' must be a {}",
                            field.name,
                            field.kind.as_str()
                        ));
                    }
                }
                None if field.required => {
                    return Err(format!("{name}: missing required parameter '{}'", field.name));
                }
                None => {}
            }
        }

        for key in map.keys() {
            if !spec.params.iter().any(|field| field.name == key.as_str()) {
                return Err(format!("{name}: unknown parameter '{key}'"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(&SafetyGuard::new())
    }

    #[test]
    fn test_registry_has_required_surface() {
        let registry = registry();
        for name in [
            "create_lead",
            "upsert_lead",
            "convert_lead",
            "update_lead_status",
            "update_lead_fields",
            "set_lead_score",
            "match_account",
            "create_contact",
            "link_contact_to_account",
            "create_opportunity",
            "update_opportunity_stage",
            "set_opportunity_value",
            "attach_campaign",
            "create_task",
            "log_activity",
            "add_note",
            "create_follow_up",
            "sync_firmographics",
        ] {
            assert!(registry.has_tool(name), "missing tool {name}");
        }
        assert_eq!(registry.list().len(), 18);
    }

    #[test]
    fn test_register_rejects_blocked_name() {
        let guard = SafetyGuard::new();
        let mut registry = ToolRegistry::new(&guard);
        let err = registry
            .register(
                &guard,
                ToolSpec {
                    name: "delete_lead",
                    description: "nope",
                    category: ToolCategory::LeadLifecycle,
                    entity_type: "Lead",
                    params: &[],
                    dangerous: false,
                    key_mode: KeyMode::Windowed,
                },
            )
            .unwrap_err();
        assert!(err.contains("blocked pattern"));
        assert!(!registry.has_tool("delete_lead"));
    }

    #[test]
    fn test_validate_params_happy_path() {
        let registry = registry();
        assert!(registry
            .validate_params(
                "upsert_lead",
                &json!({"email": "jane@acme.io", "first_name": "Jane"})
            )
            .is_ok());
        assert!(registry
            .validate_params(
                "set_lead_score",
                &json!({"lead_id": "00Q1", "score": 88, "score_type": "fit"})
            )
            .is_ok());
    }

    #[test]
    fn test_validate_params_missing_required() {
        let registry = registry();
        let err = registry
            .validate_params("upsert_lead", &json!({"first_name": "Jane"}))
            .unwrap_err();
        assert!(err.contains("missing required parameter 'email'"));
    }

    #[test]
    fn test_validate_params_wrong_kind() {
        let registry = registry();
        let err = registry
            .validate_params("set_lead_score", &json!({"lead_id": "x", "score": "high"}))
            .unwrap_err();
        assert!(err.contains("'score' must be a integer"));
    }

    #[test]
    fn test_validate_params_unknown_field() {
        let registry = registry();
        let err = registry
            .validate_params("add_note", &json!({"related_to_id": "1", "body": "hi", "extra": 1}))
            .unwrap_err();
        assert!(err.contains("unknown parameter 'extra'"));
    }

    #[test]
    fn test_validate_params_non_object() {
        let registry = registry();
        assert!(registry.validate_params("add_note", &json!([1, 2])).is_err());
    }

    #[test]
    fn test_key_modes() {
        let registry = registry();
        assert_eq!(registry.get("upsert_lead").unwrap().key_mode, KeyMode::Stable);
        assert_eq!(registry.get("set_lead_score").unwrap().key_mode, KeyMode::Windowed);
        assert_eq!(registry.get("sync_firmographics").unwrap().key_mode, KeyMode::Stable);
    }
}
