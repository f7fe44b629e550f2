//! Action-plan builder: which tools run for one grounded analysis.
//!
//! Plans are built for non-rejected analyses only and execute strictly in
//! order. The upsert is critical - its failure halts the plan; everything
//! downstream references the CRM record it produced.

use leadflow_protocol::types::{AnalysisResult, CompanyData, Lead};
use serde_json::{json, Value};

/// One planned tool call.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub tool: &'static str,
    pub params: Value,
    /// A failing critical action halts the remainder of the plan.
    pub critical: bool,
}

/// Placeholder for the CRM lead id, resolved after the upsert succeeds.
pub const LEAD_ID_PLACEHOLDER: &str = "$lead";

fn split_name(name: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(name) = name else {
        return (None, None);
    };
    let mut parts = name.split_whitespace();
    let first = parts.next().map(str::to_string);
    let rest: Vec<&str> = parts.collect();
    let last = if rest.is_empty() {
        None
    } else {
        Some(rest.join(" "))
    };
    (first, last)
}

/// Build the ordered plan for one lead.
pub fn build_action_plan(
    lead: &Lead,
    analysis: &AnalysisResult,
    enrichment: Option<&CompanyData>,
) -> Vec<PlannedAction> {
    let mut plan = Vec::with_capacity(4);

    let (first_name, last_name) = split_name(lead.name.as_deref());
    let mut upsert = json!({ "email": lead.email });
    if let Some(first) = first_name {
        upsert["first_name"] = json!(first);
    }
    if let Some(last) = last_name {
        upsert["last_name"] = json!(last);
    }
    if let Some(company) = enrichment.map(|e| e.name.as_str()) {
        upsert["company"] = json!(company);
    }
    plan.push(PlannedAction {
        tool: "upsert_lead",
        params: upsert,
        critical: true,
    });

    plan.push(PlannedAction {
        tool: "set_lead_score",
        params: json!({
            "lead_id": LEAD_ID_PLACEHOLDER,
            "score": analysis.fit_score,
            "score_type": "fit",
        }),
        critical: false,
    });

    if let Some(enrichment) = enrichment {
        plan.push(PlannedAction {
            tool: "sync_firmographics",
            params: json!({
                "lead_id": LEAD_ID_PLACEHOLDER,
                "firmographics": {
                    "industry": enrichment.industry,
                    "employees": enrichment.employees,
                    "geo": enrichment.geo,
                    "tech_stack": enrichment.tech_stack,
                },
            }),
            critical: false,
        });
    }

    plan.push(PlannedAction {
        tool: "log_activity",
        params: json!({
            "related_to_id": LEAD_ID_PLACEHOLDER,
            "type": "ai_analysis",
            "description": format!(
                "AI verdict: {} (fit {}), decision {}",
                analysis.intent.as_str(),
                analysis.fit_score,
                analysis.decision.as_str(),
            ),
        }),
        critical: false,
    });

    plan
}

/// Substitute the resolved CRM lead id into a planned parameter object.
pub fn resolve_lead_id(params: &mut Value, crm_lead_id: &str) {
    for key in ["lead_id", "related_to_id"] {
        if let Some(value) = params.get_mut(key) {
            if value == LEAD_ID_PLACEHOLDER {
                *value = json!(crm_lead_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leadflow_protocol::types::{Decision, Intent, LeadStatus};

    fn lead(name: Option<&str>) -> Lead {
        Lead {
            id: 1,
            idempotency_key: "k".to_string(),
            email: "jane@acme.io".to_string(),
            campaign_id: "spring".to_string(),
            name: name.map(str::to_string),
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

    fn analysis() -> AnalysisResult {
        AnalysisResult {
            fit_score: 90,
            intent: Intent::HighFit,
            decision: Decision::RouteToSdr,
            reasoning: "test".to_string(),
            evidence: vec![],
            grounding_status: None,
            grounding_errors: vec![],
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

    #[test]
    fn test_full_plan_with_enrichment() {
        let plan = build_action_plan(
            &lead(Some("Jane van der Berg")),
            &analysis(),
            Some(&enrichment()),
        );
        let tools: Vec<&str> = plan.iter().map(|a| a.tool).collect();
        assert_eq!(
            tools,
            vec!["upsert_lead", "set_lead_score", "sync_firmographics", "log_activity"]
        );

        assert!(plan[0].critical);
        assert!(!plan[1].critical);
        assert_eq!(plan[0].params["first_name"], "Jane");
        assert_eq!(plan[0].params["last_name"], "van der Berg");
        assert_eq!(plan[0].params["company"], "Acme");
        assert_eq!(plan[1].params["score"], 90);
        assert_eq!(plan[2].params["firmographics"]["industry"], "Fintech");
        assert_eq!(plan[3].params["type"], "ai_analysis");
    }

    #[test]
    fn test_plan_without_enrichment_skips_firmographics() {
        let plan = build_action_plan(&lead(None), &analysis(), None);
        let tools: Vec<&str> = plan.iter().map(|a| a.tool).collect();
        assert_eq!(tools, vec!["upsert_lead", "set_lead_score", "log_activity"]);
        assert!(plan[0].params.get("first_name").is_none());
        assert!(plan[0].params.get("company").is_none());
    }

    #[test]
    fn test_single_token_name() {
        let plan = build_action_plan(&lead(Some("Cher")), &analysis(), None);
        assert_eq!(plan[0].params["first_name"], "Cher");
        assert!(plan[0].params.get("last_name").is_none());
    }

    #[test]
    fn test_resolve_lead_id() {
        let mut plan = build_action_plan(&lead(None), &analysis(), Some(&enrichment()));
        for action in plan.iter_mut().skip(1) {
            resolve_lead_id(&mut action.params, "00Q000000000042");
        }
        assert_eq!(plan[1].params["lead_id"], "00Q000000000042");
        assert_eq!(plan[3].params["related_to_id"], "00Q000000000042");
    }
}
