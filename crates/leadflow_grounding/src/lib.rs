//! Grounding validator: every AI claim must cite an allowed source and match
//! stored truth.
//!
//! The validator stamps `grounding_status`/`grounding_errors` onto an
//! analysis and may mutate `intent`/`fit_score` under the downgrade rule.
//! Expected outcomes are tagged values; no error crosses this boundary for a
//! rejection.

use leadflow_protocol::types::{
    AnalysisResult, ClaimType, CompanyData, Decision, EvidenceSource, GroundingStatus, Intent,
};
use serde_json::Value;
use tracing::debug;

/// Fit score ceiling applied when a high-intent verdict is downgraded.
const DOWNGRADE_SCORE_CAP: u8 = 70;

/// Validate an analysis against the enrichment record.
///
/// Rules run in order; the first hard failure rejects and stops. Returns the
/// same analysis with grounding fields stamped.
pub fn validate(analysis: AnalysisResult, enrichment: Option<&CompanyData>) -> AnalysisResult {
    // Rule 1: closed source set.
    let unauthorized = analysis
        .evidence
        .iter()
        .find(|item| !item.source.is_authorized())
        .map(|item| format!("unauthorized source: {}", item.source.as_str()));
    if let Some(message) = unauthorized {
        return reject(analysis, message);
    }

    // Rule 2: firmographic claims need an enrichment record to check against.
    let has_firmographic = analysis
        .evidence
        .iter()
        .any(|item| item.claim_type == ClaimType::Firmographic);
    let Some(enrichment) = enrichment else {
        if has_firmographic {
            return reject(
                analysis,
                "firmographic claims without available enrichment".to_string(),
            );
        }
        return finish_soft_rules(analysis);
    };

    // Rule 3: firmographic claims citing ENRICHMENT must match the record.
    for item in &analysis.evidence {
        if item.source != EvidenceSource::Enrichment
            || item.claim_type != ClaimType::Firmographic
        {
            continue;
        }
        let Some(trusted) = enrichment.field(item.field_name()) else {
            // Unknown trusted field: skip, not fatal.
            debug!(field = item.field_name(), "No trusted value for claim, skipping");
            continue;
        };
        let claimed = coerce_to_string(&item.value);
        let trusted = coerce_to_string(&trusted);
        if !values_overlap(&claimed, &trusted) {
            let error = format!(
                "Hallucination detected: claimed '{}' for {} but enrichment has '{}'",
                claimed, item.field_path, trusted
            );
            return reject(analysis, error);
        }
    }

    finish_soft_rules(analysis)
}

/// Rule 4 (downgrade) and the VALID terminal.
fn finish_soft_rules(mut analysis: AnalysisResult) -> AnalysisResult {
    if analysis.intent == Intent::HighFit
        && !analysis.evidence.iter().any(|item| item.source.is_behavioral())
    {
        analysis.intent = Intent::MediumFit;
        analysis.fit_score = analysis.fit_score.min(DOWNGRADE_SCORE_CAP);
        analysis.grounding_status = Some(GroundingStatus::Downgraded);
        analysis.grounding_errors = vec![
            "High Intent requires at least one behavioral/computed evidence item.".to_string(),
        ];
        return analysis;
    }

    analysis.grounding_status = Some(GroundingStatus::Valid);
    analysis.grounding_errors = vec![];
    analysis
}

fn reject(mut analysis: AnalysisResult, error: String) -> AnalysisResult {
    analysis.grounding_status = Some(GroundingStatus::Rejected);
    analysis.grounding_errors = vec![error];
    analysis
}

/// Fallback analysis for a failed AI provider call.
///
/// The lead surfaces for manual review; the action layer sees a rejection.
pub fn fallback_analysis(provider_error: &str) -> AnalysisResult {
    AnalysisResult {
        fit_score: 0,
        intent: Intent::ManualReview,
        decision: Decision::Ignore,
        reasoning: format!("AI provider failed: {provider_error}"),
        evidence: vec![],
        grounding_status: Some(GroundingStatus::Rejected),
        grounding_errors: vec![provider_error.to_string()],
    }
}

/// Narrow coercion used only for the substring comparison in rule 3.
pub fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(coerce_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Case-insensitive substring containment in either direction, so minor
/// lexical variants ("Fintech" vs "fintech services") do not false-reject.
fn values_overlap(claimed: &str, trusted: &str) -> bool {
    let claimed = claimed.trim().to_lowercase();
    let trusted = trusted.trim().to_lowercase();
    if claimed.is_empty() || trusted.is_empty() {
        return false;
    }
    claimed.contains(&trusted) || trusted.contains(&claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_protocol::types::Evidence;
    use serde_json::json;

    fn enrichment() -> CompanyData {
        CompanyData {
            name: "Acme".to_string(),
            domain: "acme.io".to_string(),
            employees: Some(250),
            industry: Some("Fintech".to_string()),
            tech_stack: vec!["rust".to_string(), "postgres".to_string()],
            geo: Some("EU".to_string()),
        }
    }

    fn evidence(source: EvidenceSource, path: &str, value: Value, claim: ClaimType) -> Evidence {
        Evidence {
            source,
            field_path: path.to_string(),
            value,
            claim_type: claim,
        }
    }

    fn analysis(intent: Intent, fit_score: u8, evidence: Vec<Evidence>) -> AnalysisResult {
        AnalysisResult {
            fit_score,
            intent,
            decision: Decision::RouteToSdr,
            reasoning: "test".to_string(),
            evidence,
            grounding_status: None,
            grounding_errors: vec![],
        }
    }

    #[test]
    fn test_valid_high_fit_with_behavioral_evidence() {
        let result = validate(
            analysis(
                Intent::HighFit,
                90,
                vec![
                    evidence(
                        EvidenceSource::Enrichment,
                        "enrichment.industry",
                        json!("Fintech"),
                        ClaimType::Firmographic,
                    ),
                    evidence(
                        EvidenceSource::Marketo,
                        "marketo.campaign_id",
                        json!("launch"),
                        ClaimType::Behavior,
                    ),
                ],
            ),
            Some(&enrichment()),
        );

        assert_eq!(result.grounding_status, Some(GroundingStatus::Valid));
        assert_eq!(result.intent, Intent::HighFit);
        assert_eq!(result.fit_score, 90);
        assert!(result.grounding_errors.is_empty());
    }

    #[test]
    fn test_unauthorized_source_rejects() {
        let result = validate(
            analysis(
                Intent::HighFit,
                90,
                vec![evidence(
                    EvidenceSource::Unauthorized("WEB_SEARCH".to_string()),
                    "web.hits",
                    json!("something"),
                    ClaimType::Behavior,
                )],
            ),
            Some(&enrichment()),
        );

        assert_eq!(result.grounding_status, Some(GroundingStatus::Rejected));
        assert_eq!(result.grounding_errors[0], "unauthorized source: WEB_SEARCH");
    }

    #[test]
    fn test_firmographic_without_enrichment_rejects() {
        let result = validate(
            analysis(
                Intent::MediumFit,
                60,
                vec![evidence(
                    EvidenceSource::Enrichment,
                    "enrichment.industry",
                    json!("Software"),
                    ClaimType::Firmographic,
                )],
            ),
            None,
        );

        assert_eq!(result.grounding_status, Some(GroundingStatus::Rejected));
        assert_eq!(
            result.grounding_errors[0],
            "firmographic claims without available enrichment"
        );
    }

    #[test]
    fn test_firmographic_conflict_rejects() {
        let result = validate(
            analysis(
                Intent::HighFit,
                90,
                vec![evidence(
                    EvidenceSource::Enrichment,
                    "enrichment.industry",
                    json!("Healthcare"),
                    ClaimType::Firmographic,
                )],
            ),
            Some(&enrichment()),
        );

        assert_eq!(result.grounding_status, Some(GroundingStatus::Rejected));
        assert!(result.grounding_errors[0].starts_with("Hallucination detected"));
    }

    #[test]
    fn test_substring_variants_do_not_reject() {
        let result = validate(
            analysis(
                Intent::MediumFit,
                60,
                vec![evidence(
                    EvidenceSource::Enrichment,
                    "enrichment.industry",
                    json!("fintech services"),
                    ClaimType::Firmographic,
                )],
            ),
            Some(&enrichment()),
        );
        assert_eq!(result.grounding_status, Some(GroundingStatus::Valid));
    }

    #[test]
    fn test_missing_trusted_field_is_skipped() {
        let result = validate(
            analysis(
                Intent::MediumFit,
                60,
                vec![evidence(
                    EvidenceSource::Enrichment,
                    "enrichment.funding_round",
                    json!("Series B"),
                    ClaimType::Firmographic,
                )],
            ),
            Some(&enrichment()),
        );
        assert_eq!(result.grounding_status, Some(GroundingStatus::Valid));
    }

    #[test]
    fn test_high_fit_without_behavioral_downgrades() {
        let result = validate(
            analysis(
                Intent::HighFit,
                95,
                vec![evidence(
                    EvidenceSource::Enrichment,
                    "enrichment.industry",
                    json!("Fintech"),
                    ClaimType::Firmographic,
                )],
            ),
            Some(&enrichment()),
        );

        assert_eq!(result.grounding_status, Some(GroundingStatus::Downgraded));
        assert_eq!(result.intent, Intent::MediumFit);
        assert!(result.fit_score <= 70);
        assert!(result.grounding_errors[0].contains("High Intent requires"));
    }

    #[test]
    fn test_downgrade_keeps_lower_score() {
        let result = validate(analysis(Intent::HighFit, 55, vec![]), Some(&enrichment()));
        assert_eq!(result.grounding_status, Some(GroundingStatus::Downgraded));
        assert_eq!(result.fit_score, 55);
    }

    #[test]
    fn test_rule_order_unauthorized_wins_over_missing_enrichment() {
        let result = validate(
            analysis(
                Intent::HighFit,
                90,
                vec![
                    evidence(
                        EvidenceSource::Unauthorized("CRYSTAL_BALL".to_string()),
                        "x.y",
                        json!(1),
                        ClaimType::Firmographic,
                    ),
                    evidence(
                        EvidenceSource::Enrichment,
                        "enrichment.industry",
                        json!("Fintech"),
                        ClaimType::Firmographic,
                    ),
                ],
            ),
            None,
        );
        assert!(result.grounding_errors[0].starts_with("unauthorized source"));
    }

    #[test]
    fn test_fallback_analysis_shape() {
        let fallback = fallback_analysis("model timed out");
        assert_eq!(fallback.fit_score, 0);
        assert_eq!(fallback.intent, Intent::ManualReview);
        assert_eq!(fallback.decision, Decision::Ignore);
        assert_eq!(fallback.grounding_status, Some(GroundingStatus::Rejected));
        assert_eq!(fallback.grounding_errors, vec!["model timed out".to_string()]);
    }

    #[test]
    fn test_coerce_to_string_variants() {
        assert_eq!(coerce_to_string(&json!("x")), "x");
        assert_eq!(coerce_to_string(&json!(42)), "42");
        assert_eq!(coerce_to_string(&json!(["a", "b"])), "a, b");
        assert_eq!(coerce_to_string(&json!(null)), "");
    }

    #[test]
    fn test_list_claim_overlaps_trusted_list() {
        // tech_stack claims compare through the joined list form.
        let result = validate(
            analysis(
                Intent::MediumFit,
                60,
                vec![evidence(
                    EvidenceSource::Enrichment,
                    "enrichment.tech_stack",
                    json!("rust"),
                    ClaimType::Firmographic,
                )],
            ),
            Some(&enrichment()),
        );
        assert_eq!(result.grounding_status, Some(GroundingStatus::Valid));
    }
}
