//! Provider interfaces the worker consumes: the AI model and the enrichment
//! backend. Concrete services live behind these traits; the crate ships a
//! deterministic rule-based AI and a static enrichment table for local runs
//! and tests.

use anyhow::Result;
use leadflow_protocol::types::{
    AnalysisResult, ClaimType, CompanyData, Decision, Evidence, EvidenceSource, Intent, Lead,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

/// The AI collaborator. Implementations must honour the evidence-schema
/// contract; thrown errors are absorbed as grounding rejections upstream.
#[async_trait::async_trait]
pub trait AiProvider: Send + Sync {
    async fn analyze_lead(
        &self,
        lead: &Lead,
        enrichment: Option<&CompanyData>,
    ) -> Result<AnalysisResult>;
}

/// Firmographic lookup keyed by email domain.
#[async_trait::async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn company_by_domain(&self, domain: &str) -> Result<Option<CompanyData>>;
}

// ============================================================================
// Local implementations
// ============================================================================

/// Deterministic scorer for local runs: enrichment presence drives fit, and
/// every claim cites a source the validator accepts.
pub struct RuleBasedAi;

#[async_trait::async_trait]
impl AiProvider for RuleBasedAi {
    async fn analyze_lead(
        &self,
        lead: &Lead,
        enrichment: Option<&CompanyData>,
    ) -> Result<AnalysisResult> {
        let mut evidence = vec![Evidence {
            source: EvidenceSource::Marketo,
            field_path: "marketo.campaign_id".to_string(),
            value: json!(lead.campaign_id),
            claim_type: ClaimType::Behavior,
        }];

        let (fit_score, intent, decision) = match enrichment {
            Some(company) => {
                if let Some(industry) = &company.industry {
                    evidence.push(Evidence {
                        source: EvidenceSource::Enrichment,
                        field_path: "enrichment.industry".to_string(),
                        value: json!(industry),
                        claim_type: ClaimType::Firmographic,
                    });
                }
                (80, Intent::HighFit, Decision::RouteToSdr)
            }
            None => (40, Intent::LowFit, Decision::Nurture),
        };

        Ok(AnalysisResult {
            fit_score,
            intent,
            decision,
            reasoning: format!(
                "Campaign '{}' engagement{}",
                lead.campaign_id,
                if enrichment.is_some() {
                    " with firmographic match"
                } else {
                    ", no firmographics available"
                }
            ),
            evidence,
            grounding_status: None,
            grounding_errors: vec![],
        })
    }
}

/// Fixed domain table; useful for development and tests.
#[derive(Default)]
pub struct StaticEnrichment {
    companies: HashMap<String, CompanyData>,
}

impl StaticEnrichment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(mut self, company: CompanyData) -> Self {
        self.companies.insert(company.domain.to_lowercase(), company);
        self
    }
}

#[async_trait::async_trait]
impl EnrichmentProvider for StaticEnrichment {
    async fn company_by_domain(&self, domain: &str) -> Result<Option<CompanyData>> {
        Ok(self.companies.get(&domain.to_lowercase()).cloned())
    }
}

/// Test provider returning pre-scripted analyses per email; falls back to an
/// error so unscripted calls are loud.
#[derive(Default)]
pub struct ScriptedAi {
    responses: Mutex<HashMap<String, AnalysisResult>>,
}

impl ScriptedAi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, email: &str, analysis: AnalysisResult) {
        self.responses
            .lock()
            .expect("scripted ai lock poisoned")
            .insert(email.to_lowercase(), analysis);
    }
}

#[async_trait::async_trait]
impl AiProvider for ScriptedAi {
    async fn analyze_lead(
        &self,
        lead: &Lead,
        _enrichment: Option<&CompanyData>,
    ) -> Result<AnalysisResult> {
        self.responses
            .lock()
            .expect("scripted ai lock poisoned")
            .get(&lead.email.to_lowercase())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scripted analysis for {}", lead.email))
    }
}

/// Enrichment provider that always fails; exercises the absent-enrichment path.
pub struct FailingEnrichment;

#[async_trait::async_trait]
impl EnrichmentProvider for FailingEnrichment {
    async fn company_by_domain(&self, _domain: &str) -> Result<Option<CompanyData>> {
        anyhow::bail!("enrichment backend unavailable")
    }
}
