//! Lead persistence: ingest, lookup, analysis writes, status transitions.

use crate::{DbError, DbPool, Result};
use chrono::{DateTime, Utc};
use leadflow_protocol::idempotency::lead_key;
use leadflow_protocol::types::{
    AnalysisResult, CompanyData, GroundingStatus, Intent, Lead, LeadStatus,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

/// Data-access boundary for the `leads` table.
#[derive(Clone)]
pub struct LeadStore {
    pool: DbPool,
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::invalid_value(format!("timestamp '{raw}': {e}")))
}

fn lead_from_row(row: &SqliteRow) -> Result<Lead> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<LeadStatus>()
        .map_err(DbError::invalid_value)?;

    let intent: Option<String> = row.try_get("intent")?;
    let intent = match intent {
        Some(raw) => Some(
            serde_json::from_value::<Intent>(serde_json::Value::String(raw.clone()))
                .map_err(|_| DbError::invalid_value(format!("intent '{raw}'")))?,
        ),
        None => None,
    };

    let grounding_status: Option<String> = row.try_get("grounding_status")?;
    let grounding_status = match grounding_status {
        Some(raw) => Some(
            raw.parse::<GroundingStatus>()
                .map_err(DbError::invalid_value)?,
        ),
        None => None,
    };

    let enrichment_data: Option<String> = row.try_get("enrichment_data")?;
    let enrichment_data = match enrichment_data {
        Some(raw) => Some(serde_json::from_str::<CompanyData>(&raw)?),
        None => None,
    };

    let evidence: String = row.try_get("evidence")?;
    let grounding_errors: String = row.try_get("grounding_errors")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let fit_score: Option<i64> = row.try_get("fit_score")?;

    Ok(Lead {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        email: row.try_get("email")?,
        campaign_id: row.try_get("campaign_id")?,
        name: row.try_get("name")?,
        enrichment_data,
        status,
        fit_score: fit_score.map(|v| v.clamp(0, 100) as u8),
        intent,
        reasoning: row.try_get("reasoning")?,
        evidence: serde_json::from_str(&evidence)?,
        grounding_status,
        grounding_errors: serde_json::from_str(&grounding_errors)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

impl LeadStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Ingest a lead, idempotently.
    ///
    /// A second ingest of the same `(email, campaign_id)` returns the
    /// existing row unchanged. The boolean reports whether a row was created.
    pub async fn insert_pending(
        &self,
        email: &str,
        campaign_id: &str,
        name: Option<&str>,
    ) -> Result<(Lead, bool)> {
        let key = lead_key(email, campaign_id);
        let now = Utc::now().to_rfc3339();

        let inserted = sqlx::query(
            r#"
            INSERT INTO leads (idempotency_key, email, campaign_id, name, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'PENDING', ?, ?)
            ON CONFLICT(idempotency_key) DO NOTHING
            "#,
        )
        .bind(&key)
        .bind(email)
        .bind(campaign_id)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let lead = self
            .find_by_idempotency_key(&key)
            .await?
            .ok_or_else(|| DbError::not_found(format!("lead for key {key}")))?;

        if inserted == 0 {
            debug!(lead_id = lead.id, "Duplicate ingest collapsed onto existing lead");
        }
        Ok((lead, inserted > 0))
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Lead>> {
        let row = sqlx::query("SELECT * FROM leads WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Lead>> {
        let row = sqlx::query("SELECT * FROM leads WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }

    /// Persist the grounded analysis and move the lead to ENRICHED.
    pub async fn save_analysis(
        &self,
        lead_id: i64,
        analysis: &AnalysisResult,
        enrichment: Option<&CompanyData>,
    ) -> Result<()> {
        let enrichment_json = enrichment.map(serde_json::to_string).transpose()?;
        let evidence_json = serde_json::to_string(&analysis.evidence)?;
        let errors_json = serde_json::to_string(&analysis.grounding_errors)?;
        let grounding = analysis.grounding_status.map(|s| s.as_str().to_string());
        let intent_json = serde_json::to_value(analysis.intent)?;
        let intent = intent_json
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();

        sqlx::query(
            r#"
            UPDATE leads
            SET enrichment_data = ?,
                fit_score = ?,
                intent = ?,
                reasoning = ?,
                evidence = ?,
                grounding_status = ?,
                grounding_errors = ?,
                status = 'ENRICHED',
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(enrichment_json)
        .bind(analysis.fit_score as i64)
        .bind(intent)
        .bind(&analysis.reasoning)
        .bind(evidence_json)
        .bind(grounding)
        .bind(errors_json)
        .bind(Utc::now().to_rfc3339())
        .bind(lead_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_status(&self, lead_id: i64, status: LeadStatus) -> Result<()> {
        sqlx::query("UPDATE leads SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(lead_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Terminal failure path driven by the DLQ processor.
    pub async fn record_permanent_failure(
        &self,
        lead_id: i64,
        error: &str,
        attempts_made: u32,
    ) -> Result<()> {
        let note = format!("failed after {attempts_made} attempts: {error}");
        sqlx::query(
            r#"
            UPDATE leads
            SET status = 'PERMANENTLY_FAILED',
                reasoning = COALESCE(reasoning, ''),
                grounding_errors = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(&vec![note])?)
        .bind(Utc::now().to_rfc3339())
        .bind(lead_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_protocol::types::{ClaimType, Decision, Evidence, EvidenceSource};
    use serde_json::json;

    async fn store() -> LeadStore {
        LeadStore::new(crate::connect_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_duplicate_ingest_returns_same_row() {
        let store = store().await;
        let (first, created) = store
            .insert_pending("jane@acme.io", "spring", Some("Jane Doe"))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = store
            .insert_pending(" JANE@acme.io", "SPRING", None)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("Jane Doe"));
    }

    #[tokio::test]
    async fn test_save_analysis_roundtrip() {
        let store = store().await;
        let (lead, _) = store
            .insert_pending("jane@acme.io", "spring", None)
            .await
            .unwrap();

        let analysis = AnalysisResult {
            fit_score: 88,
            intent: Intent::HighFit,
            decision: Decision::RouteToSdr,
            reasoning: "strong fit".to_string(),
            evidence: vec![Evidence {
                source: EvidenceSource::Enrichment,
                field_path: "enrichment.industry".to_string(),
                value: json!("Fintech"),
                claim_type: ClaimType::Firmographic,
            }],
            grounding_status: Some(GroundingStatus::Valid),
            grounding_errors: vec![],
        };
        let enrichment = CompanyData {
            name: "Acme".to_string(),
            domain: "acme.io".to_string(),
            employees: Some(250),
            industry: Some("Fintech".to_string()),
            tech_stack: vec!["rust".to_string()],
            geo: Some("EU".to_string()),
        };

        store
            .save_analysis(lead.id, &analysis, Some(&enrichment))
            .await
            .unwrap();

        let loaded = store.find_by_id(lead.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, LeadStatus::Enriched);
        assert_eq!(loaded.fit_score, Some(88));
        assert_eq!(loaded.intent, Some(Intent::HighFit));
        assert_eq!(loaded.grounding_status, Some(GroundingStatus::Valid));
        assert_eq!(loaded.evidence.len(), 1);
        assert_eq!(loaded.enrichment_data.unwrap().industry.as_deref(), Some("Fintech"));
    }

    #[tokio::test]
    async fn test_status_transition_and_permanent_failure() {
        let store = store().await;
        let (lead, _) = store
            .insert_pending("a@b.io", "c", None)
            .await
            .unwrap();

        store
            .update_status(lead.id, LeadStatus::McpBlocked)
            .await
            .unwrap();
        let loaded = store.find_by_id(lead.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, LeadStatus::McpBlocked);

        store
            .record_permanent_failure(lead.id, "breaker stuck open", 5)
            .await
            .unwrap();
        let loaded = store.find_by_id(lead.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, LeadStatus::PermanentlyFailed);
        assert!(loaded.grounding_errors[0].contains("5 attempts"));
    }

    #[tokio::test]
    async fn test_find_missing_lead() {
        let store = store().await;
        assert!(store.find_by_id(999).await.unwrap().is_none());
    }
}
