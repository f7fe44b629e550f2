//! Schema initialisation for the lead and audit tables.

use crate::{DbPool, Result};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    idempotency_key TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL,
    campaign_id TEXT NOT NULL,
    name TEXT,
    enrichment_data TEXT,
    status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (status IN ('PENDING','ENRICHED','SYNCED_TO_CRM','AI_REJECTED','MCP_BLOCKED','PERMANENTLY_FAILED')),
    fit_score INTEGER,
    intent TEXT,
    reasoning TEXT,
    evidence TEXT NOT NULL DEFAULT '[]',
    grounding_status TEXT
        CHECK (grounding_status IS NULL OR grounding_status IN ('VALID','DOWNGRADED','REJECTED')),
    grounding_errors TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_leads_status ON leads(status);

CREATE TABLE IF NOT EXISTS crm_sync_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT,
    params TEXT NOT NULL,
    result TEXT NOT NULL,
    mcp_execution_id TEXT NOT NULL,
    idempotency_key TEXT,
    mock INTEGER NOT NULL DEFAULT 0,
    lead_id INTEGER,
    duration_ms INTEGER NOT NULL,
    error_message TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ix_sync_log_execution ON crm_sync_log(mcp_execution_id);
"#;

/// Create tables and indexes if absent.
pub async fn init(pool: &DbPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}
