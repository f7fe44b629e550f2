//! Append-only CRM audit log.
//!
//! One row per executor call. Rows are appended and fetched by execution id;
//! there is no richer query surface.

use crate::{DbError, DbPool, Result};
use chrono::{DateTime, Utc};
use leadflow_protocol::types::CrmSyncLog;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// A row to append; the id and timestamp are assigned here.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    /// Already-redacted parameters. Raw parameters must never reach this type.
    pub params: Value,
    pub result: String,
    pub mcp_execution_id: String,
    pub idempotency_key: Option<String>,
    pub mock: bool,
    pub lead_id: Option<i64>,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

/// Data-access boundary for the `crm_sync_log` table.
#[derive(Clone)]
pub struct SyncLogStore {
    pool: DbPool,
}

fn log_from_row(row: &SqliteRow) -> Result<CrmSyncLog> {
    let params: String = row.try_get("params")?;
    let timestamp: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::invalid_value(format!("timestamp '{timestamp}': {e}")))?;

    Ok(CrmSyncLog {
        id: row.try_get("id")?,
        action: row.try_get("action")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        params: serde_json::from_str(&params)?,
        result: row.try_get("result")?,
        mcp_execution_id: row.try_get("mcp_execution_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        mock: row.try_get::<i64, _>("mock")? != 0,
        lead_id: row.try_get("lead_id")?,
        duration_ms: row.try_get("duration_ms")?,
        error_message: row.try_get("error_message")?,
        timestamp,
    })
}

impl SyncLogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &NewSyncLog) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO crm_sync_log
                (action, entity_type, entity_id, params, result, mcp_execution_id,
                 idempotency_key, mock, lead_id, duration_ms, error_message, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(serde_json::to_string(&entry.params)?)
        .bind(&entry.result)
        .bind(&entry.mcp_execution_id)
        .bind(&entry.idempotency_key)
        .bind(entry.mock as i64)
        .bind(entry.lead_id)
        .bind(entry.duration_ms)
        .bind(&entry.error_message)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Fetch the contiguous, ordered action sequence of one execution.
    pub async fn fetch_by_execution_id(&self, execution_id: &str) -> Result<Vec<CrmSyncLog>> {
        let rows = sqlx::query("SELECT * FROM crm_sync_log WHERE mcp_execution_id = ? ORDER BY id")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    /// Fetch every audit row for one lead, oldest first.
    pub async fn fetch_by_lead_id(&self, lead_id: i64) -> Result<Vec<CrmSyncLog>> {
        let rows = sqlx::query("SELECT * FROM crm_sync_log WHERE lead_id = ? ORDER BY id")
            .bind(lead_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(action: &str, execution_id: &str) -> NewSyncLog {
        NewSyncLog {
            action: action.to_string(),
            entity_type: "Lead".to_string(),
            entity_id: Some("00Q000000000001".to_string()),
            params: json!({"email": "j***@acme.io"}),
            result: "success".to_string(),
            mcp_execution_id: execution_id.to_string(),
            idempotency_key: None,
            mock: true,
            lead_id: Some(1),
            duration_ms: 120,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_fetch_ordered() {
        let store = SyncLogStore::new(crate::connect_memory().await.unwrap());
        store.append(&entry("upsert_lead", "exec-1")).await.unwrap();
        store.append(&entry("set_lead_score", "exec-1")).await.unwrap();
        store.append(&entry("upsert_lead", "exec-2")).await.unwrap();

        let rows = store.fetch_by_execution_id("exec-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "upsert_lead");
        assert_eq!(rows[1].action, "set_lead_score");
        assert!(rows.iter().all(|r| r.mcp_execution_id == "exec-1"));
        assert!(rows[0].mock);
    }

    #[tokio::test]
    async fn test_fetch_by_lead_id() {
        let store = SyncLogStore::new(crate::connect_memory().await.unwrap());
        store.append(&entry("log_activity", "exec-9")).await.unwrap();
        let rows = store.fetch_by_lead_id(1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_ms, 120);
    }
}
