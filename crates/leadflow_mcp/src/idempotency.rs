//! Action idempotency store over the shared coordination store.
//!
//! Key derivations live in `leadflow_protocol::idempotency`; this module adds
//! the storage round-trip. On store outage the check fails open (treat as not
//! processed) - at-least-once plus idempotent executors makes a duplicate
//! effect safe, a stalled pipeline is not.

use chrono::Utc;
use leadflow_protocol::defaults::{IDEMPOTENCY_TTL_HOURS, IDEMPOTENCY_WINDOW_SECS};
use leadflow_protocol::idempotency::{stable_action_key, windowed_action_key};
use leadflow_state_store::KvBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// How the action key incorporates time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Retries inside the window collapse to one effect.
    Windowed,
    /// Identity is intrinsic (upserts); no time term.
    Stable,
}

/// Outcome of an idempotency lookup.
#[derive(Debug, Clone)]
pub struct ProcessedCheck {
    pub processed: bool,
    pub result: Option<Value>,
    /// Epoch seconds when the result was stored.
    pub timestamp: Option<i64>,
}

impl ProcessedCheck {
    fn fresh() -> Self {
        Self {
            processed: false,
            result: None,
            timestamp: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredResult {
    result: Value,
    timestamp: i64,
}

/// Idempotency store handle.
#[derive(Clone)]
pub struct IdempotencyStore {
    store: Arc<dyn KvBackend>,
    window_secs: u64,
    ttl_hours: u64,
}

impl IdempotencyStore {
    pub fn new(store: Arc<dyn KvBackend>) -> Self {
        Self {
            store,
            window_secs: IDEMPOTENCY_WINDOW_SECS,
            ttl_hours: IDEMPOTENCY_TTL_HOURS,
        }
    }

    pub fn with_window(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    /// Derive the action key for one tool call.
    pub fn action_key(
        &self,
        mode: KeyMode,
        email: &str,
        campaign_id: Option<&str>,
        action: &str,
    ) -> String {
        match mode {
            KeyMode::Stable => stable_action_key(email, campaign_id, action),
            KeyMode::Windowed => windowed_action_key(
                email,
                campaign_id,
                action,
                Utc::now().timestamp(),
                self.window_secs,
            ),
        }
    }

    fn storage_key(key: &str) -> String {
        format!("idempotency:{key}")
    }

    /// Look up a prior result for this key.
    pub async fn is_processed(&self, key: &str) -> ProcessedCheck {
        match self.store.get(&Self::storage_key(key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<StoredResult>(&raw) {
                Ok(stored) => ProcessedCheck {
                    processed: true,
                    result: Some(stored.result),
                    timestamp: Some(stored.timestamp),
                },
                Err(err) => {
                    warn!(error = %err, "Unparseable idempotency record, treating as fresh");
                    ProcessedCheck::fresh()
                }
            },
            Ok(None) => ProcessedCheck::fresh(),
            Err(err) => {
                warn!(error = %err, "Idempotency store outage, failing open");
                ProcessedCheck::fresh()
            }
        }
    }

    /// Persist a result under this key. Best effort: an outage only costs
    /// dedup, never correctness.
    pub async fn store_result(&self, key: &str, result: &Value) {
        let stored = StoredResult {
            result: result.clone(),
            timestamp: Utc::now().timestamp(),
        };
        let raw = match serde_json::to_string(&stored) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "Failed to encode idempotency record");
                return;
            }
        };
        if let Err(err) = self
            .store
            .set_ex(&Self::storage_key(key), &raw, self.ttl_hours * 3_600)
            .await
        {
            warn!(error = %err, "Failed to write idempotency record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_state_store::MemoryBackend;
    use serde_json::json;

    #[tokio::test]
    async fn test_roundtrip() {
        let store = IdempotencyStore::new(Arc::new(MemoryBackend::new()));
        let key = store.action_key(KeyMode::Stable, "jane@acme.io", Some("spring"), "upsert_lead");

        assert!(!store.is_processed(&key).await.processed);

        store.store_result(&key, &json!({"crm_record_id": "00Q1"})).await;
        let check = store.is_processed(&key).await;
        assert!(check.processed);
        assert_eq!(check.result.unwrap()["crm_record_id"], json!("00Q1"));
        assert!(check.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_stable_key_is_case_insensitive() {
        let store = IdempotencyStore::new(Arc::new(MemoryBackend::new()));
        let a = store.action_key(KeyMode::Stable, "Jane@Acme.IO", Some("Spring"), "upsert_lead");
        let b = store.action_key(KeyMode::Stable, "jane@acme.io", Some("spring"), "UPSERT_LEAD");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_windowed_and_stable_keys_differ() {
        let store = IdempotencyStore::new(Arc::new(MemoryBackend::new()));
        let stable = store.action_key(KeyMode::Stable, "a@b.c", None, "set_lead_score");
        let windowed = store.action_key(KeyMode::Windowed, "a@b.c", None, "set_lead_score");
        assert_ne!(stable, windowed);
    }

    #[tokio::test]
    async fn test_fails_open_on_outage() {
        let backend = Arc::new(MemoryBackend::new());
        let store = IdempotencyStore::new(backend.clone());
        let key = store.action_key(KeyMode::Stable, "a@b.c", None, "upsert_lead");
        store.store_result(&key, &json!(1)).await;

        backend.set_unavailable(true);
        assert!(!store.is_processed(&key).await.processed);

        backend.set_unavailable(false);
        assert!(store.is_processed(&key).await.processed);
    }
}
