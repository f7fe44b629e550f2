//! Idempotency key derivations.
//!
//! Two families of keys: the lead ingest key (stable identity of one
//! `(email, campaign)` pair) and the action keys used by the MCP to collapse
//! duplicate CRM effects. All keys are SHA-256 hex.

use sha2::{Digest, Sha256};

const SEP: &str = "::";

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(SEP.as_bytes());
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Ingest identity of a lead: `SHA256(lower(trim(email)) ":" lower(trim(campaign)))`.
///
/// A second ingest of the same pair must land on the same row.
pub fn lead_key(email: &str, campaign_id: &str) -> String {
    let email = email.trim().to_lowercase();
    let campaign = campaign_id.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(b":");
    hasher.update(campaign.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable action key: identity is intrinsic (upserts), no time term.
pub fn stable_action_key(email: &str, campaign_id: Option<&str>, action: &str) -> String {
    let email = email.trim().to_lowercase();
    let campaign = campaign_id.unwrap_or("none").trim().to_lowercase();
    let action = action.to_lowercase();
    hash_parts(&[&email, &campaign, &action])
}

/// Windowed action key: retries inside the window collapse to one effect.
///
/// `now_secs` is epoch seconds; the window index is `floor(now / window)`.
pub fn windowed_action_key(
    email: &str,
    campaign_id: Option<&str>,
    action: &str,
    now_secs: i64,
    window_secs: u64,
) -> String {
    let email = email.trim().to_lowercase();
    let campaign = campaign_id.unwrap_or("none").trim().to_lowercase();
    let action = action.to_lowercase();
    let window = (now_secs / window_secs.max(1) as i64).to_string();
    hash_parts(&[&email, &campaign, &action, &window])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_key_normalises() {
        assert_eq!(
            lead_key("Jane@Acme.IO ", "Spring-Launch"),
            lead_key("jane@acme.io", "spring-launch")
        );
    }

    #[test]
    fn test_lead_key_distinguishes_campaigns() {
        assert_ne!(lead_key("a@b.c", "one"), lead_key("a@b.c", "two"));
    }

    #[test]
    fn test_stable_key_ignores_time() {
        let a = stable_action_key("a@b.c", Some("camp"), "upsert_lead");
        let b = stable_action_key("A@B.C", Some("CAMP"), "UPSERT_LEAD");
        assert_eq!(a, b);
    }

    #[test]
    fn test_windowed_key_changes_across_windows() {
        let window = 3_600;
        let a = windowed_action_key("a@b.c", None, "set_lead_score", 0, window);
        let b = windowed_action_key("a@b.c", None, "set_lead_score", 10, window);
        let c = windowed_action_key("a@b.c", None, "set_lead_score", 3_600, window);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_missing_campaign_uses_none_sentinel() {
        assert_eq!(
            stable_action_key("a@b.c", None, "x"),
            stable_action_key("a@b.c", Some("none"), "x")
        );
    }
}
