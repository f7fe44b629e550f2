//! Tiered fixed-window rate limiter over the coordination store.
//!
//! Three independent buckets (per-lead, per-account, global) gate each MCP
//! invocation; a separate per-provider bucket is consumed once per executor
//! call. Counters are `incr(key:⌊now/window⌋); expire(window)` in the shared
//! store so every worker process sees the same windows. On store outage the
//! limiter fails open: a stalled Redis must not halt the pipeline.

use chrono::Utc;
use leadflow_protocol::defaults::{
    CRM_PROVIDER_LIMIT, GLOBAL_LIMIT, PER_ACCOUNT_LIMIT, PER_LEAD_LIMIT, RATE_LIMIT_WINDOW_SECS,
};
use leadflow_state_store::KvBackend;
use std::sync::Arc;
use tracing::warn;

/// Which bucket a decision or violation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    Lead,
    Account,
    Global,
    CrmProvider,
}

impl RateLimitTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitTier::Lead => "lead",
            RateLimitTier::Account => "account",
            RateLimitTier::Global => "global",
            RateLimitTier::CrmProvider => "crm_provider",
        }
    }

    fn violation_message(&self) -> &'static str {
        match self {
            RateLimitTier::Lead => "Per-lead rate limit exceeded",
            RateLimitTier::Account => "Per-account rate limit exceeded",
            RateLimitTier::Global => "Global rate limit exceeded",
            RateLimitTier::CrmProvider => "CRM provider rate limit exceeded",
        }
    }
}

/// Limits per tier; the window is shared.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub lead_limit: u64,
    pub account_limit: u64,
    pub global_limit: u64,
    pub crm_provider_limit: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: RATE_LIMIT_WINDOW_SECS,
            lead_limit: PER_LEAD_LIMIT,
            account_limit: PER_ACCOUNT_LIMIT,
            global_limit: GLOBAL_LIMIT,
            crm_provider_limit: CRM_PROVIDER_LIMIT,
        }
    }
}

/// State of one tier after a check.
#[derive(Debug, Clone)]
pub struct TierStatus {
    pub tier: RateLimitTier,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds when the current window resets.
    pub reset_at: i64,
    pub window_secs: u64,
    /// False when the store was unreachable and the tier failed open.
    pub checked: bool,
    /// The window counter passed the limit (`count > limit`).
    pub exceeded: bool,
}

/// Aggregate decision across the checked tiers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub violations: Vec<(RateLimitTier, String)>,
    pub tiers: Vec<TierStatus>,
}

impl RateLimitDecision {
    /// Seconds until the earliest violated window resets.
    pub fn retry_after_secs(&self) -> Option<u64> {
        let now = Utc::now().timestamp();
        self.tiers
            .iter()
            .filter(|t| self.violations.iter().any(|(tier, _)| *tier == t.tier))
            .map(|t| (t.reset_at - now).max(1) as u64)
            .min()
    }
}

/// Fixed-window limiter handle.
#[derive(Clone)]
pub struct TieredRateLimiter {
    store: Arc<dyn KvBackend>,
    config: RateLimitConfig,
}

impl TieredRateLimiter {
    pub fn new(store: Arc<dyn KvBackend>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn window_index(&self, now_secs: i64) -> i64 {
        now_secs / self.config.window_secs.max(1) as i64
    }

    fn reset_at(&self, now_secs: i64) -> i64 {
        (self.window_index(now_secs) + 1) * self.config.window_secs as i64
    }

    async fn check_tier(&self, tier: RateLimitTier, id: &str, limit: u64) -> TierStatus {
        let now = Utc::now().timestamp();
        let key = format!("ratelimit:{}:{}:{}", tier.as_str(), id, self.window_index(now));

        let count = match self.store.incr(&key).await {
            Ok(count) => {
                // Best effort; a missed expire only leaves a dead counter.
                if let Err(err) = self.store.expire(&key, self.config.window_secs).await {
                    warn!(error = %err, "Failed to set rate-limit key TTL");
                }
                count as u64
            }
            Err(err) => {
                warn!(tier = tier.as_str(), error = %err, "Rate limiter store outage, failing open");
                return TierStatus {
                    tier,
                    limit,
                    remaining: limit,
                    reset_at: self.reset_at(now),
                    window_secs: self.config.window_secs,
                    checked: false,
                    exceeded: false,
                };
            }
        };

        TierStatus {
            tier,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: self.reset_at(now),
            window_secs: self.config.window_secs,
            checked: true,
            exceeded: count > limit,
        }
    }

    /// Check the lead/account/global tiers for one MCP invocation.
    ///
    /// `account` is the lead's email domain when available.
    pub async fn check(&self, lead_id: i64, account: Option<&str>) -> RateLimitDecision {
        let mut tiers = Vec::with_capacity(3);

        tiers.push(
            self.check_tier(
                RateLimitTier::Lead,
                &lead_id.to_string(),
                self.config.lead_limit,
            )
            .await,
        );
        if let Some(domain) = account {
            tiers.push(
                self.check_tier(
                    RateLimitTier::Account,
                    &domain.to_lowercase(),
                    self.config.account_limit,
                )
                .await,
            );
        }
        tiers.push(
            self.check_tier(RateLimitTier::Global, "all", self.config.global_limit)
                .await,
        );

        let violations: Vec<(RateLimitTier, String)> = tiers
            .iter()
            .filter(|t| t.checked && t.exceeded)
            .map(|t| (t.tier, t.tier.violation_message().to_string()))
            .collect();

        RateLimitDecision {
            allowed: violations.is_empty(),
            violations,
            tiers,
        }
    }

    /// Consume one token from the per-provider CRM bucket.
    pub async fn check_crm_provider(&self, provider: &str) -> RateLimitDecision {
        let status = self
            .check_tier(
                RateLimitTier::CrmProvider,
                &provider.to_lowercase(),
                self.config.crm_provider_limit,
            )
            .await;
        let violations = if status.checked && status.exceeded {
            vec![(
                RateLimitTier::CrmProvider,
                RateLimitTier::CrmProvider.violation_message().to_string(),
            )]
        } else {
            vec![]
        };
        RateLimitDecision {
            allowed: violations.is_empty(),
            violations,
            tiers: vec![status],
        }
    }
}
