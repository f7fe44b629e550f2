//! Environment configuration for the Leadflow binary.
//!
//! Development reads plain environment variables; production deployments
//! inject secrets the same way through their secrets provider.

use anyhow::{bail, Context, Result};
use leadflow_mcp::RateLimitConfig;
use leadflow_protocol::defaults::{
    DEFAULT_CONCURRENCY, DEFAULT_DATABASE_URL, DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_QUEUE_NAME,
    DEFAULT_REDIS_URL,
};

/// Which executor backs the MCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrmProvider {
    Mock,
    Salesforce,
}

impl CrmProvider {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_uppercase().as_str() {
            "MOCK" => Ok(CrmProvider::Mock),
            "SALESFORCE" => Ok(CrmProvider::Salesforce),
            other => bail!("Unknown CRM_PROVIDER '{other}'. Valid providers: MOCK, SALESFORCE"),
        }
    }
}

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub crm_provider: CrmProvider,
    pub redis_url: String,
    pub database_url: String,
    pub queue_name: String,
    pub concurrency: usize,
    pub job_timeout_secs: u64,
    pub rate_limits: RateLimitConfig,
    /// Present only when the Salesforce executor is selected.
    pub salesforce_base_url: Option<String>,
    pub salesforce_access_token: Option<String>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let crm_provider = CrmProvider::parse(&env_or("CRM_PROVIDER", "MOCK"))?;

        let mut rate_limits = RateLimitConfig::default();
        if let Ok(raw) = std::env::var("CRM_RATE_LIMIT_REQUESTS") {
            rate_limits.crm_provider_limit = raw
                .parse()
                .context("CRM_RATE_LIMIT_REQUESTS must be an integer")?;
        }
        if let Ok(raw) = std::env::var("CRM_RATE_LIMIT_WINDOW_SECONDS") {
            rate_limits.window_secs = raw
                .parse()
                .context("CRM_RATE_LIMIT_WINDOW_SECONDS must be an integer")?;
        }

        let concurrency = match std::env::var("LEADFLOW_CONCURRENCY") {
            Ok(raw) => raw.parse().context("LEADFLOW_CONCURRENCY must be an integer")?,
            Err(_) => DEFAULT_CONCURRENCY,
        };

        let salesforce_base_url = std::env::var("SALESFORCE_BASE_URL").ok();
        let salesforce_access_token = std::env::var("SALESFORCE_ACCESS_TOKEN").ok();
        if crm_provider == CrmProvider::Salesforce
            && (salesforce_base_url.is_none() || salesforce_access_token.is_none())
        {
            bail!("CRM_PROVIDER=SALESFORCE requires SALESFORCE_BASE_URL and SALESFORCE_ACCESS_TOKEN");
        }

        Ok(Self {
            crm_provider,
            redis_url: env_or("REDIS_URL", DEFAULT_REDIS_URL),
            database_url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            queue_name: env_or("LEADFLOW_QUEUE", DEFAULT_QUEUE_NAME),
            concurrency,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            rate_limits,
            salesforce_base_url,
            salesforce_access_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!(CrmProvider::parse("mock").unwrap(), CrmProvider::Mock);
        assert_eq!(
            CrmProvider::parse("Salesforce").unwrap(),
            CrmProvider::Salesforce
        );
        let err = CrmProvider::parse("HUBSPOT").unwrap_err().to_string();
        assert!(err.contains("Valid providers"));
    }
}
