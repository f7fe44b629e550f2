//! Canonical default values shared across the pipeline.

pub const DEFAULT_QUEUE_NAME: &str = "lead-processing";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:leadflow.sqlite?mode=rwc";

/// Maximum delivery attempts before a job moves to the DLQ.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Base delay for exponential backoff between retries.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Lease older than this is considered stalled and returned to the queue.
pub const DEFAULT_LEASE_TIMEOUT_MS: u64 = 120_000;

/// Wall-clock cap for one job end-to-end.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 60;
/// Consumer tasks per worker process.
pub const DEFAULT_CONCURRENCY: usize = 4;
/// Grace period for in-flight jobs on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 15;

/// Rate-limit window shared by all tiers.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;
pub const PER_LEAD_LIMIT: u64 = 10;
pub const PER_ACCOUNT_LIMIT: u64 = 100;
pub const GLOBAL_LIMIT: u64 = 1_000;
/// Default per-provider CRM API bucket (env-overridable).
pub const CRM_PROVIDER_LIMIT: u64 = 1_000;

/// Circuit breaker defaults.
pub const BREAKER_CALL_TIMEOUT_SECS: u64 = 10;
pub const BREAKER_ERROR_RATE_THRESHOLD: f64 = 0.5;
pub const BREAKER_RESET_TIMEOUT_SECS: u64 = 30;
pub const BREAKER_VOLUME_THRESHOLD: usize = 10;

/// Idempotency defaults.
pub const IDEMPOTENCY_WINDOW_SECS: u64 = 3_600;
pub const IDEMPOTENCY_TTL_HOURS: u64 = 48;

pub const SHUTDOWN_MESSAGE: &str = "Worker shutting down";
