//! Per-operation circuit breakers.
//!
//! One breaker per `executor:operation` key. Breakers are per-process on
//! purpose: an open breaker isolates the blast radius of one worker's recent
//! failures without coordinating a fleet-wide decision. Client-class (4xx)
//! faults are excluded from the failure window - a wrong request says nothing
//! about the CRM's health.

use crate::types::CrmError;
use leadflow_protocol::defaults::{
    BREAKER_CALL_TIMEOUT_SECS, BREAKER_ERROR_RATE_THRESHOLD, BREAKER_RESET_TIMEOUT_SECS,
    BREAKER_VOLUME_THRESHOLD,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    /// Gauge encoding: CLOSED=0, HALF_OPEN=1, OPEN=2.
    pub fn as_gauge(&self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::HalfOpen => "HALF_OPEN",
            BreakerState::Open => "OPEN",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub call_timeout: Duration,
    /// Failure ratio over the rolling window that opens the breaker.
    pub error_rate_threshold: f64,
    /// How long an open breaker waits before a half-open probe.
    pub reset_timeout: Duration,
    /// Minimum observed calls before the error rate is meaningful.
    pub volume_threshold: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(BREAKER_CALL_TIMEOUT_SECS),
            error_rate_threshold: BREAKER_ERROR_RATE_THRESHOLD,
            reset_timeout: Duration::from_secs(BREAKER_RESET_TIMEOUT_SECS),
            volume_threshold: BREAKER_VOLUME_THRESHOLD,
        }
    }
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    /// Rolling outcome window: `true` = failure. Client faults never enter.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            window: VecDeque::new(),
            opened_at: None,
        }
    }
}

/// Registry of breakers keyed by operation name.
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Current state of one operation's breaker.
    pub fn state_of(&self, operation: &str) -> BreakerState {
        let breakers = self.breakers.lock().expect("breaker lock poisoned");
        breakers
            .get(operation)
            .map(|b| b.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Admission check; flips OPEN to HALF_OPEN when the reset timeout has
    /// elapsed. Returns an error when the call must not proceed.
    fn admit(&self, operation: &str) -> Result<(), CrmError> {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let breaker = breakers
            .entry(operation.to_string())
            .or_insert_with(Breaker::new);

        match breaker.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = breaker
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    breaker.state = BreakerState::HalfOpen;
                    info!(operation, "Circuit breaker half-open, probing");
                    Ok(())
                } else {
                    Err(CrmError::BreakerOpen {
                        operation: operation.to_string(),
                    })
                }
            }
        }
    }

    fn record(&self, operation: &str, failure: bool) {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let breaker = breakers
            .entry(operation.to_string())
            .or_insert_with(Breaker::new);

        match breaker.state {
            BreakerState::HalfOpen => {
                if failure {
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(Instant::now());
                    warn!(operation, "Circuit breaker re-opened after failed probe");
                } else {
                    breaker.state = BreakerState::Closed;
                    breaker.window.clear();
                    breaker.opened_at = None;
                    info!(operation, "Circuit breaker closed after successful probe");
                }
            }
            BreakerState::Closed => {
                breaker.window.push_back(failure);
                while breaker.window.len() > self.config.volume_threshold {
                    breaker.window.pop_front();
                }
                if breaker.window.len() >= self.config.volume_threshold {
                    let failures = breaker.window.iter().filter(|f| **f).count();
                    let rate = failures as f64 / breaker.window.len() as f64;
                    if rate >= self.config.error_rate_threshold {
                        breaker.state = BreakerState::Open;
                        breaker.opened_at = Some(Instant::now());
                        warn!(
                            operation,
                            failures,
                            window = breaker.window.len(),
                            "Circuit breaker opened"
                        );
                    }
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Run one executor call under the breaker and the call timeout.
    pub async fn call<T, F>(&self, operation: &str, fut: F) -> Result<T, CrmError>
    where
        F: Future<Output = Result<T, CrmError>>,
    {
        self.admit(operation)?;

        let outcome = match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CrmError::Timeout(self.config.call_timeout)),
        };

        match &outcome {
            Ok(_) => self.record(operation, false),
            // 4xx is not a reliability signal; leave the window untouched.
            Err(err) if err.is_client() => {}
            Err(_) => self.record(operation, true),
        }
        outcome
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config(volume: usize) -> BreakerConfig {
        BreakerConfig {
            call_timeout: Duration::from_millis(50),
            error_rate_threshold: 0.5,
            reset_timeout: Duration::from_millis(20),
            volume_threshold: volume,
        }
    }

    fn server_err() -> CrmError {
        CrmError::Server {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[tokio::test]
    async fn test_opens_after_failure_volume() {
        let registry = CircuitBreakerRegistry::new(fast_config(3));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _ = registry
                .call("mock:upsert_lead", async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(server_err())
                })
                .await;
        }
        assert_eq!(registry.state_of("mock:upsert_lead"), BreakerState::Open);

        // Next call short-circuits without invoking the future.
        let err = registry
            .call("mock:upsert_lead", async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), _>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CrmError::BreakerOpen { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_open() {
        let registry = CircuitBreakerRegistry::new(fast_config(2));
        for _ in 0..10 {
            let _ = registry
                .call("mock:create_task", async {
                    Err::<(), _>(CrmError::Client {
                        status: 400,
                        message: "bad field".to_string(),
                    })
                })
                .await;
        }
        assert_eq!(registry.state_of("mock:create_task"), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let registry = CircuitBreakerRegistry::new(fast_config(2));
        for _ in 0..2 {
            let _ = registry
                .call("mock:add_note", async { Err::<(), _>(server_err()) })
                .await;
        }
        assert_eq!(registry.state_of("mock:add_note"), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let result = registry.call("mock:add_note", async { Ok::<_, CrmError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(registry.state_of("mock:add_note"), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_reopens_on_failure() {
        let registry = CircuitBreakerRegistry::new(fast_config(2));
        for _ in 0..2 {
            let _ = registry
                .call("mock:log_activity", async { Err::<(), _>(server_err()) })
                .await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = registry
            .call("mock:log_activity", async { Err::<(), _>(server_err()) })
            .await;
        assert_eq!(registry.state_of("mock:log_activity"), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let registry = CircuitBreakerRegistry::new(fast_config(2));
        for _ in 0..2 {
            let err = registry
                .call("mock:slow", async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<(), _>(())
                })
                .await
                .unwrap_err();
            assert!(matches!(err, CrmError::Timeout(_)));
        }
        assert_eq!(registry.state_of("mock:slow"), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_mixed_outcomes_below_threshold_stay_closed() {
        let registry = CircuitBreakerRegistry::new(fast_config(4));
        for i in 0..8 {
            let _ = registry
                .call("mock:mixed", async move {
                    if i % 4 == 0 {
                        Err::<(), _>(server_err())
                    } else {
                        Ok(())
                    }
                })
                .await;
        }
        assert_eq!(registry.state_of("mock:mixed"), BreakerState::Closed);
    }
}
