//! Bounded retry on optimistic-concurrency conflicts.
//!
//! Each retry scope re-runs a full read-modify-write closure, so every
//! attempt starts from a fresh read. Only `ClusterError::Conflict` is
//! retried; every other error returns on the spot.

use std::future::Future;
use std::time::Duration;

use berth_core::config::RetryConfig;
use tracing::warn;

use crate::cluster::ClusterResult;
use crate::error::{OrchestratorError, OrchestratorResult, Step};

/// Attempt ceiling and backoff schedule for one retry scope.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            factor: config.factor.max(1.0),
        }
    }

    /// Delay before retry number `attempt` (1-based), capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.factor.powi(exp);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()))
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// attempt budget is spent.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    step: Step,
    mut op: F,
) -> OrchestratorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClusterResult<T>>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() => {
                if attempt == attempts {
                    break;
                }
                let delay = policy.backoff(attempt);
                warn!(%step, attempt, ?delay, error = %err, "conflict, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(source) => return Err(OrchestratorError::Step { step, source }),
        }
    }
    warn!(%step, attempts, "retry budget exhausted");
    Err(OrchestratorError::RetryExhausted { step, attempts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterError, ObjectKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> ClusterError {
        ClusterError::Conflict {
            kind: ObjectKind::Workload,
            name: "w".to_string(),
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            factor: 2.0,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(35),
            factor: 2.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(35));
        assert_eq!(policy.backoff(30), Duration::from_millis(35));
    }

    #[test]
    fn defaults_follow_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn succeeds_after_conflicts() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(&fast(), Step::UpdateWorkload, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(conflict()) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: OrchestratorResult<()> = retry_on_conflict(&fast(), Step::ResizeClaim, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::RetryExhausted { step: Step::ResizeClaim, attempts: 3 }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: OrchestratorResult<()> = retry_on_conflict(&fast(), Step::UpdateServicePort, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ClusterError::Api {
                    kind: ObjectKind::Service,
                    name: "s".to_string(),
                    message: "forbidden".to_string(),
                })
            }
        })
        .await;
        assert_eq!(result.unwrap_err().step(), Step::UpdateServicePort);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
