use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{error, info};

use crate::core::network_health::ConnectivityStatus;
use crate::events::{DomainEvent, EventBus};

/// When a failed call may be attempted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry on the next scheduled poll tick.
    NextTick,
    /// Hold off `base * 2^(failures - 1)`, capped at `max`, after a failure.
    Exponential { base: Duration, max: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::NextTick
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, failures: u32) -> Duration {
        match *self {
            RetryPolicy::NextTick => Duration::ZERO,
            RetryPolicy::Exponential { base, max } => {
                if failures == 0 {
                    return Duration::ZERO;
                }
                let shift = (failures - 1).min(16);
                base.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticContext {
    pub operation: String,
    pub attempt: u32,
    pub network: ConnectivityStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckFailure {
    pub error_message: String,
    pub diagnostic_context: DiagnosticContext,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub last_error: Option<CheckFailure>,
    pub next_attempt_at: Option<Instant>,
}

#[derive(Debug)]
pub enum Attempt<T> {
    Succeeded(T),
    Failed(CheckFailure),
    /// Backoff still running; the call was not made.
    Deferred,
}

/// Wraps the remote evaluate-all call. Failures are surfaced on the bus and
/// left for a later tick; there is no immediate retry loop.
pub struct RetryController {
    bus: EventBus,
    policy: RetryPolicy,
    state: RwLock<RetryState>,
}

impl RetryController {
    pub fn new(bus: EventBus, policy: RetryPolicy) -> Self {
        Self {
            bus,
            policy,
            state: RwLock::new(RetryState::default()),
        }
    }

    pub async fn state(&self) -> RetryState {
        self.state.read().await.clone()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.read().await.consecutive_failures
    }

    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        network: ConnectivityStatus,
        call: F,
    ) -> Attempt<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(at) = self.state.read().await.next_attempt_at {
            if Instant::now() < at {
                return Attempt::Deferred;
            }
        }

        match call().await {
            Ok(value) => {
                let mut state = self.state.write().await;
                if state.consecutive_failures > 0 {
                    info!(
                        "{} recovered after {} failed attempt(s)",
                        operation, state.consecutive_failures
                    );
                }
                *state = RetryState::default();
                Attempt::Succeeded(value)
            }
            Err(e) => {
                let mut state = self.state.write().await;
                state.consecutive_failures += 1;
                let failure = CheckFailure {
                    error_message: format!("{:#}", e),
                    diagnostic_context: DiagnosticContext {
                        operation: operation.to_string(),
                        attempt: state.consecutive_failures,
                        network,
                        occurred_at: Utc::now(),
                    },
                };
                let delay = self.policy.delay_after(state.consecutive_failures);
                state.next_attempt_at = (!delay.is_zero()).then(|| Instant::now() + delay);
                state.last_error = Some(failure.clone());
                drop(state);

                error!(
                    "{} failed (attempt {}, network {}): {}",
                    operation,
                    failure.diagnostic_context.attempt,
                    network,
                    failure.error_message
                );
                self.bus.publish(DomainEvent::CheckFailed {
                    error: failure.error_message.clone(),
                });
                Attempt::Failed(failure)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn controller(policy: RetryPolicy) -> (RetryController, tokio::sync::broadcast::Receiver<DomainEvent>) {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        (RetryController::new(bus, policy), rx)
    }

    async fn fail(c: &RetryController) -> Attempt<()> {
        c.execute("check", ConnectivityStatus::Limited, || async {
            Err(anyhow!("connection reset"))
        })
        .await
    }

    async fn succeed(c: &RetryController) -> Attempt<u32> {
        c.execute("check", ConnectivityStatus::Online, || async { Ok(7) })
            .await
    }

    #[tokio::test]
    async fn failure_is_surfaced() {
        let (c, mut rx) = controller(RetryPolicy::NextTick);
        let attempt = fail(&c).await;
        let Attempt::Failed(failure) = attempt else {
            panic!("expected failure");
        };
        assert_eq!(failure.error_message, "connection reset");
        assert_eq!(failure.diagnostic_context.attempt, 1);
        assert_eq!(failure.diagnostic_context.network, ConnectivityStatus::Limited);
        assert_eq!(
            rx.recv().await.unwrap(),
            DomainEvent::CheckFailed {
                error: "connection reset".to_string()
            }
        );
        assert_eq!(c.state().await.last_error, Some(failure));
    }

    #[tokio::test]
    async fn success_resets_after_failures() {
        let (c, _rx) = controller(RetryPolicy::NextTick);
        for _ in 0..4 {
            fail(&c).await;
        }
        assert_eq!(c.consecutive_failures().await, 4);

        assert!(matches!(succeed(&c).await, Attempt::Succeeded(7)));
        let state = c.state().await;
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn next_tick_policy_never_defers() {
        let (c, _rx) = controller(RetryPolicy::NextTick);
        fail(&c).await;
        assert!(matches!(fail(&c).await, Attempt::Failed(_)));
        assert_eq!(c.consecutive_failures().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exponential_policy_defers() {
        let (c, _rx) = controller(RetryPolicy::Exponential {
            base: Duration::from_secs(10),
            max: Duration::from_secs(60),
        });
        fail(&c).await;
        assert!(matches!(succeed(&c).await, Attempt::Deferred));
        // Deferred attempts are not failures
        assert_eq!(c.consecutive_failures().await, 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(succeed(&c).await, Attempt::Succeeded(_)));
    }

    #[test]
    fn exponential_delay_caps() {
        let policy = RetryPolicy::Exponential {
            base: Duration::from_secs(5),
            max: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_after(0), Duration::ZERO);
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(3), Duration::from_secs(20));
        assert_eq!(policy.delay_after(10), Duration::from_secs(60));
        assert_eq!(RetryPolicy::NextTick.delay_after(5), Duration::ZERO);
    }
}
