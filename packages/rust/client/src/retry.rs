//! Retry policy as an explicit state machine.
//!
//! One pure decision function ([`next_action`]) maps an outcome class
//! and attempt number to the next action, so backoff growth and retry
//! bounds are testable without sleeping or touching the network. The
//! [`RetryClient`] drives that function in a loop, owning the only
//! piece of cross-call session state: the consecutive soft-block
//! counter.

use std::time::Duration;

use tracing::{debug, info, warn};

use curio_shared::config::RetryConfig;

use crate::outcome::{CallOutcome, CallPayload, FetchOutcome};
use crate::transport::CollectionService;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Bounds and delays for the retry loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per item (default 5).
    pub max_retries: u32,
    /// Base backoff delay, doubled each failed attempt.
    pub base_delay: Duration,
    /// Cap on the escalating soft-block penalty.
    pub rate_limit_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            rate_limit_cap: Duration::from_secs(300),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_secs_f64(config.base_delay_secs),
            rate_limit_cap: Duration::from_secs(config.rate_limit_cap_secs),
        }
    }
}

/// Exponential backoff: `base * 2^attempt` (attempt is 0-based, so the
/// k-th retry waits `base * 2^(k-1)`).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt)
}

/// Escalating penalty for soft blocks without a service-provided
/// interval: `min(60s * consecutive_count, cap)`.
pub fn soft_block_penalty(consecutive_count: u32, cap: Duration) -> Duration {
    (Duration::from_secs(60) * consecutive_count).min(cap)
}

// ---------------------------------------------------------------------------
// Decision function
// ---------------------------------------------------------------------------

/// Next step after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Return the fetched value.
    Succeed,
    /// Terminal absence: return immediately, no sleep, no retry.
    ReturnNotFound,
    /// Sleep for the given duration, then retry the same item.
    SleepAndRetry(Duration),
    /// Attempts are exhausted; record the failure and move on.
    Exhaust,
}

/// Decide what follows the outcome of attempt `attempt` (0-based).
///
/// `consecutive_soft_blocks` is the session-wide count of soft-block
/// signals *including* the current one, when the outcome is a soft
/// block.
pub fn next_action(
    outcome: &CallOutcome,
    attempt: u32,
    consecutive_soft_blocks: u32,
    policy: &RetryPolicy,
) -> Action {
    let last_attempt = attempt + 1 >= policy.max_retries;

    match outcome {
        CallOutcome::Ok(_) => Action::Succeed,
        CallOutcome::NotFound => Action::ReturnNotFound,
        CallOutcome::RateLimited { retry_after } => {
            if last_attempt {
                return Action::Exhaust;
            }
            // A rate-limit signal sleeps its own interval, never the
            // generic backoff.
            match retry_after {
                Some(interval) => Action::SleepAndRetry(*interval),
                None => Action::SleepAndRetry(soft_block_penalty(
                    consecutive_soft_blocks,
                    policy.rate_limit_cap,
                )),
            }
        }
        CallOutcome::Transient(_) => {
            if last_attempt {
                Action::Exhaust
            } else {
                Action::SleepAndRetry(backoff_delay(policy.base_delay, attempt))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RetryClient
// ---------------------------------------------------------------------------

/// Wraps a [`CollectionService`] with the retry state machine.
///
/// Holds no persisted state; the consecutive soft-block counter lives
/// for the session and resets to zero on any successful call.
#[derive(Debug)]
pub struct RetryClient<S> {
    service: S,
    policy: RetryPolicy,
    consecutive_soft_blocks: u32,
}

impl<S: CollectionService> RetryClient<S> {
    pub fn new(service: S, policy: RetryPolicy) -> Self {
        Self {
            service,
            policy,
            consecutive_soft_blocks: 0,
        }
    }

    /// Session-wide count of soft-block signals since the last success.
    pub fn consecutive_soft_blocks(&self) -> u32 {
        self.consecutive_soft_blocks
    }

    /// Perform the external call with retries and backoff.
    ///
    /// The identifier is used only for logging/correlation. All
    /// transport and parse errors are folded into the returned
    /// [`FetchOutcome`]; this function never fails past its boundary.
    pub async fn fetch_or_compute(
        &mut self,
        identifier: &str,
        payload: &CallPayload,
    ) -> FetchOutcome {
        for attempt in 0..self.policy.max_retries {
            debug!(
                identifier,
                attempt = attempt + 1,
                max = self.policy.max_retries,
                "calling external service"
            );

            let outcome = self.service.call(payload).await;

            // Session counter bookkeeping before the decision: the
            // penalty for the N-th consecutive soft block is min(60*N, cap).
            match &outcome {
                CallOutcome::Ok(_) => self.consecutive_soft_blocks = 0,
                CallOutcome::RateLimited { retry_after: None } => {
                    self.consecutive_soft_blocks += 1;
                }
                _ => {}
            }

            match next_action(&outcome, attempt, self.consecutive_soft_blocks, &self.policy) {
                Action::Succeed => {
                    info!(identifier, attempt = attempt + 1, "fetched");
                    if let CallOutcome::Ok(value) = outcome {
                        return FetchOutcome::Fetched(value);
                    }
                    unreachable!("Succeed only follows CallOutcome::Ok");
                }
                Action::ReturnNotFound => {
                    info!(identifier, "not found upstream, skipping permanently");
                    return FetchOutcome::NotFound;
                }
                Action::SleepAndRetry(delay) => {
                    warn!(
                        identifier,
                        attempt = attempt + 1,
                        class = outcome.class(),
                        cause = %describe(&outcome),
                        wait_secs = delay.as_secs_f64(),
                        "attempt failed, waiting before retry"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Action::Exhaust => {
                    warn!(
                        identifier,
                        attempt = attempt + 1,
                        class = outcome.class(),
                        cause = %describe(&outcome),
                        "final attempt failed"
                    );
                    break;
                }
            }
        }

        warn!(
            identifier,
            max = self.policy.max_retries,
            "exhausted retries"
        );
        FetchOutcome::Exhausted
    }
}

/// Human-readable cause for log lines.
fn describe(outcome: &CallOutcome) -> String {
    match outcome {
        CallOutcome::Ok(_) => "ok".into(),
        CallOutcome::RateLimited {
            retry_after: Some(d),
        } => format!("rate limited, cool-down {}s", d.as_secs()),
        CallOutcome::RateLimited { retry_after: None } => "soft block (no interval)".into(),
        CallOutcome::NotFound => "not found".into(),
        CallOutcome::Transient(cause) => cause.clone(),
    }
}
