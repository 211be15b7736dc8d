//! Bounded retry around the destination send

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::ports::{Sleeper, TokioSleeper};

/// Retry limits for publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Failure `n` is followed by a wait of `n * base_delay`
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, failures: u32) -> Duration {
        self.base_delay * failures
    }
}

/// Runs a fallible operation with linear backoff, never failing itself
pub struct PublishRetrier {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl PublishRetrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns true on the first success, false once every attempt failed
    pub async fn run<F, Fut, E>(&self, label: &str, mut op: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match op().await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(label = %label, attempt, "Publish succeeded after retry");
                    }
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        label = %label,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Publish attempt failed"
                    );
                    if attempt < max_attempts {
                        self.sleeper.sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        tracing::error!(
            label = %label,
            attempts = max_attempts,
            "Publish abandoned after max attempts"
        );
        false
    }
}
