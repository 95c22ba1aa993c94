//! Bounded retry with a penalty fallback.

use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use sc_types::{CalResult, RetryConfig};

/// Fitness substituted when a particle's evaluation cannot complete. Large
/// enough that the optimizer steers away from the region, finite so the
/// swarm mathematics stay well-defined.
pub const PENALTY_FITNESS: f64 = 1e10;

/// What the retry boundary produced for one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryOutcome {
    Succeeded { value: f64, attempts: u32 },
    Exhausted { penalty: f64, attempts: u32 },
}

impl RetryOutcome {
    /// The fitness value to record, penalty or not.
    pub fn value(&self) -> f64 {
        match *self {
            Self::Succeeded { value, .. } => value,
            Self::Exhausted { penalty, .. } => penalty,
        }
    }

    pub fn is_penalty(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Bounded-retry combinator around per-particle evaluation.
///
/// Runs the wrapped operation up to `max_attempts` times with a fixed
/// delay in between; on exhaustion it substitutes the penalty sentinel
/// instead of propagating the error, so one particle's failure can never
/// leak into another's result.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    penalty: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            penalty: PENALTY_FITNESS,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_secs(config.delay_secs))
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty;
        self
    }

    /// Run one particle's evaluation under the policy. Non-finite scores
    /// count as failures; the returned value is always finite.
    pub async fn run<F>(&self, label: &str, mut op: F) -> RetryOutcome
    where
        F: FnMut() -> CalResult<f64>,
    {
        for attempt in 1..=self.max_attempts {
            match op() {
                Ok(value) if value.is_finite() => {
                    return RetryOutcome::Succeeded { value, attempts: attempt };
                }
                Ok(value) => {
                    warn!(
                        target = label,
                        attempt,
                        value,
                        "non-finite score treated as a failed attempt"
                    );
                }
                Err(e) => {
                    warn!(
                        target = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "evaluation attempt failed"
                    );
                }
            }

            if attempt < self.max_attempts {
                sleep(self.delay).await;
            }
        }

        warn!(
            target = label,
            penalty = self.penalty,
            "evaluation attempts exhausted, substituting penalty"
        );
        RetryOutcome::Exhausted {
            penalty: self.penalty,
            attempts: self.max_attempts,
        }
    }
}
