//! Retry policy for metering-service calls
//!
//! Metering reads back lag behind writes while the service aggregates, so
//! the default policy is a short fixed delay rather than exponential growth.
//! Exponential backoff and jitter remain available for callers that want them.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::MeteringError;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    /// Maximum jitter percentage (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.0,
            use_jitter: false,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy with a fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay.max(Duration::from_millis(1)),
            ..Self::default()
        }
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub const fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub const fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    pub const fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay to wait after the given zero-based attempt failed.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);

        let delay = Duration::from_millis(base_delay as u64).min(self.max_delay);

        if self.use_jitter {
            self.add_jitter(delay)
        } else {
            delay
        }
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_range = delay.as_millis() as f64 * self.jitter_factor;
        if jitter_range <= 0.0 {
            return delay;
        }
        let jitter = rng.gen_range(-jitter_range..=jitter_range);

        let new_delay = delay.as_millis() as f64 + jitter;
        Duration::from_millis(new_delay.max(0.0) as u64)
    }
}

/// Outcome of one polling attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Ready(T),
    /// The remote has nothing yet; try again after the delay.
    NotYet,
}

/// Retry executor that handles the actual retry logic
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an operation, retrying retryable errors.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, MeteringError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MeteringError>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    tracing::debug!(attempt = attempt + 1, error = %error, "Metering call failed");
                    last_error = Some(error);

                    if attempt + 1 < attempts {
                        sleep(self.policy.calculate_delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MeteringError::Internal("Retry executor failed without error".to_string())
        }))
    }

    /// Poll an eventually-consistent resource.
    ///
    /// `NotYet` and retryable errors both consume an attempt. Returns
    /// `Ok(None)` when every attempt reported `NotYet`.
    pub async fn poll<F, Fut, T>(&self, mut operation: F) -> Result<Option<T>, MeteringError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, MeteringError>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match operation().await {
                Ok(Attempt::Ready(value)) => return Ok(Some(value)),
                Ok(Attempt::NotYet) => {
                    tracing::debug!(attempt = attempt + 1, "No data yet, waiting for aggregation");
                    last_error = None;
                }
                Err(error) if error.is_retryable() => {
                    tracing::debug!(attempt = attempt + 1, error = %error, "Lookup failed");
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }

            if attempt + 1 < attempts {
                sleep(self.policy.calculate_delay(attempt)).await;
            }
        }

        match last_error {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}
