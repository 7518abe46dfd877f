//! Retry with exponential backoff for transient errors
//!
//! This module provides a retry mechanism with configurable exponential backoff
//! and jitter for handling rate limits and server errors from the model API.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use rand::Rng;

use crate::error::{Result, ServiceError};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial backoff duration
    pub initial_interval: Duration,

    /// Maximum backoff duration
    pub max_interval: Duration,

    /// Multiplier for backoff between retries
    pub multiplier: f64,

    /// Randomization applied to each backoff interval
    pub randomization_factor: f64,

    /// Extra random delay added on top of each interval
    pub max_jitter: Duration,

    /// Maximum total time to spend retrying
    pub max_elapsed_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            randomization_factor: 0.5,
            max_jitter: Duration::from_millis(200),
            max_elapsed_time: None,
        }
    }
}

impl fmt::Display for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryConfig {{ max_attempts: {}, initial_interval: {:?}, max_interval: {:?}, multiplier: {}, randomization_factor: {}, max_jitter: {:?}, max_elapsed_time: {:?} }}",
            self.max_attempts,
            self.initial_interval,
            self.max_interval,
            self.multiplier,
            self.randomization_factor,
            self.max_jitter,
            self.max_elapsed_time
        )
    }
}

/// Details of a scheduled retry, handed to retry observers
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// The attempt that just failed (1-based)
    pub attempt: u32,

    /// Delay before the next attempt
    pub delay: Duration,

    /// Description of the failure
    pub error: String,
}

/// Executor for retry operations with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    /// Retry configuration
    config: RetryConfig,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryExecutor {
    /// Create a new retry executor with the specified configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_interval)
            .with_max_interval(self.config.max_interval)
            .with_multiplier(self.config.multiplier)
            .with_randomization_factor(self.config.randomization_factor)
            .with_max_elapsed_time(self.config.max_elapsed_time)
            .build()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Execute a fallible operation with retries according to the configuration
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_notify(operation, |_| {}).await
    }

    /// Execute a fallible operation with retries, reporting every scheduled
    /// retry to `on_retry` before sleeping.
    ///
    /// Only transient errors are retried. The final error carries the number
    /// of attempts made as context.
    pub async fn execute_with_notify<F, Fut, T, N>(&self, mut operation: F, mut on_retry: N) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        N: FnMut(&RetryNotice),
    {
        let mut backoff = self.create_backoff();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.should_retry(&err) {
                return Err(if attempt > 1 {
                    err.with_context_value("attempts", attempt)
                } else {
                    err
                });
            }

            if attempt >= max_attempts {
                log::error!("Giving up after {} attempts: {}", attempt, err);
                return Err(err.with_context_value("attempts", attempt));
            }

            let Some(interval) = backoff.next_backoff() else {
                log::error!("Exceeded maximum backoff time: {}", err);
                return Err(err.with_context_value("attempts", attempt));
            };

            let delay = interval + self.jitter();
            log::warn!(
                "Operation failed with transient error, retrying in {:?} (attempt {}/{}): {}",
                delay,
                attempt,
                max_attempts,
                err
            );

            on_retry(&RetryNotice {
                attempt,
                delay,
                error: err.describe(),
            });

            tokio::time::sleep(delay).await;
        }
    }

    /// Determine if an error should be retried
    fn should_retry(&self, error: &ServiceError) -> bool {
        error.is_transient()
    }

    /// Get the current retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
