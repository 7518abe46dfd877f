//! Resilience patterns for model calls
//!
//! Model calls are wrapped in a bounded retry loop with exponential backoff
//! and jitter. Only transient failures (rate limits, quota, server errors)
//! are retried; see [`crate::error::ServiceError::is_transient`].

mod retry;

pub use retry::{RetryConfig, RetryExecutor, RetryNotice};
