//! # Triage SDK
//!
//! Model service integration layer for the MCTA clinical triage agent.
//!
//! This crate provides:
//!
//! - The `ModelClient` abstraction the triage core talks to
//! - A typed Gemini `generateContent` client and wire models
//! - Error handling with transient/fatal classification
//! - Retry with exponential backoff
//! - Configuration management utilities
//!
//! ## Architecture
//!
//! - `ModelClient`: the single `generate` call the orchestrator depends on
//! - `RetryExecutor`: bounded retries for transient failures
//! - `ServiceError`: error taxonomy shared by every layer

pub mod core;
pub use core::ModelClient;

pub mod services;
pub use services::gemini;

pub mod error;
pub use error::{ErrorContext, Result, ServiceError};

pub mod resilience;
pub use resilience::{RetryConfig, RetryExecutor};

pub mod config;
pub use config::{ConfigProvider, ServiceConfig};

pub mod util;

#[cfg(test)]
mod tests;

/// Create a Gemini client configured from the environment
pub fn gemini_client() -> Result<services::gemini::GeminiClient> {
    let config = config::GeminiConfig::from_provider(&**config::DEFAULT_PROVIDER)?;
    services::gemini::GeminiClient::new_with_config(config)
}
