//! Service-specific client implementations
//!
//! This module contains the client for the model service used by the triage core.

pub mod gemini;
mod common;

pub use common::UserAgent;
