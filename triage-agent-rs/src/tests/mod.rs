//! Unit tests for the triage agent
//!
//! Model access is replaced by scripted `ModelClient` mocks from `support`.

pub mod session_tests;
pub mod support;
