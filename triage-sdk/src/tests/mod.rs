//! Unit tests for the Triage SDK
//!
//! This module contains tests for various components of the SDK.

pub mod gemini_mock_tests;
