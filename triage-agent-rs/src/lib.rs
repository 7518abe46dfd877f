//! # MCTA Triage Agent
//!
//! The clinical triage core: drives a multi-turn conversation with a hosted
//! model, executes the tools it requests, and always ends with a structured
//! diagnostic report or an explicit failure.
//!
//! ## Pipeline
//!
//! - `intake`: routes uploaded images and extracts labs/vitals from them
//! - `clinical`: deterministic lab and vitals summaries
//! - `content`: assembles the first user turn
//! - `orchestrator`: the tool-phase / JSON-phase state machine
//! - `repair`: staged extraction of a report from malformed model output
//! - `fallback`: secondary structured call that fills an incomplete report
//! - `session`: ties the above together for one triage run
//!
//! Model access goes through [`triage_sdk::ModelClient`], so every component
//! can be driven by a scripted client in tests.

pub mod chart;
pub mod clinical;
pub mod content;
pub mod fallback;
pub mod fast_path;
pub mod history;
pub mod intake;
pub mod orchestrator;
pub mod prompts;
pub mod repair;
pub mod report;
pub mod session;
pub mod tool_manager;
pub mod tools;

pub use clinical::{ClinicalSummarizer, LabPanel, PreprocessedSummaries, RuleBasedSummarizer, VitalSample};
pub use content::{build_patient_parts, InlineImage, PatientInput};
pub use orchestrator::{Orchestrator, Phase};
pub use report::{DiagnosticReport, RunResult, TriageUrgency};
pub use session::{RunMode, SessionState, TriageSession};
pub use tool_manager::{ToolError, ToolId, ToolRegistry};

#[cfg(test)]
mod tests;
