//! Multi-turn tool orchestration
//!
//! Each turn is either a tool phase (function declarations, free-form output)
//! or a JSON phase (enforced report schema, no tools); the API rejects the
//! combination. Tool results and the remediation instruction force the next
//! turn into the JSON phase. A run always ends in a `RunResult` with either a
//! report or at least one error.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{Map, Value};
use triage_sdk::config::AgentConfig;
use triage_sdk::core::{CallMode, GenerateConfig, GenerateRequest, ModelResponse};
use triage_sdk::gemini::{Content, FunctionDeclaration, Part};
use triage_sdk::{ModelClient, RetryExecutor, ServiceError};

use crate::history::ConversationHistory;
use crate::prompts::{DIAGNOSTIC_REPORT_SCHEMA, JSON_REMEDIATION_INSTRUCTION, POST_TOOL_INSTRUCTION, SENIOR_TRIAGE_SYSTEM_INSTRUCTION};
use crate::repair::{extract_report, Stage};
use crate::report::{DiagnosticReport, RunResult};
use crate::tool_manager::{ToolId, ToolOutcome, ToolRegistry};

/// Output mode of a single turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Tools enabled, no response schema
    Tool,
    /// Report schema enforced, no tools
    Json,
}

impl Phase {
    pub fn call_mode(&self, declarations: &[FunctionDeclaration]) -> CallMode {
        match self {
            Phase::Tool => CallMode::Tools(declarations.to_vec()),
            Phase::Json => CallMode::json(Some(DIAGNOSTIC_REPORT_SCHEMA.clone())),
        }
    }
}

/// `tool_verification_data` key under which a tool's real output is kept
fn ground_truth_key(tool: ToolId) -> &'static str {
    match tool {
        ToolId::CalculateSepsisRisk => "sepsis_risk",
        ToolId::GenerateVitalsVisualization => "visualization_base64",
    }
}

/// Per-run loop state
#[derive(Debug, Default)]
struct LoopState {
    force_json: bool,
    json_attempted: bool,
    remediation_used: bool,
    last_text: Option<String>,
    ground_truth: Map<String, Value>,
    tool_log: Vec<String>,
    errors: Vec<String>,
}

impl LoopState {
    fn next_phase(&mut self, turn: u32) -> Phase {
        if self.force_json {
            self.force_json = false;
            self.json_attempted = true;
            Phase::Json
        } else if self.json_attempted && turn >= 2 {
            Phase::Json
        } else {
            Phase::Tool
        }
    }

    fn finish(self, report: Option<DiagnosticReport>, raw_text: Option<String>) -> RunResult {
        RunResult {
            report,
            raw_text,
            tool_log: self.tool_log,
            errors: self.errors,
        }
    }

    fn fail(mut self, error: impl Into<String>, raw_text: Option<String>) -> RunResult {
        self.errors.push(error.into());
        self.finish(None, raw_text)
    }
}

/// Drives one triage conversation to a report
pub struct Orchestrator {
    client: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    retry: RetryExecutor,
    max_turns: u32,
    system_instruction: String,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ModelClient>, registry: Arc<ToolRegistry>, config: &AgentConfig) -> Self {
        Self {
            client,
            registry,
            retry: RetryExecutor::new(config.retry.clone()),
            max_turns: config.max_turns.max(1),
            system_instruction: SENIOR_TRIAGE_SYSTEM_INSTRUCTION.to_string(),
        }
    }

    /// Replace the default system instruction
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Call configuration for a phase
    pub fn generate_config(&self, phase: Phase, declarations: &[FunctionDeclaration]) -> GenerateConfig {
        GenerateConfig::plain()
            .with_system_instruction(self.system_instruction.clone())
            .with_mode(phase.call_mode(declarations))
    }

    /// One model call through the retry executor. Every scheduled retry is
    /// recorded in the tool log; on failure the number of attempts is returned
    /// with the error.
    async fn call_model(
        &self,
        request: GenerateRequest,
        tool_log: &mut Vec<String>,
    ) -> Result<ModelResponse, (ServiceError, u32)> {
        let attempts = AtomicU32::new(0);
        let client = &self.client;

        self.retry
            .execute_with_notify(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    let request = request.clone();
                    async move { client.generate(request).await }
                },
                |notice| {
                    tool_log.push(format!(
                        "[ERROR] API Quota/Server Error. Retrying in {:.2}s...",
                        notice.delay.as_secs_f64()
                    ))
                },
            )
            .await
            .map_err(|e| (e, attempts.load(Ordering::SeqCst)))
    }

    /// Run the conversation starting from the given first-turn parts
    pub async fn run(&self, parts: Vec<Part>) -> RunResult {
        let declarations = self.registry.function_declarations();
        let mut history = ConversationHistory::with_user_parts(parts);
        let mut state = LoopState::default();

        for turn in 0..self.max_turns {
            let phase = state.next_phase(turn);
            info!("Turn {}: {:?} phase ({} history entries)", turn, phase, history.len());

            let request = GenerateRequest::new(history.to_vec(), self.generate_config(phase, &declarations));
            let response = match self.call_model(request, &mut state.tool_log).await {
                Ok(response) => response,
                Err((e, attempts)) => {
                    warn!("Model call failed on turn {}: {}", turn, e);
                    let raw = format!("Error: {}", e);
                    return state.fail(format!("Fatal API Error after {} attempts: {}", attempts, e), Some(raw));
                }
            };
            state.last_text = response.text.clone();

            if response.has_function_calls() {
                let outcomes = self.registry.execute_all(&response.function_calls).await;
                record_tool_turn(&mut state, turn, &outcomes);

                history.push(response.history_entry());
                history.push(Content::user(outcomes.iter().map(ToolOutcome::to_part).collect()));
                history.push_user_text(POST_TOOL_INSTRUCTION);
                state.force_json = true;
                continue;
            }

            let text = response.text_or_empty();
            if let Some((report, json_text, stage)) = typed_report(text) {
                let mut report = report;
                report.apply_ground_truth(&state.ground_truth);
                let suffix = if stage == Stage::Direct { "" } else { " (after repair)" };
                state
                    .tool_log
                    .push(format!("[Turn {}] Final response received and parsed as JSON{}.", turn, suffix));
                info!("Report extracted on turn {} at stage {:?}", turn, stage);
                return state.finish(Some(report), Some(json_text));
            }

            match phase {
                Phase::Json => {
                    let raw = response.text.clone().unwrap_or_else(|| "No text content".to_string());
                    return state.fail("Final response was not valid JSON despite structured output config.", Some(raw));
                }
                Phase::Tool if !state.remediation_used => {
                    debug!("Turn {}: unparseable tool-phase answer, requesting JSON", turn);
                    state.remediation_used = true;
                    if response.content.as_ref().map_or(false, |c| !c.parts.is_empty()) {
                        history.push(response.history_entry());
                    }
                    history.push_user_text(JSON_REMEDIATION_INSTRUCTION);
                    state.force_json = true;
                }
                Phase::Tool => {
                    let raw = response.text.clone();
                    return state.fail("Could not parse final response as valid JSON. Returning raw text.", raw);
                }
            }
        }

        let max_turns = self.max_turns;
        warn!("Maximum turns ({}) reached", max_turns);

        if let Some((mut report, json_text, _)) = state.last_text.as_deref().and_then(typed_report) {
            report.apply_ground_truth(&state.ground_truth);
            state
                .tool_log
                .push(format!("[Final Attempt] Extracted JSON from last response after {} turns.", max_turns));
            state
                .errors
                .push("Warning: Maximum turns reached, but extracted partial response.".to_string());
            return state.finish(Some(report), Some(json_text));
        }

        state
            .tool_log
            .push(format!("[ERROR] Loop completed {} turns without valid JSON response.", max_turns));
        let raw = state.last_text.clone();
        state.fail(format!("Maximum turns ({}) reached without final response.", max_turns), raw)
    }
}

fn typed_report(text: &str) -> Option<(DiagnosticReport, String, Stage)> {
    let extracted = extract_report(text)?;
    let report = extracted.report()?;
    Some((report, extracted.json_text, extracted.stage))
}

fn record_tool_turn(state: &mut LoopState, turn: u32, outcomes: &[ToolOutcome]) {
    state
        .tool_log
        .push(format!("[Turn {}] Model requested {} function call(s).", turn, outcomes.len()));

    for outcome in outcomes {
        state
            .tool_log
            .push(format!("[ACTION] Model requested: {}({})", outcome.name, outcome.args));

        match &outcome.result {
            Ok(value) => {
                state
                    .tool_log
                    .push(format!("[OBSERVATION] Host executed {}: {}", outcome.name, value));
                if let Some(id) = ToolId::from_name(&outcome.name) {
                    state.ground_truth.insert(ground_truth_key(id).to_string(), value.clone());
                }
            }
            Err(e) => state.tool_log.push(format!("[ERROR] {}", e)),
        }
    }
}
