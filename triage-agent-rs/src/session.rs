//! Triage session pipeline
//!
//! A `SessionState` is an explicit value owned by the caller; nothing about a
//! session lives in globals. `TriageSession` holds the components and runs one
//! triage request against a state.

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use triage_sdk::config::AgentConfig;
use triage_sdk::util::generate_request_id;
use triage_sdk::ModelClient;

use crate::clinical::{ClinicalSummarizer, LabPanel, PreprocessedSummaries, RuleBasedSummarizer, VitalSample};
use crate::content::{build_patient_parts, PatientInput};
use crate::fallback::{ClinicalContext, FallbackSynthesizer};
use crate::fast_path::FastPathReporter;
use crate::intake::{ImageExtraction, IntakeOutcome};
use crate::orchestrator::Orchestrator;
use crate::report::{DiagnosticReport, RunResult};
use crate::tool_manager::{ToolError, ToolRegistry};
use crate::tools::default_registry;

/// How the report is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Multi-turn conversation with tool calls
    #[default]
    Agent,
    /// One structured call, no tools
    Fast,
}

/// Everything accumulated for one patient
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub session_id: String,
    pub labs: Option<LabPanel>,
    pub vitals: Option<Vec<VitalSample>>,
    pub summaries: PreprocessedSummaries,
    pub tool_log: Vec<String>,
    pub report: Option<DiagnosticReport>,

    /// JSON text of the last report, or the raw model text on failure
    pub raw_json: Option<String>,

    /// Base64 PNG of the vitals chart
    pub visualization: Option<String>,

    pub errors: Vec<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: generate_request_id(),
            labs: None,
            vitals: None,
            summaries: PreprocessedSummaries::default(),
            tool_log: Vec::new(),
            report: None,
            raw_json: None,
            visualization: None,
            errors: Vec::new(),
        }
    }

    /// Merge image-extracted data: labs key by key (non-null values only),
    /// vitals replaced when any were extracted
    pub fn apply_extraction(&mut self, extraction: &ImageExtraction) {
        let non_null: Vec<_> = extraction.labs.iter().filter(|(_, v)| !v.is_null()).collect();
        if !non_null.is_empty() {
            let labs = self.labs.get_or_insert_with(LabPanel::new);
            for (key, value) in non_null {
                labs.insert(key.clone(), value.clone());
            }
        }

        if !extraction.vitals.is_empty() {
            self.vitals = Some(extraction.vitals.clone());
        }
    }

    /// Patient input for a run from the session data and the intake outcome
    pub fn patient_input(&self, notes: impl Into<String>, intake: &IntakeOutcome) -> PatientInput {
        PatientInput {
            notes: notes.into(),
            image: intake.primary_image.clone(),
            labs: self.labs.clone(),
            vitals: self.vitals.clone(),
            image_analysis: intake.image_analysis.clone(),
        }
    }

    fn record(&mut self, result: &RunResult) {
        self.tool_log = result.tool_log.clone();
        self.report = result.report.clone();
        self.raw_json = result.raw_text.clone();
        self.visualization = result
            .report
            .as_ref()
            .and_then(DiagnosticReport::visualization)
            .map(str::to_string);
        self.errors.extend(result.errors.iter().cloned());
    }
}

/// Components for running triage requests
pub struct TriageSession {
    orchestrator: Orchestrator,
    fast_path: FastPathReporter,
    fallback: FallbackSynthesizer,
    summarizer: Box<dyn ClinicalSummarizer>,
}

impl TriageSession {
    /// Session components with the default tool set
    pub fn new(client: Arc<dyn ModelClient>, config: &AgentConfig) -> Result<Self, ToolError> {
        let registry = default_registry(config.tool_timeout)?;
        Ok(Self::with_registry(client, registry, config))
    }

    pub fn with_registry(client: Arc<dyn ModelClient>, registry: ToolRegistry, config: &AgentConfig) -> Self {
        Self {
            orchestrator: Orchestrator::new(client.clone(), Arc::new(registry), config),
            fast_path: FastPathReporter::new(client.clone(), config.retry.clone()),
            fallback: FallbackSynthesizer::new(client, config.retry.clone()),
            summarizer: Box::new(RuleBasedSummarizer),
        }
    }

    pub fn with_summarizer(mut self, summarizer: impl ClinicalSummarizer + 'static) -> Self {
        self.summarizer = Box::new(summarizer);
        self
    }

    /// Run one triage request and record the outcome in `state`
    pub async fn run(&self, state: &mut SessionState, input: &PatientInput, mode: RunMode) -> RunResult {
        info!("Session {}: starting {:?} run", state.session_id, mode);

        let summaries = self.summarizer.summarize(input.labs.as_ref(), input.vitals.as_deref());
        state.summaries = summaries.clone();
        state.labs = input.labs.clone();
        state.vitals = input.vitals.clone();

        let mut result = match mode {
            RunMode::Agent => self.orchestrator.run(build_patient_parts(input, &summaries)).await,
            RunMode::Fast => self.fast_path.generate(input, &summaries).await,
        };

        if !result.report.as_ref().map_or(false, DiagnosticReport::is_complete) {
            self.complete_with_fallback(&mut result, input, summaries).await;
        }

        state.record(&result);
        result
    }

    async fn complete_with_fallback(&self, result: &mut RunResult, input: &PatientInput, summaries: PreprocessedSummaries) {
        let context = ClinicalContext {
            labs: input.labs.clone(),
            vitals: input.vitals.clone(),
            summaries,
            tool_log: result.tool_log.clone(),
        };

        let raw_text = result.raw_text.clone().unwrap_or_default();
        let Some(fallback) = self.fallback.synthesize(&raw_text, &context).await else {
            warn!("Fallback synthesis produced no report");
            return;
        };

        match result.report.as_mut() {
            Some(report) => {
                report.merge_fallback(&fallback);
                result
                    .tool_log
                    .push("[Fallback] Filled missing report fields from fallback synthesis.".to_string());
            }
            None => {
                result.report = Some(fallback);
                result
                    .tool_log
                    .push("[Fallback] Report synthesized from the agent response.".to_string());
            }
        }
        info!("Fallback synthesis applied");
    }
}
