//! Single-call report generation without tools

use std::sync::Arc;

use log::{info, warn};
use triage_sdk::core::{CallMode, GenerateConfig, GenerateRequest};
use triage_sdk::gemini::Part;
use triage_sdk::{ModelClient, RetryConfig, RetryExecutor};

use crate::clinical::PreprocessedSummaries;
use crate::content::PatientInput;
use crate::prompts::{fast_path_prompt, DIAGNOSTIC_REPORT_SCHEMA, SENIOR_TRIAGE_SYSTEM_INSTRUCTION};
use crate::repair::extract_report;
use crate::report::RunResult;

const RECENT_VITALS: usize = 5;

/// Produces a report with one structured-output call
pub struct FastPathReporter {
    client: Arc<dyn ModelClient>,
    retry: RetryExecutor,
}

impl FastPathReporter {
    pub fn new(client: Arc<dyn ModelClient>, retry: RetryConfig) -> Self {
        Self {
            client,
            retry: RetryExecutor::new(retry),
        }
    }

    /// Consolidated patient data section of the prompt
    pub fn patient_data(input: &PatientInput, summaries: &PreprocessedSummaries) -> String {
        let mut sections = vec![format!("PATIENT NOTES:\n{}", input.notes)];

        if let Some(analysis) = input.image_analysis_text() {
            sections.push(format!("IMAGE ANALYSIS:\n{}", analysis));
        }
        if let Some(tabular) = &summaries.tabular {
            sections.push(format!("LAB ANALYSIS:\n{}", tabular));
        }
        if let Some(timeseries) = &summaries.timeseries {
            sections.push(format!("VITALS TREND:\n{}", timeseries));
        }
        if let Some(labs) = input.labs.as_ref().filter(|labs| !labs.is_empty()) {
            let json = serde_json::to_string_pretty(labs).unwrap_or_default();
            sections.push(format!("RAW LAB VALUES:\n{}", json));
        }
        if let Some(vitals) = input.vitals.as_ref().filter(|vitals| !vitals.is_empty()) {
            let recent = &vitals[vitals.len().saturating_sub(RECENT_VITALS)..];
            let json = serde_json::to_string_pretty(recent).unwrap_or_default();
            sections.push(format!("RAW VITALS (last {}):\n{}", RECENT_VITALS, json));
        }

        sections.join("\n\n")
    }

    pub async fn generate(&self, input: &PatientInput, summaries: &PreprocessedSummaries) -> RunResult {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = &input.image {
            parts.push(image.to_part());
        }
        parts.push(Part::text(fast_path_prompt(&Self::patient_data(input, summaries))));

        let config = GenerateConfig::plain()
            .with_system_instruction(SENIOR_TRIAGE_SYSTEM_INSTRUCTION)
            .with_mode(CallMode::json(Some(DIAGNOSTIC_REPORT_SCHEMA.clone())));
        let request = GenerateRequest::from_parts(parts, config);
        let client = &self.client;

        let response = match self
            .retry
            .execute(|| {
                let request = request.clone();
                async move { client.generate(request).await }
            })
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Fast path model call failed: {}", e.describe());
                return RunResult::failed(format!("Fast path failed: {}", e), None, Vec::new());
            }
        };

        let text = response.text_or_empty();
        match extract_report(text).and_then(|extracted| extracted.report().map(|r| (r, extracted.json_text))) {
            Some((report, json_text)) => {
                info!("Fast path report: {}", report.triage_urgency);
                RunResult {
                    report: Some(report),
                    raw_text: Some(json_text),
                    tool_log: vec!["[Fast Path] Report generated directly with Gemini.".to_string()],
                    errors: Vec::new(),
                }
            }
            None => RunResult::failed(
                "Fast path failed: response was not a valid diagnostic report",
                response.text.clone(),
                Vec::new(),
            ),
        }
    }
}
