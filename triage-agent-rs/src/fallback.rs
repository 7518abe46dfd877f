//! Fallback report synthesis
//!
//! When a run fails or its report is incomplete, a second structured-output
//! call rebuilds the report from the (possibly truncated) agent response and
//! the clinical data gathered for the session.

use std::sync::Arc;

use log::{debug, info, warn};
use triage_sdk::core::{CallMode, GenerateConfig, GenerateRequest};
use triage_sdk::gemini::Part;
use triage_sdk::util::{elide_middle, head};
use triage_sdk::{ModelClient, RetryExecutor, RetryConfig};

use crate::clinical::{LabPanel, PreprocessedSummaries, VitalSample};
use crate::prompts::fallback_prompt;
use crate::repair::parse_report;
use crate::report::DiagnosticReport;

const LONG_RESPONSE: usize = 10_000;
const LONG_SPAN: usize = 8_000;
const SPAN_KEEP: usize = 4_000;
const HEAD_KEEP: usize = 5_000;
const TAIL_KEEP: usize = 2_000;
const PROMPT_RESPONSE_LIMIT: usize = 3_000;
const TRUNCATION_MARKER: &str = "\n... [truncated] ...\n";

const RECENT_VITALS: usize = 5;
const RECENT_TOOL_LINES: usize = 3;

/// Clinical data handed to the fallback prompt
#[derive(Debug, Clone, Default)]
pub struct ClinicalContext {
    pub labs: Option<LabPanel>,
    pub vitals: Option<Vec<VitalSample>>,
    pub summaries: PreprocessedSummaries,
    pub tool_log: Vec<String>,
}

impl ClinicalContext {
    pub fn render(&self) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Some(labs) = self.labs.as_ref().filter(|labs| !labs.is_empty()) {
            sections.push(format!("RAW LAB VALUES:\n{}", pretty(labs)));
        }

        if let Some(vitals) = self.vitals.as_ref().filter(|vitals| !vitals.is_empty()) {
            let recent = &vitals[vitals.len().saturating_sub(RECENT_VITALS)..];
            sections.push(format!("RAW VITALS TIME-SERIES:\n{}", pretty(&recent)));
        }

        let mut preprocessed: Vec<String> = Vec::new();
        if let Some(tabular) = &self.summaries.tabular {
            preprocessed.push(format!("Lab Analysis: {}", tabular));
        }
        if let Some(timeseries) = &self.summaries.timeseries {
            preprocessed.push(format!("Vitals Trend: {}", timeseries));
        }
        if !preprocessed.is_empty() {
            sections.push(format!("PRE-PROCESSED DATA:\n{}", preprocessed.join("\n")));
        }

        let tool_lines: Vec<&str> = self
            .tool_log
            .iter()
            .map(String::as_str)
            .filter(|line| line.contains("[ACTION]") || line.contains("[OBSERVATION]"))
            .collect();
        if !tool_lines.is_empty() {
            let recent = &tool_lines[tool_lines.len().saturating_sub(RECENT_TOOL_LINES)..];
            sections.push(format!("TOOL EXECUTION RESULTS:\n{}", recent.join("\n")));
        }

        if sections.is_empty() {
            "No additional context available.".to_string()
        } else {
            sections.join("\n\n")
        }
    }
}

fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Shorten an agent response before it is embedded in the fallback prompt.
///
/// Long responses keep their outermost `{...}` span (itself elided in the
/// middle when large); without a span the head and tail are kept.
pub fn truncate_for_prompt(text: &str) -> String {
    if text.len() <= LONG_RESPONSE {
        return text.to_string();
    }

    let span = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&text[start..=end]),
        _ => None,
    };

    match span {
        Some(span) => {
            let span = if span.len() > LONG_SPAN {
                elide_middle(span, SPAN_KEEP, SPAN_KEEP, TRUNCATION_MARKER)
            } else {
                span.to_string()
            };
            format!("Response summary (truncated from {} chars):\n{}", text.len(), span)
        }
        None => elide_middle(text, HEAD_KEEP, TAIL_KEEP, TRUNCATION_MARKER),
    }
}

/// Secondary structured call that rebuilds a report
pub struct FallbackSynthesizer {
    client: Arc<dyn ModelClient>,
    retry: RetryExecutor,
}

impl FallbackSynthesizer {
    pub fn new(client: Arc<dyn ModelClient>, retry: RetryConfig) -> Self {
        Self {
            client,
            retry: RetryExecutor::new(retry),
        }
    }

    /// Build the prompt for `raw_text`
    pub fn prompt(raw_text: &str, context: &ClinicalContext) -> String {
        let truncated = truncate_for_prompt(raw_text);
        fallback_prompt(head(&truncated, PROMPT_RESPONSE_LIMIT), &context.render())
    }

    /// Synthesize a report; `None` for blank input or on any failure
    pub async fn synthesize(&self, raw_text: &str, context: &ClinicalContext) -> Option<DiagnosticReport> {
        if raw_text.trim().is_empty() {
            info!("[Fallback] Empty agent response, nothing to synthesize");
            return None;
        }

        let prompt = Self::prompt(raw_text, context);
        debug!("[Fallback] Prompt of {} bytes", prompt.len());

        let config = GenerateConfig::plain().with_mode(CallMode::json(None));
        let request = GenerateRequest::from_parts(vec![Part::text(prompt)], config);
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
                warn!("[Fallback] Model call failed: {}", e.describe());
                return None;
            }
        };

        let report = parse_report(response.text_or_empty());
        if report.is_none() {
            warn!("[Fallback] Response could not be parsed as a report");
        }
        report
    }
}
