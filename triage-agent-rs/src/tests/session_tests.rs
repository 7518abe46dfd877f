//! Tests for the session pipeline
//!
//! These tests verify mode selection, fallback completion of missing or
//! partial reports, and what is recorded in the session state.

#[cfg(test)]
mod tests {
    use serde_json::json;
    use triage_sdk::core::ModelResponse;
    use triage_sdk::gemini::{Content, FunctionCall, Part};
    use triage_sdk::ServiceError;

    use crate::clinical::{ClinicalSummarizer, LabPanel, VitalSample};
    use crate::content::PatientInput;
    use crate::report::TriageUrgency;
    use crate::session::{RunMode, SessionState, TriageSession};
    use crate::tests::support::{scripted, test_config, RED_REPORT};

    const FALLBACK_REPORT: &str = r#"{"differential_diagnosis": ["Community-acquired pneumonia", "Sepsis"], "triage_urgency": "GREEN", "confidence_score": 0.7, "evidence_summary": "Fever with productive cough.", "tool_verification_data": {"sepsis_risk": {"risk_score": 14, "score_category": "Low Risk"}}}"#;

    fn patient() -> PatientInput {
        PatientInput {
            notes: "72F, fever 39.1, productive cough, RR 24".to_string(),
            labs: json!({"WBC": 15.2, "Lactate": 2.4}).as_object().cloned(),
            vitals: Some(vec![
                VitalSample::new("00:00", Some(95.0), Some(98.0)),
                VitalSample::new("01:00", Some(93.0), Some(106.0)),
            ]),
            ..Default::default()
        }
    }

    fn request_text(contents: &[Content]) -> String {
        contents
            .iter()
            .flat_map(|content| content.parts.iter())
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    struct FixedSummarizer;

    impl ClinicalSummarizer for FixedSummarizer {
        fn summarize_labs(&self, _labs: &LabPanel) -> String {
            "Tabular Data Feature: fixed labs".to_string()
        }

        fn summarize_vitals(&self, _vitals: &[VitalSample]) -> String {
            "Time-Series Feature: fixed trend".to_string()
        }
    }

    #[tokio::test]
    async fn test_complete_agent_run_skips_fallback() {
        let (client, recorded) = scripted(vec![
            Ok(ModelResponse::calls(vec![FunctionCall::new(
                "calculate_sepsis_risk",
                json!({"heart_rate": 106, "blood_pressure": 112, "lactate_level": 2.4, "respiratory_rate": 24}),
            )])),
            Ok(ModelResponse::text(RED_REPORT)),
        ]);
        let session = TriageSession::new(client, &test_config(5))
            .unwrap()
            .with_summarizer(FixedSummarizer);
        let mut state = SessionState::new();

        let result = session.run(&mut state, &patient(), RunMode::Agent).await;

        assert!(result.succeeded());
        assert_eq!(recorded.lock().unwrap().len(), 2);

        let first = request_text(&recorded.lock().unwrap()[0].contents);
        assert!(first.contains("Tabular Data Feature: fixed labs"));
        assert!(first.contains("Time-Series Feature: fixed trend"));

        assert_eq!(state.summaries.tabular.as_deref(), Some("Tabular Data Feature: fixed labs"));
        assert_eq!(state.report, result.report);
        assert_eq!(state.raw_json.as_deref(), Some(RED_REPORT));
        assert_eq!(state.tool_log, result.tool_log);
        // 10 + 4 + 7
        assert_eq!(
            state.report.as_ref().and_then(|r| r.risk_score()),
            Some(21.0)
        );
        assert!(state.visualization.is_none());
    }

    #[tokio::test]
    async fn test_incomplete_report_is_merged_with_fallback() {
        let partial = r#"{"triage_urgency": "YELLOW", "differential_diagnosis": [], "confidence_score": 0.5}"#;
        let (client, recorded) = scripted(vec![
            Ok(ModelResponse::text(partial)),
            Ok(ModelResponse::text(FALLBACK_REPORT)),
        ]);
        let session = TriageSession::new(client, &test_config(5)).unwrap();
        let mut state = SessionState::new();

        let result = session.run(&mut state, &patient(), RunMode::Agent).await;

        let report = result.report.expect("merged report");
        assert_eq!(report.triage_urgency, TriageUrgency::Yellow);
        assert_eq!(report.confidence_score, 0.5);
        assert_eq!(report.differential_diagnosis.len(), 2);
        assert_eq!(report.evidence_summary, "Fever with productive cough.");
        assert_eq!(report.risk_score(), Some(14.0));
        assert_eq!(
            result.tool_log.last().map(String::as_str),
            Some("[Fallback] Filled missing report fields from fallback synthesis.")
        );

        let requests = recorded.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let fallback = &requests[1];
        assert!(fallback.config.system_instruction.is_none());
        assert!(fallback.config.mode.is_structured());
        let prompt = request_text(&fallback.contents);
        assert!(prompt.contains(&format!("AGENT'S RESPONSE (may be truncated):\n{}", partial)));
        assert!(prompt.contains("RAW LAB VALUES:"));
    }

    #[tokio::test]
    async fn test_failed_fast_path_replaced_by_fallback() {
        let (client, recorded) = scripted(vec![
            Ok(ModelResponse::text("Likely pneumonia, moderate urgency.")),
            Ok(ModelResponse::text(FALLBACK_REPORT)),
        ]);
        let session = TriageSession::new(client, &test_config(5)).unwrap();
        let mut state = SessionState::new();

        let result = session.run(&mut state, &patient(), RunMode::Fast).await;

        assert_eq!(
            result.report.as_ref().map(|r| r.triage_urgency),
            Some(TriageUrgency::Green)
        );
        assert_eq!(
            result.errors,
            vec!["Fast path failed: response was not a valid diagnostic report".to_string()]
        );
        assert_eq!(
            result.tool_log,
            vec!["[Fallback] Report synthesized from the agent response.".to_string()]
        );
        assert_eq!(state.errors, result.errors);

        let requests = recorded.lock().unwrap();
        assert!(requests[0].config.mode.is_structured());
        assert!(!requests[0].config.mode.has_tools());
        assert!(request_text(&requests[0].contents).contains("RAW VITALS (last 5):"));
    }

    #[tokio::test]
    async fn test_no_fallback_without_response_text() {
        let (client, recorded) = scripted(vec![Err(ServiceError::validation("400 INVALID_ARGUMENT"))]);
        let session = TriageSession::new(client, &test_config(5)).unwrap();
        let mut state = SessionState::new();

        let result = session.run(&mut state, &patient(), RunMode::Fast).await;

        assert!(!result.succeeded());
        assert_eq!(
            result.errors,
            vec!["Fast path failed: Validation error: 400 INVALID_ARGUMENT".to_string()]
        );
        assert_eq!(recorded.lock().unwrap().len(), 1);
        assert!(state.report.is_none());
    }

    #[tokio::test]
    async fn test_visualization_recorded_in_state() {
        let series = json!([
            {"time": "00:00", "SpO2": 95, "HeartRate": 98},
            {"time": "01:00", "SpO2": 93, "HeartRate": 106}
        ])
        .to_string();
        let (client, _) = scripted(vec![
            Ok(ModelResponse::calls(vec![
                FunctionCall::new(
                    "calculate_sepsis_risk",
                    json!({"heart_rate": 106, "blood_pressure": 112, "lactate_level": 2.4, "respiratory_rate": 24}),
                ),
                FunctionCall::new("generate_vitals_visualization", json!({"time_series_data": series})),
            ])),
            Ok(ModelResponse::text(RED_REPORT)),
        ]);
        let session = TriageSession::new(client, &test_config(5)).unwrap();
        let mut state = SessionState::new();

        let result = session.run(&mut state, &patient(), RunMode::Agent).await;

        assert!(result.succeeded());
        let chart = state.visualization.as_deref().expect("chart");
        assert!(chart.starts_with("iVBORw0KGgo"));
        assert_eq!(result.report.as_ref().and_then(|r| r.visualization()), Some(chart));
    }
}
