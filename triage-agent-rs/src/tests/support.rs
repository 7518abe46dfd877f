//! Scripted model client shared by the agent tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use triage_sdk::config::AgentConfig;
use triage_sdk::core::{GenerateRequest, ModelClient, ModelResponse};
use triage_sdk::{Result, RetryConfig, ServiceError};

mock! {
    pub Model {}

    #[async_trait]
    impl ModelClient for Model {
        async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse>;
    }
}

/// Requests seen by a scripted model, in call order
pub type Recorded = Arc<Mutex<Vec<GenerateRequest>>>;

/// A model that answers with `script` in order and records every request.
/// Calls beyond the script fail with a non-retryable error.
pub fn scripted(script: Vec<Result<ModelResponse>>) -> (Arc<dyn ModelClient>, Recorded) {
    let queue = Mutex::new(VecDeque::from(script));
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&recorded);

    let mut mock = MockModel::new();
    mock.expect_generate().returning(move |request| {
        sink.lock().unwrap().push(request);
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::validation("script exhausted")))
    });

    (Arc::new(mock), recorded)
}

pub fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        max_jitter: Duration::ZERO,
        ..RetryConfig::default()
    }
}

pub fn test_config(max_turns: u32) -> AgentConfig {
    AgentConfig {
        max_turns,
        retry: quick_retry(),
        tool_timeout: Duration::from_secs(5),
    }
}

pub const RED_REPORT: &str = r#"{"differential_diagnosis": ["Septic shock", "Pneumonia", "Pulmonary embolism"], "triage_urgency": "RED", "confidence_score": 0.86, "evidence_summary": "Hypotension, tachycardia and lactate 4.8 indicate septic shock.", "tool_verification_data": {"sepsis_risk": {"risk_score": 5, "score_category": "Low Risk"}}}"#;
