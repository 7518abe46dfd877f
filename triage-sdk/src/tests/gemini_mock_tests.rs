//! Mock tests for the Gemini service
//!
//! These tests use WireMock to simulate the Gemini API and verify that the
//! Gemini client builds correct request bodies and decodes responses and
//! errors.

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::core::{CallMode, GenerateConfig, GenerateRequest, ModelClient};
    use crate::error::ServiceError;
    use crate::services::gemini::{FunctionDeclaration, GeminiClient, GeminiClientBuilder, Part};

    const GENERATE_PATH: &str = "/models/gemini-2.5-flash:generateContent";

    async fn setup_mock_server() -> MockServer {
        MockServer::start().await
    }

    fn create_test_client(mock_server: &MockServer) -> GeminiClient {
        GeminiClientBuilder::new()
            .api_key("mock_api_key_for_testing")
            .model("gemini-2.5-flash")
            .base_url(mock_server.uri())
            .timeout(5)
            .build()
            .expect("Failed to build Gemini client")
    }

    fn sepsis_declaration() -> FunctionDeclaration {
        FunctionDeclaration {
            name: "calculate_sepsis_risk".to_string(),
            description: "Sepsis risk score".to_string(),
            parameters: json!({"type": "OBJECT", "properties": {"heart_rate": {"type": "INTEGER"}}}),
        }
    }

    async fn last_request_body(mock_server: &MockServer) -> Value {
        let requests = mock_server.received_requests().await.expect("request recording enabled");
        let last = requests.last().expect("at least one request");
        serde_json::from_slice(&last.body).expect("JSON request body")
    }

    #[tokio::test]
    async fn test_text_response() {
        let mock_server = setup_mock_server().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("x-goog-api-key", "mock_api_key_for_testing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "{\"triage_urgency\": \"RED\"}"}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 8, "totalTokenCount": 20}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let request = GenerateRequest::from_parts(
            vec![Part::text("Patient notes")],
            GenerateConfig::plain().with_system_instruction("You are MCTA."),
        );

        let response = client.generate(request).await.unwrap();
        assert_eq!(response.text.as_deref(), Some("{\"triage_urgency\": \"RED\"}"));
        assert!(!response.has_function_calls());

        let body = last_request_body(&mock_server).await;
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are MCTA.");
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_function_call_response() {
        let mock_server = setup_mock_server().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"functionCall": {"name": "calculate_sepsis_risk", "args": {"heart_rate": 110, "blood_pressure": 90, "lactate_level": 4.8, "respiratory_rate": 26}}},
                        {"functionCall": {"name": "generate_vitals_visualization", "args": {"time_series_data": "[]"}}}
                    ]}
                }]
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let request = GenerateRequest::from_parts(
            vec![Part::text("Patient notes")],
            GenerateConfig::plain().with_mode(CallMode::Tools(vec![sepsis_declaration()])),
        );

        let response = client.generate(request).await.unwrap();
        assert_eq!(response.function_calls.len(), 2);
        assert_eq!(response.function_calls[0].name, "calculate_sepsis_risk");
        assert_eq!(response.function_calls[0].args["lactate_level"], 4.8);
        assert_eq!(response.function_calls[1].name, "generate_vitals_visualization");
        assert!(response.text.is_none());

        // tool mode sends declarations and never a structured-output config
        let body = last_request_body(&mock_server).await;
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "calculate_sepsis_risk");
        assert!(body.get("generationConfig").is_none());
    }

    #[tokio::test]
    async fn test_structured_request_has_no_tools() {
        let mock_server = setup_mock_server().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "{}"}]}}]
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let schema = json!({"type": "OBJECT", "properties": {"evidence_summary": {"type": "STRING"}}});
        let request = GenerateRequest::from_parts(
            vec![Part::text("Produce the report")],
            GenerateConfig::plain().with_mode(CallMode::json(Some(schema.clone()))),
        );

        client.generate(request).await.unwrap();

        let body = last_request_body(&mock_server).await;
        assert!(body.get("tools").is_none());
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"], schema);
    }

    #[tokio::test]
    async fn test_rate_limit_error_is_transient() {
        let mock_server = setup_mock_server().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"code": 429, "message": "Resource has been exhausted (e.g. check quota).", "status": "RESOURCE_EXHAUSTED"}
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let request = GenerateRequest::from_parts(vec![Part::text("hi")], GenerateConfig::plain());

        let err = client.generate(request).await.unwrap_err();
        assert!(matches!(err.root(), ServiceError::RateLimit(_)));
        assert_eq!(err.status_code(), Some(429));
        assert_eq!(err.error_code(), Some("RESOURCE_EXHAUSTED"));
        assert!(err.is_transient());
        assert!(err.request_id().is_some());
        assert_eq!(err.endpoint(), Some(format!("{}{}", mock_server.uri(), GENERATE_PATH).as_str()));
    }

    #[tokio::test]
    async fn test_invalid_argument_is_fatal() {
        let mock_server = setup_mock_server().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "Function calling with a response mime type: 'application/json' is unsupported", "status": "INVALID_ARGUMENT"}
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let request = GenerateRequest::from_parts(vec![Part::text("hi")], GenerateConfig::plain());

        let err = client.generate(request).await.unwrap_err();
        assert!(matches!(err.root(), ServiceError::Validation(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_parsing_error() {
        let mock_server = setup_mock_server().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let request = GenerateRequest::from_parts(vec![Part::text("hi")], GenerateConfig::plain());

        let err = client.generate(request).await.unwrap_err();
        assert!(matches!(err.root(), ServiceError::Parsing(_)));
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_builder_requires_api_key() {
        let result = GeminiClientBuilder::new().build();
        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }
}
