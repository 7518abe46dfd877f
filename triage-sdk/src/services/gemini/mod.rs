//! Gemini API client implementation
//!
//! A typed client for the Gemini `generateContent` endpoint that implements
//! the [`ModelClient`] boundary used by the triage core.

mod models;
pub use models::*;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;

use crate::config::{GeminiConfig, ServiceConfig};
use crate::core::{CallMode, GenerateRequest, ModelClient, ModelResponse};
use crate::error::{ErrorContext, Result, ServiceError};
use crate::services::common::{build_http_client, parse_error_response, UserAgent};
use crate::util::{generate_request_id, sanitize_for_logging};

/// Gemini API client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    /// HTTP client
    http_client: Client,

    /// Configuration
    config: GeminiConfig,
}

impl GeminiClient {
    /// Create a new Gemini client with the given configuration
    pub fn new_with_config(config: GeminiConfig) -> Result<Self> {
        config.validate()?;

        let http_client = build_http_client(
            Some(UserAgent {
                app_name: "MCTA".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                extra: Some("Gemini-Client".to_string()),
            }),
            Some(Duration::from_secs(config.timeout_seconds)),
        )?;

        Ok(Self { http_client, config })
    }

    /// Create a new builder for the Gemini client
    pub fn builder() -> GeminiClientBuilder {
        GeminiClientBuilder::default()
    }

    /// The model this client talks to
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Send a raw `generateContent` request
    pub async fn generate_content(&self, request: &GenerateContentRequest) -> Result<GenerateContentResponse> {
        let url = self.endpoint();
        let request_id = generate_request_id();
        debug!("Sending request {} to Gemini: POST {}", request_id, url);

        let start_time = Instant::now();
        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let error = ServiceError::from(e);
                warn!(
                    "Gemini request {} failed to send: {}",
                    request_id,
                    sanitize_for_logging(&error.to_string())
                );
                error.with_context(
                    ErrorContext::for_service("gemini")
                        .request_id(request_id.clone())
                        .endpoint(url.clone()),
                )
            })?;

        let status = response.status();
        debug!(
            "Gemini request {} answered {} in {:.2}ms",
            request_id,
            status,
            start_time.elapsed().as_secs_f64() * 1000.0
        );

        if !status.is_success() {
            let error = parse_error_response("gemini", response).await.with_context(
                ErrorContext::for_service("gemini")
                    .request_id(request_id.clone())
                    .endpoint(url.clone()),
            );
            warn!("Gemini request {} failed: {}", request_id, sanitize_for_logging(&error.describe()));
            return Err(error);
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ServiceError::parsing(format!("Failed to parse Gemini response: {}", e)))
    }
}

/// Translate the boundary request into the REST request body
pub fn to_wire_request(request: &GenerateRequest) -> GenerateContentRequest {
    let (tools, generation_config) = match &request.config.mode {
        CallMode::Plain => (None, None),
        CallMode::Tools(declarations) => (
            Some(vec![Tool {
                function_declarations: declarations.clone(),
            }]),
            None,
        ),
        CallMode::Structured {
            response_mime_type,
            response_schema,
        } => (
            None,
            Some(GenerationConfig {
                response_mime_type: Some(response_mime_type.clone()),
                response_schema: response_schema.clone(),
            }),
        ),
    };

    GenerateContentRequest {
        contents: request.contents.clone(),
        system_instruction: request.config.system_instruction.as_ref().map(Content::system),
        tools,
        generation_config,
    }
}

/// Normalize a REST response into a [`ModelResponse`]
pub fn from_wire_response(response: GenerateContentResponse) -> Result<ModelResponse> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.get("blockReason"))
            .and_then(|r| r.as_str())
            .unwrap_or("no candidates returned");
        return Err(ServiceError::parsing(format!("Empty Gemini response: {}", reason)));
    };

    match candidate.content {
        Some(content) => Ok(ModelResponse::from_content(content)),
        None => {
            debug!(
                "Gemini candidate without content (finish reason {:?})",
                candidate.finish_reason
            );
            Ok(ModelResponse::default())
        }
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse> {
        let wire = to_wire_request(&request);
        let response = self.generate_content(&wire).await?;
        from_wire_response(response)
    }
}

/// Builder for the Gemini client
#[derive(Default)]
pub struct GeminiClientBuilder {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

impl GeminiClientBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model name
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the base URL
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the request timeout in seconds
    pub fn timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<GeminiClient> {
        let defaults = GeminiConfig::default();
        let config = GeminiConfig {
            api_key: self.api_key.unwrap_or(defaults.api_key),
            model: self.model.unwrap_or(defaults.model),
            base_url: self.base_url.unwrap_or(defaults.base_url),
            timeout_seconds: self.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        };

        GeminiClient::new_with_config(config)
    }
}
