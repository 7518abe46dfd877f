//! Core abstractions for the Triage SDK
//!
//! - `ModelClient`: the model call boundary used by the triage core
//! - `GenerateRequest` / `GenerateConfig` / `CallMode`: what a single model
//!   call carries
//! - `ModelResponse`: the normalized result of a model call

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::services::gemini::{Content, FunctionCall, FunctionDeclaration, Part};

/// The model call boundary.
///
/// Implementations must be stateless with respect to conversations: the full
/// history travels in every request.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Generate the next model turn for the supplied conversation
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse>;
}

/// Output configuration of a single model call.
///
/// Function calling and enforced structured output cannot be combined in one
/// request, so exactly one mode is chosen per call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallMode {
    /// Free-form text output, no tools
    Plain,

    /// Function calling enabled with the given declarations
    Tools(Vec<FunctionDeclaration>),

    /// Structured output with an optional enforced response schema
    Structured {
        response_mime_type: String,
        response_schema: Option<Value>,
    },
}

impl CallMode {
    /// JSON output, optionally constrained by a schema
    pub fn json(schema: Option<Value>) -> Self {
        CallMode::Structured {
            response_mime_type: "application/json".to_string(),
            response_schema: schema,
        }
    }

    /// Whether tools are enabled for this call
    pub fn has_tools(&self) -> bool {
        matches!(self, CallMode::Tools(_))
    }

    /// Whether structured output is enforced for this call
    pub fn is_structured(&self) -> bool {
        matches!(self, CallMode::Structured { .. })
    }
}

/// Configuration of a single model call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateConfig {
    /// System instruction sent with the call
    pub system_instruction: Option<String>,

    /// Tool or structured-output mode
    pub mode: CallMode,
}

impl GenerateConfig {
    /// Plain text call without system instruction
    pub fn plain() -> Self {
        Self {
            system_instruction: None,
            mode: CallMode::Plain,
        }
    }

    /// Set the system instruction
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Set the call mode
    pub fn with_mode(mut self, mode: CallMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A single model call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    /// Ordered conversation entries
    pub contents: Vec<Content>,

    /// Output configuration
    pub config: GenerateConfig,
}

impl GenerateRequest {
    /// Create a request from a conversation and a configuration
    pub fn new(contents: Vec<Content>, config: GenerateConfig) -> Self {
        Self { contents, config }
    }

    /// Single user turn made of the given parts
    pub fn from_parts(parts: Vec<Part>, config: GenerateConfig) -> Self {
        Self::new(vec![Content::user(parts)], config)
    }
}

/// Normalized result of a model call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    /// Text parts of the first candidate, newline-joined
    pub text: Option<String>,

    /// Function calls requested by the model, in order
    pub function_calls: Vec<FunctionCall>,

    /// The raw model turn, suitable for appending to history
    pub content: Option<Content>,
}

impl ModelResponse {
    /// Text-only response
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            content: Some(Content::model(vec![Part::text(text.clone())])),
            text: Some(text),
            function_calls: Vec::new(),
        }
    }

    /// Response requesting the given function calls
    pub fn calls(function_calls: Vec<FunctionCall>) -> Self {
        let parts = function_calls.iter().cloned().map(Part::function_call).collect();
        Self {
            text: None,
            content: Some(Content::model(parts)),
            function_calls,
        }
    }

    /// Build a response from a model turn
    pub fn from_content(content: Content) -> Self {
        let texts: Vec<&str> = content.parts.iter().filter_map(Part::as_text).collect();
        let text = if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        };
        let function_calls = content
            .parts
            .iter()
            .filter_map(Part::as_function_call)
            .cloned()
            .collect();

        Self {
            text,
            function_calls,
            content: Some(content),
        }
    }

    /// Whether the model requested any function calls
    pub fn has_function_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }

    /// The text of the response, or an empty string
    pub fn text_or_empty(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// The model turn to append to history, rebuilt from calls and text if
    /// the raw content is missing
    pub fn history_entry(&self) -> Content {
        if let Some(content) = &self.content {
            return content.clone();
        }

        let mut parts: Vec<Part> = Vec::new();
        if let Some(text) = &self.text {
            parts.push(Part::text(text.clone()));
        }
        parts.extend(self.function_calls.iter().cloned().map(Part::function_call));
        Content::model(parts)
    }
}
