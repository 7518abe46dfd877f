//! Error handling for the Triage SDK
//!
//! This module provides the error system shared by the model client and
//! the triage core:
//! - Categorizes errors by type (network, auth, rate limit, etc.)
//! - Classifies errors as transient (worth retrying) or fatal
//! - Adds context (service, status code, upstream error code) to errors
//! - Provides a convenient Result type alias

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod mapping;

/// Result type for Triage SDK operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Lowercase markers that identify quota and server-side failures in an
/// upstream error description.
const TRANSIENT_MARKERS: [&str; 6] = [
    "429",
    "resource_exhausted",
    "quota",
    "500",
    "internal",
    "server",
];

/// Main error type for the Triage SDK
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Network or connection errors
    #[error("Network error: {0}")]
    Network(String),

    /// Authentication or permission errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limiting or quota errors
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Upstream service errors
    #[error("Service error: {0}")]
    Service(String),

    /// Request validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Response parsing errors
    #[error("Parsing error: {0}")]
    Parsing(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Unexpected local errors
    #[error("Unexpected error: {0}")]
    Internal(String),

    /// Errors with additional context
    #[error("{inner}")]
    WithContext {
        inner: Box<ServiceError>,
        context: ErrorContext,
    },
}

impl ServiceError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        ServiceError::Network(message.into())
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        ServiceError::Authentication(message.into())
    }

    /// Create a rate limit error
    pub fn rate_limit(message: impl Into<String>) -> Self {
        ServiceError::RateLimit(message.into())
    }

    /// Create an upstream service error
    pub fn service(message: impl Into<String>) -> Self {
        ServiceError::Service(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    /// Create a parsing error
    pub fn parsing(message: impl Into<String>) -> Self {
        ServiceError::Parsing(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        ServiceError::Configuration(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        ServiceError::Timeout(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        ServiceError::Internal(message.into())
    }

    /// Add context to an existing error
    pub fn with_context(self, context: ErrorContext) -> Self {
        ServiceError::WithContext {
            inner: Box::new(self),
            context,
        }
    }

    /// Add a single context key/value to an existing error
    pub fn with_context_value(self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let mut context = ErrorContext::new();
        context.add(key, value);
        self.with_context(context)
    }

    /// The innermost error, with all context layers removed
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::WithContext { inner, .. } => inner.root(),
            other => other,
        }
    }

    /// Get the upstream error code if available (e.g. `RESOURCE_EXHAUSTED`)
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ServiceError::WithContext { context, inner } => context
                .error_code
                .as_deref()
                .or_else(|| inner.error_code()),
            _ => None,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ServiceError::WithContext { context, inner } => {
                context.status_code.or_else(|| inner.status_code())
            }
            _ => None,
        }
    }

    /// Check if this error is a transient API failure worth retrying.
    ///
    /// Rate limits, quota exhaustion, timeouts, connection failures and
    /// server-side errors are transient. Anything else is classified by a
    /// case-insensitive search of the full description, status code and
    /// upstream error code for known quota/server markers.
    pub fn is_transient(&self) -> bool {
        let by_kind = match self.root() {
            ServiceError::Network(_)
            | ServiceError::Timeout(_)
            | ServiceError::RateLimit(_) => true,
            ServiceError::Service(_) => self.status_code().map_or(false, |s| s >= 500),
            _ => false,
        };

        by_kind || is_transient_message(&self.summary())
    }

    /// Check if this error should abort the current operation immediately
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }

    /// Get the ID of the request that failed, if recorded
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ServiceError::WithContext { context, inner } => context
                .request_id
                .as_deref()
                .or_else(|| inner.request_id()),
            _ => None,
        }
    }

    /// Get the endpoint URL that was called, if recorded
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ServiceError::WithContext { context, inner } => context
                .endpoint
                .as_deref()
                .or_else(|| inner.endpoint()),
            _ => None,
        }
    }

    /// Full description including status, upstream code, request ID and
    /// endpoint
    pub fn describe(&self) -> String {
        let mut description = self.summary();
        if let Some(id) = self.request_id() {
            description.push_str(&format!(" (request {})", id));
        }
        if let Some(endpoint) = self.endpoint() {
            description.push_str(&format!(" at {}", endpoint));
        }
        description
    }

    /// Message with status and upstream code; request IDs and URLs are left
    /// out so they never match a transient marker
    fn summary(&self) -> String {
        let mut summary = self.to_string();
        if let Some(status) = self.status_code() {
            summary.push_str(&format!(" (status {})", status));
        }
        if let Some(code) = self.error_code() {
            summary.push_str(&format!(" [{}]", code));
        }
        summary
    }
}

/// Case-insensitive check of an error description for transient markers
pub fn is_transient_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Error context information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Service that generated the error
    pub service: String,

    /// HTTP status code if applicable
    pub status_code: Option<u16>,

    /// Service-specific error code
    pub error_code: Option<String>,

    /// Request ID for tracing
    pub request_id: Option<String>,

    /// Endpoint URL that was called
    pub endpoint: Option<String>,

    /// Additional context data
    pub data: HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            service: "unknown".to_string(),
            status_code: None,
            error_code: None,
            request_id: None,
            endpoint: None,
            data: HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new error context for a specific service
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Add an HTTP status code
    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Add an error code
    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    /// Add a request ID
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Add an endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add a context value
    pub fn add<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.data.insert(key.into(), value.to_string());
    }

    /// Add a context value and return self (builder pattern)
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.add(key, value);
        self
    }
}

/// Convert reqwest errors to ServiceError
impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        let context = ErrorContext::for_service("http_client");

        let service_error = if err.is_timeout() {
            ServiceError::timeout(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            ServiceError::network(format!("Connection error: {}", err))
        } else if err.is_request() {
            ServiceError::network(format!("Request failed: {}", err))
        } else if err.is_decode() {
            ServiceError::parsing(format!("Response decode error: {}", err))
        } else {
            ServiceError::internal(format!("HTTP client error: {}", err))
        };

        if let Some(status) = err.status() {
            service_error.with_context(context.status_code(status.as_u16()))
        } else {
            service_error.with_context(context)
        }
    }
}

/// Convert serde_json errors to ServiceError
impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::parsing(format!("JSON error: {}", err))
            .with_context(ErrorContext::for_service("json"))
    }
}
