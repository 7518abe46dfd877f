//! Error mapping for upstream model APIs
//!
//! Converts HTTP error responses into the normalized ServiceError type.

use reqwest::StatusCode;
use serde_json::Value;

use super::{ErrorContext, ServiceError};

/// Map a Gemini API error body to a ServiceError.
///
/// Gemini errors look like
/// `{"error": {"code": 429, "message": "...", "status": "RESOURCE_EXHAUSTED"}}`.
pub fn map_gemini_error(status: StatusCode, json: &Value, context: &mut ErrorContext) -> ServiceError {
    context.service = "gemini".to_string();

    let error = json.get("error").unwrap_or(json);

    if let Some(code) = error.get("status").and_then(|s| s.as_str()) {
        context.error_code = Some(code.to_string());
    }

    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown Gemini error");

    let message = match context.error_code.as_deref() {
        Some(code) => format!("{} {}: {}", status.as_u16(), code, message),
        None => format!("{}: {}", status.as_u16(), message),
    };

    map_status(status, message)
}

/// Map a generic HTTP error to a ServiceError
pub fn map_http_error(status: StatusCode, body: &str, context: &mut ErrorContext) -> ServiceError {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if context.service == "gemini" || json.get("error").map_or(false, Value::is_object) {
            return map_gemini_error(status, &json, context);
        }

        let message = json
            .get("message")
            .or_else(|| json.get("error"))
            .and_then(|m| m.as_str())
            .unwrap_or(body);

        return map_status(status, format!("{}: {}", status.as_u16(), message));
    }

    let message = if body.is_empty() {
        status.to_string()
    } else if body.len() > 100 {
        format!("{}: {}...", status, crate::util::truncate_string(body, 100))
    } else {
        format!("{}: {}", status, body)
    };

    map_status(status, message)
}

fn map_status(status: StatusCode, message: String) -> ServiceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceError::authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ServiceError::rate_limit(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ServiceError::timeout(message),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => ServiceError::validation(message),
        _ => ServiceError::service(message),
    }
}
