//! Utility module for common functionality
//!
//! This module provides small helpers used across the Triage SDK and the
//! triage core.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns for secrets that must never reach the logs
static SENSITIVE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)x-goog-api-key[=:]\s*[A-Za-z0-9\-_]+", "x-goog-api-key=[REDACTED]"),
        (r"(?i)key=[A-Za-z0-9\-_]{10,}", "key=[REDACTED]"),
        (r"Bearer [A-Za-z0-9\-_.]+", "Bearer [REDACTED]"),
        (r"(?i)api[_-]?key[=:]\s*[A-Za-z0-9\-_]+", "api_key=[REDACTED]"),
        (r"AIza[0-9A-Za-z\-_]{20,}", "[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Largest char boundary in `s` that is `<= index`
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary in `s` that is `>= index`
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Truncate a string to a maximum length, adding ellipsis if truncated
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s[..floor_char_boundary(s, max_len)].to_string()
    } else {
        format!("{}...", &s[..floor_char_boundary(s, max_len - 3)])
    }
}

/// The first `max_len` bytes of `s`, cut on a char boundary
pub fn head(s: &str, max_len: usize) -> &str {
    &s[..floor_char_boundary(s, max_len)]
}

/// The last `max_len` bytes of `s`, cut on a char boundary
pub fn tail(s: &str, max_len: usize) -> &str {
    if max_len >= s.len() {
        return s;
    }
    &s[ceil_char_boundary(s, s.len() - max_len)..]
}

/// Keep the head and tail of `s` and replace the middle with `marker`
pub fn elide_middle(s: &str, head_len: usize, tail_len: usize, marker: &str) -> String {
    if s.len() <= head_len + tail_len {
        return s.to_string();
    }
    format!("{}{}{}", head(s, head_len), marker, tail(s, tail_len))
}

/// Sanitize a string for logging (remove sensitive data patterns)
pub fn sanitize_for_logging(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in SENSITIVE_PATTERNS.iter() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Generate a unique request ID
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parse a duration from a string (e.g., "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(truncate_string("hi", 2), "hi");
        // multi-byte characters are never split
        assert_eq!(truncate_string("SpO₂ falling", 7), "SpO...");
    }

    #[test]
    fn test_elide_middle() {
        let text = "a".repeat(10) + &"b".repeat(10) + &"c".repeat(10);
        let elided = elide_middle(&text, 10, 10, "|");
        assert_eq!(elided, format!("{}|{}", "a".repeat(10), "c".repeat(10)));
        assert_eq!(elide_middle("short", 10, 10, "|"), "short");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_sanitize_for_logging() {
        let input = "POST https://example.test/v1beta?key=AIzaSyA1234567890abcdefghijkl failed";
        let output = sanitize_for_logging(input);
        assert!(output.contains("[REDACTED]"));
        assert!(!output.contains("AIzaSyA1234567890abcdefghijkl"));
    }
}
