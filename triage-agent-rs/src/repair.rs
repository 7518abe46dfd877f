//! Staged extraction of a diagnostic report from model output
//!
//! Model text may be fenced, wrapped in prose, truncated mid-string or missing
//! closing brackets. Extraction runs a fixed pipeline of stages and the first
//! one that yields an object with a recognizable urgency wins.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::report::{urgency_of, DiagnosticReport};

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("trailing comma regex must compile"));

/// Why a stage could not produce a report object
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("empty input")]
    Empty,

    #[error("invalid JSON: {0}")]
    Syntax(String),

    #[error("no JSON object found")]
    NoObject,

    #[error("top-level JSON value is not an object")]
    NotAnObject,

    #[error("object has no recognizable triage urgency")]
    MissingUrgency,

    #[error("no repairable defect found")]
    NothingToRepair,
}

/// The stage that produced an extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Direct,
    Structural,
    Aggressive,
    OuterObject,
}

/// A report object pulled out of model text
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReport {
    /// The parsed object
    pub value: Value,

    /// The JSON text that parsed, after any repair
    pub json_text: String,

    pub stage: Stage,
}

impl ExtractedReport {
    /// Typed view of the extracted object
    pub fn report(&self) -> Option<DiagnosticReport> {
        DiagnosticReport::from_value(&self.value)
    }
}

/// Remove one leading code fence (with optional language tag) and one
/// trailing fence
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix("```") {
        // drop the language tag line, e.g. ```json
        body = match rest.find('\n') {
            Some(newline) if rest[..newline].chars().all(|c| c.is_ascii_alphanumeric()) => &rest[newline + 1..],
            _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
    }

    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }

    body.trim()
}

/// Parse `text` and check it has the shape of a report
pub fn parse_checked(text: &str) -> Result<Value, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    let value: Value = serde_json::from_str(text).map_err(|e| ExtractError::Syntax(e.to_string()))?;
    let object = value.as_object().ok_or(ExtractError::NotAnObject)?;
    if urgency_of(object).is_none() {
        return Err(ExtractError::MissingUrgency);
    }

    Ok(value)
}

/// Close what a truncated response left open.
///
/// Scans from the first `{`, tracking nesting and string state. A string
/// still open at the end of a line is closed there (before a trailing comma
/// when present). Scanning stops at the brace that closes the outer object;
/// missing closers are appended in nesting order.
pub fn repair_structural(text: &str) -> Result<String, ExtractError> {
    let start = text.find('{').ok_or(ExtractError::NoObject)?;

    let mut out = String::with_capacity(text.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text[start..].chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => {
                    close_string(&mut out);
                    in_string = false;
                    out.push(c);
                }
                _ => out.push(c),
            }
            continue;
        }

        out.push(c);
        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
                if closers.is_empty() {
                    break;
                }
            }
            _ => {}
        }
    }

    if in_string {
        close_string(&mut out);
    }

    Ok(close_open(out, &closers))
}

/// Line-oriented repair for output the structural pass cannot fix.
///
/// Lines with an odd number of unescaped quotes that do not end in a quote
/// get their string closed, then brackets are rebalanced over the whole text.
pub fn repair_aggressive(text: &str) -> Result<String, ExtractError> {
    let start = text.find('{').ok_or(ExtractError::NoObject)?;

    let mut found_issue = false;
    let lines: Vec<String> = text[start..]
        .split('\n')
        .map(|line| {
            if unescaped_quotes(line) % 2 == 0 || line.trim_end().ends_with('"') {
                return line.to_string();
            }
            found_issue = true;
            reclose_line(line)
        })
        .collect();

    if !found_issue {
        return Err(ExtractError::NothingToRepair);
    }

    let joined = TRAILING_COMMA.replace_all(&lines.join("\n"), "$1").into_owned();
    let closers = open_closers(&joined);
    Ok(close_open(joined, &closers))
}

fn close_string(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
        out.push_str("\",");
    } else {
        out.push('"');
    }
}

fn close_open(mut out: String, closers: &[char]) -> String {
    let mut closers = closers.to_vec();
    if let Some(cut) = dangling_tail(&out) {
        out.truncate(cut);
        closers = open_closers(&out);
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
    if out.ends_with(':') {
        out.push_str(" null");
    }
    out.extend(closers.iter().rev());
    out
}

/// Where to cut `text` when it ends in a member that cannot be completed:
/// an object key with no value, or a partial number or literal.
///
/// The cut keeps an opening `{` or `[` and drops a separating `,`.
fn dangling_tail(text: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    let mut last_separator: Option<(usize, char)> = None;
    let mut last_colon = None;
    let mut last_close = None;

    for (i, c) in text.char_indices() {
        if in_string {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' | '{' | '[' => last_separator = Some((i, c)),
            ':' => last_colon = Some(i),
            '}' | ']' => last_close = Some(i),
            _ => {}
        }
    }

    if in_string {
        return None;
    }

    let (separator, separator_char) = last_separator?;
    let boundary = [Some(separator), last_colon, last_close].into_iter().flatten().max()?;
    if last_close == Some(boundary) {
        return None;
    }

    let tail = text[boundary + 1..].trim();
    if tail.is_empty() {
        return None;
    }

    let complete = serde_json::from_str::<Value>(tail).is_ok();
    let dangling = if last_colon == Some(boundary) {
        !complete
    } else {
        // after `{` or `,` in an object only a key can follow
        open_closers(text).last() == Some(&'}') || !complete
    };
    if !dangling {
        return None;
    }

    Some(if separator_char == ',' { separator } else { separator + 1 })
}

fn unescaped_quotes(line: &str) -> usize {
    let mut count = 0;
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            count += 1;
        }
    }
    count
}

fn reclose_line(line: &str) -> String {
    let trimmed = line.trim_end();
    if let Some(body) = trimmed.strip_suffix(',') {
        return format!("{}\",", body.trim_end());
    }

    if let Some(colon) = line.find(':') {
        let value = line[colon + 1..].trim();
        if let Some(unquoted) = value.strip_prefix('"') {
            return format!("{} \"{}\",", &line[..colon + 1], unquoted.trim_end());
        }
    }

    format!("{}\"", trimmed)
}

/// Closers still owed at the end of `text`, innermost last
fn open_closers(text: &str) -> Vec<char> {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
            }
            _ => {}
        }
    }

    closers
}

fn repaired(text: &str, repair: fn(&str) -> Result<String, ExtractError>) -> Result<(Value, String), ExtractError> {
    let fixed = repair(text)?;
    let value = parse_checked(&fixed)?;
    Ok((value, fixed))
}

fn run_stage(stage: Stage, text: &str) -> Result<(Value, String), ExtractError> {
    match stage {
        Stage::Direct => parse_checked(text).map(|value| (value, text.to_string())),
        Stage::Structural => repaired(text, repair_structural),
        Stage::Aggressive => repaired(text, repair_aggressive),
        Stage::OuterObject => outer_object(text),
    }
}

fn outer_object(text: &str) -> Result<(Value, String), ExtractError> {
    let start = text.find('{').ok_or(ExtractError::NoObject)?;
    let end = text.rfind('}').filter(|end| *end > start).ok_or(ExtractError::NoObject)?;
    let span = &text[start..=end];

    parse_checked(span)
        .map(|value| (value, span.to_string()))
        .or_else(|_| repaired(span, repair_structural))
        .or_else(|_| repaired(span, repair_aggressive))
}

/// Run the extraction pipeline over `text`
pub fn extract_report(text: &str) -> Option<ExtractedReport> {
    if text.trim().is_empty() {
        return None;
    }

    let cleaned = strip_code_fence(text);

    for stage in [Stage::Direct, Stage::Structural, Stage::Aggressive, Stage::OuterObject] {
        match run_stage(stage, cleaned) {
            Ok((value, json_text)) => {
                debug!("Extracted report JSON at stage {:?}", stage);
                return Some(ExtractedReport { value, json_text, stage });
            }
            Err(e) => debug!("Extraction stage {:?} failed: {}", stage, e),
        }
    }

    None
}

/// Extract and type a report from `text`
pub fn parse_report(text: &str) -> Option<DiagnosticReport> {
    extract_report(text).and_then(|extracted| extracted.report())
}

/// Pull any JSON object out of `text`: fenced, bare, or embedded in prose.
/// No report shape is required.
pub fn extract_object(text: &str) -> Option<Value> {
    let cleaned = strip_code_fence(text);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(cleaned) {
        return Some(value);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}').filter(|end| *end > start)?;
    serde_json::from_str::<Value>(&cleaned[start..=end])
        .ok()
        .filter(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TriageUrgency;

    #[test]
    fn test_direct_parse() {
        let extracted = extract_report(r#"{"triage_urgency": "RED", "differential_diagnosis": ["Sepsis"]}"#).unwrap();
        assert_eq!(extracted.stage, Stage::Direct);
        assert_eq!(extracted.report().unwrap().triage_urgency, TriageUrgency::Red);
    }

    #[test]
    fn test_fenced_json() {
        let text = "```json\n{\"triage_urgency\": \"YELLOW\", \"confidence_score\": 0.6}\n```";
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.stage, Stage::Direct);
        assert_eq!(extracted.value["confidence_score"], 0.6);

        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("```json {\"a\": 1}```"), "{\"a\": 1}");
    }

    #[test]
    fn test_prose_wrapped_json() {
        let text = "Here is my assessment:\n{\"triage_urgency\": \"GREEN\", \"differential_diagnosis\": [\"Viral URI\"]}\nLet me know if you need more.";
        let report = parse_report(text).unwrap();
        assert_eq!(report.triage_urgency, TriageUrgency::Green);
        assert_eq!(report.differential_diagnosis.len(), 1);
    }

    #[test]
    fn test_unterminated_string_multiline() {
        let text = "{\n  \"triage_urgency\": \"RED\",\n  \"differential_diagnosis\": [\"Sepsis\"],\n  \"evidence_summary\": \"Lactate 4.8 with hypotension,\n  \"confidence_score\": 0.9\n}";
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.stage, Stage::Structural);
        assert_eq!(extracted.value["evidence_summary"], "Lactate 4.8 with hypotension");
        assert_eq!(extracted.value["confidence_score"], 0.9);
    }

    #[test]
    fn test_truncated_single_line() {
        let text = r#"{"triage_urgency": "RED", "differential_diagnosis": ["Septic shock"], "evidence_summary": "Rising lact"#;
        let report = parse_report(text).unwrap();
        assert_eq!(report.triage_urgency, TriageUrgency::Red);
        assert_eq!(report.evidence_summary, "Rising lact");
    }

    #[test]
    fn test_missing_closers() {
        let text = r#"{"triage_urgency": "YELLOW", "differential_diagnosis": ["A", "B""#;
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.json_text, r#"{"triage_urgency": "YELLOW", "differential_diagnosis": ["A", "B"]}"#);

        let text = r#"{"triage_urgency": "RED", "tool_verification_data": {"sepsis_risk": {"risk_score": 30,"#;
        let report = parse_report(text).unwrap();
        assert_eq!(report.risk_score(), Some(30.0));

        let text = r#"{"triage_urgency": "RED", "evidence_summary":"#;
        let extracted = extract_report(text).unwrap();
        assert!(extracted.value["evidence_summary"].is_null());
    }

    #[test]
    fn test_truncated_inside_key() {
        let text = r#"{"triage_urgency": "RED", "differential_diagnosis": ["Sepsis"], "evidence_sum"#;
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.json_text, r#"{"triage_urgency": "RED", "differential_diagnosis": ["Sepsis"]}"#);

        let text = "{\n  \"triage_urgency\": \"RED\",\n  \"differential_diagnosis\": [\"Sepsis\"],\n  \"evidence_summ";
        let report = parse_report(text).unwrap();
        assert_eq!(report.triage_urgency, TriageUrgency::Red);
        assert_eq!(report.differential_diagnosis.len(), 1);
    }

    #[test]
    fn test_truncated_after_key() {
        let text = r#"{"triage_urgency": "RED", "differential_diagnosis": ["Sepsis"], "evidence_summary""#;
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.stage, Stage::Structural);
        assert!(extracted.value.get("evidence_summary").is_none());

        let text = r#"{"triage_urgency": "YELLOW", "tool_verification_data": {"sepsis"#;
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.json_text, r#"{"triage_urgency": "YELLOW", "tool_verification_data": {}}"#);
    }

    #[test]
    fn test_truncated_inside_scalar() {
        let text = r#"{"triage_urgency": "RED", "differential_diagnosis": ["Sepsis"], "confidence_score": 0."#;
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.value["triage_urgency"], "RED");
        assert!(extracted.value.get("confidence_score").is_none());

        let text = r#"{"triage_urgency": "RED", "differential_diagnosis": ["Sepsis"], "flag": tr"#;
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.json_text, r#"{"triage_urgency": "RED", "differential_diagnosis": ["Sepsis"]}"#);

        let text = r#"{"triage_urgency": "GREEN", "differential_diagnosis": ["Viral URI", nu"#;
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.value["differential_diagnosis"], serde_json::json!(["Viral URI"]));
    }

    #[test]
    fn test_complete_tail_is_kept() {
        let text = r#"{"triage_urgency": "RED", "confidence_score": 0.9"#;
        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.value["confidence_score"], 0.9);

        let text = r#"{"triage_urgency": "RED", "differential_diagnosis": ["Sepsis", "AKI""#;
        assert_eq!(extract_report(text).unwrap().value["differential_diagnosis"][1], "AKI");
    }

    #[test]
    fn test_aggressive_stage() {
        let text = "{\n  \"triage_urgency\": \"RED\",\n  \"evidence_summary\": \"abc\n  \"confidence_score\": 0.9\n}";
        assert!(repair_structural(text).and_then(|t| parse_checked(&t)).is_err());

        let extracted = extract_report(text).unwrap();
        assert_eq!(extracted.stage, Stage::Aggressive);
        assert_eq!(extracted.value["evidence_summary"], "abc");
    }

    #[test]
    fn test_aggressive_needs_a_defect() {
        assert_eq!(repair_aggressive("{\"a\": 1"), Err(ExtractError::NothingToRepair));
        assert_eq!(repair_aggressive("no object"), Err(ExtractError::NoObject));
    }

    #[test]
    fn test_shape_check() {
        assert!(extract_report(r#"{"differential_diagnosis": ["x"]}"#).is_none());
        assert!(extract_report(r#"{"triage_urgency": "PURPLE"}"#).is_none());
        assert!(extract_report(r#"["RED"]"#).is_none());
        assert!(extract_report("   ").is_none());
        assert_eq!(parse_checked("[1]"), Err(ExtractError::NotAnObject));
        assert_eq!(parse_checked("{\"a\": 1}"), Err(ExtractError::MissingUrgency));
    }

    #[test]
    fn test_extract_object_without_shape() {
        let value = extract_object("```json\n{\"labs\": {\"WBC\": 12.5}, \"vitals\": []}\n```").unwrap();
        assert_eq!(value["labs"]["WBC"], 12.5);

        let value = extract_object("Sure! {\"labs\": {}} done").unwrap();
        assert!(value["labs"].is_object());

        assert!(extract_object("nothing here").is_none());
    }
}
