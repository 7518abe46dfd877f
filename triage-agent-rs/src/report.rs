//! Diagnostic report model
//!
//! A `DiagnosticReport` is built once per run from model output (parsed
//! directly, repaired, or synthesized by the fallback) and is only changed
//! afterwards by [`DiagnosticReport::merge_fallback`] and by writing real tool
//! outputs into `tool_verification_data`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys under which a model may place the triage category
pub const URGENCY_KEYS: [&str; 4] = ["triage_urgency", "triageUrgency", "urgency", "triage_level"];

/// `tool_verification_data` keys that carry a sepsis risk score
pub const RISK_SCORE_KEYS: [&str; 3] = ["sepsis_risk", "risk_score", "calculate_sepsis_risk"];

/// `tool_verification_data` keys that may carry the vitals chart, in lookup order
pub const VISUALIZATION_KEYS: [&str; 3] = ["visualization_base64", "base64_image", "vitals_visualization"];

/// Triage category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriageUrgency {
    Red,
    Yellow,
    Green,
}

impl TriageUrgency {
    /// Parse the leading word of `text`, case-insensitively.
    ///
    /// `"red"`, `"RED - immediate"` and `" Yellow."` are all accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|w| !w.is_empty())?;

        match word.to_ascii_uppercase().as_str() {
            "RED" => Some(TriageUrgency::Red),
            "YELLOW" => Some(TriageUrgency::Yellow),
            "GREEN" => Some(TriageUrgency::Green),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriageUrgency::Red => "RED",
            TriageUrgency::Yellow => "YELLOW",
            TriageUrgency::Green => "GREEN",
        }
    }
}

impl fmt::Display for TriageUrgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Find a recognizable urgency in a parsed JSON object
pub fn urgency_of(object: &Map<String, Value>) -> Option<TriageUrgency> {
    URGENCY_KEYS
        .iter()
        .filter_map(|key| object.get(*key))
        .filter_map(Value::as_str)
        .find_map(TriageUrgency::parse)
}

/// One entry of the differential diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiagnosisEntry {
    /// A plain diagnosis name
    Label(String),
    /// A structured finding, e.g. `{"diagnosis": "...", "likelihood": "high"}`
    Finding(Map<String, Value>),
}

impl DiagnosisEntry {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(DiagnosisEntry::Label(s.clone())),
            Value::Object(map) => Some(DiagnosisEntry::Finding(map.clone())),
            other => Some(DiagnosisEntry::Label(other.to_string())),
        }
    }

    /// Human-readable name of the diagnosis
    pub fn label(&self) -> String {
        match self {
            DiagnosisEntry::Label(label) => label.clone(),
            DiagnosisEntry::Finding(map) => ["diagnosis", "name", "condition", "hypothesis"]
                .iter()
                .filter_map(|key| map.get(*key))
                .find_map(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        }
    }
}

/// Structured triage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    /// Competing hypotheses, most likely first
    pub differential_diagnosis: Vec<DiagnosisEntry>,

    pub triage_urgency: TriageUrgency,

    /// Confidence in the primary diagnosis, in [0, 1]
    pub confidence_score: f64,

    pub evidence_summary: String,

    /// Open map of tool results (risk score, vitals chart, ...)
    pub tool_verification_data: Map<String, Value>,
}

impl DiagnosticReport {
    /// Build a report from a parsed JSON object.
    ///
    /// Returns `None` when the value is not an object or carries no
    /// recognizable urgency. Other fields are normalized leniently: missing
    /// fields become empty, a single diagnosis string becomes a one-entry list
    /// and confidence given as a percentage is scaled into [0, 1].
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let triage_urgency = urgency_of(object)?;

        let differential_diagnosis = match object.get("differential_diagnosis") {
            Some(Value::Array(items)) => items.iter().filter_map(DiagnosisEntry::from_value).collect(),
            Some(other) => DiagnosisEntry::from_value(other).into_iter().collect(),
            None => Vec::new(),
        };

        let confidence_score = object
            .get("confidence_score")
            .and_then(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
                _ => None,
            })
            .map(normalize_confidence)
            .unwrap_or(0.0);

        let evidence_summary = match object.get("evidence_summary") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let tool_verification_data = object
            .get("tool_verification_data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Some(Self {
            differential_diagnosis,
            triage_urgency,
            confidence_score,
            evidence_summary,
            tool_verification_data,
        })
    }

    /// The report as a JSON value
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The risk score carried under any recognized key
    pub fn risk_score(&self) -> Option<f64> {
        RISK_SCORE_KEYS
            .iter()
            .filter_map(|key| self.tool_verification_data.get(*key))
            .find_map(|value| match value {
                Value::Number(n) => n.as_f64(),
                Value::Object(map) => map.get("risk_score").and_then(Value::as_f64),
                _ => None,
            })
    }

    fn has_risk_score(&self) -> bool {
        RISK_SCORE_KEYS
            .iter()
            .any(|key| self.tool_verification_data.get(*key).map_or(false, |v| !v.is_null()))
    }

    /// Whether the report needs no completion by the fallback synthesizer:
    /// it names at least one diagnosis and carries a risk score.
    pub fn is_complete(&self) -> bool {
        !self.differential_diagnosis.is_empty() && self.has_risk_score()
    }

    /// The base64 vitals chart, if the report carries one
    pub fn visualization(&self) -> Option<&str> {
        let tvd = &self.tool_verification_data;

        let direct = VISUALIZATION_KEYS
            .iter()
            .filter_map(|key| tvd.get(*key))
            .filter_map(Value::as_str)
            .find(|s| !s.is_empty());
        if direct.is_some() {
            return direct;
        }

        match tvd.get("generate_vitals_visualization") {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            Some(Value::Object(map)) => map.get("result").and_then(Value::as_str).filter(|s| !s.is_empty()),
            _ => None,
        }
    }

    /// Write real tool outputs over whatever the model reported for them
    pub fn apply_ground_truth(&mut self, ground_truth: &Map<String, Value>) {
        for (key, value) in ground_truth {
            self.tool_verification_data.insert(key.clone(), value.clone());
        }
    }

    /// Fill gaps in this report from a fallback report.
    ///
    /// Only fields that are empty here are taken from `fallback`: an empty
    /// diagnosis list, a blank evidence summary, a zero confidence. The
    /// urgency is never replaced. `tool_verification_data` is merged key by
    /// key and existing keys are never overwritten. Merging the same fallback
    /// twice changes nothing the second time.
    pub fn merge_fallback(&mut self, fallback: &DiagnosticReport) {
        if self.differential_diagnosis.is_empty() {
            self.differential_diagnosis = fallback.differential_diagnosis.clone();
        }

        if self.confidence_score == 0.0 {
            self.confidence_score = fallback.confidence_score;
        }

        if self.evidence_summary.trim().is_empty() {
            self.evidence_summary = fallback.evidence_summary.clone();
        }

        for (key, value) in &fallback.tool_verification_data {
            let missing = self.tool_verification_data.get(key).map_or(true, Value::is_null);
            if missing {
                self.tool_verification_data.insert(key.clone(), value.clone());
            }
        }
    }
}

fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let scaled = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

/// Outcome of a triage run.
///
/// Failure is `report == None` with at least one entry in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    pub report: Option<DiagnosticReport>,

    /// The JSON text the report was parsed from, or the raw model text on failure
    pub raw_text: Option<String>,

    /// User-facing record of tool activity, in order
    pub tool_log: Vec<String>,

    pub errors: Vec<String>,
}

impl RunResult {
    /// Failed run with a single error
    pub fn failed(error: impl Into<String>, raw_text: Option<String>, tool_log: Vec<String>) -> Self {
        Self {
            report: None,
            raw_text,
            tool_log,
            errors: vec![error.into()],
        }
    }

    pub fn succeeded(&self) -> bool {
        self.report.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete_report() -> DiagnosticReport {
        DiagnosticReport::from_value(&json!({
            "differential_diagnosis": ["Septic shock", "Pneumonia"],
            "triage_urgency": "RED",
            "confidence_score": 0.85,
            "evidence_summary": "Hypotension with rising lactate.",
            "tool_verification_data": {"sepsis_risk": {"risk_score": 30, "score_category": "High Risk"}}
        }))
        .unwrap()
    }

    #[test]
    fn test_urgency_parsing() {
        assert_eq!(TriageUrgency::parse("RED"), Some(TriageUrgency::Red));
        assert_eq!(TriageUrgency::parse("yellow"), Some(TriageUrgency::Yellow));
        assert_eq!(TriageUrgency::parse(" Green - stable"), Some(TriageUrgency::Green));
        assert_eq!(TriageUrgency::parse("ORANGE"), None);
        assert_eq!(TriageUrgency::parse(""), None);
    }

    #[test]
    fn test_urgency_alias_keys() {
        let report = DiagnosticReport::from_value(&json!({"triageUrgency": "Yellow"})).unwrap();
        assert_eq!(report.triage_urgency, TriageUrgency::Yellow);

        let report = DiagnosticReport::from_value(&json!({"triage_level": "green"})).unwrap();
        assert_eq!(report.triage_urgency, TriageUrgency::Green);

        assert!(DiagnosticReport::from_value(&json!({"differential_diagnosis": ["x"]})).is_none());
        assert!(DiagnosticReport::from_value(&json!(["RED"])).is_none());
    }

    #[test]
    fn test_lenient_normalization() {
        let report = DiagnosticReport::from_value(&json!({
            "triage_urgency": "RED",
            "differential_diagnosis": [{"diagnosis": "Sepsis", "likelihood": "high"}, "Pneumonia", null],
            "confidence_score": 85
        }))
        .unwrap();

        assert_eq!(report.differential_diagnosis.len(), 2);
        assert_eq!(report.differential_diagnosis[0].label(), "Sepsis");
        assert!((report.confidence_score - 0.85).abs() < 1e-9);
        assert!(report.evidence_summary.is_empty());
        assert!(report.tool_verification_data.is_empty());

        let report = DiagnosticReport::from_value(&json!({"triage_urgency": "RED", "confidence_score": 250})).unwrap();
        assert_eq!(report.confidence_score, 1.0);
    }

    #[test]
    fn test_serialized_shape() {
        let value = complete_report().to_value();
        assert_eq!(value["triage_urgency"], "RED");
        assert_eq!(value["differential_diagnosis"][0], "Septic shock");
        assert_eq!(value["tool_verification_data"]["sepsis_risk"]["risk_score"], 30);
    }

    #[test]
    fn test_completeness() {
        let report = complete_report();
        assert!(report.is_complete());
        assert_eq!(report.risk_score(), Some(30.0));

        let mut no_score = report.clone();
        no_score.tool_verification_data.clear();
        assert!(!no_score.is_complete());

        let mut no_diagnosis = report;
        no_diagnosis.differential_diagnosis.clear();
        assert!(!no_diagnosis.is_complete());
    }

    #[test]
    fn test_visualization_lookup() {
        let mut report = complete_report();
        assert_eq!(report.visualization(), None);

        report
            .tool_verification_data
            .insert("generate_vitals_visualization".into(), json!({"result": "iVBORw0KGgo="}));
        assert_eq!(report.visualization(), Some("iVBORw0KGgo="));

        report.tool_verification_data.insert("base64_image".into(), json!("abc"));
        assert_eq!(report.visualization(), Some("abc"));
    }

    #[test]
    fn test_merge_fills_only_gaps() {
        let mut partial = DiagnosticReport::from_value(&json!({
            "triage_urgency": "YELLOW",
            "differential_diagnosis": [],
            "evidence_summary": "",
            "tool_verification_data": {"visualization_base64": "chart"}
        }))
        .unwrap();

        let fallback = DiagnosticReport::from_value(&json!({
            "triage_urgency": "RED",
            "differential_diagnosis": ["Sepsis"],
            "confidence_score": 0.7,
            "evidence_summary": "Inferred from labs.",
            "tool_verification_data": {
                "visualization_base64": "other",
                "sepsis_risk": {"risk_score": 22, "score_category": "High Risk"}
            }
        }))
        .unwrap();

        partial.merge_fallback(&fallback);

        assert_eq!(partial.triage_urgency, TriageUrgency::Yellow);
        assert_eq!(partial.differential_diagnosis, vec![DiagnosisEntry::Label("Sepsis".into())]);
        assert_eq!(partial.confidence_score, 0.7);
        assert_eq!(partial.evidence_summary, "Inferred from labs.");
        assert_eq!(partial.tool_verification_data["visualization_base64"], "chart");
        assert_eq!(partial.risk_score(), Some(22.0));
        assert!(partial.is_complete());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let fallback = DiagnosticReport::from_value(&json!({
            "triage_urgency": "GREEN",
            "differential_diagnosis": ["Viral URI"],
            "confidence_score": 0.4,
            "evidence_summary": "fallback",
            "tool_verification_data": {"sepsis_risk": {"risk_score": 5}, "extra": true}
        }))
        .unwrap();

        let mut once = complete_report();
        once.merge_fallback(&fallback);
        let mut twice = once.clone();
        twice.merge_fallback(&fallback);
        assert_eq!(once, twice);

        // fields of a complete report are never touched
        let original = complete_report();
        assert_eq!(once.differential_diagnosis, original.differential_diagnosis);
        assert_eq!(once.triage_urgency, original.triage_urgency);
        assert_eq!(once.confidence_score, original.confidence_score);
        assert_eq!(once.evidence_summary, original.evidence_summary);
        assert_eq!(once.tool_verification_data["sepsis_risk"], original.tool_verification_data["sepsis_risk"]);
        assert_eq!(once.tool_verification_data["extra"], true);
    }

    #[test]
    fn test_ground_truth_overwrites_model_copy() {
        let mut report = complete_report();
        let mut truth = Map::new();
        truth.insert("sepsis_risk".into(), json!({"risk_score": 12, "score_category": "Low Risk"}));
        report.apply_ground_truth(&truth);
        assert_eq!(report.risk_score(), Some(12.0));
    }
}
