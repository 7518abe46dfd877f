//! Clinical data types and deterministic summaries
//!
//! Labs and vitals are turned into short interpretive sentences that are sent
//! to the model alongside the raw data. Summaries are pure functions of their
//! input.

use std::fmt::Write as _;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Lab values keyed by analyte name, in extraction order
pub type LabPanel = Map<String, Value>;

pub const NO_LAB_DATA: &str = "Tabular Data Feature: No lab data available.";
pub const NO_VITALS_DATA: &str = "Time-Series Feature: No vitals data available.";
pub const INSUFFICIENT_VITALS: &str = "Time-Series Feature: Insufficient vitals data for trend analysis.";
pub const INSUFFICIENT_VALID_VITALS: &str = "Time-Series Feature: Insufficient valid vitals data for trend analysis.";

/// One vitals measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalSample {
    #[serde(deserialize_with = "time_label")]
    pub time: String,

    #[serde(rename = "SpO2", default, skip_serializing_if = "Option::is_none")]
    pub spo2: Option<f64>,

    #[serde(rename = "HeartRate", default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
}

impl VitalSample {
    pub fn new(time: impl Into<String>, spo2: Option<f64>, heart_rate: Option<f64>) -> Self {
        Self {
            time: time.into(),
            spo2,
            heart_rate,
        }
    }

    fn has_any_value(&self) -> bool {
        self.spo2.is_some() || self.heart_rate.is_some()
    }
}

/// Accept `"00:00"` as well as bare numbers for the time label
fn time_label<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Err(serde::de::Error::custom("missing time label")),
        other => Ok(other.to_string()),
    }
}

/// Summaries passed to the model with the patient data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessedSummaries {
    pub tabular: Option<String>,
    pub timeseries: Option<String>,
}

/// Non-null, non-zero, non-empty
pub fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Lab value as shown in prompts: strings unquoted, numbers as-is
pub fn lab_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Integral values print without a fractional part
pub(crate) fn number_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Produces the lab and vitals sentences sent to the model
pub trait ClinicalSummarizer: Send + Sync {
    fn summarize_labs(&self, labs: &LabPanel) -> String;

    fn summarize_vitals(&self, vitals: &[VitalSample]) -> String;

    /// Summaries for whatever data is present
    fn summarize(&self, labs: Option<&LabPanel>, vitals: Option<&[VitalSample]>) -> PreprocessedSummaries {
        PreprocessedSummaries {
            tabular: labs.filter(|l| !l.is_empty()).map(|l| self.summarize_labs(l)),
            timeseries: vitals.filter(|v| !v.is_empty()).map(|v| self.summarize_vitals(v)),
        }
    }
}

/// Threshold-based summaries
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedSummarizer;

impl RuleBasedSummarizer {
    fn interpret(name: &str, value: f64) -> Option<String> {
        let shown = number_text(value);
        let key = name.to_ascii_lowercase();

        if key == "wbc" || key.contains("white") {
            return Some(if value >= 18.0 {
                format!("WBC {} - marked leukocytosis, suggests severe infection.", shown)
            } else if value >= 11.0 {
                format!("WBC {} - elevated, possible infection or stress.", shown)
            } else {
                format!("WBC {} - within normal range.", shown)
            });
        }

        if key.contains("lactate") || key.contains("lactic") || key == "lac" {
            return Some(if value >= 4.0 {
                format!("Lactate {} - severe hyperlactatemia, concerning for tissue hypoperfusion.", shown)
            } else if value >= 2.0 {
                format!("Lactate {} - elevated, may indicate early hypoperfusion.", shown)
            } else {
                format!("Lactate {} - within normal range.", shown)
            });
        }

        if key.contains("creatinine") || key == "cr" {
            return Some(if value >= 2.0 {
                format!("Creatinine {} - significantly elevated, suggests acute kidney injury.", shown)
            } else if value >= 1.3 {
                format!("Creatinine {} - elevated, possible renal dysfunction.", shown)
            } else {
                format!("Creatinine {} - within normal range.", shown)
            });
        }

        None
    }

    fn duration_phrase(sample_count: usize) -> String {
        match sample_count.saturating_sub(1) {
            1 => "1 hour".to_string(),
            n if n < 4 => format!("{} hours", n),
            n => format!("{} measurement intervals", n),
        }
    }
}

impl ClinicalSummarizer for RuleBasedSummarizer {
    fn summarize_labs(&self, labs: &LabPanel) -> String {
        let present: Vec<(&String, &Value)> = labs.iter().filter(|(_, v)| is_meaningful(v)).collect();
        if present.is_empty() {
            return NO_LAB_DATA.to_string();
        }

        let listed: Vec<String> = present
            .iter()
            .map(|(name, value)| format!("{}: {}", name, lab_value_text(value)))
            .collect();
        let mut summary = format!("Tabular Data Feature: Lab values extracted from image: {}.", listed.join(", "));

        for (name, value) in &present {
            if let Some(sentence) = value.as_f64().and_then(|v| Self::interpret(name, v)) {
                let _ = write!(summary, " {}", sentence);
            }
        }

        summary
    }

    fn summarize_vitals(&self, vitals: &[VitalSample]) -> String {
        if vitals.len() < 2 {
            return INSUFFICIENT_VITALS.to_string();
        }

        let valid: Vec<&VitalSample> = vitals.iter().filter(|v| v.has_any_value()).collect();
        let (Some(first), Some(last)) = (valid.first(), valid.last()) else {
            return INSUFFICIENT_VALID_VITALS.to_string();
        };
        if valid.len() < 2 {
            return INSUFFICIENT_VALID_VITALS.to_string();
        }

        let duration = Self::duration_phrase(vitals.len());

        let spo2 = first.spo2.zip(last.spo2);
        let heart_rate = first.heart_rate.zip(last.heart_rate);

        let spo2_text = match spo2 {
            Some((start, end)) => format!("SpO2 declined from {}% to {}%", number_text(start), number_text(end)),
            None => "SpO2 data unavailable".to_string(),
        };
        let hr_text = match heart_rate {
            Some((start, end)) => format!("Heart Rate increased from {} to {}", number_text(start), number_text(end)),
            None => "Heart Rate data unavailable".to_string(),
        };

        match (spo2, heart_rate) {
            (Some((spo2_start, spo2_end)), Some((hr_start, hr_end))) => {
                let spo2_drop = spo2_start - spo2_end;
                let hr_rise = hr_end - hr_start;

                let interpretation = if spo2_drop >= 10.0 && hr_rise >= 30.0 {
                    "This indicates ongoing respiratory and circulatory distress."
                } else if spo2_drop >= 5.0 {
                    "This indicates developing respiratory compromise."
                } else if hr_rise >= 30.0 {
                    "This indicates significant cardiovascular stress or compensation."
                } else {
                    "This indicates moderate changes requiring close monitoring."
                };

                format!(
                    "Time-Series Feature: Vitals trend shows a progressive deterioration over {}. {} and {}. {}",
                    duration, spo2_text, hr_text, interpretation
                )
            }
            _ => format!(
                "Time-Series Feature: Vitals trend over {}. {}. {}. Partial vitals data available - complete assessment requires all measurements.",
                duration, spo2_text, hr_text
            ),
        }
    }
}
