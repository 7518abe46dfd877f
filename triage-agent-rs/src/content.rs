//! First user turn of a triage conversation
//!
//! Parts are emitted in a fixed order: image, notes, image analysis, lab
//! summary, vitals summary, then the tool-calling instruction block.

use serde::{Deserialize, Serialize};
use triage_sdk::gemini::Part;

use crate::clinical::{is_meaningful, lab_value_text, LabPanel, PreprocessedSummaries, VitalSample, NO_LAB_DATA, NO_VITALS_DATA};

/// Lab keys checked for a lactate value, in priority order
pub const LACTATE_KEYS: [&str; 6] = ["Lactate_level", "Lactate", "LAC", "Lactic_Acid", "lactate", "lac"];

const VITALS_TERMS: [&str; 4] = ["spo2", "heart rate", "hr", "vitals"];

/// An image forwarded to the model as inline data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,

    /// Base64-encoded bytes
    pub data: String,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn to_part(&self) -> Part {
        Part::inline_data(self.mime_type.clone(), self.data.clone())
    }
}

/// Everything known about the patient for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientInput {
    pub notes: String,
    pub image: Option<InlineImage>,
    pub labs: Option<LabPanel>,
    pub vitals: Option<Vec<VitalSample>>,
    pub image_analysis: Option<String>,
}

impl PatientInput {
    pub fn has_vitals(&self) -> bool {
        self.vitals.as_ref().map_or(false, |v| v.len() >= 2)
    }

    pub fn has_labs(&self) -> bool {
        self.labs
            .as_ref()
            .map_or(false, |labs| labs.values().any(is_meaningful))
    }

    /// Non-blank image analysis text
    pub fn image_analysis_text(&self) -> Option<&str> {
        self.image_analysis.as_deref().filter(|text| !text.trim().is_empty())
    }

    /// First meaningful lactate value under any known alias
    pub fn lactate(&self) -> Option<String> {
        let labs = self.labs.as_ref()?;
        LACTATE_KEYS
            .iter()
            .filter_map(|key| labs.get(*key))
            .find(|value| is_meaningful(value))
            .map(lab_value_text)
    }

    /// Mean of the present heart-rate readings, truncated
    pub fn average_heart_rate(&self) -> Option<i64> {
        let readings: Vec<f64> = self.vitals.as_ref()?.iter().filter_map(|v| v.heart_rate).collect();
        if readings.is_empty() {
            return None;
        }
        Some((readings.iter().sum::<f64>() / readings.len() as f64).trunc() as i64)
    }
}

/// Build the parts of the first user turn
pub fn build_patient_parts(input: &PatientInput, summaries: &PreprocessedSummaries) -> Vec<Part> {
    let mut parts = Vec::with_capacity(6);

    if let Some(image) = &input.image {
        parts.push(image.to_part());
    }

    parts.push(Part::text(format!("Patient Notes: {}", input.notes)));

    if let Some(analysis) = input.image_analysis_text() {
        parts.push(Part::text(format!("Image Analysis (from Gemini): {}", analysis)));
    }

    let has_lab_panel = input.labs.as_ref().map_or(false, |labs| !labs.is_empty());
    let tabular = summaries.tabular.as_deref().filter(|_| has_lab_panel).unwrap_or(NO_LAB_DATA);
    parts.push(Part::text(tabular));

    let has_series = input.vitals.as_ref().map_or(false, |v| !v.is_empty());
    let timeseries = summaries
        .timeseries
        .as_deref()
        .filter(|_| has_series)
        .unwrap_or(NO_VITALS_DATA);
    parts.push(Part::text(timeseries));

    parts.push(Part::text(instruction_block(input)));
    parts
}

/// Tool-calling instructions tailored to the data that is present
pub fn instruction_block(input: &PatientInput) -> String {
    let has_vitals = input.has_vitals();
    let analysis = input.image_analysis_text();

    if !(has_vitals || input.has_labs() || analysis.is_some()) {
        return "You have limited data. If you can extract any vitals or lab values from patient notes or image analysis, call the appropriate tools.".to_string();
    }

    let mut lines: Vec<String> = vec![
        "CRITICAL TOOL CALLING REQUIREMENTS:".to_string(),
        "1. You MUST call calculate_sepsis_risk. Extract parameters from available data:".to_string(),
    ];

    match input.average_heart_rate().filter(|_| has_vitals) {
        Some(hr) => lines.push(format!("   - heart_rate: {} (from vitals)", hr)),
        None => lines.push(
            "   - heart_rate: Extract from patient notes or image analysis, or use 80 as default".to_string(),
        ),
    }

    lines.push("   - blood_pressure: Extract systolic from patient notes or image analysis (look for 'BP', 'blood pressure', numbers like '120/80') or use 120 as default".to_string());

    match input.lactate() {
        Some(lactate) => lines.push(format!("   - lactate_level: {} (from labs)", lactate)),
        None => lines.push(
            "   - lactate_level: Extract from patient notes or image analysis, or use 1.0 as default".to_string(),
        ),
    }

    lines.push("   - respiratory_rate: Extract from patient notes or image analysis (look for 'RR', 'respiratory rate', 'breathing rate') or use 16 as default".to_string());

    let analysis_mentions_vitals = analysis.map_or(false, |text| {
        let lower = text.to_lowercase();
        VITALS_TERMS.iter().any(|term| lower.contains(term))
    });

    if has_vitals {
        let count = input.vitals.as_ref().map_or(0, Vec::len);
        lines.push(
            "2. You MUST call generate_vitals_visualization. Convert the vitals list to JSON string:".to_string(),
        );
        lines.push(format!("   - time_series_data: JSON string of {} vitals measurements", count));
        lines.push("   - Example format: '[{\"time\":\"00:00\",\"SpO2\":98,\"HeartRate\":72},...]'".to_string());
    } else if analysis_mentions_vitals {
        lines.push("2. You MUST call generate_vitals_visualization if you can extract vitals from the image analysis or patient notes.".to_string());
        lines.push(
            "   - Convert vitals to JSON string format: '[{\"time\":\"00:00\",\"SpO2\":98,\"HeartRate\":72},...]'"
                .to_string(),
        );
    }

    lines.push("3. After calling the tools, synthesize all data and provide your final JSON report.".to_string());
    lines.push("4. Include tool results in tool_verification_data field:".to_string());
    lines.push("   - sepsis_risk: {risk_score: <number>, score_category: 'High Risk' or 'Low Risk'}".to_string());
    lines.push("   - visualization_base64: <base64 string from generate_vitals_visualization>".to_string());

    lines.join("\n")
}
