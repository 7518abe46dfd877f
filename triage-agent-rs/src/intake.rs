//! Image intake
//!
//! Uploaded images are routed by a filename heuristic: imaging studies are
//! forwarded to the model as inline data, everything else is treated as a
//! photographed lab report or vitals chart. Every supported image is analysed
//! and any labs or vitals found in it are merged into the session.
//!
//! The routing heuristic is fragile by nature (`"ct"` matches `"doctor"`), so
//! it is kept in [`classify_upload`] where it can be replaced in one place.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use triage_sdk::core::{GenerateConfig, GenerateRequest};
use triage_sdk::gemini::Part;
use triage_sdk::{ModelClient, RetryConfig, RetryExecutor};

use crate::clinical::{is_meaningful, LabPanel, VitalSample};
use crate::content::InlineImage;
use crate::prompts::{image_data_extraction_prompt, IMAGE_ANALYSIS_PROMPT};
use crate::repair::extract_object;
use crate::session::SessionState;

static SUPPORTED_MIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"image/(jpeg|jpg|png)").expect("supported mime regex must compile"));

static SUPPORTED_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(jpg|jpeg|png)$").expect("supported extension regex must compile"));

static IMAGING_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"xray|x-ray|scan|ct|mri|radiology|chest|lung").expect("imaging name regex must compile")
});

const LAB_TERMS: [&str; 8] = ["lab", "wbc", "hemoglobin", "lactate", "troponin", "creatinine", "bun", "glucose"];
const VITALS_TERMS: [&str; 6] = ["spo2", "sp o2", "heart rate", "hr", "vitals", "oxygen saturation"];

/// Routing decision for an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// X-ray, CT, MRI and similar studies
    Imaging,
    /// Photographed lab report or vitals chart
    LabOrVitals,
    Unsupported,
}

pub fn classify_upload(filename: &str, mime_type: &str) -> UploadKind {
    let name = filename.to_lowercase();
    let supported = SUPPORTED_MIME.is_match(&mime_type.to_lowercase()) || SUPPORTED_EXTENSION.is_match(&name);

    if !supported {
        UploadKind::Unsupported
    } else if IMAGING_NAME.is_match(&name) {
        UploadKind::Imaging
    } else {
        UploadKind::LabOrVitals
    }
}

/// A user-supplied file
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub filename: String,
    pub mime_type: String,

    /// Base64-encoded bytes
    pub data: String,
}

impl Upload {
    pub fn from_bytes(filename: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn kind(&self) -> UploadKind {
        classify_upload(&self.filename, &self.mime_type)
    }

    pub fn to_inline_image(&self) -> InlineImage {
        InlineImage::new(self.mime_type.clone(), self.data.clone())
    }
}

/// What was read out of one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageExtraction {
    pub labs: LabPanel,
    pub vitals: Vec<VitalSample>,
    pub analysis_text: Option<String>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait ImageExtractor: Send + Sync {
    async fn extract(&self, image: &InlineImage) -> ImageExtraction;
}

fn mentions_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| text.contains(term))
}

/// Parse the `{"labs": {...}, "vitals": [...]}` extraction answer.
///
/// Null and zero lab values and vitals without a time label are dropped.
pub fn parse_extraction(text: &str) -> (LabPanel, Vec<VitalSample>) {
    let Some(value) = extract_object(text) else {
        return (LabPanel::new(), Vec::new());
    };

    let labs = value
        .get("labs")
        .and_then(Value::as_object)
        .map(|labs| {
            labs.iter()
                .filter(|(_, v)| is_meaningful(v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let vitals = value
        .get("vitals")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("time").map_or(false, |t| !t.is_null()))
                .filter_map(|item| serde_json::from_value::<VitalSample>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    (labs, vitals)
}

/// Two-call extractor: free-text analysis with the image, then a text-only
/// structured extraction when the analysis mentions labs or vitals
pub struct GeminiImageExtractor {
    client: Arc<dyn ModelClient>,
    retry: RetryExecutor,
}

impl GeminiImageExtractor {
    pub fn new(client: Arc<dyn ModelClient>, retry: RetryConfig) -> Self {
        Self {
            client,
            retry: RetryExecutor::new(retry),
        }
    }

    async fn generate_text(&self, parts: Vec<Part>) -> triage_sdk::Result<Option<String>> {
        let request = GenerateRequest::from_parts(parts, GenerateConfig::plain());
        let client = &self.client;

        let response = self
            .retry
            .execute(|| {
                let request = request.clone();
                async move { client.generate(request).await }
            })
            .await?;

        Ok(response.text.filter(|text| !text.trim().is_empty()))
    }

    async fn analyse(&self, image: &InlineImage) -> triage_sdk::Result<ImageExtraction> {
        let mut extraction = ImageExtraction::default();

        let Some(analysis) = self.generate_text(vec![image.to_part(), Part::text(IMAGE_ANALYSIS_PROMPT)]).await? else {
            extraction
                .errors
                .push("No analysis received from Gemini for the image.".to_string());
            return Ok(extraction);
        };

        let lower = analysis.to_lowercase();
        if mentions_any(&lower, &LAB_TERMS) || mentions_any(&lower, &VITALS_TERMS) {
            debug!("Image analysis mentions labs or vitals, requesting structured extraction");
            let prompt = image_data_extraction_prompt(&analysis);
            if let Some(answer) = self.generate_text(vec![Part::text(prompt)]).await? {
                let (labs, vitals) = parse_extraction(&answer);
                info!("Extracted {} lab value(s) and {} vitals sample(s) from image", labs.len(), vitals.len());
                extraction.labs = labs;
                extraction.vitals = vitals;
            }
        }

        extraction.analysis_text = Some(analysis);
        Ok(extraction)
    }
}

#[async_trait]
impl ImageExtractor for GeminiImageExtractor {
    async fn extract(&self, image: &InlineImage) -> ImageExtraction {
        match self.analyse(image).await {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!("Image extraction failed: {}", e.describe());
                ImageExtraction {
                    errors: vec![format!("Error extracting data from image: {}", e)],
                    ..Default::default()
                }
            }
        }
    }
}

/// Result of processing all uploads of a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntakeOutcome {
    /// First imaging upload, forwarded to the model as inline data
    pub primary_image: Option<InlineImage>,

    /// Analyses of all images, blank-line separated
    pub image_analysis: Option<String>,

    pub warnings: Vec<String>,
}

pub async fn process_uploads(
    uploads: &[Upload],
    extractor: &dyn ImageExtractor,
    state: &mut SessionState,
) -> IntakeOutcome {
    let mut outcome = IntakeOutcome::default();
    let mut analyses: Vec<String> = Vec::new();

    for upload in uploads {
        let kind = upload.kind();
        debug!("Upload {} classified as {:?}", upload.filename, kind);

        if kind == UploadKind::Unsupported {
            outcome
                .warnings
                .push(format!("Invalid image file type for {}. Skipping.", upload.filename));
            continue;
        }

        let image = upload.to_inline_image();
        if kind == UploadKind::Imaging && outcome.primary_image.is_none() {
            outcome.primary_image = Some(image.clone());
        }

        let extraction = extractor.extract(&image).await;
        if let Some(analysis) = &extraction.analysis_text {
            analyses.push(analysis.clone());
        }
        outcome.warnings.extend(extraction.errors.iter().cloned());
        state.apply_extraction(&extraction);
    }

    if !analyses.is_empty() {
        outcome.image_analysis = Some(analyses.join("\n\n"));
    }
    outcome
}
