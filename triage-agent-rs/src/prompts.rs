//! Prompt texts and the diagnostic report schema

use once_cell::sync::Lazy;
use serde_json::{json, Value};

pub const SENIOR_TRIAGE_SYSTEM_INSTRUCTION: &str = "You are MCTA, a Senior Clinical Triage Specialist operating in an emergency setting.

Your mission:
- Rapidly synthesize multimodal data (text notes, imaging, labs, and vitals trends).
- Generate a concise differential diagnosis and triage urgency.
- Transparently explain your reasoning across all modalities.
- Reliably ground your conclusions using the available tools.

Core behaviors:
- CRITICAL: You MUST ALWAYS call calculate_sepsis_risk if you have ANY of: heart rate, respiratory rate,
  lactate level, or blood pressure data. Even if values seem normal, you MUST call this tool for quantitative
  risk assessment. Extract heart rate from vitals data, respiratory rate from patient notes or vitals,
  lactate from lab data, and blood pressure from patient notes or vitals.
- CRITICAL: You MUST ALWAYS call generate_vitals_visualization if you have ANY time-series vitals data
  (even just 2 data points). Convert the vitals list to a JSON string and pass it to the tool.
  This is mandatory for visual trend confirmation. You must integrate the resulting chart base64 string
  into the tool_verification_data.visualization_base64 field of your JSON response.
- These tool calls are MANDATORY and NON-NEGOTIABLE. Do not skip them. Always call both tools when data is available.
- Be conservative in life-threatening scenarios: if in doubt between categories, err toward RED.

Output contract:
- You MUST return a single JSON object that strictly follows DIAGNOSTIC_REPORT_SCHEMA.
- Do not include any extra keys or unstructured narrative outside this JSON.
- The tool_verification_data field must include both the sepsis risk score (if calculated) and
  the visualization base64 string (if generated) under appropriate keys.";

/// Sent after tool results so the next turn produces the report
pub const POST_TOOL_INSTRUCTION: &str = "Now that you have the tool results, provide your final diagnostic report as a JSON object only (no markdown code blocks, no explanation text). The JSON must have this exact structure: {\"differential_diagnosis\": [\"...\"], \"triage_urgency\": \"RED|YELLOW|GREEN\", \"confidence_score\": 0.0-1.0, \"evidence_summary\": \"...\", \"tool_verification_data\": {...}}. Include the tool results in the tool_verification_data field.";

/// Sent once when a tool-phase answer could not be parsed
pub const JSON_REMEDIATION_INSTRUCTION: &str = "Please provide your final diagnostic report as a JSON object only (no markdown, no explanation) with this exact structure: {\"differential_diagnosis\": [\"...\"], \"triage_urgency\": \"RED|YELLOW|GREEN\", \"confidence_score\": 0.0-1.0, \"evidence_summary\": \"...\", \"tool_verification_data\": {...}}";

pub const IMAGE_ANALYSIS_PROMPT: &str = "Analyze this medical image thoroughly.

If this image contains:
- A LAB REPORT: Extract all lab values (names and numerical values)
- A VITALS CHART: Extract all time-series measurements (time, SpO2, Heart Rate)
- An X-RAY or SCAN: Describe the findings and any visible measurements or annotations
- Any other medical data: Extract all relevant information

Provide a comprehensive analysis of what you see in the image. Include all numerical values, measurements, and clinical findings visible.";

/// Response schema enforced in the JSON phase, in the API's schema subset
pub static DIAGNOSTIC_REPORT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "OBJECT",
        "properties": {
            "differential_diagnosis": {
                "type": "ARRAY",
                "description": "List of top 3 competing clinical hypotheses.",
                "items": {"type": "STRING"}
            },
            "triage_urgency": {
                "type": "STRING",
                "description": "The final triage category.",
                "enum": ["RED", "YELLOW", "GREEN"]
            },
            "confidence_score": {
                "type": "NUMBER",
                "description": "The agent's confidence in the primary diagnosis (0.0 to 1.0)."
            },
            "evidence_summary": {
                "type": "STRING",
                "description": "A concise summary of the cross-modal evidence supporting the diagnosis."
            },
            "tool_verification_data": {
                "type": "OBJECT",
                "description": "Contains results from the function calls (risk score, visualization base64).",
                "properties": {
                    "sepsis_risk": {
                        "type": "OBJECT",
                        "description": "Results from calculate_sepsis_risk function call.",
                        "properties": {
                            "risk_score": {
                                "type": "NUMBER",
                                "description": "Calculated sepsis risk score (integer)."
                            },
                            "score_category": {
                                "type": "STRING",
                                "description": "Risk category: 'High Risk' or 'Low Risk'."
                            }
                        }
                    },
                    "visualization_base64": {
                        "type": "STRING",
                        "description": "Base64-encoded PNG image string from generate_vitals_visualization function call."
                    },
                    "base64_image": {
                        "type": "STRING",
                        "description": "Alternative key for visualization base64 image."
                    }
                }
            }
        }
    })
});

/// Second image call: structured labs and vitals from the free-text analysis
pub fn image_data_extraction_prompt(analysis: &str) -> String {
    format!(
        "Based on this medical image analysis, extract any lab values and vitals data:

Image Analysis:
{analysis}

Extract and return JSON with:
- \"labs\": Object with lab names as keys and numerical values (e.g., {{\"WBC\": 12.5, \"Hemoglobin\": 14.2}})
- \"vitals\": Array of objects with time, SpO2, HeartRate (e.g., [{{\"time\": \"00:00\", \"SpO2\": 98, \"HeartRate\": 72}}])

If the analysis mentions lab values, extract them. If it mentions vitals measurements, extract them.
If no labs/vitals are present (e.g., just X-ray findings), return empty objects/arrays.

Return ONLY valid JSON, no explanation."
    )
}

/// Fallback synthesis prompt around an already-truncated agent response
pub fn fallback_prompt(agent_response: &str, context: &str) -> String {
    format!(
        "You are a medical triage expert. Quickly extract the required information from the data below.

AGENT'S RESPONSE (may be truncated):
{agent_response}

CLINICAL DATA:
{context}

Return ONLY a JSON object with these exact fields:
{{
  \"differential_diagnosis\": [\"diagnosis1\", \"diagnosis2\", \"diagnosis3\"],
  \"triage_urgency\": \"RED\" or \"YELLOW\" or \"GREEN\",
  \"confidence_score\": 0.0-1.0,
  \"evidence_summary\": \"brief reasoning summary\",
  \"tool_verification_data\": {{
    \"sepsis_risk\": {{
      \"risk_score\": <number>,
      \"score_category\": \"High Risk\" or \"Low Risk\"
    }}
  }}
}}

For risk_score: Analyze the lab values and vitals, then predict a clinically appropriate sepsis risk score (0-30). Use your medical knowledge.
Return ONLY valid JSON, no explanation.

Extract and return a JSON object with these fields:
1. \"differential_diagnosis\": Array of top 3-4 diagnosis names (strings). If you see \"Unknown\" or empty diagnoses, provide actual clinical diagnoses based on the response content.
2. \"triage_urgency\": One of \"RED\", \"YELLOW\", or \"GREEN\" based on the urgency level mentioned
3. \"confidence_score\": A number between 0.0 and 1.0 representing confidence
4. \"evidence_summary\": A concise summary of the cross-modal reasoning and evidence
5. \"tool_verification_data\": An object containing:
   - \"sepsis_risk\": Object with \"risk_score\" (number) and \"score_category\" (\"High Risk\" or \"Low Risk\")

CRITICAL: For the risk score, if it's not in the agent's response, you must calculate/predict it based on the available clinical data:
- Analyze the lab values (WBC, Lactate, Troponin, Hemoglobin, etc.)
- Analyze the vitals time-series data (SpO2, Heart Rate trends)
- Consider the patient notes and image analysis findings
- Based on clinical assessment, predict a sepsis risk score (a number, typically 0-30)
- Determine the category: \"High Risk\" if the score indicates significant concern, \"Low Risk\" otherwise
- Use your medical knowledge to assess the overall clinical picture and provide a clinically appropriate risk score

If any information is missing from the response, infer it from the context or use reasonable defaults.
Return ONLY valid JSON, no explanation text."
    )
}

/// Single-call report prompt around the consolidated patient data
pub fn fast_path_prompt(patient_data: &str) -> String {
    format!(
        "You are a senior medical triage expert. Analyze the following patient data and provide a comprehensive diagnostic report.

{patient_data}

CRITICAL: Only use data that is explicitly provided above. Do NOT assume or infer lab values, vitals, or other clinical data that is not present. Focus your analysis on:
- Patient notes (if provided)
- Image analysis findings (if provided)
- Lab values that are explicitly listed (do not mention values not in the list)
- Vitals measurements that are explicitly listed (do not mention measurements not in the list)

Provide a JSON report with:
1. \"differential_diagnosis\": Array of 3-4 top diagnoses (strings) based ONLY on available data
2. \"triage_urgency\": \"RED\", \"YELLOW\", or \"GREEN\" based on available information
3. \"confidence_score\": Number 0.0-1.0 reflecting confidence given available data
4. \"evidence_summary\": Concise reasoning summary based ONLY on provided data
5. \"tool_verification_data\": {{
    \"sepsis_risk\": {{
        \"risk_score\": <number 0-30>,
        \"score_category\": \"High Risk\" or \"Low Risk\"
    }}
}}

For risk_score: Only use lab values and vitals that are explicitly provided. If lab values or vitals are not available, base the risk score on patient notes and image analysis findings only.

Return ONLY valid JSON, no explanation."
    )
}
