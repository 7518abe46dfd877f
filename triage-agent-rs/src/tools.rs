//! Host tools exposed to the model

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chart::render_vitals_chart;
use crate::tool_manager::{ParamType, ParameterDefinition, Tool, ToolArguments, ToolError, ToolId, ToolMetadata, ToolRegistry};

/// Score at or above which a patient is categorized as high risk
pub const HIGH_RISK_THRESHOLD: i64 = 20;

/// Output of the sepsis risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SepsisRisk {
    pub risk_score: i64,
    pub score_category: String,
}

/// Simplified demonstration score, not a validated clinical instrument.
///
/// `heart_rate / 10 + respiratory_rate / 5 + trunc(lactate * 3)` with floor
/// division. Blood pressure is accepted but does not contribute. The sum
/// saturates at the `i64` bounds.
pub fn calculate_sepsis_risk(heart_rate: i64, _blood_pressure: i64, lactate_level: f64, respiratory_rate: i64) -> SepsisRisk {
    let risk_score = heart_rate
        .div_euclid(10)
        .saturating_add(respiratory_rate.div_euclid(5))
        .saturating_add((lactate_level * 3.0).trunc() as i64);

    let score_category = if risk_score >= HIGH_RISK_THRESHOLD {
        "High Risk"
    } else {
        "Low Risk"
    };

    SepsisRisk {
        risk_score,
        score_category: score_category.to_string(),
    }
}

/// `calculate_sepsis_risk` tool
pub struct SepsisRiskTool {
    metadata: ToolMetadata,
}

impl SepsisRiskTool {
    pub fn new() -> Self {
        Self {
            metadata: ToolMetadata {
                id: ToolId::CalculateSepsisRisk,
                description: "Calculates a simplified sepsis risk score from vital signs and lactate. \
                              Returns risk_score and score_category ('High Risk' or 'Low Risk')."
                    .to_string(),
                parameters: vec![
                    ParameterDefinition::required("heart_rate", ParamType::Integer, "Heart rate in beats per minute."),
                    ParameterDefinition::required(
                        "blood_pressure",
                        ParamType::Integer,
                        "Systolic blood pressure in mmHg.",
                    ),
                    ParameterDefinition::required("lactate_level", ParamType::Number, "Serum lactate in mmol/L."),
                    ParameterDefinition::required(
                        "respiratory_rate",
                        ParamType::Integer,
                        "Respiratory rate in breaths per minute.",
                    ),
                ],
            },
        }
    }
}

impl Default for SepsisRiskTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for SepsisRiskTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn invoke(&self, args: &ToolArguments) -> Result<Value, ToolError> {
        let name = self.metadata.id.name();
        let int_arg = |key: &str| {
            args.get_i64(key)
                .ok_or_else(|| ToolError::failure(name, format!("missing required argument '{}'", key)))
        };

        let risk = calculate_sepsis_risk(
            int_arg("heart_rate")?,
            int_arg("blood_pressure")?,
            args.get_f64("lactate_level")
                .ok_or_else(|| ToolError::failure(name, "missing required argument 'lactate_level'"))?,
            int_arg("respiratory_rate")?,
        );

        serde_json::to_value(risk).map_err(|e| ToolError::failure(name, e))
    }
}

/// `generate_vitals_visualization` tool
pub struct VitalsChartTool {
    metadata: ToolMetadata,
}

impl VitalsChartTool {
    pub fn new() -> Self {
        Self {
            metadata: ToolMetadata {
                id: ToolId::GenerateVitalsVisualization,
                description: "Plots time-series vitals (SpO2 and Heart Rate) and returns the chart as a \
                              base64-encoded PNG."
                    .to_string(),
                parameters: vec![ParameterDefinition::required(
                    "time_series_data",
                    ParamType::String,
                    "JSON string encoding a list of objects with \"time\", \"SpO2\" and \"HeartRate\".",
                )],
            },
        }
    }
}

impl Default for VitalsChartTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for VitalsChartTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn invoke(&self, args: &ToolArguments) -> Result<Value, ToolError> {
        let name = self.metadata.id.name();
        let data = args
            .get_str("time_series_data")
            .ok_or_else(|| ToolError::failure(name, "missing required argument 'time_series_data'"))?;

        render_vitals_chart(data)
            .map(Value::String)
            .map_err(|e| ToolError::failure(name, e))
    }
}

/// Registry holding both host tools
pub fn default_registry(timeout: Duration) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new(timeout);
    registry.register_tool(Arc::new(SepsisRiskTool::new()))?;
    registry.register_tool(Arc::new(VitalsChartTool::new()))?;
    Ok(registry)
}
