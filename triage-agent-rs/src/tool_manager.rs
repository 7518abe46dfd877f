//! Tool Manager Module
//!
//! Registry of the host tools a model may call during the tool phase.
//! Tools are registered once with validated metadata; calls are checked
//! against that metadata and executed on the blocking pool under a timeout,
//! so a misbehaving tool can never take down a triage run.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use triage_sdk::gemini::{FunctionCall, FunctionDeclaration, Part};

/// Identifier of a registered tool.
///
/// The set is closed: the model can only reach these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    CalculateSepsisRisk,
    GenerateVitalsVisualization,
}

impl ToolId {
    pub const ALL: [ToolId; 2] = [ToolId::CalculateSepsisRisk, ToolId::GenerateVitalsVisualization];

    /// Wire name the model uses in function calls
    pub fn name(&self) -> &'static str {
        match self {
            ToolId::CalculateSepsisRisk => "calculate_sepsis_risk",
            ToolId::GenerateVitalsVisualization => "generate_vitals_visualization",
        }
    }

    /// Exact-match lookup by wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    Integer,
    Number,
    String,
}

impl ParamType {
    /// Type name in the function-declaration schema
    pub fn schema_type(&self) -> &'static str {
        match self {
            ParamType::Integer => "INTEGER",
            ParamType::Number => "NUMBER",
            ParamType::String => "STRING",
        }
    }

    /// Whether `value` is acceptable for this type.
    ///
    /// Integers arrive as floats from some models (`110.0`), so any integral
    /// number counts as an integer.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::Integer => match value {
                Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().map_or(false, |f| f.fract() == 0.0),
                _ => false,
            },
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
        }
    }
}

/// Tool parameter definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Parameter name
    pub name: String,
    /// Parameter description
    pub description: String,
    /// Whether parameter is required
    pub required: bool,
    /// Parameter type
    pub param_type: ParamType,
}

impl ParameterDefinition {
    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
            param_type,
        }
    }
}

/// Tool metadata structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Unique tool identifier
    pub id: ToolId,
    /// Tool description shown to the model
    pub description: String,
    /// Parameters accepted by this tool
    pub parameters: Vec<ParameterDefinition>,
}

impl ToolMetadata {
    /// Function declaration for the tool phase
    pub fn declaration(&self) -> FunctionDeclaration {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|param| {
                (
                    param.name.clone(),
                    json!({
                        "type": param.param_type.schema_type(),
                        "description": param.description,
                    }),
                )
            })
            .collect();

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name.as_str())
            .collect();

        FunctionDeclaration {
            name: self.id.name().to_string(),
            description: self.description.clone(),
            parameters: json!({
                "type": "OBJECT",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Tool error types
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("Function {0} not found in tool registry")]
    UnknownTool(String),

    #[error("Execution of {name} failed: {cause}")]
    ToolFailure { name: String, cause: String },

    #[error("Tool already registered: {0}")]
    AlreadyRegistered(ToolId),

    #[error("Invalid tool metadata: {0}")]
    InvalidMetadata(String),
}

impl ToolError {
    pub fn failure(name: impl Into<String>, cause: impl fmt::Display) -> Self {
        ToolError::ToolFailure {
            name: name.into(),
            cause: cause.to_string(),
        }
    }
}

/// Validated call arguments
#[derive(Debug, Clone)]
pub struct ToolArguments {
    values: Map<String, Value>,
}

impl ToolArguments {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Integer argument; integral floats are truncated
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.values
            .get(name)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }
}

/// Tool interface trait.
///
/// Handlers are synchronous and run on the blocking pool.
pub trait Tool: Send + Sync {
    /// Get tool metadata
    fn metadata(&self) -> &ToolMetadata;

    /// Run the tool on already-validated arguments
    fn invoke(&self, args: &ToolArguments) -> Result<Value, ToolError>;
}

/// Result of one requested call
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub name: String,
    pub args: Value,
    pub result: Result<Value, ToolError>,
}

impl ToolOutcome {
    /// Payload sent back to the model: `{"result": ...}` or `{"error": ...}`
    pub fn response_payload(&self) -> Value {
        match &self.result {
            Ok(value) => json!({ "result": value }),
            Err(e) => json!({ "error": e.to_string() }),
        }
    }

    /// The `functionResponse` part for this outcome
    pub fn to_part(&self) -> Part {
        Part::function_response(self.name.clone(), self.response_payload())
    }
}

/// Registry of host tools
pub struct ToolRegistry {
    tools: BTreeMap<ToolId, Arc<dyn Tool>>,
    timeout: Duration,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry with a per-call timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: BTreeMap::new(),
            timeout,
        }
    }

    /// Register a new tool with the registry
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let metadata = tool.metadata();
        self.validate_tool_metadata(metadata)?;

        let id = metadata.id;
        if self.tools.contains_key(&id) {
            return Err(ToolError::AlreadyRegistered(id));
        }

        self.tools.insert(id, tool);
        info!("Tool {} registered successfully", id);
        Ok(())
    }

    /// Validate a tool's metadata for correctness
    pub fn validate_tool_metadata(&self, metadata: &ToolMetadata) -> Result<(), ToolError> {
        if metadata.description.trim().is_empty() {
            return Err(ToolError::InvalidMetadata(format!(
                "Tool {} has no description",
                metadata.id
            )));
        }

        let mut seen = HashSet::new();
        for param in &metadata.parameters {
            if param.name.is_empty() {
                return Err(ToolError::InvalidMetadata(
                    "Parameter name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(ToolError::InvalidMetadata(format!(
                    "Duplicate parameter {} on tool {}",
                    param.name, metadata.id
                )));
            }
        }

        Ok(())
    }

    /// Check call arguments against a tool's declared parameters
    pub fn validate_arguments(metadata: &ToolMetadata, args: &Value) -> Result<ToolArguments, ToolError> {
        let name = metadata.id.name();
        let values = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::failure(
                    name,
                    format!("arguments must be a JSON object, got {}", other),
                ))
            }
        };

        for param in &metadata.parameters {
            match values.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(ToolError::failure(
                        name,
                        format!("missing required argument '{}'", param.name),
                    ));
                }
                Some(value) if !value.is_null() && !param.param_type.accepts(value) => {
                    return Err(ToolError::failure(
                        name,
                        format!(
                            "argument '{}' must be of type {}, got {}",
                            param.name,
                            param.param_type.schema_type(),
                            value
                        ),
                    ));
                }
                _ => {}
            }
        }

        if let Some(unknown) = values
            .keys()
            .find(|key| !metadata.parameters.iter().any(|p| &p.name == *key))
        {
            return Err(ToolError::failure(name, format!("unexpected argument '{}'", unknown)));
        }

        Ok(ToolArguments::new(values))
    }

    /// Execute a tool by wire name.
    ///
    /// Unknown names, invalid arguments, handler errors, panics and timeouts
    /// all come back as a `ToolError`.
    pub async fn execute(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        let Some(tool) = ToolId::from_name(name).and_then(|id| self.tools.get(&id)) else {
            let err = ToolError::UnknownTool(name.to_string());
            warn!("{}", err);
            return Err(err);
        };

        let arguments = Self::validate_arguments(tool.metadata(), args).map_err(|e| {
            warn!("{}", e);
            e
        })?;

        debug!("Executing tool {} with timeout {:?}", name, self.timeout);
        let handler = Arc::clone(tool);
        let task = tokio::task::spawn_blocking(move || handler.invoke(&arguments));

        let result = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(ToolError::failure(
                name,
                format!("timed out after {:?}", self.timeout),
            )),
            Ok(Err(join_error)) if join_error.is_panic() => Err(ToolError::failure(name, "tool panicked")),
            Ok(Err(join_error)) => Err(ToolError::failure(name, join_error)),
            Ok(Ok(result)) => result,
        };

        if let Err(e) = &result {
            error!("{}", e);
        }
        result
    }

    /// Execute each call in request order; a failure never aborts the others
    pub async fn execute_all(&self, calls: &[FunctionCall]) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.execute(&call.name, &call.args).await;
            outcomes.push(ToolOutcome {
                name: call.name.clone(),
                args: call.args.clone(),
                result,
            });
        }
        outcomes
    }

    /// Declarations of every registered tool, for the tool phase
    pub fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools.values().map(|tool| tool.metadata().declaration()).collect()
    }

    /// List all registered tools
    pub fn list_tools(&self) -> Vec<ToolMetadata> {
        self.tools.values().map(|tool| tool.metadata().clone()).collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockTool {
        metadata: ToolMetadata,
        behavior: fn(&ToolArguments) -> Result<Value, ToolError>,
    }

    impl Tool for MockTool {
        fn metadata(&self) -> &ToolMetadata {
            &self.metadata
        }

        fn invoke(&self, args: &ToolArguments) -> Result<Value, ToolError> {
            (self.behavior)(args)
        }
    }

    fn create_mock_tool(id: ToolId, behavior: fn(&ToolArguments) -> Result<Value, ToolError>) -> Arc<MockTool> {
        Arc::new(MockTool {
            metadata: ToolMetadata {
                id,
                description: "Mock tool for testing".to_string(),
                parameters: vec![
                    ParameterDefinition::required("heart_rate", ParamType::Integer, "Heart rate"),
                    ParameterDefinition::required("lactate_level", ParamType::Number, "Lactate"),
                ],
            },
            behavior,
        })
    }

    fn echo(args: &ToolArguments) -> Result<Value, ToolError> {
        Ok(json!({ "hr": args.get_i64("heart_rate") }))
    }

    fn registry_with(tools: Vec<Arc<MockTool>>) -> ToolRegistry {
        let mut registry = ToolRegistry::new(Duration::from_secs(5));
        for tool in tools {
            registry.register_tool(tool).unwrap();
        }
        registry
    }

    #[test]
    fn test_tool_id_names() {
        assert_eq!(ToolId::from_name("calculate_sepsis_risk"), Some(ToolId::CalculateSepsisRisk));
        assert_eq!(
            ToolId::from_name("generate_vitals_visualization"),
            Some(ToolId::GenerateVitalsVisualization)
        );
        assert_eq!(ToolId::from_name("Calculate_Sepsis_Risk"), None);
        assert_eq!(ToolId::CalculateSepsisRisk.to_string(), "calculate_sepsis_risk");
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let mut registry = registry_with(vec![create_mock_tool(ToolId::CalculateSepsisRisk, echo)]);
        let result = registry.register_tool(create_mock_tool(ToolId::CalculateSepsisRisk, echo));
        assert_eq!(result, Err(ToolError::AlreadyRegistered(ToolId::CalculateSepsisRisk)));
        assert_eq!(registry.list_tools().len(), 1);
    }

    #[test]
    fn test_invalid_metadata_rejected() {
        let mut tool = MockTool {
            metadata: create_mock_tool(ToolId::CalculateSepsisRisk, echo).metadata.clone(),
            behavior: echo,
        };
        tool.metadata
            .parameters
            .push(ParameterDefinition::required("heart_rate", ParamType::Integer, "again"));

        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        assert!(matches!(
            registry.register_tool(Arc::new(tool)),
            Err(ToolError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_declaration_schema() {
        let registry = registry_with(vec![create_mock_tool(ToolId::CalculateSepsisRisk, echo)]);
        let declarations = registry.function_declarations();
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].name, "calculate_sepsis_risk");
        assert_eq!(declarations[0].parameters["type"], "OBJECT");
        assert_eq!(declarations[0].parameters["properties"]["heart_rate"]["type"], "INTEGER");
        assert_eq!(declarations[0].parameters["required"], json!(["heart_rate", "lactate_level"]));
    }

    #[test]
    fn test_integer_accepts_integral_floats() {
        assert!(ParamType::Integer.accepts(&json!(110)));
        assert!(ParamType::Integer.accepts(&json!(110.0)));
        assert!(!ParamType::Integer.accepts(&json!(110.5)));
        assert!(!ParamType::Integer.accepts(&json!("110")));
        assert!(ParamType::Number.accepts(&json!(4)));
    }

    #[test]
    fn test_unknown_tool() {
        let registry = registry_with(vec![create_mock_tool(ToolId::CalculateSepsisRisk, echo)]);
        let result = tokio_test::block_on(registry.execute("delete_records", &json!({})));
        let err = result.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("delete_records".into()));
        assert_eq!(err.to_string(), "Function delete_records not found in tool registry");
    }

    #[tokio::test]
    async fn test_argument_validation() {
        let registry = registry_with(vec![create_mock_tool(ToolId::CalculateSepsisRisk, echo)]);

        let missing = registry
            .execute("calculate_sepsis_risk", &json!({"heart_rate": 100}))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("missing required argument 'lactate_level'"));

        let wrong_type = registry
            .execute("calculate_sepsis_risk", &json!({"heart_rate": "fast", "lactate_level": 2.0}))
            .await
            .unwrap_err();
        assert!(wrong_type.to_string().starts_with("Execution of calculate_sepsis_risk failed:"));

        let unexpected = registry
            .execute(
                "calculate_sepsis_risk",
                &json!({"heart_rate": 100, "lactate_level": 2.0, "shell": "rm"}),
            )
            .await
            .unwrap_err();
        assert!(unexpected.to_string().contains("unexpected argument 'shell'"));

        let ok = registry
            .execute("calculate_sepsis_risk", &json!({"heart_rate": 110.0, "lactate_level": 2}))
            .await
            .unwrap();
        assert_eq!(ok, json!({"hr": 110}));
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        fn failing(_: &ToolArguments) -> Result<Value, ToolError> {
            Err(ToolError::failure("generate_vitals_visualization", "bad data"))
        }

        let registry = registry_with(vec![
            create_mock_tool(ToolId::CalculateSepsisRisk, echo),
            create_mock_tool(ToolId::GenerateVitalsVisualization, failing),
        ]);

        let calls = vec![
            FunctionCall::new("generate_vitals_visualization", json!({"heart_rate": 1, "lactate_level": 1})),
            FunctionCall::new("nope", json!({})),
            FunctionCall::new("calculate_sepsis_risk", json!({"heart_rate": 90, "lactate_level": 1.5})),
        ];
        let outcomes = registry.execute_all(&calls).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            outcomes[0].response_payload(),
            json!({"error": "Execution of generate_vitals_visualization failed: bad data"})
        );
        assert!(matches!(outcomes[1].result, Err(ToolError::UnknownTool(_))));
        assert_eq!(outcomes[2].response_payload(), json!({"result": {"hr": 90}}));
        assert_eq!(outcomes[2].name, "calculate_sepsis_risk");
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        fn panicking(_: &ToolArguments) -> Result<Value, ToolError> {
            panic!("handler bug")
        }

        let registry = registry_with(vec![create_mock_tool(ToolId::CalculateSepsisRisk, panicking)]);
        let err = registry
            .execute("calculate_sepsis_risk", &json!({"heart_rate": 90, "lactate_level": 1.5}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Execution of calculate_sepsis_risk failed: tool panicked");
    }

    #[tokio::test]
    async fn test_timeout() {
        fn slow(_: &ToolArguments) -> Result<Value, ToolError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::Null)
        }

        let mut registry = ToolRegistry::new(Duration::from_millis(20));
        registry
            .register_tool(create_mock_tool(ToolId::CalculateSepsisRisk, slow))
            .unwrap();

        let err = registry
            .execute("calculate_sepsis_risk", &json!({"heart_rate": 90, "lactate_level": 1.5}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after"));
    }

    #[test]
    fn test_outcome_part() {
        let outcome = ToolOutcome {
            name: "calculate_sepsis_risk".into(),
            args: json!({}),
            result: Ok(json!({"risk_score": 12})),
        };
        let part = outcome.to_part();
        let response = part.as_function_response().unwrap();
        assert_eq!(response.name, "calculate_sepsis_risk");
        assert_eq!(response.response, json!({"result": {"risk_score": 12}}));
    }
}
