//! Pipeline configuration types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One named, parameterized transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    /// Registered transform id, e.g. `missing_values`
    pub method_id: String,
    /// Step parameters; `null` and absent both mean "use defaults"
    #[serde(default, deserialize_with = "null_as_empty")]
    pub parameters: Map<String, Value>,
}

impl TransformStep {
    pub fn new(method_id: impl Into<String>, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            method_id: method_id.into(),
            parameters,
        }
    }
}

/// Ordered list of transform steps
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub methods: Vec<TransformStep>,
}

impl PipelineConfig {
    pub fn new(methods: Vec<TransformStep>) -> Self {
        Self { methods }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Body of the preview and execute endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingRequest {
    pub dataset_id: String,
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}
