use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Result;

/// Structural description of the arguments a tool accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// A capability advertised by a tool host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolDescriptor {
    /// The model-facing tool specification. `properties` and `required` are
    /// copied verbatim from the descriptor.
    pub fn to_spec(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": self.input_schema.properties,
                "required": self.input_schema.required,
            }
        })
    }
}

/// Anything that can enumerate and invoke tools for the orchestration loop.
#[async_trait]
pub trait ToolHost: Send {
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>>;

    async fn call(&mut self, name: &str, arguments: Value) -> Result<Value>;
}
