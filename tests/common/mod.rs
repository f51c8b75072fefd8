use std::collections::BTreeMap;

use async_trait::async_trait;
use mcp_bridge::{BridgeError, Result, ToolDescriptor, ToolHost};
use serde_json::Value;

type Handler = Box<dyn Fn(&Value) -> Result<Value> + Send>;

/// Tool host served from closures, for driving the loop without a subprocess.
#[derive(Default)]
pub struct InProcessHost {
    descriptors: Vec<ToolDescriptor>,
    handlers: BTreeMap<String, Handler>,
    pub calls: Vec<(String, Value)>,
}

impl InProcessHost {
    pub fn with_tool(
        mut self,
        descriptor: ToolDescriptor,
        handler: impl Fn(&Value) -> Result<Value> + Send + 'static,
    ) -> Self {
        self.handlers
            .insert(descriptor.name.clone(), Box::new(handler));
        self.descriptors.push(descriptor);
        self
    }
}

#[async_trait]
impl ToolHost for InProcessHost {
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        Ok(self.descriptors.clone())
    }

    async fn call(&mut self, name: &str, arguments: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| BridgeError::ToolInvocation {
                name: name.to_string(),
                source: "tool not registered".into(),
            })?;
        let result = handler(&arguments).map_err(|source| BridgeError::ToolInvocation {
            name: name.to_string(),
            source: Box::new(source),
        });
        self.calls.push((name.to_string(), arguments));
        result
    }
}
