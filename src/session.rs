use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::mcp::{McpClient, McpToolDefinition, StdioTransport};
use crate::tool::{InputSchema, ToolDescriptor, ToolHost};

/// Interpreter family of a tool host script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Python,
    Node,
}

impl EndpointKind {
    pub fn command(self) -> &'static str {
        match self {
            EndpointKind::Python => "python",
            EndpointKind::Node => "node",
        }
    }
}

/// Identifies the tool host to launch for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub script: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl EndpointDescriptor {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn kind(&self) -> Result<EndpointKind> {
        match self.script.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Ok(EndpointKind::Python),
            Some("js") => Ok(EndpointKind::Node),
            _ => Err(BridgeError::UnsupportedEndpointKind(
                self.script.display().to_string(),
            )),
        }
    }

    fn argv(&self) -> Vec<String> {
        std::iter::once(self.script.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// A live connection to one MCP tool host process.
pub struct ToolSession {
    client: McpClient<StdioTransport>,
    closed: bool,
}

impl ToolSession {
    /// Launches the endpoint's script under its interpreter and completes the
    /// MCP handshake.
    pub async fn open(endpoint: &EndpointDescriptor) -> Result<Self> {
        let kind = endpoint.kind()?;
        tracing::info!(script = %endpoint.script.display(), command = kind.command(), "starting tool host");
        let transport = StdioTransport::spawn(kind.command(), &endpoint.argv(), &endpoint.env)
            .map_err(|err| BridgeError::SessionInit(format!("failed to start tool host: {err}")))?;
        tracing::debug!(pid = ?transport.id(), "tool host spawned");
        Self::connect(transport).await
    }

    /// Completes the handshake over an already spawned transport. The process
    /// is released if the handshake fails.
    pub async fn connect(transport: StdioTransport) -> Result<Self> {
        let mut client = McpClient::new(transport);
        match client.initialize().await {
            Ok(server) => {
                tracing::info!(server = %server.name, version = ?server.version, "tool session ready");
                Ok(Self {
                    client,
                    closed: false,
                })
            }
            Err(err) => {
                if let Err(close_err) = client.close().await {
                    tracing::warn!(%close_err, "failed to release tool host after handshake error");
                }
                Err(BridgeError::SessionInit(err.to_string()))
            }
        }
    }

    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        let tools = self.client.list_tools().await?;
        tools.into_iter().map(descriptor_from_definition).collect()
    }

    /// Invokes a tool and returns its payload. Any failure, including the
    /// host dying mid-call, is reported against the tool name.
    pub async fn call(&mut self, tool_name: &str, arguments: Value) -> Result<Value> {
        let result = self
            .client
            .call_tool(tool_name, arguments)
            .await
            .map_err(|source| BridgeError::ToolInvocation {
                name: tool_name.to_string(),
                source: Box::new(source),
            })?;
        Ok(result.into_payload())
    }

    /// Terminates the tool host. Only the first call does any work.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        tracing::debug!("closing tool session");
        self.client.close().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl ToolHost for ToolSession {
    async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        ToolSession::list_tools(self).await
    }

    async fn call(&mut self, name: &str, arguments: Value) -> Result<Value> {
        ToolSession::call(self, name, arguments).await
    }
}

fn descriptor_from_definition(definition: McpToolDefinition) -> Result<ToolDescriptor> {
    let input_schema: InputSchema = if definition.input_schema.is_null() {
        InputSchema::default()
    } else {
        serde_json::from_value(definition.input_schema).map_err(|err| {
            BridgeError::Mcp(format!(
                "tool `{}` has an invalid input schema: {err}",
                definition.name
            ))
        })?
    };
    Ok(ToolDescriptor {
        description: definition.description.unwrap_or_default(),
        name: definition.name,
        input_schema,
    })
}

pub(crate) fn script_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_extension() {
        assert_eq!(
            EndpointDescriptor::new("lambda/mcp_server.py").kind().unwrap(),
            EndpointKind::Python
        );
        assert_eq!(
            EndpointDescriptor::new("server/index.js").kind().unwrap(),
            EndpointKind::Node
        );
        assert_eq!(EndpointKind::Node.command(), "node");
    }

    #[tokio::test]
    async fn open_rejects_unknown_kind() {
        let err = ToolSession::open(&EndpointDescriptor::new("server.rb"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::UnsupportedEndpointKind(path) if path == "server.rb"));

        let err = ToolSession::open(&EndpointDescriptor::new("server"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::UnsupportedEndpointKind(_)));
    }

    #[test]
    fn argv_starts_with_script() {
        let mut endpoint = EndpointDescriptor::new("mcp_server.py");
        endpoint.args.push("--stdio".into());
        assert_eq!(endpoint.argv(), vec!["mcp_server.py", "--stdio"]);
        assert_eq!(script_name(&endpoint.script), "mcp_server.py");
    }

    #[test]
    fn definition_without_schema_gets_empty_schema() {
        let definition: McpToolDefinition =
            serde_json::from_value(serde_json::json!({"name": "ping"})).unwrap();
        let descriptor = descriptor_from_definition(definition).unwrap();
        assert_eq!(descriptor.description, "");
        assert!(descriptor.input_schema.required.is_empty());
    }
}
