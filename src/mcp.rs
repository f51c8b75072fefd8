//! MCP (Model Context Protocol) client over a subprocess stdio channel.
//!
//! Messages are newline-delimited JSON-RPC 2.0. Responses are matched to
//! their request by id; anything else the server writes in between (log
//! notifications, progress updates) is skipped.
//!
//! # Example
//! ```rust,ignore
//! use mcp_bridge::mcp::{McpClient, StdioTransport};
//!
//! let transport = StdioTransport::spawn("python", &["mcp_server.py".to_string()], &Default::default())?;
//! let mut client = McpClient::new(transport);
//! client.initialize().await?;
//! let tools = client.list_tools().await?;
//! ```

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::{BridgeError, Result};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─────────────────────────────────────────────────────────────────────────────
// Protocol Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC message that expects no response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Unwraps the result, turning a JSON-RPC error object into an `Err`.
    pub fn into_result(self, method: &str) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(BridgeError::Mcp(format!(
                "{method} failed ({}): {}",
                error.code, error.message
            )));
        }
        Ok(self.result.unwrap_or_default())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Tool definition as advertised by an MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<McpToolDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Flattens the content items into the payload recorded in history.
    pub fn into_payload(self) -> Value {
        let text = self
            .content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.clone()),
                ContentItem::Image { .. } => Some("[image]".to_string()),
                ContentItem::Resource { resource } => Some(format!("[Resource: {resource}]")),
                ContentItem::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if self.is_error {
            json!({ "text": text, "error": true })
        } else {
            json!({ "text": text })
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait McpTransport: Send {
    /// Sends a request and waits for the response carrying the same id.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse>;

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Talks to an MCP server launched as a child process.
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    request_id: AtomicU64,
}

impl StdioTransport {
    /// Launches the server. The child is killed if the transport is dropped
    /// without being closed.
    pub fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "child stdout not captured"))?;

        Ok(Self {
            child,
            stdin,
            stdout,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn write_line(&mut self, payload: &impl Serialize) -> Result<()> {
        let mut line = serde_json::to_string(payload)?;
        line.push('\n');
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "tool host stdin closed"))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self, id: u64) -> Result<JsonRpcResponse> {
        loop {
            let mut line = String::new();
            let read = self.stdout.read_line(&mut line).await?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "tool host closed its output",
                )
                .into());
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(trimmed) {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(%err, line = trimmed, "skipping non JSON-RPC line from tool host");
                    continue;
                }
            };
            // A parse-level failure is reported with a null id and answers
            // whatever request is pending.
            if value.get("id").is_some_and(Value::is_null) {
                if let Some(error) = value.get("error") {
                    let error: JsonRpcError = serde_json::from_value(error.clone())?;
                    return Err(BridgeError::Mcp(format!(
                        "request {id} rejected ({}): {}",
                        error.code, error.message
                    )));
                }
            }
            if value.get("id").and_then(Value::as_u64) != Some(id) || value.get("method").is_some() {
                tracing::debug!(message = %value, "skipping unrelated message from tool host");
                continue;
            }
            return Ok(serde_json::from_value(value)?);
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        };
        self.write_line(&request).await?;
        self.read_response(id).await
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        self.write_line(&notification).await
    }

    async fn close(&mut self) -> Result<()> {
        // Closing stdin lets a well-behaved server exit on its own.
        drop(self.stdin.take());
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct McpClient<T: McpTransport> {
    transport: T,
}

impl<T: McpTransport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Performs the `initialize` handshake and acknowledges it.
    pub async fn initialize(&mut self) -> Result<ServerInfo> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self
            .transport
            .request("initialize", Some(params))
            .await?
            .into_result("initialize")?;
        let result: InitializeResult = serde_json::from_value(result)?;
        tracing::debug!(
            protocol_version = %result.protocol_version,
            capabilities = ?result.capabilities,
            "tool host initialized"
        );

        self.transport
            .notify("notifications/initialized", None)
            .await?;
        Ok(result.server_info)
    }

    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDefinition>> {
        let result = self
            .transport
            .request("tools/list", None)
            .await?
            .into_result("tools/list")?;
        let result: ListToolsResult = serde_json::from_value(result)?;
        Ok(result.tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .transport
            .request("tools/call", Some(params))
            .await?
            .into_result("tools/call")?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}
