use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unsupported tool host endpoint `{0}`: script must be a .py or .js file")]
    UnsupportedEndpointKind(String),

    #[error("tool session failed to initialize: {0}")]
    SessionInit(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("model request failed: {0}")]
    ModelRequest(String),

    /// A tool result referenced an invocation id that never appeared as a
    /// request. The loop orders its appends so this signals a bug.
    #[error("tool result `{0}` has no matching tool request in history")]
    DanglingToolResult(String),

    #[error("missing query")]
    MissingQuery,

    #[error("query exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
