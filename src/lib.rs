//! Bounded tool-calling conversations between a chat model and MCP tool hosts.
//!
//! A query flows through four pieces:
//! - [`ToolSession`] launches a tool host script and speaks MCP over its stdio.
//! - [`ConversationMemory`] records the turns exchanged for one query.
//! - [`LanguageModel`] sends that history plus tool specs to a provider.
//! - [`Agent`] loops between the two until the model stops or the turn budget runs out.
//!
//! [`QueryRuntime`] ties them together per query; the `server` feature puts it
//! behind HTTP.

mod agent;
#[cfg(feature = "aws")]
mod bedrock;
mod config;
mod error;
mod llm;
pub mod mcp;
mod memory;
mod message;
mod runtime;
#[cfg(feature = "server")]
pub mod server;
mod session;
mod telemetry;
mod tool;

pub use agent::{Agent, Outcome, Termination, DEFAULT_MAX_TURNS};
#[cfg(feature = "aws")]
pub use bedrock::BedrockModel;
pub use config::{AgentConfig, AppConfig, ModelConfig, ModelProvider, ServerConfig};
pub use error::{BridgeError, Result};
pub use llm::{
    AnthropicClient, LanguageModel, ModelResponse, ResponseBlock, SamplingConfig, StopReason,
    StubModel, StubRequest,
};
pub use memory::ConversationMemory;
pub use message::{coalesce_turns, ContentBlock, Role, ToolInvocation, Turn};
pub use runtime::QueryRuntime;
pub use session::{EndpointDescriptor, EndpointKind, ToolSession};
pub use telemetry::init_tracing;
pub use tool::{InputSchema, ToolDescriptor, ToolHost};
