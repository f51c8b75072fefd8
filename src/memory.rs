use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::message::{ContentBlock, Turn};

/// Append-only conversation history for a single query.
#[derive(Default, Clone, Debug)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user_text(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::user(text));
    }

    pub fn append_assistant_text(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::assistant(text));
    }

    pub fn append_tool_request(
        &mut self,
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) {
        self.turns
            .push(Turn::tool_request(invocation_id, tool_name, arguments));
    }

    /// Appends a tool result. The invocation id must belong to a tool request
    /// already in history.
    pub fn append_tool_result(&mut self, invocation_id: &str, payload: Value) -> Result<()> {
        if !self.has_request(invocation_id) {
            return Err(BridgeError::DanglingToolResult(invocation_id.to_string()));
        }
        self.turns.push(Turn::tool_result(invocation_id, payload));
        Ok(())
    }

    /// Point-in-time copy of every turn. Later appends do not affect it.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    fn has_request(&self, invocation_id: &str) -> bool {
        self.turns.iter().flat_map(|turn| turn.content.iter()).any(|block| {
            matches!(block, ContentBlock::ToolRequest(call) if call.invocation_id == invocation_id)
        })
    }
}

impl From<ConversationMemory> for Vec<Turn> {
    fn from(memory: ConversationMemory) -> Self {
        memory.turns
    }
}
