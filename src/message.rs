use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolRequest(ToolInvocation),
    ToolResult { invocation_id: String, payload: Value },
}

/// One role-tagged entry in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn tool_request(
        invocation_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolRequest(ToolInvocation {
                invocation_id: invocation_id.into(),
                tool_name: tool_name.into(),
                arguments,
            })],
        }
    }

    pub fn tool_result(invocation_id: impl Into<String>, payload: Value) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                invocation_id: invocation_id.into(),
                payload,
            }],
        }
    }
}

/// Merges runs of same-role turns into one turn each. Chat providers reject
/// histories whose roles do not alternate.
pub fn coalesce_turns(turns: &[Turn]) -> Vec<Turn> {
    let mut merged: Vec<Turn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match merged.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.extend(turn.content.iter().cloned());
            }
            _ => merged.push(turn.clone()),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coalesces_adjacent_assistant_turns() {
        let turns = vec![
            Turn::user("weather?"),
            Turn::assistant("let me check"),
            Turn::tool_request("t1", "get_forecast", json!({"latitude": 40.7})),
            Turn::tool_result("t1", json!({"text": "sunny"})),
        ];

        let merged = coalesce_turns(&turns);

        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].role, Role::Assistant);
        assert_eq!(merged[1].content.len(), 2);
        assert!(matches!(merged[1].content[1], ContentBlock::ToolRequest(_)));
        assert_eq!(merged[2].role, Role::User);
    }

    #[test]
    fn block_serialization_is_tagged() {
        let block = ContentBlock::Text { text: "hi".into() };
        let raw = serde_json::to_value(&block).unwrap();
        assert_eq!(raw, json!({"type": "text", "text": "hi"}));
    }
}
