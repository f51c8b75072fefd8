//! Model gateway abstraction and provider adapters.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ModelConfig;
use crate::error::{BridgeError, Result};
use crate::message::{coalesce_turns, ContentBlock, Role, ToolInvocation, Turn};
use crate::tool::ToolDescriptor;

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ToolUse,
    EndTurn,
    MaxTokens,
    StopSequence,
    ContentFiltered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResponseBlock {
    Text(String),
    ToolUse(ToolInvocation),
}

/// Provider-agnostic result of one gateway round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelResponse {
    pub stop_reason: StopReason,
    pub content: Vec<ResponseBlock>,
}

impl ModelResponse {
    pub fn text(stop_reason: StopReason, text: impl Into<String>) -> Self {
        Self {
            stop_reason,
            content: vec![ResponseBlock::Text(text.into())],
        }
    }

    pub fn tool_use(invocations: Vec<ToolInvocation>) -> Self {
        Self {
            stop_reason: StopReason::ToolUse,
            content: invocations.into_iter().map(ResponseBlock::ToolUse).collect(),
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolInvocation> + '_ {
        self.content.iter().filter_map(|block| match block {
            ResponseBlock::ToolUse(call) => Some(call),
            ResponseBlock::Text(_) => None,
        })
    }
}

/// Decoding settings sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.0,
        }
    }
}

/// A stateless chat completion provider that supports tool use.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn converse(&self, history: &[Turn], tools: &[ToolDescriptor]) -> Result<ModelResponse>;
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> BridgeError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return BridgeError::ModelRequest(format!("{provider} rate limit exceeded: {body}"));
    }
    BridgeError::ModelRequest(format!("{provider} request failed with {status}: {body}"))
}

/// Text form of a tool payload for providers that only accept strings.
pub(crate) fn payload_text(payload: &Value) -> String {
    match payload.get("text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None => payload.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anthropic Messages API
// ─────────────────────────────────────────────────────────────────────────────

const ANTHROPIC_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    endpoint: String,
    sampling: SamplingConfig,
}

impl AnthropicClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            BridgeError::Config("missing Anthropic API key in model config".into())
        })?;
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .map_err(|err| BridgeError::ModelRequest(format!("http client error: {err}")))?,
            model: cfg.model.clone(),
            api_key,
            endpoint: cfg
                .endpoint
                .clone()
                .unwrap_or_else(|| ANTHROPIC_ENDPOINT.to_string()),
            sampling: cfg.sampling(),
        })
    }

    fn to_messages(history: &[Turn]) -> Vec<Value> {
        coalesce_turns(history)
            .into_iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let content: Vec<Value> = turn
                    .content
                    .iter()
                    .map(|block| match block {
                        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                        ContentBlock::ToolRequest(call) => json!({
                            "type": "tool_use",
                            "id": call.invocation_id,
                            "name": call.tool_name,
                            "input": call.arguments,
                        }),
                        ContentBlock::ToolResult {
                            invocation_id,
                            payload,
                        } => json!({
                            "type": "tool_result",
                            "tool_use_id": invocation_id,
                            "content": payload_text(payload),
                            "is_error": payload.get("error").and_then(Value::as_bool).unwrap_or(false),
                        }),
                    })
                    .collect();
                json!({"role": role, "content": content})
            })
            .collect()
    }

    fn build_payload(&self, history: &[Turn], tools: &[ToolDescriptor]) -> Value {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": self.sampling.max_tokens,
            "temperature": self.sampling.temperature,
            "messages": Self::to_messages(history),
        });
        if !tools.is_empty() {
            payload["tools"] = tools.iter().map(ToolDescriptor::to_spec).collect();
        }
        payload
    }

    fn parse_response(raw: AnthropicResponse) -> Result<ModelResponse> {
        let stop_reason = match raw.stop_reason.as_deref() {
            Some("tool_use") => StopReason::ToolUse,
            Some("end_turn") => StopReason::EndTurn,
            Some("max_tokens") => StopReason::MaxTokens,
            Some("stop_sequence") => StopReason::StopSequence,
            Some("refusal") => StopReason::ContentFiltered,
            other => {
                return Err(BridgeError::ModelRequest(format!(
                    "anthropic returned unsupported stop reason {other:?}"
                )))
            }
        };
        let content = raw
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicBlock::Text { text } => Some(ResponseBlock::Text(text)),
                AnthropicBlock::ToolUse { id, name, input } => {
                    Some(ResponseBlock::ToolUse(ToolInvocation {
                        invocation_id: id,
                        tool_name: name,
                        arguments: input,
                    }))
                }
                AnthropicBlock::Other => None,
            })
            .collect();
        Ok(ModelResponse {
            stop_reason,
            content,
        })
    }
}

#[async_trait]
impl LanguageModel for AnthropicClient {
    async fn converse(&self, history: &[Turn], tools: &[ToolDescriptor]) -> Result<ModelResponse> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_payload(history, tools))
            .send()
            .await
            .map_err(|err| BridgeError::ModelRequest(format!("anthropic request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "anthropic"));
        }

        let parsed: AnthropicResponse = resp.json().await.map_err(|err| {
            BridgeError::ModelRequest(format!("anthropic response parse error: {err}"))
        })?;
        Self::parse_response(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub
// ─────────────────────────────────────────────────────────────────────────────

/// A deterministic model used for tests and demos. Replays scripted
/// responses in order and records every request it receives.
pub struct StubModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<StubRequest>>,
}

#[derive(Debug, Clone)]
pub struct StubRequest {
    pub history: Vec<Turn>,
    pub tool_specs: Vec<Value>,
}

impl StubModel {
    pub fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("stub model poisoned").len()
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().expect("stub model poisoned").clone()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn converse(&self, history: &[Turn], tools: &[ToolDescriptor]) -> Result<ModelResponse> {
        self.requests
            .lock()
            .expect("stub model poisoned")
            .push(StubRequest {
                history: history.to_vec(),
                tool_specs: tools.iter().map(ToolDescriptor::to_spec).collect(),
            });
        self.responses
            .lock()
            .expect("stub model poisoned")
            .pop_front()
            .ok_or_else(|| BridgeError::ModelRequest("StubModel ran out of scripted responses".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::InputSchema;

    fn forecast_tool() -> ToolDescriptor {
        ToolDescriptor {
            name: "get_forecast".into(),
            description: "Get weather forecast for a location".into(),
            input_schema: serde_json::from_value(json!({
                "properties": {"latitude": {"type": "number"}, "longitude": {"type": "number"}},
                "required": ["latitude", "longitude"]
            }))
            .unwrap(),
        }
    }

    fn client() -> AnthropicClient {
        let cfg = ModelConfig {
            api_key: Some("test-key".into()),
            model: "claude-3-5-sonnet-latest".into(),
            ..ModelConfig::default()
        };
        AnthropicClient::from_config(&cfg).unwrap()
    }

    #[test]
    fn payload_carries_sampling_and_tool_specs() {
        let history = vec![Turn::user("What's the weather in NY?")];
        let payload = client().build_payload(&history, &[forecast_tool()]);

        assert_eq!(payload["max_tokens"], 1000);
        assert_eq!(payload["temperature"], 0.0);
        assert_eq!(payload["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(
            payload["tools"][0]["input_schema"]["required"],
            json!(["latitude", "longitude"])
        );
    }

    #[test]
    fn payload_omits_tools_when_none_available() {
        let payload = client().build_payload(&[Turn::user("hi")], &[]);
        assert!(payload.get("tools").is_none());
    }

    #[test]
    fn messages_merge_roles_and_map_tool_blocks() {
        let history = vec![
            Turn::user("weather?"),
            Turn::assistant("checking"),
            Turn::tool_request("toolu_1", "get_forecast", json!({"latitude": 40.7})),
            Turn::tool_result("toolu_1", json!({"text": "Sunny"})),
        ];

        let messages = AnthropicClient::to_messages(&history);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(messages[2]["content"][0]["content"], "Sunny");
    }

    #[test]
    fn parses_tool_use_response() {
        let raw: AnthropicResponse = serde_json::from_value(json!({
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "I'll look that up."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_forecast",
                 "input": {"latitude": 40.7, "longitude": -74.0}}
            ]
        }))
        .unwrap();

        let response = AnthropicClient::parse_response(raw).unwrap();

        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.content.len(), 2);
        assert_eq!(response.tool_calls().next().unwrap().tool_name, "get_forecast");
    }

    #[test]
    fn unknown_stop_reason_is_an_error() {
        let raw: AnthropicResponse =
            serde_json::from_value(json!({"stop_reason": "pause_turn", "content": []})).unwrap();
        assert!(matches!(
            AnthropicClient::parse_response(raw),
            Err(BridgeError::ModelRequest(_))
        ));
    }

    #[tokio::test]
    async fn stub_records_requests_and_runs_dry() {
        let model = StubModel::new(vec![ModelResponse::text(StopReason::EndTurn, "done")]);
        let tools = vec![ToolDescriptor {
            name: "noop".into(),
            description: String::new(),
            input_schema: InputSchema::default(),
        }];

        model.converse(&[Turn::user("hi")], &tools).await.unwrap();
        let err = model.converse(&[Turn::user("again")], &tools).await.unwrap_err();

        assert!(matches!(err, BridgeError::ModelRequest(_)));
        assert_eq!(model.calls(), 2);
        assert_eq!(model.requests()[0].tool_specs[0]["name"], "noop");
    }
}
