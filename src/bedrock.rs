//! AWS Bedrock Converse API adapter.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::BuildError;
use aws_sdk_bedrockruntime::types::{
    ContentBlock as BedrockBlock, ConversationRole, InferenceConfiguration,
    Message as BedrockMessage, StopReason as BedrockStopReason, Tool, ToolConfiguration,
    ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolResultStatus,
    ToolSpecification, ToolUseBlock,
};
use aws_sdk_bedrockruntime::Client;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::{Document, Number};
use serde_json::{Map, Value};

use crate::config::ModelConfig;
use crate::error::{BridgeError, Result};
use crate::llm::{payload_text, LanguageModel, ModelResponse, ResponseBlock, SamplingConfig, StopReason};
use crate::message::{coalesce_turns, ContentBlock, Role, ToolInvocation, Turn};
use crate::tool::ToolDescriptor;

#[derive(Clone)]
pub struct BedrockModel {
    client: Client,
    model_id: String,
    sampling: SamplingConfig,
}

impl BedrockModel {
    pub fn new(client: Client, model_id: impl Into<String>, sampling: SamplingConfig) -> Self {
        Self {
            client,
            model_id: model_id.into(),
            sampling,
        }
    }

    /// Builds a client from the ambient AWS credential chain.
    pub async fn from_config(cfg: &ModelConfig) -> Self {
        let sdk = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()))
            .load()
            .await;
        let mut builder = aws_sdk_bedrockruntime::config::Builder::from(&sdk);
        if let Some(endpoint) = &cfg.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self::new(
            Client::from_conf(builder.build()),
            cfg.model.clone(),
            cfg.sampling(),
        )
    }

    fn inference_config(&self) -> InferenceConfiguration {
        InferenceConfiguration::builder()
            .max_tokens(i32::try_from(self.sampling.max_tokens).unwrap_or(i32::MAX))
            .temperature(self.sampling.temperature)
            .build()
    }
}

#[async_trait]
impl LanguageModel for BedrockModel {
    async fn converse(&self, history: &[Turn], tools: &[ToolDescriptor]) -> Result<ModelResponse> {
        let mut request = self
            .client
            .converse()
            .model_id(&self.model_id)
            .set_messages(Some(to_messages(history)?))
            .inference_config(self.inference_config());
        if !tools.is_empty() {
            request = request.tool_config(to_tool_config(tools)?);
        }

        let output = request.send().await.map_err(|err| {
            BridgeError::ModelRequest(format!("bedrock converse failed: {}", DisplayErrorContext(&err)))
        })?;
        let message = output.output().and_then(|out| out.as_message().ok());
        from_output(output.stop_reason(), message)
    }
}

fn build_error(err: BuildError) -> BridgeError {
    BridgeError::ModelRequest(format!("invalid bedrock request: {err}"))
}

fn to_messages(history: &[Turn]) -> Result<Vec<BedrockMessage>> {
    coalesce_turns(history)
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => ConversationRole::User,
                Role::Assistant => ConversationRole::Assistant,
            };
            let content = turn
                .content
                .iter()
                .map(to_block)
                .collect::<Result<Vec<_>>>()?;
            BedrockMessage::builder()
                .role(role)
                .set_content(Some(content))
                .build()
                .map_err(build_error)
        })
        .collect()
}

fn to_block(block: &ContentBlock) -> Result<BedrockBlock> {
    let converted = match block {
        ContentBlock::Text { text } => BedrockBlock::Text(text.clone()),
        ContentBlock::ToolRequest(call) => BedrockBlock::ToolUse(
            ToolUseBlock::builder()
                .tool_use_id(&call.invocation_id)
                .name(&call.tool_name)
                .input(to_document(&call.arguments))
                .build()
                .map_err(build_error)?,
        ),
        ContentBlock::ToolResult {
            invocation_id,
            payload,
        } => {
            // Bedrock only accepts objects as JSON tool results.
            let content = if payload.is_object() {
                ToolResultContentBlock::Json(to_document(payload))
            } else {
                ToolResultContentBlock::Text(payload_text(payload))
            };
            let mut builder = ToolResultBlock::builder()
                .tool_use_id(invocation_id)
                .content(content);
            if payload.get("error").and_then(Value::as_bool) == Some(true) {
                builder = builder.status(ToolResultStatus::Error);
            }
            BedrockBlock::ToolResult(builder.build().map_err(build_error)?)
        }
    };
    Ok(converted)
}

fn to_tool_config(tools: &[ToolDescriptor]) -> Result<ToolConfiguration> {
    let specs = tools
        .iter()
        .map(|tool| {
            let spec = tool.to_spec();
            ToolSpecification::builder()
                .name(&tool.name)
                .description(&tool.description)
                .input_schema(ToolInputSchema::Json(to_document(&spec["input_schema"])))
                .build()
                .map(Tool::ToolSpec)
                .map_err(build_error)
        })
        .collect::<Result<Vec<_>>>()?;
    ToolConfiguration::builder()
        .set_tools(Some(specs))
        .build()
        .map_err(build_error)
}

fn from_output(
    stop_reason: &BedrockStopReason,
    message: Option<&BedrockMessage>,
) -> Result<ModelResponse> {
    let stop_reason = match stop_reason {
        BedrockStopReason::ToolUse => StopReason::ToolUse,
        BedrockStopReason::EndTurn => StopReason::EndTurn,
        BedrockStopReason::MaxTokens => StopReason::MaxTokens,
        BedrockStopReason::StopSequence => StopReason::StopSequence,
        BedrockStopReason::ContentFiltered | BedrockStopReason::GuardrailIntervened => {
            StopReason::ContentFiltered
        }
        other => {
            return Err(BridgeError::ModelRequest(format!(
                "bedrock returned unsupported stop reason `{}`",
                other.as_str()
            )))
        }
    };

    let content = message
        .map(|message| message.content())
        .unwrap_or_default()
        .iter()
        .filter_map(|block| match block {
            BedrockBlock::Text(text) => Some(ResponseBlock::Text(text.clone())),
            BedrockBlock::ToolUse(tool_use) => Some(ResponseBlock::ToolUse(ToolInvocation {
                invocation_id: tool_use.tool_use_id().to_string(),
                tool_name: tool_use.name().to_string(),
                arguments: from_document(tool_use.input()),
            })),
            _ => None,
        })
        .collect();

    Ok(ModelResponse {
        stop_reason,
        content,
    })
}

fn to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(flag) => Document::Bool(*flag),
        Value::Number(number) => Document::Number(if let Some(unsigned) = number.as_u64() {
            Number::PosInt(unsigned)
        } else if let Some(signed) = number.as_i64() {
            Number::NegInt(signed)
        } else {
            Number::Float(number.as_f64().unwrap_or_default())
        }),
        Value::String(text) => Document::String(text.clone()),
        Value::Array(items) => Document::Array(items.iter().map(to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), to_document(value)))
                .collect(),
        ),
    }
}

fn from_document(document: &Document) -> Value {
    match document {
        Document::Null => Value::Null,
        Document::Bool(flag) => Value::Bool(*flag),
        Document::Number(Number::PosInt(unsigned)) => Value::from(*unsigned),
        Document::Number(Number::NegInt(signed)) => Value::from(*signed),
        Document::Number(Number::Float(float)) => serde_json::Number::from_f64(*float)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Document::String(text) => Value::String(text.clone()),
        Document::Array(items) => Value::Array(items.iter().map(from_document).collect()),
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), from_document(value)))
                .collect::<Map<String, Value>>(),
        ),
    }
}
