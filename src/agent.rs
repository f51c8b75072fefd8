use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::llm::{LanguageModel, ResponseBlock, StopReason};
use crate::memory::ConversationMemory;
use crate::message::Turn;
use crate::tool::ToolHost;

pub const DEFAULT_MAX_TURNS: usize = 10;

/// How a run of the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Completed,
    Truncated,
    StoppedBySequence,
    Filtered,
    TurnLimit,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub termination: Termination,
    /// Final text of an `end_turn` response, if the run got that far.
    pub answer: Option<String>,
    /// Completed tool-use iterations.
    pub turns: usize,
    pub tool_calls: usize,
    pub narrative: Vec<String>,
    pub history: Vec<Turn>,
}

impl Outcome {
    /// Narrative fragments in emission order, separated by blank lines.
    pub fn text(&self) -> String {
        self.narrative.join("\n\n")
    }
}

/// Drives the model/tool conversation for one query at a time.
///
/// The agent itself holds no conversation state: every [`Agent::run`] starts
/// from a fresh history, so one agent can serve concurrent queries.
pub struct Agent<M: LanguageModel + ?Sized> {
    model: Arc<M>,
    max_turns: usize,
}

impl<M: LanguageModel + ?Sized> Clone for Agent<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            max_turns: self.max_turns,
        }
    }
}

impl<M: LanguageModel + ?Sized> Agent<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            model,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Answers `query` using the tools offered by `host`.
    ///
    /// Errors from the model or the tool host abort the run as-is.
    pub async fn run<H: ToolHost + ?Sized>(&self, host: &mut H, query: &str) -> Result<Outcome> {
        let mut memory = ConversationMemory::new();
        let mut narrative = Vec::new();
        memory.append_user_text(query);

        let tools = host.list_tools().await?;
        tracing::info!(
            tools = ?tools.iter().map(|tool| tool.name.as_str()).collect::<Vec<_>>(),
            "discovered tools"
        );

        let mut response = self.model.converse(&memory.snapshot(), &tools).await?;
        let mut turns = 0;
        let mut tool_calls = 0;

        let (termination, answer) = loop {
            tracing::info!(
                stop_reason = ?response.stop_reason,
                blocks = response.content.len(),
                "model responded"
            );
            match response.stop_reason {
                StopReason::ToolUse => {
                    narrative.push("received toolUse request".to_string());
                    for block in response.content {
                        match block {
                            ResponseBlock::Text(text) => {
                                narrative.push(format!("[Thinking: {text}]"));
                                memory.append_assistant_text(text);
                            }
                            ResponseBlock::ToolUse(call) => {
                                tracing::info!(tool = %call.tool_name, args = %call.arguments, "calling tool");
                                let payload = host.call(&call.tool_name, call.arguments.clone()).await?;
                                tracing::debug!(tool = %call.tool_name, %payload, "tool returned");
                                narrative.push(format!(
                                    "[Calling tool {} with args {}]",
                                    call.tool_name, call.arguments
                                ));
                                memory.append_tool_request(
                                    call.invocation_id.clone(),
                                    call.tool_name,
                                    call.arguments,
                                );
                                memory.append_tool_result(&call.invocation_id, payload)?;
                                tool_calls += 1;
                            }
                        }
                    }

                    response = self.model.converse(&memory.snapshot(), &tools).await?;
                    turns += 1;
                    // The latest response is dropped unprocessed, whatever it asked for.
                    if turns >= self.max_turns {
                        tracing::warn!(
                            turns,
                            stop_reason = ?response.stop_reason,
                            "max turns reached, ending conversation"
                        );
                        narrative.push("[Max turns reached, ending conversation.]".to_string());
                        break (Termination::TurnLimit, None);
                    }
                }
                StopReason::EndTurn => {
                    tracing::info!("end turn reached, ending conversation");
                    let answer = response.content.into_iter().rev().find_map(|block| match block {
                        ResponseBlock::Text(text) => Some(text),
                        ResponseBlock::ToolUse(_) => None,
                    });
                    match &answer {
                        Some(text) => {
                            memory.append_assistant_text(text.clone());
                            narrative.push(text.clone());
                        }
                        None => tracing::warn!("end_turn response carried no text"),
                    }
                    break (Termination::Completed, answer);
                }
                StopReason::MaxTokens => {
                    tracing::info!("max tokens reached, ending conversation");
                    narrative.push("[Max tokens reached, ending conversation.]".to_string());
                    break (Termination::Truncated, None);
                }
                StopReason::StopSequence => {
                    tracing::info!("stop sequence reached, ending conversation");
                    narrative.push("[Stop sequence reached, ending conversation.]".to_string());
                    break (Termination::StoppedBySequence, None);
                }
                StopReason::ContentFiltered => {
                    tracing::info!("content filtered, ending conversation");
                    narrative.push("[Content filtered, ending conversation.]".to_string());
                    break (Termination::Filtered, None);
                }
            }
        };

        Ok(Outcome {
            termination,
            answer,
            turns,
            tool_calls,
            narrative,
            history: memory.into(),
        })
    }
}
