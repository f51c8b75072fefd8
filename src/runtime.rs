use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::agent::{Agent, Outcome};
use crate::config::{AppConfig, ModelProvider};
use crate::error::{BridgeError, Result};
use crate::llm::{AnthropicClient, LanguageModel};
use crate::session::{script_name, EndpointDescriptor, ToolSession};

/// Answers queries end to end: one tool session per query, always closed
/// before the answer is returned.
#[derive(Clone)]
pub struct QueryRuntime {
    agent: Agent<dyn LanguageModel>,
    endpoint: EndpointDescriptor,
    deadline: Option<Duration>,
}

impl QueryRuntime {
    pub fn new(model: Arc<dyn LanguageModel>, endpoint: EndpointDescriptor) -> Self {
        Self {
            agent: Agent::new(model),
            endpoint,
            deadline: None,
        }
    }

    /// Builds the runtime described by `cfg`, including its model gateway.
    pub async fn from_config(cfg: &AppConfig) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = match cfg.model.provider {
            ModelProvider::Anthropic => Arc::new(AnthropicClient::from_config(&cfg.model)?),
            #[cfg(feature = "aws")]
            ModelProvider::Bedrock => {
                Arc::new(crate::bedrock::BedrockModel::from_config(&cfg.model).await)
            }
            #[cfg(not(feature = "aws"))]
            ModelProvider::Bedrock => {
                return Err(BridgeError::Config(
                    "the bedrock provider requires the `aws` feature".into(),
                ))
            }
        };
        tracing::info!(provider = ?cfg.model.provider, model = %cfg.model.model, "model gateway configured");
        Ok(Self::new(model, cfg.tool_host.clone())
            .with_max_turns(cfg.agent.max_turns)
            .with_deadline(cfg.agent.deadline()))
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.agent = self.agent.with_max_turns(max_turns);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Launches the configured tool host and answers `query` with it.
    pub async fn answer(&self, query: &str) -> Result<Outcome> {
        let query = validate_query(query)?;
        let budget = self.budget();
        async {
            let session = within(budget, ToolSession::open(&self.endpoint)).await?;
            self.drive(session, query, budget).await
        }
        .instrument(self.span())
        .await
    }

    /// Answers `query` over a session the caller already opened. The session
    /// is closed afterwards whatever the outcome.
    pub async fn answer_with(&self, session: ToolSession, query: &str) -> Result<Outcome> {
        let query = validate_query(query)?;
        let budget = self.budget();
        self.drive(session, query, budget)
            .instrument(self.span())
            .await
    }

    async fn drive(
        &self,
        mut session: ToolSession,
        query: &str,
        budget: Option<(Instant, Duration)>,
    ) -> Result<Outcome> {
        let result = within(budget, self.agent.run(&mut session, query)).await;
        if let Err(err) = session.close().await {
            tracing::warn!(%err, "failed to close tool session");
        }
        match &result {
            Ok(outcome) => tracing::info!(
                termination = ?outcome.termination,
                turns = outcome.turns,
                tool_calls = outcome.tool_calls,
                "query answered"
            ),
            Err(err) => tracing::error!(%err, "query failed"),
        }
        result
    }

    fn budget(&self) -> Option<(Instant, Duration)> {
        self.deadline.map(|limit| (Instant::now() + limit, limit))
    }

    fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "query",
            query_id = %Uuid::new_v4(),
            tool_host = %script_name(&self.endpoint.script)
        )
    }
}

fn validate_query(query: &str) -> Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::MissingQuery);
    }
    Ok(trimmed)
}

async fn within<T>(
    budget: Option<(Instant, Duration)>,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    match budget {
        Some((at, limit)) => timeout_at(at, work)
            .await
            .map_err(|_| BridgeError::DeadlineExceeded(limit))?,
        None => work.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelResponse, StopReason, StubModel};

    #[tokio::test]
    async fn blank_query_is_rejected_before_any_work() {
        let model = StubModel::new(vec![ModelResponse::text(StopReason::EndTurn, "unused")]);
        let runtime = QueryRuntime::new(model.clone(), EndpointDescriptor::new("mcp_server.py"));

        for query in ["", "   ", "\n\t"] {
            let err = runtime.answer(query).await.unwrap_err();
            assert!(matches!(err, BridgeError::MissingQuery));
        }
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn unsupported_endpoint_fails_without_model_calls() {
        let model = StubModel::new(vec![ModelResponse::text(StopReason::EndTurn, "unused")]);
        let runtime = QueryRuntime::new(model.clone(), EndpointDescriptor::new("server.rb"));

        let err = runtime.answer("weather?").await.unwrap_err();

        assert!(matches!(err, BridgeError::UnsupportedEndpointKind(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn anthropic_provider_requires_api_key() {
        let mut cfg = AppConfig::default();
        cfg.model.provider = ModelProvider::Anthropic;

        let err = QueryRuntime::from_config(&cfg).await.err().unwrap();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[tokio::test]
    async fn expired_budget_reports_deadline() {
        let limit = Duration::from_millis(10);
        let budget = Some((Instant::now() + limit, limit));

        let err = within(budget, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, BridgeError::DeadlineExceeded(d) if d == limit));
    }
}
