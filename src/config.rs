use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_MAX_TURNS;
use crate::error::{BridgeError, Result};
use crate::llm::SamplingConfig;
use crate::session::EndpointDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Bedrock,
    Anthropic,
}

impl FromStr for ModelProvider {
    type Err = BridgeError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "bedrock" => Ok(ModelProvider::Bedrock),
            "anthropic" => Ok(ModelProvider::Anthropic),
            other => Err(BridgeError::Config(format!("unknown model provider `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ModelProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::default(),
            model: default_model(),
            region: default_region(),
            api_key: None,
            endpoint: None,
            max_tokens: default_max_tokens(),
            temperature: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

fn default_model() -> String {
    "anthropic.claude-3-sonnet-20240229-v1:0".into()
}

fn default_region() -> String {
    "us-east-1".into()
}

fn default_max_tokens() -> u32 {
    SamplingConfig::default().max_tokens
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Wall-clock budget for one query in seconds; 0 disables it.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl AgentConfig {
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_deadline_secs() -> u64 {
    120
}

fn default_tool_host() -> EndpointDescriptor {
    EndpointDescriptor::new("mcp_server.py")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default = "default_tool_host")]
    pub tool_host: EndpointDescriptor,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            agent: AgentConfig::default(),
            tool_host: default_tool_host(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| BridgeError::Config(format!("failed to parse configuration: {err}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// Defaults overlaid with environment overrides, for deployments that
    /// ship no configuration file.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = env::var("MCP_BRIDGE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = parse_env("MCP_BRIDGE_PORT")? {
            self.server.port = port;
        }
        if let Ok(provider) = env::var("MCP_BRIDGE_MODEL_PROVIDER") {
            self.model.provider = provider.parse()?;
        }
        if let Ok(model) = env::var("MCP_BRIDGE_MODEL") {
            self.model.model = model;
        }
        if let Ok(region) = env::var("MCP_BRIDGE_REGION") {
            self.model.region = region;
        }
        if let Ok(key) = env::var("MCP_BRIDGE_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Ok(endpoint) = env::var("MCP_BRIDGE_ENDPOINT") {
            self.model.endpoint = Some(endpoint);
        }
        if let Some(max_tokens) = parse_env("MCP_BRIDGE_MAX_TOKENS")? {
            self.model.max_tokens = max_tokens;
        }
        if let Some(temperature) = parse_env("MCP_BRIDGE_TEMPERATURE")? {
            self.model.temperature = temperature;
        }
        if let Some(max_turns) = parse_env("MCP_BRIDGE_MAX_TURNS")? {
            self.agent.max_turns = max_turns;
        }
        if let Some(deadline) = parse_env("MCP_BRIDGE_DEADLINE_SECS")? {
            self.agent.deadline_secs = deadline;
        }
        if let Ok(script) = env::var("MCP_BRIDGE_TOOL_SCRIPT") {
            self.tool_host.script = script.into();
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.max_turns == 0 {
            return Err(BridgeError::Config("agent.max_turns must be at least 1".into()));
        }
        if self.model.max_tokens == 0 {
            return Err(BridgeError::Config("model.max_tokens must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(BridgeError::Config(format!(
                "model.temperature must be within 0.0..=1.0, got {}",
                self.model.temperature
            )));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BridgeError::Config(format!("invalid value `{raw}` for {key}"))),
        Err(_) => Ok(None),
    }
}
