//! `cadence.toml` loading.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working single-process setup: in-memory stores, the built-in HTN methods and
//! one agent per built-in type.

use cadence_core::{Agent, AgentType, CadenceError, CadenceResult};
use cadence_orchestrator::{HtnMethod, LlmConfig, OrchestratorConfig, RouterConfig, SubtaskTemplate};
use cadence_security::RateLimitPolicy;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Environment variable consulted when `[llm] api_key` is empty.
pub const LLM_API_KEY_ENV: &str = "CADENCE_LLM_API_KEY";

/// Default config path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "cadence.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub server: ServerConfig,
    pub router: RouterConfig,
    pub orchestrator: OrchestratorConfig,
    /// Per-scope overrides on top of the built-in policies.
    pub rate_limits: HashMap<String, RateLimitPolicy>,
    pub rate_limit_store: RateLimitStoreConfig,
    pub llm: LlmConfig,
    pub agents: Vec<AgentEntry>,
    pub methods: Vec<MethodEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitStoreConfig {
    pub kind: StoreKind,
    /// Database file for the `sqlite` store.
    pub path: PathBuf,
}

impl Default for RateLimitStoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            path: PathBuf::from("./data/rate_limits.db"),
        }
    }
}

/// One `[[agents]]` catalog entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentEntry {
    /// Stable id; a random one is generated when omitted.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl AgentEntry {
    pub fn to_agent(&self) -> Agent {
        let agent = match &self.id {
            Some(id) => Agent::with_id(id.clone(), self.name.clone(), self.agent_type),
            None => Agent::new(self.name.clone(), self.agent_type),
        };
        agent.with_capabilities(self.capabilities.iter().cloned())
    }
}

/// One `[[methods]]` entry, appended after the built-in methods.
#[derive(Debug, Clone, Deserialize)]
pub struct MethodEntry {
    pub task_type: String,
    pub name: String,
    #[serde(default)]
    pub preconditions: BTreeMap<String, Value>,
    #[serde(default)]
    pub subtasks: Vec<SubtaskTemplate>,
}

impl MethodEntry {
    pub fn to_method(&self) -> HtnMethod {
        HtnMethod {
            name: self.name.clone(),
            preconditions: self.preconditions.clone(),
            subtasks: self.subtasks.clone(),
        }
    }
}

impl CadenceConfig {
    /// Parse a TOML document and apply environment fallbacks.
    pub fn from_toml(text: &str) -> CadenceResult<Self> {
        let mut config: Self = toml::from_str(text)
            .map_err(|e| CadenceError::Config(format!("Failed to parse config: {e}")))?;
        if config.llm.api_key.is_empty() {
            if let Ok(key) = std::env::var(LLM_API_KEY_ENV) {
                config.llm.api_key = key;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// The configured catalog, or one agent per built-in type when it is empty.
    pub fn agent_catalog(&self) -> Vec<Agent> {
        if self.agents.is_empty() {
            return default_roster();
        }
        self.agents.iter().map(AgentEntry::to_agent).collect()
    }

    fn validate(&self) -> CadenceResult<()> {
        for (scope, policy) in &self.rate_limits {
            if policy.limit == 0 || policy.window_seconds == 0 {
                return Err(CadenceError::Config(format!(
                    "rate_limits.{scope}: limit and window_seconds must be positive"
                )));
            }
        }
        for entry in &self.methods {
            if entry.task_type.trim().is_empty() {
                return Err(CadenceError::Config(format!(
                    "method '{}' has an empty task_type",
                    entry.name
                )));
            }
        }
        if self.orchestrator.stream_buffer == 0 {
            return Err(CadenceError::Config(
                "orchestrator.stream_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// One agent per built-in type, with ids like `coder-1`.
pub fn default_roster() -> Vec<Agent> {
    AgentType::ALL
        .iter()
        .map(|t| Agent::with_id(format!("{t}-1"), format!("{t} agent"), *t))
        .collect()
}

/// Load the config at `path`.
///
/// A missing file is only tolerated for the default path, which then yields
/// the defaults.
pub async fn load_config(path: &Path, explicit: bool) -> CadenceResult<CadenceConfig> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => CadenceConfig::from_toml(&text),
        Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
            CadenceConfig::from_toml("")
        }
        Err(e) => Err(CadenceError::Config(format!(
            "Failed to read config file '{}': {e}",
            path.display()
        ))),
    }
}
