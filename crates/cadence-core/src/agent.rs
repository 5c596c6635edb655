use crate::error::CadenceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

/// Specialisation of a worker agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Formal reasoning and analysis.
    Logician,
    /// Ideation and writing.
    Creative,
    /// Information gathering and research.
    Scholar,
    /// Review and critique.
    Critic,
    /// Code generation.
    Coder,
    /// Planning, coordination and summaries.
    Executive,
    /// User-defined specialisation.
    Custom,
}

impl AgentType {
    /// Every agent type, in declaration order.
    pub const ALL: [AgentType; 7] = [
        AgentType::Logician,
        AgentType::Creative,
        AgentType::Scholar,
        AgentType::Critic,
        AgentType::Coder,
        AgentType::Executive,
        AgentType::Custom,
    ];
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentType::Logician => write!(f, "logician"),
            AgentType::Creative => write!(f, "creative"),
            AgentType::Scholar => write!(f, "scholar"),
            AgentType::Critic => write!(f, "critic"),
            AgentType::Coder => write!(f, "coder"),
            AgentType::Executive => write!(f, "executive"),
            AgentType::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for AgentType {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logician" => Ok(AgentType::Logician),
            "creative" => Ok(AgentType::Creative),
            "scholar" => Ok(AgentType::Scholar),
            "critic" => Ok(AgentType::Critic),
            "coder" => Ok(AgentType::Coder),
            "executive" => Ok(AgentType::Executive),
            "custom" => Ok(AgentType::Custom),
            other => Err(CadenceError::Validation(format!(
                "unknown agent type: {other}"
            ))),
        }
    }
}

/// Availability of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Ready to take work.
    #[default]
    Idle,
    /// Currently executing a task.
    Busy,
    /// Last execution left the agent in a faulted state.
    Error,
    /// Not reachable.
    Offline,
}

/// A worker agent from the agent catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Stable identifier, also the router key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Specialization used for routing.
    pub agent_type: AgentType,
    /// Free-form capability tags.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Current availability.
    #[serde(default)]
    pub status: AgentStatus,
    /// Executions recorded so far.
    #[serde(default)]
    pub total_tasks: u64,
    /// Running mean of successful executions, in `0..=1`.
    #[serde(default)]
    pub success_rate: f64,
    /// Running mean of execution time, in seconds.
    #[serde(default)]
    pub avg_response_time: f64,
    /// When the agent was added to the catalog.
    pub created_at: DateTime<Utc>,
    /// Last time the record changed.
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// A new idle agent with a random id.
    pub fn new(name: impl Into<String>, agent_type: AgentType) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, agent_type)
    }

    /// A new idle agent with a stable id.
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        agent_type: AgentType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            agent_type,
            capabilities: BTreeSet::new(),
            status: AgentStatus::Idle,
            total_tasks: 0,
            success_rate: 0.0,
            avg_response_time: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the capability tags.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the agent is idle.
    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Idle
    }

    /// Fold one completed execution into the running averages.
    pub fn record_execution(&mut self, success: bool, elapsed_seconds: f64) {
        self.total_tasks += 1;
        let n = self.total_tasks as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate =
            (self.success_rate + (outcome - self.success_rate) / n).clamp(0.0, 1.0);
        let elapsed = if elapsed_seconds.is_finite() {
            elapsed_seconds.max(0.0)
        } else {
            0.0
        };
        self.avg_response_time =
            (self.avg_response_time + (elapsed - self.avg_response_time) / n).max(0.0);
        self.updated_at = Utc::now();
    }
}
