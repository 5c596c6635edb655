use async_trait::async_trait;
use cadence_core::{Agent, CadenceError, CadenceResult, Task};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence boundary for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Fails with `Store` when the id exists.
    async fn create(&self, task: &Task) -> CadenceResult<()>;
    /// Fetch one task.
    async fn get(&self, id: Uuid) -> CadenceResult<Option<Task>>;
    /// Overwrite an existing task. Fails with `NotFound` for unknown ids.
    async fn update(&self, task: &Task) -> CadenceResult<()>;
    /// Every task, oldest first.
    async fn list(&self) -> CadenceResult<Vec<Task>>;
}

/// Persistence boundary for the agent catalog.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Add an agent to the catalog.
    async fn create(&self, agent: &Agent) -> CadenceResult<()>;
    /// Fetch one agent.
    async fn get(&self, id: &str) -> CadenceResult<Option<Agent>>;
    /// Overwrite an existing agent record.
    async fn update(&self, agent: &Agent) -> CadenceResult<()>;
    /// Every agent, in catalog order.
    async fn list(&self) -> CadenceResult<Vec<Agent>>;
    /// Agents currently able to take work, in catalog order.
    async fn get_available_agents(&self) -> CadenceResult<Vec<Agent>>;
}

/// In-process task store.
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether no task is stored.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> CadenceResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(CadenceError::Store(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CadenceResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update(&self, task: &Task) -> CadenceResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(CadenceError::NotFound(format!("task {}", task.id))),
        }
    }

    async fn list(&self) -> CadenceResult<Vec<Task>> {
        let mut all: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        all.sort_by_key(|t| t.created_at);
        Ok(all)
    }
}

/// In-process agent catalog. Keeps insertion order.
pub struct InMemoryAgentStore {
    agents: RwLock<Vec<Agent>>,
}

impl InMemoryAgentStore {
    /// An empty catalog.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
        }
    }

    /// A catalog seeded with `agents`; later duplicates of an id are dropped.
    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let mut seeded: Vec<Agent> = Vec::new();
        for agent in agents {
            if !seeded.iter().any(|a| a.id == agent.id) {
                seeded.push(agent);
            }
        }
        Self {
            agents: RwLock::new(seeded),
        }
    }
}

impl Default for InMemoryAgentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn create(&self, agent: &Agent) -> CadenceResult<()> {
        let mut agents = self.agents.write().await;
        if agents.iter().any(|a| a.id == agent.id) {
            return Err(CadenceError::Store(format!("agent {} already exists", agent.id)));
        }
        agents.push(agent.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> CadenceResult<Option<Agent>> {
        Ok(self.agents.read().await.iter().find(|a| a.id == id).cloned())
    }

    async fn update(&self, agent: &Agent) -> CadenceResult<()> {
        let mut agents = self.agents.write().await;
        match agents.iter_mut().find(|a| a.id == agent.id) {
            Some(slot) => {
                *slot = agent.clone();
                Ok(())
            }
            None => Err(CadenceError::NotFound(format!("agent {}", agent.id))),
        }
    }

    async fn list(&self) -> CadenceResult<Vec<Agent>> {
        Ok(self.agents.read().await.clone())
    }

    async fn get_available_agents(&self) -> CadenceResult<Vec<Agent>> {
        Ok(self
            .agents
            .read()
            .await
            .iter()
            .filter(|a| a.is_available())
            .cloned()
            .collect())
    }
}
