use crate::llm::LlmClient;
use crate::profiles::{profile_for, AgentProfile};
use async_trait::async_trait;
use cadence_core::{Agent, AgentType, CadenceError, CadenceResult, Task};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Everything an executor needs to run one primitive task.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionInput {
    /// Task being executed.
    pub task_id: Uuid,
    /// Task description.
    pub description: String,
    /// Structured task input.
    pub input_data: Value,
    /// Retrieved context, if any.
    pub rag_context: Option<String>,
    /// Session the task belongs to.
    pub session_id: Option<String>,
    /// Outputs of earlier sibling subtasks, in execution order.
    pub prior_outputs: Vec<Value>,
}

impl ExecutionInput {
    /// Input for `task` with no prior outputs.
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            description: task.description.clone(),
            input_data: task.input_data.clone(),
            rag_context: task.context.rag_context.clone(),
            session_id: task.context.session_id.clone(),
            prior_outputs: Vec::new(),
        }
    }

    /// Attach outputs of earlier siblings.
    pub fn with_prior_outputs(mut self, prior_outputs: Vec<Value>) -> Self {
        self.prior_outputs = prior_outputs;
        self
    }
}

/// Runs a primitive task on behalf of an agent.
///
/// Any error is recorded by the orchestrator as a task failure and a negative
/// routing outcome for the agent.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run `input` as `agent`, returning the task output.
    async fn execute(&self, agent: &Agent, input: &ExecutionInput) -> CadenceResult<Value>;
}

/// Executor that prompts an LLM with the agent type's persona.
pub struct PersonaExecutor {
    profile: AgentProfile,
    llm: Arc<dyn LlmClient>,
}

impl PersonaExecutor {
    /// Executor with the built-in persona for `agent_type`.
    pub fn new(agent_type: AgentType, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            profile: profile_for(agent_type),
            llm,
        }
    }

    /// The persona in use.
    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    fn build_prompt(input: &ExecutionInput) -> String {
        let mut prompt = format!("Task: {}\n", input.description);

        if !input.input_data.is_null() {
            prompt.push_str(&format!("\nInput data:\n{}\n", input.input_data));
        }

        if let Some(context) = input.rag_context.as_deref().filter(|c| !c.is_empty()) {
            prompt.push_str(&format!("\nRelevant context:\n{context}\n"));
        }

        if !input.prior_outputs.is_empty() {
            prompt.push_str("\nResults from earlier steps:\n");
            for (i, output) in input.prior_outputs.iter().enumerate() {
                let text = output
                    .get("response")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| output.to_string());
                prompt.push_str(&format!("{}. {}\n", i + 1, text));
            }
        }

        prompt
    }
}

#[async_trait]
impl AgentExecutor for PersonaExecutor {
    async fn execute(&self, agent: &Agent, input: &ExecutionInput) -> CadenceResult<Value> {
        let start = Instant::now();
        let prompt = Self::build_prompt(input);
        let response = self
            .llm
            .generate(
                Some(self.profile.system_prompt),
                &prompt,
                Some(self.profile.temperature),
            )
            .await?;

        Ok(json!({
            "response": response,
            "agent_id": agent.id,
            "agent_name": agent.name,
            "agent_type": agent.agent_type,
            "execution_time": start.elapsed().as_secs_f64(),
        }))
    }
}

/// Dispatches to a per-type executor, with an optional fallback.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<AgentType, Arc<dyn AgentExecutor>>,
    fallback: Option<Arc<dyn AgentExecutor>>,
}

impl ExecutorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a [`PersonaExecutor`] for every agent type.
    pub fn with_llm(llm: Arc<dyn LlmClient>) -> Self {
        let mut registry = Self::new();
        for agent_type in AgentType::ALL {
            registry.register(
                agent_type,
                Arc::new(PersonaExecutor::new(agent_type, llm.clone())),
            );
        }
        registry
    }

    /// Route `agent_type` to `executor`.
    pub fn register(&mut self, agent_type: AgentType, executor: Arc<dyn AgentExecutor>) {
        self.executors.insert(agent_type, executor);
    }

    /// Executor for types with no registration.
    pub fn with_fallback(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    /// Executor for `agent_type`, else the fallback.
    pub fn resolve(&self, agent_type: AgentType) -> CadenceResult<Arc<dyn AgentExecutor>> {
        self.executors
            .get(&agent_type)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| {
                CadenceError::Executor(format!(
                    "no executor registered for agent type {agent_type}"
                ))
            })
    }
}

#[async_trait]
impl AgentExecutor for ExecutorRegistry {
    async fn execute(&self, agent: &Agent, input: &ExecutionInput) -> CadenceResult<Value> {
        self.resolve(agent.agent_type)?.execute(agent, input).await
    }
}
