//! Adaptive scheduling for Cadence: HTN decomposition, Thompson-sampling
//! routing and the orchestrator that drives a query from intake to result.
//!
//! A query becomes a root task. If a decomposition method matches its type the
//! planner expands it into ordered subtasks; every primitive task is routed to
//! one agent, executed, and its outcome fed back into the router's Beta
//! posteriors so later routing favours agents that succeed.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Runs queries synchronously or as an event stream.
//! - [`HtnPlanner`]: First-match method table that expands compound tasks.
//! - [`ThompsonRouter`]: Picks an agent by sampling per-agent Beta posteriors.
//! - [`AgentExecutor`]: Runs a primitive task for an agent; [`ExecutorRegistry`]
//!   dispatches per agent type.
//! - [`TaskStore`] / [`AgentStore`]: Persistence boundaries with in-memory impls.
//! - [`RetrievalCollaborator`] / [`MemoryWriteSink`]: Optional best-effort context
//!   and memory collaborators.

/// Query orchestration.
pub mod engine;
/// Streaming progress events.
pub mod events;
/// Agent executors.
pub mod executor;
/// Hierarchical task network planner.
pub mod htn;
/// OpenAI-compatible LLM client.
pub mod llm;
/// Episodic memory sink.
pub mod memory;
/// Built-in agent personas.
pub mod profiles;
/// Retrieval-augmented context.
pub mod retrieval;
/// Thompson-sampling router.
pub mod router;
/// Task and agent persistence.
pub mod store;

pub use engine::{
    Orchestrator, OrchestratorConfig, QueryRequest, QueryResult, TaskStatusReport,
    type_hint_for, DEFAULT_TASK_TYPE, NO_AVAILABLE_AGENTS,
};
pub use events::{EventKind, OrchestrationEvent, SubtaskSummary};
pub use executor::{AgentExecutor, ExecutionInput, ExecutorRegistry, PersonaExecutor};
pub use htn::{default_methods, HtnMethod, HtnPlanner, SubtaskTemplate, TaskNode};
pub use llm::{LlmClient, LlmConfig, OpenAiCompatClient};
pub use memory::{InMemoryEpisodicMemory, MemoryRecord, MemoryWriteSink, ANSWER_TAG, QUERY_TAG};
pub use profiles::{default_profiles, profile_for, AgentProfile};
pub use retrieval::{Document, InMemoryRetrieval, RetrievalCollaborator};
pub use router::{AgentPerformance, PerformanceStats, RouterConfig, ThompsonRouter};
pub use store::{AgentStore, InMemoryAgentStore, InMemoryTaskStore, TaskStore};
