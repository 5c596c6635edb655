#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end orchestration tests.
//!
//! Drives the orchestrator with in-memory stores and mock executors through
//! primitive, compound, failing and streaming queries, and checks that routing
//! outcomes and agent statistics are fed back.

use async_trait::async_trait;
use cadence_core::{Agent, AgentType, CadenceError, CadenceResult, Task, TaskStatus};
use cadence_orchestrator::*;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Mock executor: echoes the task, fails for configured agent types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Call {
    agent_type: AgentType,
    description: String,
    rag_context: Option<String>,
    prior_outputs: usize,
}

#[derive(Default)]
struct MockExecutor {
    failing: HashSet<AgentType>,
    calls: Mutex<Vec<Call>>,
    /// When set, every execution waits for a permit.
    gate: Option<Arc<Semaphore>>,
}

impl MockExecutor {
    fn failing(types: &[AgentType]) -> Self {
        Self {
            failing: types.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AgentExecutor for MockExecutor {
    async fn execute(&self, agent: &Agent, input: &ExecutionInput) -> CadenceResult<Value> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.calls.lock().push(Call {
            agent_type: agent.agent_type,
            description: input.description.clone(),
            rag_context: input.rag_context.clone(),
            prior_outputs: input.prior_outputs.len(),
        });
        if self.failing.contains(&agent.agent_type) {
            return Err(CadenceError::Executor(format!(
                "{} backend exploded",
                agent.agent_type
            )));
        }
        Ok(json!({
            "response": format!("{} handled: {}", agent.agent_type, input.description),
            "agent_id": agent.id,
            "agent_type": agent.agent_type,
        }))
    }
}

/// Retrieval backend that is always down.
struct BrokenRetrieval;

#[async_trait]
impl RetrievalCollaborator for BrokenRetrieval {
    async fn build_context(&self, _: &str, _: &str, _: usize) -> CadenceResult<String> {
        Err(CadenceError::Retrieval("connection refused".into()))
    }

    async fn store_document(
        &self,
        _: &str,
        _: &str,
        _: BTreeMap<String, Value>,
        _: &str,
    ) -> CadenceResult<()> {
        Err(CadenceError::Retrieval("connection refused".into()))
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    executor: Arc<MockExecutor>,
    tasks: Arc<InMemoryTaskStore>,
    agents: Arc<InMemoryAgentStore>,
    router: Arc<ThompsonRouter>,
}

fn roster() -> Vec<Agent> {
    AgentType::ALL
        .iter()
        .map(|t| Agent::with_id(format!("{t}-1"), format!("{t} one"), *t))
        .collect()
}

fn harness_with(agents: Vec<Agent>, executor: MockExecutor) -> Harness {
    let executor = Arc::new(executor);
    let tasks = Arc::new(InMemoryTaskStore::new());
    let agents = Arc::new(InMemoryAgentStore::with_agents(agents));
    let router = Arc::new(ThompsonRouter::new(RouterConfig {
        seed: Some(11),
        ..RouterConfig::default()
    }));
    let orchestrator = Orchestrator::new(
        Arc::new(HtnPlanner::with_default_methods()),
        router.clone(),
        executor.clone(),
        tasks.clone(),
        agents.clone(),
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        executor,
        tasks,
        agents,
        router,
    }
}

fn harness() -> Harness {
    harness_with(roster(), MockExecutor::default())
}

// ---------------------------------------------------------------------------
// Synchronous queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn coding_query_runs_as_primitive_on_a_coder() {
    let h = harness();
    let result = h
        .orchestrator
        .process_query(QueryRequest::new("Write a tokenizer").with_task_type("coding"))
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.agent_id.as_deref(), Some("coder-1"));
    assert!(!result.rag_context_used);
    assert_eq!(result.context_length, 0);

    let stored = h.tasks.get(result.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.output_data.as_ref(), Some(&result.result));
    assert_eq!(stored.assigned_agent_id.as_deref(), Some("coder-1"));
    assert_eq!(h.tasks.len().await, 1);

    let stats = h.router.get_performance_stats();
    assert_eq!(stats["coder-1"].successes, 1);

    let coder = h.agents.get("coder-1").await.unwrap().unwrap();
    assert_eq!(coder.total_tasks, 1);
    assert!((coder.success_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn research_query_decomposes_into_three_sequential_subtasks() {
    let h = harness();
    let result = h
        .orchestrator
        .process_query(
            QueryRequest::new("History of the transistor")
                .with_task_type("research")
                .with_session("sess-1"),
        )
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.result["subtasks_completed"], 3);
    assert_eq!(result.result["subtasks_failed"], 0);
    assert!(result.agent_id.is_none());

    let calls = h.executor.calls();
    let order: Vec<AgentType> = calls.iter().map(|c| c.agent_type).collect();
    assert_eq!(
        order,
        vec![AgentType::Scholar, AgentType::Logician, AgentType::Executive]
    );
    assert!(calls[0].description.starts_with("Gather information"));
    assert!(calls[2].description.contains("History of the transistor"));
    let prior: Vec<usize> = calls.iter().map(|c| c.prior_outputs).collect();
    assert_eq!(prior, vec![0, 1, 2]);

    let report = h.orchestrator.get_task_status(result.task_id).await.unwrap();
    assert_eq!(report.task.status, TaskStatus::Completed);
    assert!(!report.hierarchy.is_primitive);
    assert_eq!(report.hierarchy.children.len(), 3);
    for (i, child) in report.hierarchy.children.iter().enumerate() {
        assert_eq!(child.status, TaskStatus::Completed);
        let sub = h.tasks.get(child.id).await.unwrap().unwrap();
        assert_eq!(sub.parent_task_id, Some(result.task_id));
        assert_eq!(sub.context.subtask_index, Some(i));
        assert_eq!(sub.context.total_subtasks, Some(3));
        assert_eq!(sub.context.session_id.as_deref(), Some("sess-1"));
        assert!(sub.context.task_type.is_none());
    }
    assert_eq!(report.performance.len(), 3);
}

#[tokio::test]
async fn no_available_agents_fails_without_touching_router() {
    let h = harness_with(Vec::new(), MockExecutor::default());
    let result = h
        .orchestrator
        .process_query(QueryRequest::new("Write a tokenizer").with_task_type("coding"))
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.error.as_deref(), Some(NO_AVAILABLE_AGENTS));
    let stored = h.tasks.get(result.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(NO_AVAILABLE_AGENTS));
    assert!(h.router.get_performance_stats().is_empty());
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn executor_error_fails_task_and_counts_one_router_failure() {
    let h = harness_with(roster(), MockExecutor::failing(&[AgentType::Coder]));
    let result = h
        .orchestrator
        .process_query(QueryRequest::new("Write a tokenizer").with_task_type("coding"))
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Failed);
    let stored = h.tasks.get(result.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains("coder backend exploded"));

    let stats = h.router.get_performance_stats();
    assert_eq!(stats["coder-1"].failures, 1);
    assert_eq!(stats["coder-1"].successes, 0);

    let coder = h.agents.get("coder-1").await.unwrap().unwrap();
    assert_eq!(coder.total_tasks, 1);
    assert_eq!(coder.success_rate, 0.0);
}

#[tokio::test]
async fn compound_parent_completes_when_some_subtasks_fail() {
    let h = harness_with(roster(), MockExecutor::failing(&[AgentType::Scholar]));
    let result = h
        .orchestrator
        .process_query(QueryRequest::new("Quantum dots").with_task_type("research"))
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.result["subtasks_completed"], 2);
    assert_eq!(result.result["subtasks_failed"], 1);
    let first = &result.result["subtask_results"][0];
    assert_eq!(first["status"], "failed");
    assert!(first["error"].as_str().unwrap().contains("scholar"));
}

#[tokio::test]
async fn compound_parent_completes_even_when_every_subtask_fails() {
    let h = harness_with(
        roster(),
        MockExecutor::failing(&[AgentType::Logician, AgentType::Creative, AgentType::Critic]),
    );
    let result = h
        .orchestrator
        .process_query(QueryRequest::new("Reduce churn").with_task_type("problem_solving"))
        .await
        .unwrap();

    assert_eq!(result.status, TaskStatus::Completed);
    assert!(result.error.is_none());
    assert_eq!(result.result["subtasks_completed"], 0);
    assert_eq!(result.result["subtasks_failed"], 3);
    for sub in result.result["subtask_results"].as_array().unwrap() {
        assert_eq!(sub["status"], "failed");
    }
    let stored = h.tasks.get(result.task_id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.output_data.as_ref(), Some(&result.result));
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let h = harness();
    let err = h
        .orchestrator
        .process_query(QueryRequest::new("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, CadenceError::Validation(_)));
    assert!(h.tasks.is_empty().await);
}

#[tokio::test]
async fn unknown_task_status_is_not_found() {
    let h = harness();
    let err = h
        .orchestrator
        .get_task_status(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, CadenceError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Retrieval and memory collaborators
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retrieval_context_flows_to_executor_and_answers_are_stored() {
    let h = harness();
    let retrieval = Arc::new(InMemoryRetrieval::new());
    retrieval
        .store_document(
            "conversations",
            "Tokenizers split source text into lexemes",
            BTreeMap::new(),
            "seed",
        )
        .await
        .unwrap();
    let memory = Arc::new(InMemoryEpisodicMemory::new());

    let orchestrator = Orchestrator::new(
        Arc::new(HtnPlanner::with_default_methods()),
        h.router.clone(),
        h.executor.clone(),
        h.tasks.clone(),
        h.agents.clone(),
    )
    .with_retrieval(retrieval.clone())
    .with_memory(memory.clone());

    let result = orchestrator
        .process_query(
            QueryRequest::new("Write a tokenizer for source text")
                .with_task_type("coding")
                .with_session("s-9"),
        )
        .await
        .unwrap();

    assert!(result.rag_context_used);
    assert_eq!(
        result.context_length,
        "Tokenizers split source text into lexemes".len()
    );
    let calls = h.executor.calls();
    assert_eq!(
        calls[0].rag_context.as_deref(),
        Some("Tokenizers split source text into lexemes")
    );

    let stored = retrieval
        .get("conversations", &result.task_id.to_string())
        .await
        .unwrap();
    assert!(stored.text.starts_with("Q: Write a tokenizer"));
    assert!(stored.text.contains("coder handled"));

    let records = memory.list(Some("s-9")).await;
    assert_eq!(records.len(), 2);
    assert!(records[0].has_tag(QUERY_TAG));
    assert!(records[1].has_tag(ANSWER_TAG));
    assert!(records.iter().all(|r| r.task_id == Some(result.task_id)));
}

#[tokio::test]
async fn failing_retrieval_does_not_abort_the_query() {
    let h = harness();
    let orchestrator = Orchestrator::new(
        Arc::new(HtnPlanner::with_default_methods()),
        h.router.clone(),
        h.executor.clone(),
        h.tasks.clone(),
        h.agents.clone(),
    )
    .with_retrieval(Arc::new(BrokenRetrieval));

    let result = orchestrator
        .process_query(QueryRequest::new("Write a tokenizer").with_task_type("coding"))
        .await
        .unwrap();
    assert_eq!(result.status, TaskStatus::Completed);
    assert!(!result.rag_context_used);
}

#[tokio::test]
async fn concurrent_queries_record_every_outcome() {
    let h = harness_with(
        vec![
            Agent::with_id("c1", "c1", AgentType::Coder),
            Agent::with_id("c2", "c2", AgentType::Coder),
        ],
        MockExecutor::default(),
    );

    let mut handles = Vec::new();
    for i in 0..20 {
        let orchestrator = h.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .process_query(QueryRequest::new(format!("job {i}")).with_task_type("coding"))
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().status, TaskStatus::Completed);
    }

    let total: u64 = h
        .router
        .get_performance_stats()
        .values()
        .map(|s| s.total_tasks)
        .sum();
    assert_eq!(total, 20);
    let catalog: u64 = h
        .agents
        .list()
        .await
        .unwrap()
        .iter()
        .map(|a| a.total_tasks)
        .sum();
    assert_eq!(catalog, 20);
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn research_stream_emits_events_in_order() {
    let h = harness();
    let events: Vec<OrchestrationEvent> = h
        .orchestrator
        .process_query_stream(QueryRequest::new("Solar sails").with_task_type("research"))
        .collect()
        .await;

    let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "task_created",
            "task_decomposed",
            "subtask_started",
            "subtask_completed",
            "subtask_started",
            "subtask_completed",
            "subtask_started",
            "subtask_completed",
            "task_completed",
        ]
    );

    let root = events[0].task_id.unwrap();
    assert!(events.iter().all(|e| e.task_id == Some(root)));
    match &events[1].kind {
        EventKind::TaskDecomposed { method, subtasks } => {
            assert_eq!(method.as_deref(), Some("research_default"));
            assert_eq!(subtasks.len(), 3);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &events.last().unwrap().kind {
        EventKind::TaskCompleted { status, result, .. } => {
            assert_eq!(*status, TaskStatus::Completed);
            assert_eq!(result["subtasks_completed"], 3);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn primitive_stream_is_created_then_completed() {
    let h = harness();
    let events: Vec<OrchestrationEvent> = h
        .orchestrator
        .process_query_stream(QueryRequest::new("Write a lexer").with_task_type("coding"))
        .collect()
        .await;
    let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(types, vec!["task_created", "task_completed"]);
}

#[tokio::test]
async fn rejected_stream_still_ends_with_a_terminal_event() {
    let h = harness();
    let events: Vec<OrchestrationEvent> = h
        .orchestrator
        .process_query_stream(QueryRequest::new(""))
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
    assert!(events[0].task_id.is_none());
    match &events[0].kind {
        EventKind::TaskCompleted { status, error, .. } => {
            assert_eq!(*status, TaskStatus::Failed);
            assert!(error.as_deref().unwrap().contains("query"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn dropped_stream_stops_scheduling_remaining_subtasks() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness_with(roster(), MockExecutor::gated(gate.clone()));

    let mut stream = h
        .orchestrator
        .process_query_stream(QueryRequest::new("Solar sails").with_task_type("research"));

    let mut root = None;
    while let Some(event) = stream.next().await {
        root = root.or(event.task_id);
        if event.event_type() == "subtask_started" {
            break;
        }
    }
    drop(stream);
    gate.add_permits(10);

    let root = root.unwrap();
    let mut parent = None;
    for _ in 0..200 {
        let task = h.tasks.get(root).await.unwrap().unwrap();
        if task.is_terminal() {
            parent = Some(task);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let parent = parent.expect("orchestration did not finish");
    assert_eq!(parent.status, TaskStatus::Completed);
    assert_eq!(parent.output_data.as_ref().unwrap()["subtasks_completed"], 1);

    let mut statuses: Vec<(usize, TaskStatus)> = h
        .tasks
        .list()
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.parent_task_id == Some(root))
        .map(|t| (t.context.subtask_index.unwrap(), t.status))
        .collect();
    statuses.sort_by_key(|(i, _)| *i);
    assert_eq!(
        statuses,
        vec![
            (0, TaskStatus::Completed),
            (1, TaskStatus::Pending),
            (2, TaskStatus::Pending)
        ]
    );
    assert_eq!(h.executor.calls().len(), 1);
}

// ---------------------------------------------------------------------------
// Store failures after execution
// ---------------------------------------------------------------------------

/// Task store that refuses to persist completed tasks.
struct RejectCompletedStore {
    inner: InMemoryTaskStore,
}

#[async_trait]
impl TaskStore for RejectCompletedStore {
    async fn create(&self, task: &Task) -> CadenceResult<()> {
        self.inner.create(task).await
    }

    async fn get(&self, id: Uuid) -> CadenceResult<Option<Task>> {
        self.inner.get(id).await
    }

    async fn update(&self, task: &Task) -> CadenceResult<()> {
        if task.status == TaskStatus::Completed {
            return Err(CadenceError::Store("disk full".into()));
        }
        self.inner.update(task).await
    }

    async fn list(&self) -> CadenceResult<Vec<Task>> {
        self.inner.list().await
    }
}

fn orchestrator_over(
    tasks: Arc<RejectCompletedStore>,
) -> (Orchestrator, Arc<InMemoryAgentStore>, Arc<ThompsonRouter>) {
    let agents = Arc::new(InMemoryAgentStore::with_agents(roster()));
    let router = Arc::new(seeded_router(5));
    let orchestrator = Orchestrator::new(
        Arc::new(HtnPlanner::with_default_methods()),
        router.clone(),
        Arc::new(MockExecutor::default()),
        tasks,
        agents.clone(),
    );
    (orchestrator, agents, router)
}

#[tokio::test]
async fn store_failure_after_execution_keeps_the_outcome() {
    let tasks = Arc::new(RejectCompletedStore {
        inner: InMemoryTaskStore::new(),
    });
    let (orchestrator, agents, router) = orchestrator_over(tasks);

    let err = orchestrator
        .process_query(QueryRequest::new("Write a tokenizer").with_task_type("coding"))
        .await
        .unwrap_err();
    assert!(matches!(err, CadenceError::Store(_)));

    let stats = router.get_performance_stats();
    assert_eq!(stats["coder-1"].successes, 1);
    assert_eq!(stats["coder-1"].total_tasks, 1);
    let coder = agents.get("coder-1").await.unwrap().unwrap();
    assert_eq!(coder.total_tasks, 1);
}

#[tokio::test]
async fn store_failure_mid_decomposition_fails_the_parent() {
    let tasks = Arc::new(RejectCompletedStore {
        inner: InMemoryTaskStore::new(),
    });
    let (orchestrator, _agents, router) = orchestrator_over(tasks.clone());

    let err = orchestrator
        .process_query(QueryRequest::new("Solar sails").with_task_type("research"))
        .await
        .unwrap_err();
    assert!(matches!(err, CadenceError::Store(_)));

    let parent = tasks
        .list()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.parent_task_id.is_none())
        .unwrap();
    assert_eq!(parent.status, TaskStatus::Failed);
    assert!(parent.error_message.unwrap().contains("disk full"));
    assert_eq!(router.get_performance_stats()["scholar-1"].successes, 1);
}

// ---------------------------------------------------------------------------
// Router learning
// ---------------------------------------------------------------------------

fn seeded_router(seed: u64) -> ThompsonRouter {
    ThompsonRouter::new(RouterConfig {
        seed: Some(seed),
        ..RouterConfig::default()
    })
}

#[test]
fn router_converges_on_the_reliable_agent() {
    let router = seeded_router(2024);
    let pool = vec![
        Agent::with_id("a", "reliable", AgentType::Logician),
        Agent::with_id("b", "flaky", AgentType::Logician),
    ];
    for agent in &pool {
        router.register_agent(agent);
    }
    for i in 0..200 {
        router.update_performance("a", i % 10 != 0);
        router.update_performance("b", i % 10 == 0);
    }

    let picked_a = (0..1_000)
        .filter(|_| router.select_agent(&pool, None).unwrap().id == "a")
        .count();
    assert!(picked_a > 800, "reliable agent picked {picked_a} times");
}

#[test]
fn router_keeps_exploring_new_agents() {
    let router = seeded_router(99);
    let veteran = Agent::with_id("veteran", "veteran", AgentType::Scholar);
    router.register_agent(&veteran);
    for i in 0..200 {
        router.update_performance("veteran", i % 20 != 0);
    }
    let pool = vec![veteran, Agent::with_id("rookie", "rookie", AgentType::Scholar)];

    let picked_rookie = (0..200)
        .filter(|_| router.select_agent(&pool, None).unwrap().id == "rookie")
        .count();
    assert!(picked_rookie >= 1);
}

#[tokio::test]
async fn outcomes_from_queries_shift_routing() {
    let h = harness_with(
        vec![
            Agent::with_id("good", "good", AgentType::Custom),
            Agent::with_id("bad", "bad", AgentType::Coder),
        ],
        MockExecutor::failing(&[AgentType::Coder]),
    );
    for i in 0..60 {
        h.orchestrator
            .process_query(QueryRequest::new(format!("q{i}")))
            .await
            .unwrap();
    }
    let stats = h.router.get_performance_stats();
    assert!(stats["good"].total_tasks > stats["bad"].total_tasks);
    assert_eq!(
        h.router.get_best_agent_for_type(AgentType::Custom).as_deref(),
        Some("good")
    );
}
