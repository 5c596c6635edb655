use crate::events::{EventKind, EventSink, OrchestrationEvent, SubtaskSummary};
use crate::executor::{AgentExecutor, ExecutionInput};
use crate::htn::{HtnPlanner, TaskNode};
use crate::memory::{MemoryRecord, MemoryWriteSink, ANSWER_TAG, QUERY_TAG};
use crate::retrieval::RetrievalCollaborator;
use crate::router::{PerformanceStats, ThompsonRouter};
use crate::store::{AgentStore, TaskStore};
use cadence_core::{AgentType, CadenceError, CadenceResult, Task, TaskContext, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Error message recorded on a task when the catalog has no idle agents.
pub const NO_AVAILABLE_AGENTS: &str = "No available agents to execute task";

/// Task type applied to queries that do not declare one.
pub const DEFAULT_TASK_TYPE: &str = "general";

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Retrieval collection used for context and for stored answers.
    pub rag_collection: String,
    /// Most retrieved chunks folded into a task's context.
    pub rag_max_chunks: usize,
    /// Store completed answers back into retrieval and memory.
    pub store_answers: bool,
    /// Capacity of the event channel behind a streaming query.
    pub stream_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            rag_collection: "conversations".into(),
            rag_max_chunks: 3,
            store_answers: true,
            stream_buffer: 32,
        }
    }
}

/// A user query entering the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Natural-language request.
    pub query: String,
    /// Conversation the query belongs to.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Declared task type; selects the decomposition method.
    #[serde(default)]
    pub task_type: Option<String>,
    /// Structured input passed through to executors.
    #[serde(default)]
    pub input_data: Value,
}

impl QueryRequest {
    /// A bare query with no session or type.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            task_type: None,
            input_data: Value::Null,
        }
    }

    /// Attach a session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Declare the task type.
    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Attach structured input.
    pub fn with_input(mut self, input_data: Value) -> Self {
        self.input_data = input_data;
        self
    }
}

/// Outcome of a synchronous query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Root task id.
    pub task_id: Uuid,
    /// Final root task status.
    pub status: TaskStatus,
    /// Root task output, or `null` on failure.
    pub result: Value,
    /// Failure reason of the root task.
    pub error: Option<String>,
    /// Executing agent of a primitive root task.
    pub agent_id: Option<String>,
    /// Whether retrieval contributed context.
    pub rag_context_used: bool,
    /// Length of the retrieved context in characters.
    pub context_length: usize,
}

/// Point-in-time view of a task tree and router state.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusReport {
    /// The requested task.
    pub task: Task,
    /// The task and all of its descendants.
    pub hierarchy: TaskNode,
    /// Router statistics keyed by agent id.
    pub performance: BTreeMap<String, PerformanceStats>,
}

#[derive(Debug, Default)]
struct SubtaskProgress {
    completed: usize,
    failed: usize,
    results: Vec<Value>,
}

#[derive(Debug, Clone)]
struct Outcome {
    status: TaskStatus,
    output: Value,
    error: Option<String>,
    agent_id: Option<String>,
}

impl Outcome {
    fn of(task: &Task) -> Self {
        Self {
            status: task.status,
            output: task.output_data.clone().unwrap_or(Value::Null),
            error: task.error_message.clone(),
            agent_id: task.assigned_agent_id.clone(),
        }
    }
}

/// Control plane for user queries.
///
/// Each query becomes a root task. Compound tasks are expanded by the HTN
/// planner and their subtasks run sequentially in method order; primitive
/// tasks are routed to one agent by the Thompson router. Retrieval and memory
/// are optional and best-effort.
pub struct Orchestrator {
    planner: Arc<HtnPlanner>,
    router: Arc<ThompsonRouter>,
    executor: Arc<dyn AgentExecutor>,
    tasks: Arc<dyn TaskStore>,
    agents: Arc<dyn AgentStore>,
    retrieval: Option<Arc<dyn RetrievalCollaborator>>,
    memory: Option<Arc<dyn MemoryWriteSink>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Wire an orchestrator over its required collaborators.
    pub fn new(
        planner: Arc<HtnPlanner>,
        router: Arc<ThompsonRouter>,
        executor: Arc<dyn AgentExecutor>,
        tasks: Arc<dyn TaskStore>,
        agents: Arc<dyn AgentStore>,
    ) -> Self {
        Self {
            planner,
            router,
            executor,
            tasks,
            agents,
            retrieval: None,
            memory: None,
            config: OrchestratorConfig::default(),
        }
    }

    /// Enable retrieval-augmented context.
    pub fn with_retrieval(mut self, retrieval: Arc<dyn RetrievalCollaborator>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// Record final answers in episodic memory.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryWriteSink>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Replace the default settings.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// The decomposition planner.
    pub fn planner(&self) -> &Arc<HtnPlanner> {
        &self.planner
    }

    /// The agent router.
    pub fn router(&self) -> &Arc<ThompsonRouter> {
        &self.router
    }

    /// Active settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register every catalog agent with the router. Returns how many there were.
    pub async fn sync_agents(&self) -> CadenceResult<usize> {
        let agents = self.agents.list().await?;
        for agent in &agents {
            self.router.register_agent(agent);
        }
        info!(agents = agents.len(), "Orchestrator: agent catalog synced");
        Ok(agents.len())
    }

    /// Run a query to completion and return its result.
    ///
    /// Task failures are reported in the result; `Err` is reserved for invalid
    /// requests and store failures.
    pub async fn process_query(&self, request: QueryRequest) -> CadenceResult<QueryResult> {
        let start = Instant::now();
        let mut task = self.create_root(request).await?;
        let result = self.drive(&mut task, &EventSink::none()).await?;
        info!(
            task_id = %result.task_id,
            status = %result.status,
            duration_ms = start.elapsed().as_millis(),
            "Orchestrator: query finished"
        );
        Ok(result)
    }

    /// Run a query in the background and stream its progress.
    ///
    /// The stream always ends with a `task_completed` event. Dropping the
    /// stream stops the run before its next subtask; an execution already in
    /// flight is allowed to finish and remaining subtasks stay `pending`.
    pub fn process_query_stream(
        self: &Arc<Self>,
        request: QueryRequest,
    ) -> ReceiverStream<OrchestrationEvent> {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let sink = EventSink::channel(tx);
            let mut task = match this.create_root(request).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(error = %e, "Orchestrator: streaming query rejected");
                    sink.emit(None, failed_completion(&e)).await;
                    return;
                }
            };

            match this.drive(&mut task, &sink).await {
                Ok(result) => {
                    sink.emit(
                        Some(result.task_id),
                        EventKind::TaskCompleted {
                            status: result.status,
                            result: result.result,
                            error: result.error,
                            agent_id: result.agent_id,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Orchestrator: streaming query aborted");
                    sink.emit(Some(task.id), failed_completion(&e)).await;
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Validate the request, fetch retrieval context and persist the root task.
    async fn create_root(&self, request: QueryRequest) -> CadenceResult<Task> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(CadenceError::Validation("query must not be empty".into()));
        }

        let task_type = request
            .task_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TASK_TYPE);

        let mut context = TaskContext::typed(task_type);
        context.session_id = request.session_id.clone();
        let rag_context = self.fetch_context(query).await;
        if !rag_context.is_empty() {
            context.rag_context = Some(rag_context);
        }

        let mut task = Task::new(query)
            .with_context(context)
            .with_input(request.input_data);
        task.metadata.agent_type_hint = type_hint_for(task_type);
        self.tasks.create(&task).await?;

        info!(
            task_id = %task.id,
            task_type,
            session_id = ?task.context.session_id,
            "Orchestrator: task created"
        );

        self.remember(
            MemoryRecord::new(query, QUERY_TAG)
                .with_session(task.context.session_id.clone())
                .with_task(task.id),
        )
        .await;

        Ok(task)
    }

    async fn drive(&self, task: &mut Task, sink: &EventSink) -> CadenceResult<QueryResult> {
        let context_length = task
            .context
            .rag_context
            .as_deref()
            .map_or(0, |c| c.chars().count());

        sink.emit(
            Some(task.id),
            EventKind::TaskCreated {
                description: task.description.clone(),
                task_type: task.context.task_type.clone(),
                session_id: task.context.session_id.clone(),
                rag_context_used: context_length > 0,
            },
        )
        .await;

        let outcome = if self.planner.is_primitive(task) {
            self.execute_primitive(task, Vec::new()).await?
        } else {
            self.execute_compound(task, sink).await?
        };

        if outcome.status == TaskStatus::Completed {
            self.store_answer(task, &outcome.output).await;
        }

        Ok(QueryResult {
            task_id: task.id,
            status: outcome.status,
            result: outcome.output,
            error: outcome.error,
            agent_id: outcome.agent_id,
            rag_context_used: context_length > 0,
            context_length,
        })
    }

    /// Expand `task` and run its subtasks one after another.
    ///
    /// The parent completes once the subtasks have run, whatever their
    /// individual outcomes; its output counts completed and failed subtasks
    /// and lists every subtask that ran. A store failure part-way through
    /// marks the parent failed before the error is returned.
    async fn execute_compound(&self, task: &mut Task, sink: &EventSink) -> CadenceResult<Outcome> {
        let subtasks = self.planner.decompose(task);
        if subtasks.is_empty() {
            return self.execute_primitive(task, Vec::new()).await;
        }

        task.transition(TaskStatus::InProgress)?;
        self.tasks.update(task).await?;

        let progress = match self.run_subtasks(task.id, subtasks, sink).await {
            Ok(progress) => progress,
            Err(e) => {
                self.abort_compound(task, &e).await;
                return Err(e);
            }
        };

        let output = json!({
            "subtasks_completed": progress.completed,
            "subtasks_failed": progress.failed,
            "subtask_results": progress.results,
        });
        task.complete(output)?;
        self.tasks.update(task).await?;

        info!(
            task_id = %task.id,
            completed = progress.completed,
            failed = progress.failed,
            "Orchestrator: compound task finished"
        );

        let mut outcome = Outcome::of(task);
        outcome.agent_id = None;
        Ok(outcome)
    }

    async fn run_subtasks(
        &self,
        parent_id: Uuid,
        subtasks: Vec<Task>,
        sink: &EventSink,
    ) -> CadenceResult<SubtaskProgress> {
        for subtask in &subtasks {
            self.tasks.create(subtask).await?;
        }

        let method = subtasks
            .first()
            .and_then(|s| s.metadata.decomposition_method.clone());
        info!(
            task_id = %parent_id,
            method = ?method,
            subtask_count = subtasks.len(),
            "Orchestrator: task decomposed"
        );
        sink.emit(
            Some(parent_id),
            EventKind::TaskDecomposed {
                method,
                subtasks: subtasks
                    .iter()
                    .map(|s| SubtaskSummary {
                        subtask_id: s.id,
                        description: s.description.clone(),
                        agent_type: s.metadata.agent_type_hint,
                        priority: s.priority,
                    })
                    .collect(),
            },
        )
        .await;

        let total = subtasks.len();
        let mut progress = SubtaskProgress::default();
        let mut prior_outputs = Vec::new();

        for (index, mut subtask) in subtasks.into_iter().enumerate() {
            if sink.is_closed() {
                warn!(
                    task_id = %parent_id,
                    remaining = total - index,
                    "Orchestrator: stream consumer gone, stopping before next subtask"
                );
                break;
            }

            sink.emit(
                Some(parent_id),
                EventKind::SubtaskStarted {
                    subtask_id: subtask.id,
                    index,
                    total,
                    description: subtask.description.clone(),
                },
            )
            .await;

            let outcome = self
                .execute_primitive(&mut subtask, prior_outputs.clone())
                .await?;

            if outcome.status == TaskStatus::Completed {
                progress.completed += 1;
                prior_outputs.push(outcome.output.clone());
            } else {
                progress.failed += 1;
            }

            sink.emit(
                Some(parent_id),
                EventKind::SubtaskCompleted {
                    subtask_id: subtask.id,
                    index,
                    total,
                    status: outcome.status,
                    agent_id: outcome.agent_id.clone(),
                    output: (!outcome.output.is_null()).then(|| outcome.output.clone()),
                    error: outcome.error.clone(),
                },
            )
            .await;

            progress.results.push(json!({
                "subtask_id": subtask.id,
                "description": subtask.description,
                "agent_type": subtask.metadata.agent_type_hint,
                "agent_id": outcome.agent_id,
                "status": outcome.status,
                "output": outcome.output,
                "error": outcome.error,
            }));
        }

        Ok(progress)
    }

    /// Leave a compound parent in a terminal state after `cause` aborted it.
    async fn abort_compound(&self, task: &mut Task, cause: &CadenceError) {
        error!(task_id = %task.id, error = %cause, "Orchestrator: compound task aborted");
        if task.fail(format!("Orchestration aborted: {cause}")).is_err() {
            return;
        }
        if let Err(e) = self.tasks.update(task).await {
            warn!(task_id = %task.id, error = %e, "Orchestrator: failed to persist aborted task");
        }
    }

    /// Route `task` to one agent and run it.
    ///
    /// An empty catalog fails the task without touching the router. Executor
    /// errors fail the task and count as a negative outcome for the agent.
    async fn execute_primitive(
        &self,
        task: &mut Task,
        prior_outputs: Vec<Value>,
    ) -> CadenceResult<Outcome> {
        let available = self.agents.get_available_agents().await?;
        if available.is_empty() {
            warn!(task_id = %task.id, "Orchestrator: no available agents");
            task.fail(NO_AVAILABLE_AGENTS)?;
            self.tasks.update(task).await?;
            return Ok(Outcome::of(task));
        }

        let agent = self
            .router
            .select_agent(&available, task.metadata.agent_type_hint)?
            .clone();
        task.assign(agent.id.clone())?;
        self.tasks.update(task).await?;

        info!(
            task_id = %task.id,
            agent_id = %agent.id,
            agent_type = %agent.agent_type,
            "Orchestrator: task assigned"
        );

        let input = ExecutionInput::from_task(task).with_prior_outputs(prior_outputs);
        let start = Instant::now();
        let result = self.executor.execute(&agent, &input).await;
        let elapsed = start.elapsed().as_secs_f64();

        // The outcome is fed back before anything fallible runs.
        self.router.update_performance(&agent.id, result.is_ok());
        self.record_agent_outcome(&agent.id, result.is_ok(), elapsed).await;

        match result {
            Ok(output) => task.complete(output)?,
            Err(e) => {
                let message = match e {
                    CadenceError::Executor(msg) => msg,
                    other => other.to_string(),
                };
                warn!(
                    task_id = %task.id,
                    agent_id = %agent.id,
                    error = %message,
                    "Orchestrator: execution failed"
                );
                task.fail(message)?;
            }
        }
        self.tasks.update(task).await?;

        Ok(Outcome::of(task))
    }

    /// Fold one execution into the catalog record. Failures are logged only.
    async fn record_agent_outcome(&self, agent_id: &str, success: bool, elapsed: f64) {
        let mut agent = match self.agents.get(agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                warn!(agent_id, "Orchestrator: agent vanished from catalog");
                return;
            }
            Err(e) => {
                warn!(agent_id, error = %e, "Orchestrator: failed to load agent stats");
                return;
            }
        };
        agent.record_execution(success, elapsed);
        if let Err(e) = self.agents.update(&agent).await {
            warn!(agent_id, error = %e, "Orchestrator: failed to persist agent stats");
        }
    }

    /// Snapshot of a stored task, its subtree and the router's statistics.
    ///
    /// Reads every stored task to assemble the tree, so cost grows with the
    /// size of the task store rather than the size of the tree.
    pub async fn get_task_status(&self, task_id: Uuid) -> CadenceResult<TaskStatusReport> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("task {task_id}")))?;
        let all = self.tasks.list().await?;
        let hierarchy = self.planner.build_hierarchy(&task, &all);
        Ok(TaskStatusReport {
            task,
            hierarchy,
            performance: self.router.get_performance_stats(),
        })
    }

    async fn fetch_context(&self, query: &str) -> String {
        let Some(retrieval) = &self.retrieval else {
            return String::new();
        };
        match retrieval
            .build_context(&self.config.rag_collection, query, self.config.rag_max_chunks)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!(error = %e, "Orchestrator: retrieval failed, continuing without context");
                String::new()
            }
        }
    }

    async fn remember(&self, record: MemoryRecord) {
        let Some(memory) = &self.memory else {
            return;
        };
        if let Err(e) = memory.store(record).await {
            warn!(error = %e, "Orchestrator: memory write failed");
        }
    }

    async fn store_answer(&self, task: &Task, output: &Value) {
        if !self.config.store_answers {
            return;
        }
        let answer = answer_text(output);
        if answer.is_empty() {
            return;
        }

        if let Some(retrieval) = &self.retrieval {
            let mut metadata = BTreeMap::new();
            metadata.insert("task_id".to_string(), json!(task.id));
            metadata.insert("task_type".to_string(), json!(task.context.task_type));
            metadata.insert("session_id".to_string(), json!(task.context.session_id));
            let document = format!("Q: {}\nA: {}", task.description, answer);
            if let Err(e) = retrieval
                .store_document(
                    &self.config.rag_collection,
                    &document,
                    metadata,
                    &task.id.to_string(),
                )
                .await
            {
                warn!(task_id = %task.id, error = %e, "Orchestrator: failed to store answer");
            }
        }

        self.remember(
            MemoryRecord::new(answer, ANSWER_TAG)
                .with_session(task.context.session_id.clone())
                .with_task(task.id),
        )
        .await;
    }
}

/// Human-readable answer text from a task output.
///
/// Uses `response` when present; compound outputs join their completed
/// subtasks' responses.
fn answer_text(output: &Value) -> String {
    if let Some(response) = output.get("response").and_then(Value::as_str) {
        return response.to_string();
    }
    if let Some(results) = output.get("subtask_results").and_then(Value::as_array) {
        return results
            .iter()
            .filter_map(|r| r.get("output").and_then(|o| o.get("response")))
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n\n");
    }
    if output.is_null() {
        String::new()
    } else {
        output.to_string()
    }
}

/// Agent specialty implied by a root task type, if any.
pub fn type_hint_for(task_type: &str) -> Option<AgentType> {
    match task_type {
        "coding" | "code" => Some(AgentType::Coder),
        "analysis" | "reasoning" => Some(AgentType::Logician),
        "writing" => Some(AgentType::Creative),
        "review" => Some(AgentType::Critic),
        "planning" | "summary" => Some(AgentType::Executive),
        "lookup" => Some(AgentType::Scholar),
        other => other.parse().ok(),
    }
}

fn failed_completion(e: &CadenceError) -> EventKind {
    EventKind::TaskCompleted {
        status: TaskStatus::Failed,
        result: Value::Null,
        error: Some(e.to_string()),
        agent_id: None,
    }
}
