use crate::agent::AgentType;
use crate::error::{CadenceError, CadenceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle state of a task.
///
/// Transitions are one-directional: `pending → in_progress → {completed | failed | cancelled}`.
/// A pending task may also fail or be cancelled without ever being assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet assigned.
    Pending,
    /// Assigned to an agent (or, for compound tasks, being expanded).
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled from outside the orchestrator.
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => matches!(
                next,
                TaskStatus::InProgress | TaskStatus::Failed | TaskStatus::Cancelled
            ),
            TaskStatus::InProgress => next.is_terminal(),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Important work.
    High,
    /// Must run first.
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Execution context carried by a task.
///
/// The fields the scheduler branches on are typed; anything else lives in `extra`.
/// [`TaskContext::get`] exposes every field under its wire name so decomposition
/// preconditions can be written as a plain key/value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Task type key used to look up decomposition methods.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Session the task belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Retrieved context supplied to the executing agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_context: Option<String>,
    /// Parent of a generated subtask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,
    /// Position of a generated subtask within its parent's expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_index: Option<usize>,
    /// Number of subtasks the parent was expanded into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_subtasks: Option<usize>,
    /// Free-form extension data.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TaskContext {
    /// Context for a task of the given type.
    pub fn typed(task_type: impl Into<String>) -> Self {
        Self {
            task_type: Some(task_type.into()),
            ..Self::default()
        }
    }

    /// Attach a session id.
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Attach a free-form entry.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Look up a context entry by its wire name.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "type" => self.task_type.clone().map(Value::String),
            "session_id" => self.session_id.clone().map(Value::String),
            "rag_context" => self.rag_context.clone().map(Value::String),
            "parent_task_id" => self.parent_task_id.map(|id| Value::String(id.to_string())),
            "subtask_index" => self.subtask_index.map(Value::from),
            "total_subtasks" => self.total_subtasks.map(Value::from),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Exact key/value match of every precondition against this context.
    pub fn satisfies(&self, preconditions: &BTreeMap<String, Value>) -> bool {
        preconditions
            .iter()
            .all(|(key, expected)| self.get(key).as_ref() == Some(expected))
    }
}

/// Scheduling hints attached to a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Preferred agent type for routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type_hint: Option<AgentType>,
    /// Name of the decomposition method that produced this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decomposition_method: Option<String>,
    /// Free-form extension data.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A unit of work tracked by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: Uuid,
    /// Set once at creation for subtasks; never changes afterwards.
    pub parent_task_id: Option<Uuid>,
    /// What the task asks for.
    pub description: String,
    /// Lifecycle state; moves forward only.
    pub status: TaskStatus,
    /// Scheduling priority.
    pub priority: Priority,
    /// Type, session and retrieval context.
    pub context: TaskContext,
    /// Caller-supplied structured input.
    #[serde(default)]
    pub input_data: Value,
    /// Result payload, set on completion.
    pub output_data: Option<Value>,
    /// Failure reason, set on failure.
    pub error_message: Option<String>,
    /// Agent that executed a primitive task.
    pub assigned_agent_id: Option<String>,
    /// Bookkeeping such as the decomposition method.
    #[serde(default)]
    pub metadata: TaskMetadata,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A new pending root task.
    pub fn new(description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parent_task_id: None,
            description: description.into(),
            status: TaskStatus::Pending,
            priority: Priority::default(),
            context: TaskContext::default(),
            input_data: Value::Null,
            output_data: None,
            error_message: None,
            assigned_agent_id: None,
            metadata: TaskMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A new pending task under `parent_id`.
    pub fn child_of(parent_id: Uuid, description: impl Into<String>) -> Self {
        let mut task = Self::new(description);
        task.parent_task_id = Some(parent_id);
        task
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the context.
    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    /// Set the structured input.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input_data = input;
        self
    }

    /// The declared task type, if any.
    pub fn task_type(&self) -> Option<&str> {
        self.context.task_type.as_deref()
    }

    /// Whether the task has reached a final state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting backwards moves and terminal re-entry.
    pub fn transition(&mut self, next: TaskStatus) -> CadenceResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CadenceError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Assign to an agent and mark in progress.
    pub fn assign(&mut self, agent_id: impl Into<String>) -> CadenceResult<()> {
        self.transition(TaskStatus::InProgress)?;
        self.assigned_agent_id = Some(agent_id.into());
        Ok(())
    }

    /// Mark completed with `output`.
    pub fn complete(&mut self, output: Value) -> CadenceResult<()> {
        self.transition(TaskStatus::Completed)?;
        self.output_data = Some(output);
        Ok(())
    }

    /// Mark failed with `message`.
    pub fn fail(&mut self, message: impl Into<String>) -> CadenceResult<()> {
        self.transition(TaskStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Mark cancelled.
    pub fn cancel(&mut self) -> CadenceResult<()> {
        self.transition(TaskStatus::Cancelled)
    }
}
