use cadence_core::{AgentType, Priority, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Progress notification emitted by a streaming orchestration.
///
/// Serialises flat, e.g. `{"type":"subtask_started","task_id":"…","timestamp":"…",…}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    /// Root task the event belongs to. Absent only when the query was
    /// rejected before a task was created.
    pub task_id: Option<Uuid>,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event payload, flattened next to `type`.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl OrchestrationEvent {
    /// Stamp `kind` with the current time.
    pub fn new(task_id: Option<Uuid>, kind: EventKind) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    /// Whether this is the last event of a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::TaskCompleted { .. })
    }

    /// The `type` tag as it appears on the wire.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::TaskCreated { .. } => "task_created",
            EventKind::TaskDecomposed { .. } => "task_decomposed",
            EventKind::SubtaskStarted { .. } => "subtask_started",
            EventKind::SubtaskCompleted { .. } => "subtask_completed",
            EventKind::TaskCompleted { .. } => "task_completed",
        }
    }
}

/// Short description of a generated subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskSummary {
    /// Id of the created subtask.
    pub subtask_id: Uuid,
    /// Expanded subtask description.
    pub description: String,
    /// Routing hint from the method.
    pub agent_type: Option<AgentType>,
    /// Subtask priority.
    pub priority: Priority,
}

/// Event payloads, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The root task was stored.
    TaskCreated {
        /// Root task description.
        description: String,
        /// Declared task type.
        task_type: Option<String>,
        /// Session the query belongs to.
        session_id: Option<String>,
        /// Whether retrieval contributed context.
        rag_context_used: bool,
    },
    /// A method expanded the root into subtasks.
    TaskDecomposed {
        /// Name of the method applied.
        method: Option<String>,
        /// Generated subtasks in execution order.
        subtasks: Vec<SubtaskSummary>,
    },
    /// A subtask is about to run.
    SubtaskStarted {
        /// Subtask id.
        subtask_id: Uuid,
        /// Zero-based position among the siblings.
        index: usize,
        /// Number of siblings.
        total: usize,
        /// Subtask description.
        description: String,
    },
    /// A subtask reached a final state.
    SubtaskCompleted {
        /// Subtask id.
        subtask_id: Uuid,
        /// Zero-based position among the siblings.
        index: usize,
        /// Number of siblings.
        total: usize,
        /// Final subtask status.
        status: TaskStatus,
        /// Agent that ran the subtask.
        agent_id: Option<String>,
        /// Subtask output on success.
        output: Option<Value>,
        /// Failure reason.
        error: Option<String>,
    },
    /// The root task reached a final state. Always the last event.
    TaskCompleted {
        /// Final root status.
        status: TaskStatus,
        /// Root task output.
        result: Value,
        /// Failure reason.
        error: Option<String>,
        /// Executing agent of a primitive root.
        agent_id: Option<String>,
    },
}

/// Optional event channel threaded through one orchestration run.
///
/// A disconnected receiver is not an error; sends are dropped and
/// [`EventSink::is_closed`] lets the caller stop scheduling new work.
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::Sender<OrchestrationEvent>>,
}

impl EventSink {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn channel(tx: mpsc::Sender<OrchestrationEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.as_ref().is_some_and(mpsc::Sender::is_closed)
    }

    pub(crate) async fn emit(&self, task_id: Option<Uuid>, kind: EventKind) {
        let Some(tx) = &self.tx else {
            return;
        };
        let event = OrchestrationEvent::new(task_id, kind);
        let event_type = event.event_type();
        if tx.send(event).await.is_err() {
            debug!(event_type, "Event stream consumer gone; dropping event");
        }
    }
}
