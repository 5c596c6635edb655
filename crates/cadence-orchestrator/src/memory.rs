use async_trait::async_trait;
use cadence_core::CadenceResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Tag attached to recorded user queries.
pub const QUERY_TAG: &str = "query";
/// Tag attached to recorded final answers.
pub const ANSWER_TAG: &str = "answer";

/// One entry in episodic memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Record id.
    pub id: Uuid,
    /// Remembered text.
    pub content: String,
    /// Classification tags.
    pub tags: Vec<String>,
    /// Session the record belongs to.
    pub session_id: Option<String>,
    /// Task that produced the record.
    pub task_id: Option<Uuid>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// A record carrying one tag.
    pub fn new(content: impl Into<String>, tag: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            tags: vec![tag.to_string()],
            session_id: None,
            task_id: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a session.
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Attach the producing task.
    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Whether `tag` is present.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Write-only sink for episodic memory. Calls are best-effort.
#[async_trait]
pub trait MemoryWriteSink: Send + Sync {
    /// Persist one record.
    async fn store(&self, record: MemoryRecord) -> CadenceResult<()>;
}

/// Append-only in-process episodic memory.
pub struct InMemoryEpisodicMemory {
    records: RwLock<Vec<MemoryRecord>>,
}

impl InMemoryEpisodicMemory {
    /// An empty memory.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// All records, optionally filtered by session, oldest first.
    pub async fn list(&self, session_filter: Option<&str>) -> Vec<MemoryRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| session_filter.map_or(true, |s| r.session_id.as_deref() == Some(s)))
            .cloned()
            .collect()
    }

    /// Number of stored records.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for InMemoryEpisodicMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryWriteSink for InMemoryEpisodicMemory {
    async fn store(&self, record: MemoryRecord) -> CadenceResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}
