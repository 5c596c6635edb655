use async_trait::async_trait;
use cadence_core::{CadenceError, CadenceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

/// Separator placed between chunks in a built context string.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Retrieval-augmented context provider.
///
/// The orchestrator treats every call as best-effort: failures are logged and
/// the query proceeds without context.
#[async_trait]
pub trait RetrievalCollaborator: Send + Sync {
    /// Concatenate up to `max_chunks` documents relevant to `query`.
    /// Returns an empty string when nothing matches.
    async fn build_context(
        &self,
        collection: &str,
        query: &str,
        max_chunks: usize,
    ) -> CadenceResult<String>;

    /// Insert or replace the document with `id`.
    async fn store_document(
        &self,
        collection: &str,
        text: &str,
        metadata: BTreeMap<String, Value>,
        id: &str,
    ) -> CadenceResult<()>;
}

/// A document held by [`InMemoryRetrieval`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Document id, unique within its collection.
    pub id: String,
    /// Document body.
    pub text: String,
    /// Caller-supplied metadata.
    pub metadata: BTreeMap<String, Value>,
    /// Insertion time.
    pub stored_at: DateTime<Utc>,
}

/// Lowercase alphanumeric words longer than one character.
fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 1)
        .collect()
}

/// Keyword-overlap retrieval over per-collection document lists.
///
/// Documents are ranked by how many distinct query terms they contain; ties
/// keep insertion order.
pub struct InMemoryRetrieval {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl InMemoryRetrieval {
    /// An index with no collections.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of documents in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Look up one document.
    pub async fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .await
            .get(collection)?
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }
}

impl Default for InMemoryRetrieval {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RetrievalCollaborator for InMemoryRetrieval {
    async fn build_context(
        &self,
        collection: &str,
        query: &str,
        max_chunks: usize,
    ) -> CadenceResult<String> {
        let terms = tokenize(query);
        if terms.is_empty() || max_chunks == 0 {
            return Ok(String::new());
        }

        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(String::new());
        };

        let mut scored: Vec<(usize, &Document)> = documents
            .iter()
            .filter_map(|doc| {
                let overlap = tokenize(&doc.text).intersection(&terms).count();
                (overlap > 0).then_some((overlap, doc))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(max_chunks);

        Ok(scored
            .into_iter()
            .map(|(_, doc)| doc.text.as_str())
            .collect::<Vec<_>>()
            .join(CHUNK_SEPARATOR))
    }

    async fn store_document(
        &self,
        collection: &str,
        text: &str,
        metadata: BTreeMap<String, Value>,
        id: &str,
    ) -> CadenceResult<()> {
        if id.is_empty() {
            return Err(CadenceError::Retrieval("document id must not be empty".into()));
        }
        let document = Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
            stored_at: Utc::now(),
        };
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        match documents.iter_mut().find(|d| d.id == id) {
            Some(existing) => *existing = document,
            None => documents.push(document),
        }
        Ok(())
    }
}
