//! Memory and retrieval context.
//!
//! Before planning, the engine asks a [`MemoryService`] for memories relevant
//! to the incoming request and renders them into the `memory_context` and
//! `rag_context` fields of the run state.  Planner and executor prompts carry
//! those strings verbatim.
//!
//! [`KeywordMemory`] is a small in-process implementation that scores entries
//! by keyword overlap; production deployments plug in a vector store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// A single retrieved memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// The remembered text.
    pub content: String,
    /// Relevance score in `[0, 1]` (higher is more relevant).
    #[serde(default)]
    pub score: f64,
    /// Optional origin label (document name, conversation id, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Retrieves memories relevant to a message.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Return memories relevant to `message` within `scope` (a thread id for
    /// conversational memory, a corpus name for RAG).
    async fn retrieve_relevant(&self, message: &str, scope: &str) -> Result<Vec<MemoryEntry>>;

    /// Render memories into a context block for prompts.
    fn format(&self, memories: &[MemoryEntry]) -> String {
        memories
            .iter()
            .map(|m| match &m.source {
                Some(src) => format!("- {} (source: {src})", m.content),
                None => format!("- {}", m.content),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// Keyword memory
// ---------------------------------------------------------------------------

/// In-process memory scored by keyword overlap.
#[derive(Debug)]
pub struct KeywordMemory {
    scopes: RwLock<HashMap<String, Vec<MemoryEntry>>>,
    limit: usize,
}

impl KeywordMemory {
    /// Create an empty store returning at most `limit` entries per query.
    pub fn new(limit: usize) -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            limit,
        }
    }

    /// Remember `content` under `scope`.
    pub async fn remember(
        &self,
        scope: impl Into<String>,
        content: impl Into<String>,
        source: Option<String>,
    ) {
        self.scopes
            .write()
            .await
            .entry(scope.into())
            .or_default()
            .push(MemoryEntry {
                content: content.into(),
                score: 0.0,
                source,
            });
    }
}

#[async_trait]
impl MemoryService for KeywordMemory {
    async fn retrieve_relevant(&self, message: &str, scope: &str) -> Result<Vec<MemoryEntry>> {
        let query = keywords(message);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let scopes = self.scopes.read().await;
        let Some(entries) = scopes.get(scope) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<MemoryEntry> = entries
            .iter()
            .filter_map(|entry| {
                let words = keywords(&entry.content);
                let hits = query.intersection(&words).count();
                (hits > 0).then(|| MemoryEntry {
                    score: hits as f64 / query.len() as f64,
                    ..entry.clone()
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.limit);

        tracing::debug!(scope, hits = scored.len(), "memories retrieved");
        Ok(scored)
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
