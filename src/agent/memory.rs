//! In-process similarity memory.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::RwLock;

use super::traits::{MemoryEntry, MemoryStore};
use super::types::AgentId;

/// Naive in-process memory store.
///
/// Similarity is token overlap between the query and the remembered text,
/// which is enough for agents to pull back their own recent decisions.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remembered notes.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no notes.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn overlap(query: &HashSet<String>, text: &str) -> usize {
    tokenize(text)
        .iter()
        .filter(|token| query.contains(*token))
        .count()
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn remember(&self, text: &str, agent: Option<AgentId>) {
        let mut entries = self.entries.write().await;
        entries.push(MemoryEntry {
            text: text.to_string(),
            agent,
            recorded_at: Utc::now(),
        });
    }

    async fn recall(&self, query: &str, limit: usize) -> Vec<MemoryEntry> {
        let query_tokens = tokenize(query);
        let entries = self.entries.read().await;

        let mut scored: Vec<(usize, &MemoryEntry)> = entries
            .iter()
            .map(|entry| (overlap(&query_tokens, &entry.text), entry))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}
