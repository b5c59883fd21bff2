//! In-process vector store.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::document::{finalize_hits, MemoryDocument, ScoredDocument, SearchQuery};
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::MemoryResult;
use crate::store::MemoryStore;

struct Entry {
    document: MemoryDocument,
    embedding: Vec<f32>,
}

/// Cosine-similarity store over embeddings held in memory.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryVectorStore {
    async fn add(&self, document: MemoryDocument) -> MemoryResult<String> {
        let embedding = self.embedder.embed_one(&document.content).await?;
        let id = document.id.clone();

        let mut entries = self.entries.write();
        let entry = Entry {
            document,
            embedding,
        };
        match entries.iter_mut().find(|e| e.document.id == id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(id)
    }

    async fn search(&self, query: &SearchQuery) -> MemoryResult<Vec<ScoredDocument>> {
        if self.entries.read().is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed_one(&query.text).await?;

        let hits = self
            .entries
            .read()
            .iter()
            .filter(|e| e.document.matches(&query.filter))
            .map(|e| ScoredDocument {
                document: e.document.clone(),
                score: cosine_similarity(&query_vector, &e.embedding),
                source: self.backend().to_string(),
            })
            .collect();
        Ok(finalize_hits(hits, query))
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryDocument>> {
        Ok(self
            .entries
            .read()
            .iter()
            .find(|e| e.document.id == id)
            .map(|e| e.document.clone()))
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.document.id != id);
        Ok(entries.len() != before)
    }

    async fn count(&self) -> MemoryResult<usize> {
        Ok(self.entries.read().len())
    }

    async fn clear(&self) -> MemoryResult<()> {
        self.entries.write().clear();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str {
        "vector"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    #[tokio::test]
    async fn test_vector_search_ranks_overlap_first() {
        let store = InMemoryVectorStore::new(Arc::new(HashingEmbedder::new(256)));
        store
            .add(MemoryDocument::new("stripe payment webhook handler").with_id("pay"))
            .await
            .unwrap();
        store
            .add(MemoryDocument::new("user profile avatar upload").with_id("profile"))
            .await
            .unwrap();

        let hits = store
            .search(&SearchQuery::new("payment webhook"))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].document.id, "pay");
        assert_eq!(hits[0].source, "vector");
    }

    #[tokio::test]
    async fn test_empty_vector_store() {
        let store = InMemoryVectorStore::new(Arc::new(HashingEmbedder::default()));
        assert!(store.search(&SearchQuery::new("anything")).await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
