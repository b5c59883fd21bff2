//! In-process TF-IDF store.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::document::{MemoryDocument, ScoredDocument, SearchQuery};
use crate::error::MemoryResult;
use crate::store::MemoryStore;
use crate::tfidf::rank_documents;

/// TF-IDF store over a document list held in memory.
///
/// The index is rebuilt over the filtered candidates on every search.
#[derive(Debug, Default)]
pub struct InMemoryTfIdfStore {
    documents: RwLock<Vec<MemoryDocument>>,
}

impl InMemoryTfIdfStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryTfIdfStore {
    async fn add(&self, document: MemoryDocument) -> MemoryResult<String> {
        let id = document.id.clone();
        let mut documents = self.documents.write();
        match documents.iter_mut().find(|d| d.id == id) {
            Some(existing) => *existing = document,
            None => documents.push(document),
        }
        debug!("Indexed memory document {}", id);
        Ok(id)
    }

    async fn search(&self, query: &SearchQuery) -> MemoryResult<Vec<ScoredDocument>> {
        let documents = self.documents.read().clone();
        Ok(rank_documents(documents, query, self.backend()))
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryDocument>> {
        Ok(self.documents.read().iter().find(|d| d.id == id).cloned())
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let mut documents = self.documents.write();
        let before = documents.len();
        documents.retain(|d| d.id != id);
        Ok(documents.len() != before)
    }

    async fn count(&self) -> MemoryResult<usize> {
        Ok(self.documents.read().len())
    }

    async fn clear(&self) -> MemoryResult<()> {
        self.documents.write().clear();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str {
        "tfidf"
    }
}
