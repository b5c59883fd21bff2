//! The memory store trait.

use async_trait::async_trait;

use crate::document::{MemoryDocument, ScoredDocument, SearchQuery};
use crate::error::MemoryResult;

/// A searchable document store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Store a document, replacing any document with the same id.
    async fn add(&self, document: MemoryDocument) -> MemoryResult<String>;

    async fn add_batch(&self, documents: Vec<MemoryDocument>) -> MemoryResult<Vec<String>> {
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.add(document).await?);
        }
        Ok(ids)
    }

    /// Ranked search, best match first.
    async fn search(&self, query: &SearchQuery) -> MemoryResult<Vec<ScoredDocument>>;

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryDocument>>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, id: &str) -> MemoryResult<bool>;

    async fn count(&self) -> MemoryResult<usize>;

    async fn clear(&self) -> MemoryResult<()>;

    async fn health_check(&self) -> bool;

    /// Short backend name used in logs and search hits.
    fn backend(&self) -> &'static str;
}
