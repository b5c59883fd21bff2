//! Vector-first store with a TF-IDF fallback.
//!
//! The primary (vector) store is guarded by the `vector_store` circuit
//! breaker. Writes always land in the fallback so it holds the full corpus;
//! writes to the primary are best-effort. Searches go to the primary and
//! fall back when it errors, the breaker is open, or it returns nothing.

use std::sync::Arc;

use async_trait::async_trait;
use bus_core::{CircuitBreaker, CircuitBreakerError};
use tracing::{debug, warn};

use crate::document::{MemoryDocument, ScoredDocument, SearchQuery};
use crate::error::{MemoryError, MemoryResult};
use crate::store::MemoryStore;

pub struct HybridStore {
    primary: Arc<dyn MemoryStore>,
    fallback: Arc<dyn MemoryStore>,
    breaker: Arc<CircuitBreaker>,
}

impl HybridStore {
    pub fn new(
        primary: Arc<dyn MemoryStore>,
        fallback: Arc<dyn MemoryStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            primary,
            fallback,
            breaker,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

fn describe(err: &CircuitBreakerError<MemoryError>) -> String {
    match err {
        CircuitBreakerError::Open { name, .. } => format!("circuit '{}' open", name),
        CircuitBreakerError::Inner(e) => e.to_string(),
    }
}

#[async_trait]
impl MemoryStore for HybridStore {
    async fn add(&self, document: MemoryDocument) -> MemoryResult<String> {
        let id = self.fallback.add(document.clone()).await?;
        if let Err(e) = self.breaker.call(|| self.primary.add(document)).await {
            warn!("Vector store write failed for {}: {}", id, describe(&e));
        }
        Ok(id)
    }

    async fn add_batch(&self, documents: Vec<MemoryDocument>) -> MemoryResult<Vec<String>> {
        let ids = self.fallback.add_batch(documents.clone()).await?;
        if let Err(e) = self.breaker.call(|| self.primary.add_batch(documents)).await {
            warn!("Vector store batch write failed: {}", describe(&e));
        }
        Ok(ids)
    }

    async fn search(&self, query: &SearchQuery) -> MemoryResult<Vec<ScoredDocument>> {
        match self.breaker.call(|| self.primary.search(query)).await {
            Ok(hits) if !hits.is_empty() => return Ok(hits),
            Ok(_) => debug!("Vector search returned no hits, using {}", self.fallback.backend()),
            Err(e) => warn!(
                "Vector search unavailable ({}), using {}",
                describe(&e),
                self.fallback.backend()
            ),
        }
        self.fallback.search(query).await
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryDocument>> {
        match self.breaker.call(|| self.primary.get(id)).await {
            Ok(Some(document)) => return Ok(Some(document)),
            Ok(None) => {}
            Err(e) => debug!("Vector get failed for {}: {}", id, describe(&e)),
        }
        self.fallback.get(id).await
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let primary = match self.breaker.call(|| self.primary.delete(id)).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!("Vector delete failed for {}: {}", id, describe(&e));
                false
            }
        };
        let fallback = self.fallback.delete(id).await?;
        Ok(primary || fallback)
    }

    async fn count(&self) -> MemoryResult<usize> {
        self.fallback.count().await
    }

    async fn clear(&self) -> MemoryResult<()> {
        if let Err(e) = self.breaker.call(|| self.primary.clear()).await {
            warn!("Vector clear failed: {}", describe(&e));
        }
        self.fallback.clear().await
    }

    async fn health_check(&self) -> bool {
        self.primary.health_check().await || self.fallback.health_check().await
    }

    fn backend(&self) -> &'static str {
        "hybrid"
    }
}
