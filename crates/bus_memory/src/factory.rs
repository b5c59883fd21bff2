//! Memory store construction from settings.

use std::sync::Arc;

use bus_core::{
    CircuitBreakerRegistry, EmbeddingProvider, LlmProviderKind, MemoryBackend, Settings,
    VECTOR_STORE_BREAKER,
};
use sqlx::PgPool;
use tracing::info;

use crate::chroma::ChromaStore;
use crate::embedding::{Embedder, HashingEmbedder, OpenAiEmbedder};
use crate::error::{MemoryError, MemoryResult};
use crate::hybrid::HybridStore;
use crate::in_memory::InMemoryTfIdfStore;
use crate::postgres::PostgresTfIdfStore;
use crate::store::MemoryStore;

/// Build the embedder selected in `settings.memory`.
pub fn build_embedder(settings: &Settings) -> MemoryResult<Arc<dyn Embedder>> {
    match settings.memory.embedding_provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(settings.memory.dimensions))),
        EmbeddingProvider::OpenAi => {
            let api_key = match settings.llm.provider {
                LlmProviderKind::OpenAi => settings.llm.api_key.clone(),
                _ => None,
            }
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                MemoryError::Config("OpenAI embeddings require OPENAI_API_KEY".to_string())
            })?;
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key,
                settings.memory.embedding_model.clone(),
                settings.memory.dimensions,
            )))
        }
    }
}

async fn postgres_store(pool: PgPool) -> MemoryResult<Arc<dyn MemoryStore>> {
    let store = PostgresTfIdfStore::new(pool);
    store.ensure_schema().await?;
    Ok(Arc::new(store))
}

fn chroma_store(settings: &Settings) -> MemoryResult<ChromaStore> {
    let url = settings
        .memory
        .chroma_url
        .clone()
        .ok_or_else(|| MemoryError::Config("Chroma backend requires CHROMA_URL".to_string()))?;
    Ok(ChromaStore::new(
        url,
        settings.memory.collection.clone(),
        build_embedder(settings)?,
    ))
}

/// Build the memory store selected by `settings.memory.backend`.
///
/// The hybrid store uses Chroma as primary and a Postgres TF-IDF fallback
/// when a pool is given, otherwise an in-memory one.
pub async fn build_memory_store(
    settings: &Settings,
    pool: Option<PgPool>,
    breakers: &CircuitBreakerRegistry,
) -> MemoryResult<Arc<dyn MemoryStore>> {
    let backend = settings.memory.backend;
    info!("Building memory store: {}", backend);

    match backend {
        MemoryBackend::InMemory => Ok(Arc::new(InMemoryTfIdfStore::new())),
        MemoryBackend::Postgres => {
            let pool = pool.ok_or_else(|| {
                MemoryError::Config("postgres memory backend requires DATABASE_URL".to_string())
            })?;
            postgres_store(pool).await
        }
        MemoryBackend::Chroma => Ok(Arc::new(chroma_store(settings)?)),
        MemoryBackend::Hybrid => {
            let primary: Arc<dyn MemoryStore> = Arc::new(chroma_store(settings)?);
            let fallback = match pool {
                Some(pool) => postgres_store(pool).await?,
                None => Arc::new(InMemoryTfIdfStore::new()),
            };
            let breaker = breakers.get_or_create(VECTOR_STORE_BREAKER).await;
            Ok(Arc::new(HybridStore::new(primary, fallback, breaker)))
        }
    }
}
