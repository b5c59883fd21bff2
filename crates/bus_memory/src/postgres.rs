//! Postgres-backed TF-IDF store.
//!
//! Documents live in the `memory_documents` table. Searches load the newest
//! candidates matching the metadata filter (jsonb containment) and rank them
//! in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::document::{Metadata, MemoryDocument, ScoredDocument, SearchQuery};
use crate::error::MemoryResult;
use crate::store::MemoryStore;
use crate::tfidf::rank_documents;

const DEFAULT_CANDIDATE_LIMIT: i64 = 1000;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memory_documents (
    id          TEXT PRIMARY KEY,
    content     TEXT NOT NULL,
    metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const METADATA_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS memory_documents_metadata_idx ON memory_documents USING GIN (metadata)";

/// TF-IDF store persisted in Postgres.
#[derive(Debug, Clone)]
pub struct PostgresTfIdfStore {
    pool: PgPool,
    candidate_limit: i64,
}

impl PostgresTfIdfStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }

    /// Maximum number of candidates ranked per search.
    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit.max(1) as i64;
        self
    }

    /// Create the table and index if they do not exist.
    pub async fn ensure_schema(&self) -> MemoryResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query(METADATA_INDEX).execute(&self.pool).await?;
        info!("Memory schema ready");
        Ok(())
    }
}

fn row_to_document(row: &PgRow) -> MemoryResult<MemoryDocument> {
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let metadata: Metadata = match metadata {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => Metadata::new(),
    };
    Ok(MemoryDocument {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        metadata,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl MemoryStore for PostgresTfIdfStore {
    async fn add(&self, document: MemoryDocument) -> MemoryResult<String> {
        sqlx::query(
            "INSERT INTO memory_documents (id, content, metadata, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET content = EXCLUDED.content, metadata = EXCLUDED.metadata",
        )
        .bind(&document.id)
        .bind(&document.content)
        .bind(serde_json::to_value(&document.metadata)?)
        .bind(document.created_at)
        .execute(&self.pool)
        .await?;
        debug!("Indexed memory document {} in postgres", document.id);
        Ok(document.id)
    }

    async fn search(&self, query: &SearchQuery) -> MemoryResult<Vec<ScoredDocument>> {
        let rows = sqlx::query(
            "SELECT id, content, metadata, created_at FROM memory_documents \
             WHERE metadata @> $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(serde_json::to_value(&query.filter)?)
        .bind(self.candidate_limit)
        .fetch_all(&self.pool)
        .await?;

        // Oldest first so equal scores keep insertion order.
        let mut documents = rows
            .iter()
            .map(row_to_document)
            .collect::<MemoryResult<Vec<_>>>()?;
        documents.reverse();

        Ok(rank_documents(documents, query, self.backend()))
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryDocument>> {
        let row = sqlx::query(
            "SELECT id, content, metadata, created_at FROM memory_documents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let result = sqlx::query("DELETE FROM memory_documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> MemoryResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memory_documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn clear(&self) -> MemoryResult<()> {
        sqlx::query("DELETE FROM memory_documents")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
