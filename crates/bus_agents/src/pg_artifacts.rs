//! Postgres-backed artifact store.

use async_trait::async_trait;
use bus_core::ArtifactKind;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::artifacts::{Artifact, ArtifactSource, ArtifactStore};
use crate::error::{AgentError, AgentResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS artifacts (
    id             UUID PRIMARY KEY,
    job_id         UUID NOT NULL,
    kind           TEXT NOT NULL,
    stage          TEXT NOT NULL,
    role           TEXT NOT NULL,
    content        JSONB NOT NULL,
    summary        TEXT NOT NULL DEFAULT '',
    source         TEXT NOT NULL,
    model          TEXT,
    input_tokens   BIGINT NOT NULL DEFAULT 0,
    output_tokens  BIGINT NOT NULL DEFAULT 0,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (job_id, kind)
)
"#;

const COLUMNS: &str =
    "id, job_id, kind, content, summary, source, model, input_tokens, output_tokens, created_at";

/// Artifact store persisted in the `artifacts` table.
#[derive(Debug, Clone)]
pub struct PostgresArtifactStore {
    pool: PgPool,
}

impl PostgresArtifactStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> AgentResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        info!("Artifact schema ready");
        Ok(())
    }
}

fn row_to_artifact(row: &PgRow) -> AgentResult<Artifact> {
    let kind: ArtifactKind = row.try_get::<String, _>("kind")?.parse()?;
    let source: ArtifactSource = row.try_get::<String, _>("source")?.parse()?;
    let input_tokens: i64 = row.try_get("input_tokens")?;
    let output_tokens: i64 = row.try_get("output_tokens")?;

    Ok(Artifact {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        kind,
        stage: kind.stage(),
        role: kind.role(),
        content: row.try_get("content")?,
        summary: row.try_get("summary")?,
        source,
        model: row.try_get("model")?,
        input_tokens: input_tokens.max(0) as u64,
        output_tokens: output_tokens.max(0) as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn to_i64(tokens: u64) -> AgentResult<i64> {
    i64::try_from(tokens).map_err(|_| AgentError::Storage(format!("token count {} out of range", tokens)))
}

#[async_trait]
impl ArtifactStore for PostgresArtifactStore {
    async fn save(&self, artifact: &Artifact) -> AgentResult<()> {
        sqlx::query(
            "INSERT INTO artifacts \
             (id, job_id, kind, stage, role, content, summary, source, model, input_tokens, output_tokens, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (job_id, kind) DO UPDATE SET \
             id = EXCLUDED.id, content = EXCLUDED.content, summary = EXCLUDED.summary, \
             source = EXCLUDED.source, model = EXCLUDED.model, input_tokens = EXCLUDED.input_tokens, \
             output_tokens = EXCLUDED.output_tokens, created_at = EXCLUDED.created_at",
        )
        .bind(artifact.id)
        .bind(artifact.job_id)
        .bind(artifact.kind.as_str())
        .bind(artifact.stage.as_str())
        .bind(artifact.role.as_str())
        .bind(&artifact.content)
        .bind(&artifact.summary)
        .bind(artifact.source.as_str())
        .bind(artifact.model.as_deref())
        .bind(to_i64(artifact.input_tokens)?)
        .bind(to_i64(artifact.output_tokens)?)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await?;
        debug!("Saved {} artifact for job {} in postgres", artifact.kind, artifact.job_id);
        Ok(())
    }

    async fn get(&self, job_id: Uuid, kind: ArtifactKind) -> AgentResult<Option<Artifact>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM artifacts WHERE job_id = $1 AND kind = $2",
            COLUMNS
        ))
        .bind(job_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_artifact).transpose()
    }

    async fn list(&self, job_id: Uuid) -> AgentResult<Vec<Artifact>> {
        let rows = sqlx::query(&format!("SELECT {} FROM artifacts WHERE job_id = $1", COLUMNS))
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        let mut artifacts = rows
            .iter()
            .map(row_to_artifact)
            .collect::<AgentResult<Vec<_>>>()?;
        artifacts.sort_by_key(|a| a.kind);
        Ok(artifacts)
    }

    async fn delete_job(&self, job_id: Uuid) -> AgentResult<usize> {
        let result = sqlx::query("DELETE FROM artifacts WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
