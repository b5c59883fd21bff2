//! Artifacts produced by agents and where they are kept.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bus_core::{AgentRole, ArtifactKind, WorkflowStage};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};

/// Where an artifact's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Parsed from an LLM completion.
    Llm,
    /// Deterministic payload used when no LLM is configured.
    Mock,
    /// Deterministic payload used after an LLM failure.
    Fallback,
}

impl ArtifactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactSource::Llm => "llm",
            ArtifactSource::Mock => "mock",
            ArtifactSource::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for ArtifactSource {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(ArtifactSource::Llm),
            "mock" => Ok(ArtifactSource::Mock),
            "fallback" => Ok(ArtifactSource::Fallback),
            other => Err(AgentError::Serialization(format!(
                "unknown artifact source: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of one agent for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub kind: ArtifactKind,
    pub stage: WorkflowStage,
    pub role: AgentRole,
    pub content: Value,
    pub summary: String,
    pub source: ArtifactSource,
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(job_id: Uuid, kind: ArtifactKind, content: Value, source: ArtifactSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            kind,
            stage: kind.stage(),
            role: kind.role(),
            content,
            summary: String::new(),
            source,
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_usage(mut self, model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        self.model = Some(model.into());
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    /// File name used when exporting.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.kind.as_str())
    }
}

/// Persistence for artifacts, keyed by `(job_id, kind)`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Insert or replace the artifact for its `(job_id, kind)`.
    async fn save(&self, artifact: &Artifact) -> AgentResult<()>;

    async fn get(&self, job_id: Uuid, kind: ArtifactKind) -> AgentResult<Option<Artifact>>;

    /// All artifacts for a job in stage order.
    async fn list(&self, job_id: Uuid) -> AgentResult<Vec<Artifact>>;

    /// Remove every artifact of a job, returning how many were removed.
    async fn delete_job(&self, job_id: Uuid) -> AgentResult<usize>;
}

/// Artifact store backed by a map.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    artifacts: RwLock<HashMap<(Uuid, ArtifactKind), Artifact>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn save(&self, artifact: &Artifact) -> AgentResult<()> {
        debug!("Saving {} artifact for job {}", artifact.kind, artifact.job_id);
        self.artifacts
            .write()
            .insert((artifact.job_id, artifact.kind), artifact.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid, kind: ArtifactKind) -> AgentResult<Option<Artifact>> {
        Ok(self.artifacts.read().get(&(job_id, kind)).cloned())
    }

    async fn list(&self, job_id: Uuid) -> AgentResult<Vec<Artifact>> {
        let mut artifacts: Vec<Artifact> = self
            .artifacts
            .read()
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        artifacts.sort_by_key(|a| a.kind);
        Ok(artifacts)
    }

    async fn delete_job(&self, job_id: Uuid) -> AgentResult<usize> {
        let mut artifacts = self.artifacts.write();
        let before = artifacts.len();
        artifacts.retain(|(job, _), _| *job != job_id);
        Ok(before - artifacts.len())
    }
}

#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    kind: ArtifactKind,
    file: String,
    role: AgentRole,
    source: ArtifactSource,
    model: Option<&'a str>,
    summary: &'a str,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    job_id: Uuid,
    exported_at: DateTime<Utc>,
    artifacts: Vec<ManifestEntry<'a>>,
}

/// Write every artifact of `job_id` to `dir` as `<kind>.json`, plus a
/// `manifest.json` listing them. Returns the files written.
pub async fn export_artifacts(
    store: &dyn ArtifactStore,
    job_id: Uuid,
    dir: &Path,
) -> AgentResult<Vec<PathBuf>> {
    let artifacts = store.list(job_id).await?;
    tokio::fs::create_dir_all(dir).await?;

    let mut written = Vec::with_capacity(artifacts.len() + 1);
    for artifact in &artifacts {
        let path = dir.join(artifact.file_name());
        tokio::fs::write(&path, serde_json::to_vec_pretty(artifact)?).await?;
        written.push(path);
    }

    let manifest = Manifest {
        job_id,
        exported_at: Utc::now(),
        artifacts: artifacts
            .iter()
            .map(|a| ManifestEntry {
                kind: a.kind,
                file: a.file_name(),
                role: a.role,
                source: a.source,
                model: a.model.as_deref(),
                summary: &a.summary,
            })
            .collect(),
    };
    let manifest_path = dir.join("manifest.json");
    tokio::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?).await?;
    written.push(manifest_path);

    info!(
        "Exported {} artifacts for job {} to {:?}",
        artifacts.len(),
        job_id,
        dir
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_upserts_by_kind() {
        let store = InMemoryArtifactStore::new();
        let job_id = Uuid::new_v4();

        let first = Artifact::new(job_id, ArtifactKind::Prd, json!({"v": 1}), ArtifactSource::Mock);
        let second = Artifact::new(job_id, ArtifactKind::Prd, json!({"v": 2}), ArtifactSource::Llm);
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        assert_eq!(store.len(), 1);
        let latest = store.get(job_id, ArtifactKind::Prd).await.unwrap().unwrap();
        assert_eq!(latest.content, json!({"v": 2}));
        assert_eq!(latest.source, ArtifactSource::Llm);
    }

    #[tokio::test]
    async fn test_list_in_stage_order() {
        let store = InMemoryArtifactStore::new();
        let job_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        for kind in [ArtifactKind::QaPlan, ArtifactKind::Prd, ArtifactKind::Architecture] {
            store
                .save(&Artifact::new(job_id, kind, json!({}), ArtifactSource::Mock))
                .await
                .unwrap();
        }
        store
            .save(&Artifact::new(other, ArtifactKind::Plan, json!({}), ArtifactSource::Mock))
            .await
            .unwrap();

        let kinds: Vec<ArtifactKind> = store.list(job_id).await.unwrap().iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![ArtifactKind::Prd, ArtifactKind::Architecture, ArtifactKind::QaPlan]
        );

        assert_eq!(store.delete_job(job_id).await.unwrap(), 3);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_artifact_derives_stage_and_role() {
        let artifact = Artifact::new(
            Uuid::new_v4(),
            ArtifactKind::SecurityAudit,
            json!({}),
            ArtifactSource::Fallback,
        );
        assert_eq!(artifact.stage, WorkflowStage::SecurityReview);
        assert_eq!(artifact.role, AgentRole::Security);
        assert_eq!(artifact.file_name(), "security_audit.json");
        assert_eq!(serde_json::to_value(artifact.source).unwrap(), json!("fallback"));
    }

    #[tokio::test]
    async fn test_export_writes_files_and_manifest() {
        let store = InMemoryArtifactStore::new();
        let job_id = Uuid::new_v4();
        store
            .save(
                &Artifact::new(job_id, ArtifactKind::Prd, json!({"title": "Todo"}), ArtifactSource::Mock)
                    .with_summary("PRD for Todo"),
            )
            .await
            .unwrap();
        store
            .save(&Artifact::new(job_id, ArtifactKind::Plan, json!({}), ArtifactSource::Mock))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let written = export_artifacts(&store, job_id, &out).await.unwrap();
        assert_eq!(written.len(), 3);

        let prd: Artifact =
            serde_json::from_slice(&std::fs::read(out.join("prd.json")).unwrap()).unwrap();
        assert_eq!(prd.content["title"], "Todo");

        let manifest: Value =
            serde_json::from_slice(&std::fs::read(out.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["job_id"], json!(job_id.to_string()));
        assert_eq!(manifest["artifacts"][0]["file"], "prd.json");
        assert_eq!(manifest["artifacts"][0]["summary"], "PRD for Todo");
        assert_eq!(manifest["artifacts"][1]["kind"], "plan");
    }
}
