//! ChromaDB vector store over the v1 REST API.
//!
//! Embeddings are computed client-side with the configured [`Embedder`] and
//! the collection is created with cosine distance, so a hit scores
//! `1 - distance`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::document::{finalize_hits, Metadata, MemoryDocument, ScoredDocument, SearchQuery};
use crate::embedding::Embedder;
use crate::error::{MemoryError, MemoryResult};
use crate::store::MemoryStore;

const CREATED_AT_KEY: &str = "_created_at";

/// Vector store backed by a ChromaDB server.
pub struct ChromaStore {
    base_url: String,
    collection: String,
    embedder: Arc<dyn Embedder>,
    client: reqwest::Client,
    collection_id: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Map<String, Value>>>>,
}

impl ChromaStore {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            embedder,
            client: reqwest::Client::new(),
            collection_id: Mutex::new(None),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> MemoryResult<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::backend(
                "chroma",
                format!("HTTP {}: {}", status, body),
            ));
        }
        Ok(response.json().await?)
    }

    /// Id of the collection, creating it on first use.
    async fn collection_id(&self) -> MemoryResult<String> {
        let mut cached = self.collection_id.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let info: CollectionInfo = self
            .send(self.client.post(self.url("/collections")).json(&json!({
                "name": self.collection,
                "metadata": { "hnsw:space": "cosine" },
                "get_or_create": true,
            })))
            .await?;
        info!("Using Chroma collection {} ({})", self.collection, info.id);
        *cached = Some(info.id.clone());
        Ok(info.id)
    }

    async fn post_collection<T: DeserializeOwned>(&self, action: &str, body: Value) -> MemoryResult<T> {
        let id = self.collection_id().await?;
        self.send(
            self.client
                .post(self.url(&format!("/collections/{}/{}", id, action)))
                .json(&body),
        )
        .await
    }
}

/// Chroma metadata values must be scalars; other values are stored as JSON text.
fn to_chroma_metadata(document: &MemoryDocument) -> Map<String, Value> {
    let mut map: Map<String, Value> = document
        .metadata
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => value.clone(),
                other => Value::String(other.to_string()),
            };
            (key.clone(), value)
        })
        .collect();
    map.insert(
        CREATED_AT_KEY.to_string(),
        Value::String(document.created_at.to_rfc3339()),
    );
    map
}

fn from_chroma(id: String, content: Option<String>, metadata: Option<Map<String, Value>>) -> MemoryDocument {
    let mut metadata: Metadata = metadata.unwrap_or_default().into_iter().collect();
    let created_at = metadata
        .remove(CREATED_AT_KEY)
        .and_then(|v| v.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    MemoryDocument {
        id,
        content: content.unwrap_or_default(),
        metadata,
        created_at,
    }
}

/// Translate an equality filter into a Chroma `where` clause.
fn where_clause(filter: &Metadata) -> Option<Value> {
    let mut clauses: Vec<Value> = filter
        .iter()
        .map(|(key, value)| {
            let mut clause = Map::new();
            clause.insert(key.clone(), value.clone());
            Value::Object(clause)
        })
        .collect();
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "$and": clauses })),
    }
}

#[async_trait]
impl MemoryStore for ChromaStore {
    async fn add(&self, document: MemoryDocument) -> MemoryResult<String> {
        Ok(self
            .add_batch(vec![document])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    async fn add_batch(&self, documents: Vec<MemoryDocument>) -> MemoryResult<Vec<String>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed(&contents).await?;
        let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
        let metadatas: Vec<Map<String, Value>> = documents.iter().map(to_chroma_metadata).collect();

        let _: Value = self
            .post_collection(
                "upsert",
                json!({
                    "ids": ids,
                    "embeddings": embeddings,
                    "documents": contents,
                    "metadatas": metadatas,
                }),
            )
            .await?;
        debug!("Upserted {} documents into Chroma", ids.len());
        Ok(ids)
    }

    async fn search(&self, query: &SearchQuery) -> MemoryResult<Vec<ScoredDocument>> {
        if query.top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed_one(&query.text).await?;

        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": query.top_k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(clause) = where_clause(&query.filter) {
            body["where"] = clause;
        }

        let response: QueryResponse = self.post_collection("query", body).await?;
        let ids = response.ids.into_iter().next().unwrap_or_default();
        let mut documents = response
            .documents
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default()
            .into_iter();
        let mut metadatas = response
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default()
            .into_iter();
        let mut distances = response
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default()
            .into_iter();

        let hits = ids
            .into_iter()
            .map(|id| {
                let document = from_chroma(id, documents.next().flatten(), metadatas.next().flatten());
                let distance = distances.next().unwrap_or(1.0);
                ScoredDocument {
                    document,
                    score: 1.0 - distance,
                    source: self.backend().to_string(),
                }
            })
            .collect();
        Ok(finalize_hits(hits, query))
    }

    async fn get(&self, id: &str) -> MemoryResult<Option<MemoryDocument>> {
        let response: GetResponse = self
            .post_collection(
                "get",
                json!({ "ids": [id], "include": ["documents", "metadatas"] }),
            )
            .await?;
        let documents = response.documents.unwrap_or_default();
        let metadatas = response.metadatas.unwrap_or_default();
        Ok(response.ids.into_iter().enumerate().next().map(|(i, id)| {
            from_chroma(
                id,
                documents.get(i).cloned().flatten(),
                metadatas.get(i).cloned().flatten(),
            )
        }))
    }

    async fn delete(&self, id: &str) -> MemoryResult<bool> {
        let existed = self.get(id).await?.is_some();
        if existed {
            let _: Value = self.post_collection("delete", json!({ "ids": [id] })).await?;
        }
        Ok(existed)
    }

    async fn count(&self) -> MemoryResult<usize> {
        let id = self.collection_id().await?;
        self.send(self.client.get(self.url(&format!("/collections/{}/count", id))))
            .await
    }

    async fn clear(&self) -> MemoryResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/collections/{}", self.collection)))
            .send()
            .await?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(MemoryError::backend(
                "chroma",
                format!("failed to delete collection: HTTP {}", response.status()),
            ));
        }
        *self.collection_id.lock().await = None;
        info!("Cleared Chroma collection {}", self.collection);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match self.client.get(self.url("/heartbeat")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn backend(&self) -> &'static str {
        "chroma"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    #[tokio::test]
    async fn test_add_upserts_by_id() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/api/v1/collections")
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"c1","name":"agent_bus"}"#)
            .expect(1)
            .create_async()
            .await;
        let upsert = server
            .mock("POST", "/api/v1/collections/c1/upsert")
            .match_body(mockito::Matcher::PartialJson(json!({ "ids": ["job-1:prd"] })))
            .with_header("content-type", "application/json")
            .with_body("true")
            .expect(2)
            .create_async()
            .await;

        let store = ChromaStore::new(server.url(), "agent_bus", Arc::new(HashingEmbedder::new(16)));
        for content in ["first draft", "second draft"] {
            let id = store
                .add(MemoryDocument::new(content).with_id("job-1:prd"))
                .await
                .unwrap();
            assert_eq!(id, "job-1:prd");
        }

        create.assert_async().await;
        upsert.assert_async().await;
    }

    #[test]
    fn test_where_clause() {
        assert_eq!(where_clause(&Metadata::new()), None);

        let mut filter = Metadata::new();
        filter.insert("job_id".into(), json!("j1"));
        assert_eq!(where_clause(&filter), Some(json!({ "job_id": "j1" })));

        filter.insert("kind".into(), json!("prd"));
        let clause = where_clause(&filter).unwrap();
        assert_eq!(clause["$and"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_metadata_roundtrip_through_chroma_shape() {
        let document = MemoryDocument::new("content")
            .with_metadata("kind", "prd")
            .with_metadata("tags", json!(["a", "b"]));
        let map = to_chroma_metadata(&document);
        assert_eq!(map["tags"], json!("[\"a\",\"b\"]"));
        assert!(map.contains_key(CREATED_AT_KEY));

        let restored = from_chroma(document.id.clone(), Some("content".into()), Some(map));
        assert_eq!(restored.metadata["kind"], json!("prd"));
        assert!(!restored.metadata.contains_key(CREATED_AT_KEY));
        assert_eq!(
            restored.created_at.timestamp_millis(),
            document.created_at.timestamp_millis()
        );
    }
}
