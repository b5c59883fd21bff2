//! Memory documents and search queries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form document metadata.
pub type Metadata = HashMap<String, serde_json::Value>;

/// A document held in a memory store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl MemoryDocument {
    /// Create a document with a fresh UUID id.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True when every filter entry is present with an equal value.
    pub fn matches(&self, filter: &Metadata) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.metadata.get(key) == Some(value))
    }
}

/// A ranked search request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
    /// Results must score strictly above this value.
    pub min_score: f32,
    #[serde(default)]
    pub filter: Metadata,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            top_k: 5,
            min_score: 0.0,
            filter: Metadata::new(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }
}

/// A search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredDocument {
    pub document: MemoryDocument,
    pub score: f32,
    /// Backend that produced the hit.
    pub source: String,
}

/// Keep hits above `min_score`, order by descending score and truncate.
///
/// The sort is stable so equal scores keep their input order.
pub(crate) fn finalize_hits(mut hits: Vec<ScoredDocument>, query: &SearchQuery) -> Vec<ScoredDocument> {
    hits.retain(|hit| hit.score > query.min_score);
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(query.top_k);
    hits
}
