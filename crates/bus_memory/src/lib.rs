//! # bus_memory
//!
//! Memory and retrieval for agent_bus.
//!
//! Agents index artifact summaries here and retrieve related snippets when
//! building prompts. All stores implement [`MemoryStore`]:
//!
//! - [`InMemoryTfIdfStore`]: TF-IDF over documents held in process
//! - [`PostgresTfIdfStore`]: TF-IDF over documents persisted in Postgres
//! - [`InMemoryVectorStore`]: cosine similarity over local embeddings
//! - [`ChromaStore`]: ChromaDB collection over HTTP
//! - [`HybridStore`]: vector primary with a TF-IDF fallback behind a
//!   circuit breaker
//!
//! # Example
//!
//! ```rust,ignore
//! use bus_memory::{InMemoryTfIdfStore, MemoryDocument, MemoryStore, SearchQuery};
//!
//! let store = InMemoryTfIdfStore::new();
//! store.add(MemoryDocument::new("Checkout uses Stripe webhooks")).await?;
//!
//! let hits = store.search(&SearchQuery::new("stripe checkout").with_top_k(3)).await?;
//! ```

pub mod chroma;
pub mod document;
pub mod embedding;
pub mod error;
pub mod factory;
pub mod hybrid;
pub mod in_memory;
pub mod postgres;
pub mod store;
pub mod tfidf;
pub mod tokenizer;
pub mod vector;

pub use chroma::ChromaStore;
pub use document::{MemoryDocument, Metadata, ScoredDocument, SearchQuery};
pub use embedding::{cosine_similarity, Embedder, HashingEmbedder, OpenAiEmbedder};
pub use error::{MemoryError, MemoryResult};
pub use factory::{build_embedder, build_memory_store};
pub use hybrid::HybridStore;
pub use in_memory::InMemoryTfIdfStore;
pub use postgres::PostgresTfIdfStore;
pub use store::MemoryStore;
pub use tfidf::{rank_documents, TfIdfIndex};
pub use tokenizer::tokenize;
pub use vector::InMemoryVectorStore;
