//! TF-IDF vector space ranking.
//!
//! Weights use sublinear term frequency `1 + ln(count)` and smoothed inverse
//! document frequency `ln((1 + N) / (1 + df)) + 1`. Document and query
//! vectors are L2-normalized so their dot product is the cosine similarity.

use std::collections::HashMap;

use crate::document::{finalize_hits, MemoryDocument, ScoredDocument, SearchQuery};
use crate::tokenizer::tokenize;

type SparseVector = HashMap<String, f32>;

/// An index over a fixed corpus.
#[derive(Debug, Clone, Default)]
pub struct TfIdfIndex {
    idf: HashMap<String, f32>,
    vectors: Vec<SparseVector>,
}

impl TfIdfIndex {
    pub fn build<S: AsRef<str>>(texts: &[S]) -> Self {
        let tokenized: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t.as_ref())).collect();

        let mut df: HashMap<&str, usize> = HashMap::new();
        for tokens in &tokenized {
            let mut seen: Vec<&str> = tokens.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let n = tokenized.len() as f32;
        let idf: HashMap<String, f32> = df
            .into_iter()
            .map(|(term, count)| {
                let weight = ((1.0 + n) / (1.0 + count as f32)).ln() + 1.0;
                (term.to_string(), weight)
            })
            .collect();

        let vectors = tokenized
            .iter()
            .map(|tokens| weigh(tokens, &idf))
            .collect();

        Self { idf, vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn idf(&self, term: &str) -> Option<f32> {
        self.idf.get(term).copied()
    }

    /// Cosine similarity of `query` against every document, in corpus order.
    ///
    /// Query terms outside the vocabulary are ignored.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let query_vector = weigh(&tokenize(query), &self.idf);
        self.vectors
            .iter()
            .map(|doc| dot(&query_vector, doc))
            .collect()
    }
}

fn weigh(tokens: &[String], idf: &HashMap<String, f32>) -> SparseVector {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }

    let mut vector: SparseVector = counts
        .into_iter()
        .filter_map(|(term, count)| {
            idf.get(term)
                .map(|w| (term.to_string(), (1.0 + (count as f32).ln()) * w))
        })
        .collect();

    let norm = vector.values().map(|w| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        for weight in vector.values_mut() {
            *weight /= norm;
        }
    }
    vector
}

fn dot(a: &SparseVector, b: &SparseVector) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum()
}

/// Rank `documents` against `query`, labelling hits with `source`.
///
/// Documents failing the query filter are excluded before the index is
/// built, so document frequencies reflect the filtered candidates.
pub fn rank_documents(
    documents: Vec<MemoryDocument>,
    query: &SearchQuery,
    source: &str,
) -> Vec<ScoredDocument> {
    let candidates: Vec<MemoryDocument> = documents
        .into_iter()
        .filter(|doc| doc.matches(&query.filter))
        .collect();
    if candidates.is_empty() || query.top_k == 0 {
        return Vec::new();
    }

    let texts: Vec<&str> = candidates.iter().map(|d| d.content.as_str()).collect();
    let scores = TfIdfIndex::build(&texts).scores(&query.text);

    let hits = candidates
        .into_iter()
        .zip(scores)
        .map(|(document, score)| ScoredDocument {
            document,
            score,
            source: source.to_string(),
        })
        .collect();
    finalize_hits(hits, query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idf_smoothing() {
        let index = TfIdfIndex::build(&["rust tokio", "rust serde", "python"]);
        // df(rust) = 2 over N = 3
        let expected = (4.0f32 / 3.0).ln() + 1.0;
        assert!((index.idf("rust").unwrap() - expected).abs() < 1e-6);
        // df(python) = 1
        let expected = (4.0f32 / 2.0).ln() + 1.0;
        assert!((index.idf("python").unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_identical_text_scores_one() {
        let index = TfIdfIndex::build(&["payment service retries", "login page"]);
        let scores = index.scores("payment service retries");
        assert!((scores[0] - 1.0).abs() < 1e-5);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn test_unknown_query_terms_ignored() {
        let index = TfIdfIndex::build(&["checkout flow"]);
        assert_eq!(index.scores("kubernetes"), vec![0.0]);
        assert!(index.scores("checkout kubernetes")[0] > 0.0);
    }

    #[test]
    fn test_rank_documents() {
        let docs = vec![
            MemoryDocument::new("Authentication uses OAuth tokens"),
            MemoryDocument::new("Payment gateway integration with retries"),
            MemoryDocument::new("Payment receipts are emailed"),
        ];
        let query = SearchQuery::new("payment gateway").with_top_k(2);
        let hits = rank_documents(docs, &query, "tfidf");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.content, "Payment gateway integration with retries");
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.source == "tfidf"));
    }

    #[test]
    fn test_stop_word_query_returns_nothing() {
        let docs = vec![MemoryDocument::new("the service")];
        assert!(rank_documents(docs, &SearchQuery::new("the and of"), "tfidf").is_empty());
    }
}
