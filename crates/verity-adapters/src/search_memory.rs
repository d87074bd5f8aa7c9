//! In-memory document index implementing [`VectorSearchPort`] with
//! bag-of-words cosine similarity.
//!
//! Intended for the CLI and tests; production deployments plug an external
//! vector database behind the same port.

use std::collections::HashMap;

use serde::Deserialize;
use verity_core::{error::ToolError, ports::VectorSearchPort, types::RetrievedDoc};

/// Raw corpus entry as stored on disk: `[{"id": "...", "content": "..."}]`.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusEntry {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Clone)]
struct IndexedDoc {
    id: String,
    content: String,
    terms: HashMap<String, f32>,
    norm: f32,
}

impl IndexedDoc {
    fn new(entry: CorpusEntry) -> Self {
        let terms = term_frequencies(&entry.content);
        let norm = norm(&terms);
        Self { id: entry.id, content: entry.content, terms, norm }
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut terms = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    {
        *terms.entry(token).or_insert(0.0) += 1.0;
    }
    terms
}

fn norm(terms: &HashMap<String, f32>) -> f32 {
    terms.values().map(|v| v * v).sum::<f32>().sqrt()
}

fn cosine(query: &HashMap<String, f32>, query_norm: f32, doc: &IndexedDoc) -> f32 {
    if query_norm == 0.0 || doc.norm == 0.0 {
        return 0.0;
    }
    let dot: f32 =
        query.iter().filter_map(|(term, weight)| doc.terms.get(term).map(|w| w * weight)).sum();
    dot / (query_norm * doc.norm)
}

/// Document collections searched by term overlap.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    collections: HashMap<String, Vec<IndexedDoc>>,
}

impl InMemoryVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add documents to `collection`, creating it if needed.
    #[must_use]
    pub fn with_documents(
        mut self,
        collection: impl Into<String>,
        docs: impl IntoIterator<Item = CorpusEntry>,
    ) -> Self {
        self.collections
            .entry(collection.into())
            .or_default()
            .extend(docs.into_iter().map(IndexedDoc::new));
        self
    }

    /// Add a collection from its JSON representation.
    ///
    /// # Errors
    /// Returns the parse error when `json` is not an array of `{id, content}` objects.
    pub fn with_json(
        self,
        collection: impl Into<String>,
        json: &str,
    ) -> Result<Self, serde_json::Error> {
        let entries: Vec<CorpusEntry> = serde_json::from_str(json)?;
        Ok(self.with_documents(collection, entries))
    }

    /// Number of documents in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl VectorSearchPort for InMemoryVectorIndex {
    async fn search(
        &self,
        query: &str,
        collection: &str,
        k: usize,
    ) -> Result<Vec<RetrievedDoc>, ToolError> {
        let Some(docs) = self.collections.get(collection) else {
            tracing::debug!(collection, "search on unknown collection");
            return Ok(Vec::new());
        };

        let query_terms = term_frequencies(query);
        let query_norm = norm(&query_terms);

        let mut scored: Vec<RetrievedDoc> = docs
            .iter()
            .filter_map(|doc| {
                let score = cosine(&query_terms, query_norm, doc);
                (score > 0.0).then(|| RetrievedDoc {
                    id: doc.id.clone(),
                    content: doc.content.clone(),
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
