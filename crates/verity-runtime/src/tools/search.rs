//! Untrusted retrieval tool wrapping a [`VectorSearchPort`].

use std::{fmt::Write as _, sync::Arc};

use serde_json::json;
use verity_core::{
    error::ToolError,
    ports::VectorSearchPort,
    types::{ToolDescriptor, ToolOutput},
};

use super::{Tool, required_str};

pub const SEARCH_TOOL: &str = "vector_search";

/// Observation snippets are cut to this many characters per document.
const SNIPPET_CHARS: usize = 600;
const MAX_K: usize = 10;

pub struct VectorSearchTool {
    index: Arc<dyn VectorSearchPort>,
    collection: String,
    default_k: usize,
}

impl std::fmt::Debug for VectorSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSearchTool")
            .field("collection", &self.collection)
            .field("default_k", &self.default_k)
            .finish_non_exhaustive()
    }
}

impl VectorSearchTool {
    #[must_use]
    pub fn new(index: Arc<dyn VectorSearchPort>, collection: impl Into<String>, default_k: usize) -> Self {
        Self { index, collection: collection.into(), default_k: default_k.clamp(1, MAX_K) }
    }
}

#[async_trait::async_trait]
impl Tool for VectorSearchTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            id: SEARCH_TOOL.to_string(),
            description: "Search the knowledge base. Cite results by their [id] in the final answer."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "k": {"type": "integer", "minimum": 1, "maximum": MAX_K}
                },
                "required": ["query"]
            }),
            trusted: false,
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let query = required_str(&arguments, "query")?;
        let k = arguments
            .get("k")
            .and_then(serde_json::Value::as_u64)
            .map_or(self.default_k, |k| (k as usize).clamp(1, MAX_K));

        let docs = self.index.search(query, &self.collection, k).await?;
        if docs.is_empty() {
            return Ok(ToolOutput::text("no matching documents"));
        }

        let mut observation = String::new();
        for doc in &docs {
            let snippet: String = doc.content.chars().take(SNIPPET_CHARS).collect();
            let _ = writeln!(observation, "[{}] (score {:.2}) {snippet}", doc.id, doc.score);
        }
        Ok(ToolOutput::text(observation.trim_end()).with_documents(docs))
    }
}

#[cfg(test)]
mod tests {
    use verity_core::types::RetrievedDoc;

    use super::*;

    struct FixedIndex;

    #[async_trait::async_trait]
    impl VectorSearchPort for FixedIndex {
        async fn search(
            &self,
            _query: &str,
            collection: &str,
            k: usize,
        ) -> Result<Vec<RetrievedDoc>, ToolError> {
            assert_eq!(collection, "kb");
            Ok(vec![
                RetrievedDoc { id: "faq-1".into(), content: "We work remotely.".into(), score: 0.82 },
                RetrievedDoc { id: "faq-2".into(), content: "Offices in Hanoi.".into(), score: 0.4 },
            ]
            .into_iter()
            .take(k)
            .collect())
        }
    }

    #[tokio::test]
    async fn observation_lists_ids_and_carries_documents() {
        let tool = VectorSearchTool::new(Arc::new(FixedIndex), "kb", 3);
        let out = tool.invoke(json!({"query": "office"})).await.unwrap();
        assert!(out.observation.starts_with("[faq-1] (score 0.82) We work remotely."));
        assert_eq!(out.documents.len(), 2);
        assert!(!out.trusted);
        assert!(!out.conclusive);
    }

    #[tokio::test]
    async fn k_argument_is_honoured() {
        let tool = VectorSearchTool::new(Arc::new(FixedIndex), "kb", 3);
        let out = tool.invoke(json!({"query": "office", "k": 1})).await.unwrap();
        assert_eq!(out.documents.len(), 1);
    }
}
