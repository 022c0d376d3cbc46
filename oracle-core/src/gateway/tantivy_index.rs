//! Basic indexer backend: reads the tantivy index written by the indexer.
//!
//! The index is opened read-only on every call so results always reflect the
//! latest commit. Questions are parsed leniently: natural-language punctuation
//! never turns into a query syntax error.

use super::{RawHit, SearchBackend};
use crate::error::SearchError;
use async_trait::async_trait;
use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexReader, ReloadPolicy};

const BACKEND_NAME: &str = "index";

/// Read-only view over an on-disk tantivy index.
#[derive(Debug, Clone)]
pub struct TantivyIndexBackend {
    path: PathBuf,
    source_field: String,
    content_field: String,
}

impl TantivyIndexBackend {
    pub fn new(path: PathBuf, source_field: &str, content_field: &str) -> Self {
        Self {
            path,
            source_field: source_field.to_string(),
            content_field: content_field.to_string(),
        }
    }

    fn invalid(&self, message: String) -> SearchError {
        SearchError::InvalidIndex {
            path: self.path.display().to_string(),
            message,
        }
    }

    fn search_blocking(&self, query: &str, top_k: usize) -> Result<Vec<RawHit>, SearchError> {
        if !self.path.exists() {
            return Err(self.invalid("index directory does not exist".into()));
        }

        let index = Index::open_in_dir(&self.path)
            .map_err(|e| self.invalid(format!("Failed to open index: {e}")))?;
        let schema = index.schema();
        let source_field = schema
            .get_field(&self.source_field)
            .map_err(|e| self.invalid(format!("Missing source field: {e}")))?;
        let content_field = schema
            .get_field(&self.content_field)
            .map_err(|e| self.invalid(format!("Missing content field: {e}")))?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| backend_error(format!("Failed to create reader: {e}")))?;
        let searcher = reader.searcher();

        let parser = QueryParser::for_index(&index, vec![content_field]);
        let (parsed, _ignored) = parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(top_k.max(1)))
            .map_err(|e| backend_error(format!("Search failed: {e}")))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| backend_error(format!("Failed to retrieve doc: {e}")))?;

            let source_id = doc
                .get_first(source_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let snippet = doc
                .get_first(content_field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            hits.push(RawHit::new(source_id, snippet, saturate(score)));
        }

        Ok(hits)
    }
}

fn backend_error(message: String) -> SearchError {
    SearchError::Backend {
        backend: BACKEND_NAME.to_string(),
        message,
    }
}

/// Map an unbounded BM25 score into [0, 1).
pub(crate) fn saturate(score: f32) -> f64 {
    let s = f64::from(score.max(0.0));
    s / (s + 1.0)
}

#[async_trait]
impl SearchBackend for TantivyIndexBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RawHit>, SearchError> {
        let this = self.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || this.search_blocking(&query, top_k))
            .await
            .map_err(|e| backend_error(format!("Search task failed: {e}")))?
    }
}
