//! Advanced search service backend.
//!
//! Talks to a semantic search service over HTTP. The service owns query
//! expansion, fan-out and re-ranking; this side only posts the query and reads
//! back scored passages.

use super::{RawHit, SearchBackend};
use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const BACKEND_NAME: &str = "service";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ServiceHit>,
}

#[derive(Debug, Deserialize)]
struct ServiceHit {
    #[serde(alias = "path", alias = "id")]
    source_id: String,
    #[serde(alias = "text", alias = "content")]
    snippet: String,
    #[serde(default)]
    score: f64,
}

/// HTTP client for the search service.
pub struct ServiceBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ServiceBackend {
    /// `base_url` is the service root; queries go to `{base_url}/search`.
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
            api_key,
        }
    }

    fn backend_error(message: String) -> SearchError {
        SearchError::Backend {
            backend: BACKEND_NAME.to_string(),
            message,
        }
    }
}

#[async_trait]
impl SearchBackend for ServiceBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RawHit>, SearchError> {
        debug!(endpoint = %self.endpoint, top_k, "Querying search service");

        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&SearchRequest { query, top_k });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::backend_error(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::backend_error(format!("HTTP {status}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| Self::backend_error(format!("Invalid response body: {e}")))?;

        Ok(body
            .results
            .into_iter()
            .map(|hit| RawHit::new(hit.source_id, hit.snippet, hit.score))
            .collect())
    }
}
