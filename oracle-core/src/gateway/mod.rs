//! Search gateway: one search call over an ordered chain of backends.
//!
//! Backends are tried in a fixed priority order:
//! 1. **service**: the advanced semantic search service
//! 2. **index**: the basic tantivy index written by the indexer
//! 3. **sqlite**: a direct FTS5 query against the low-level index
//!
//! Every attempt is time-bounded. A backend that errors or times out is
//! skipped, never retried, and the next one gets the same query and `top_k`.
//! Nothing is cached between calls.

pub mod service;
pub mod sqlite_index;
pub mod tantivy_index;

use crate::config::SearchConfig;
use crate::error::{ConfigError, SearchError};
use crate::evidence::{EvidenceItem, Query};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use service::ServiceBackend;
pub use sqlite_index::SqliteIndexBackend;
pub use tantivy_index::TantivyIndexBackend;

/// A raw hit as returned by a backend, before provenance is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    pub source_id: String,
    pub snippet: String,
    pub score: f64,
}

impl RawHit {
    pub fn new(source_id: impl Into<String>, snippet: impl Into<String>, score: f64) -> Self {
        Self {
            source_id: source_id.into(),
            snippet: snippet.into(),
            score,
        }
    }
}

/// A read-only retrieval backend.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short name used in logs and traces.
    fn name(&self) -> &str;

    /// Return up to `top_k` hits for `query`.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RawHit>, SearchError>;
}

/// Ordered fallback chain over search backends.
pub struct SearchGateway {
    backends: Vec<Arc<dyn SearchBackend>>,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for SearchGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchGateway")
            .field("backends", &self.backend_names())
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl SearchGateway {
    /// Create a gateway. Backends are tried in the order given.
    pub fn new(backends: Vec<Arc<dyn SearchBackend>>, attempt_timeout: Duration) -> Self {
        Self {
            backends,
            attempt_timeout,
        }
    }

    /// Build the chain from configuration, always in service → index → sqlite order.
    pub fn from_config(config: &SearchConfig) -> Result<Self, ConfigError> {
        let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();

        if let Some(service) = &config.service {
            let api_key = service
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            backends.push(Arc::new(ServiceBackend::new(&service.url, api_key)));
        }
        if let Some(index) = &config.index {
            backends.push(Arc::new(TantivyIndexBackend::new(
                index.path.clone(),
                &index.source_field,
                &index.content_field,
            )));
        }
        if let Some(sqlite) = &config.sqlite {
            backends.push(Arc::new(SqliteIndexBackend::new(
                sqlite.path.clone(),
                &sqlite.table,
            )));
        }

        if backends.is_empty() {
            return Err(ConfigError::Invalid {
                message: "no search backend configured".into(),
            });
        }

        Ok(Self::new(
            backends,
            Duration::from_millis(config.attempt_timeout_ms),
        ))
    }

    /// Names of the backends in priority order.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Run `query` against the chain.
    ///
    /// Returns the first backend's answer that arrives in time, even when it
    /// is empty. Fails with `SearchError::Unavailable` only when every backend
    /// failed.
    pub async fn search(
        &self,
        query: &Query,
        top_k: usize,
        iteration: usize,
    ) -> Result<Vec<EvidenceItem>, SearchError> {
        let mut last_error = String::from("no backends configured");

        for backend in &self.backends {
            let attempt =
                tokio::time::timeout(self.attempt_timeout, backend.search(&query.text, top_k))
                    .await;

            let failure = match attempt {
                Ok(Ok(hits)) => {
                    debug!(
                        backend = backend.name(),
                        query = %query.text,
                        hits = hits.len(),
                        "Search backend answered"
                    );
                    return Ok(hits
                        .into_iter()
                        .take(top_k)
                        .map(|hit| {
                            EvidenceItem::new(
                                hit.source_id,
                                hit.snippet,
                                hit.score,
                                query.text.clone(),
                                iteration,
                            )
                        })
                        .collect());
                }
                Ok(Err(e)) => e,
                Err(_) => SearchError::Timeout {
                    backend: backend.name().to_string(),
                    timeout_ms: self.attempt_timeout.as_millis() as u64,
                },
            };

            warn!(
                backend = backend.name(),
                query = %query.text,
                error = %failure,
                "Search backend failed, trying next"
            );
            last_error = failure.to_string();
        }

        Err(SearchError::Unavailable {
            attempted: self.backends.len(),
            last_error,
        })
    }
}
