//! Configuration system for Oracle.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/oracle/config.toml` and/or `.oracle/config.toml`
//! in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub oracle: LoopConfig,
}

/// Configuration for the language-model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" or any OpenAI-compatible endpoint ("ollama", "vllm", ...).
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Inline API key. Takes precedence over `api_key_env` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Sampling temperature for decision calls.
    pub temperature: f32,
    /// Context window size for the model.
    pub context_window: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 1024,
            temperature: 0.2,
            context_window: 128_000,
        }
    }
}

/// Configuration for the search gateway and its fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of passages requested per query.
    pub top_k: usize,
    /// Time budget for a single backend attempt, in milliseconds.
    pub attempt_timeout_ms: u64,
    /// Advanced search service (tried first).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceBackendConfig>,
    /// Tantivy index written by the indexer (tried second).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexBackendConfig>,
    /// Raw SQLite FTS5 index (tried last).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite: Option<SqliteBackendConfig>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            top_k: 8,
            attempt_timeout_ms: 5_000,
            service: None,
            index: Some(IndexBackendConfig {
                path: data_dir.join("index"),
                ..IndexBackendConfig::default()
            }),
            sqlite: Some(SqliteBackendConfig {
                path: data_dir.join("index.db"),
                ..SqliteBackendConfig::default()
            }),
        }
    }
}

/// HTTP search service backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceBackendConfig {
    /// Base URL; queries are POSTed to `{url}/search`.
    pub url: String,
    /// Environment variable holding a bearer token, if the service needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

/// Tantivy index backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBackendConfig {
    /// Directory containing the tantivy index.
    pub path: PathBuf,
    /// Stored field holding the source identifier (path or conversation id).
    #[serde(default = "default_source_field")]
    pub source_field: String,
    /// Stored, tokenized field holding the passage text.
    #[serde(default = "default_content_field")]
    pub content_field: String,
}

impl Default for IndexBackendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".oracle/index"),
            source_field: default_source_field(),
            content_field: default_content_field(),
        }
    }
}

/// SQLite FTS5 backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Database file.
    pub path: PathBuf,
    /// FTS5 virtual table with `source_id` and `content` columns.
    #[serde(default = "default_fts_table")]
    pub table: String,
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".oracle/index.db"),
            table: default_fts_table(),
        }
    }
}

/// Configuration for the retrieval loop itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Hard ceiling on search passes per question.
    pub max_iterations: usize,
    /// Sufficiency confidence at or above which the loop stops.
    pub confidence_threshold: f64,
    /// Queries issued per iteration at most.
    pub max_queries_per_iteration: usize,
    /// Time budget for a single reasoner call, in seconds.
    pub llm_timeout_secs: u64,
    /// Evidence items shown to the model per prompt (arrival order).
    pub max_prompt_items: usize,
    /// Snippet characters shown to the model per item.
    pub max_snippet_chars: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            confidence_threshold: 0.75,
            max_queries_per_iteration: 4,
            llm_timeout_secs: 60,
            max_prompt_items: 40,
            max_snippet_chars: 800,
        }
    }
}

fn default_source_field() -> String {
    "source".to_string()
}

fn default_content_field() -> String {
    "content".to_string()
}

fn default_fts_table() -> String {
    "chunks".to_string()
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "oracle", "oracle")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".oracle"))
}

impl OracleConfig {
    /// Reject settings the controller cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oracle.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                message: "oracle.max_iterations must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.oracle.confidence_threshold) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "oracle.confidence_threshold must be within [0, 1], got {}",
                    self.oracle.confidence_threshold
                ),
            });
        }
        if self.oracle.max_queries_per_iteration == 0 {
            return Err(ConfigError::Invalid {
                message: "oracle.max_queries_per_iteration must be at least 1".into(),
            });
        }
        if self.oracle.llm_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "oracle.llm_timeout_secs must be at least 1".into(),
            });
        }
        if self.search.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "search.top_k must be at least 1".into(),
            });
        }
        if self.search.attempt_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "search.attempt_timeout_ms must be at least 1".into(),
            });
        }
        if self.search.service.is_none()
            && self.search.index.is_none()
            && self.search.sqlite.is_none()
        {
            return Err(ConfigError::Invalid {
                message: "no search backend configured (service, index or sqlite)".into(),
            });
        }
        Ok(())
    }
}

/// Load configuration from layered sources and validate the result.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `ORACLE_`)
/// 3. Workspace-local config (`.oracle/config.toml`)
/// 4. User config (`~/.config/oracle/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&OracleConfig>,
) -> Result<OracleConfig, ConfigError> {
    let config = load_config_unvalidated(workspace, overrides)?;
    config.validate()?;
    Ok(config)
}

/// Merge the same layers as [`load_config`] without validating, for callers
/// that adjust the result (CLI flags) before calling [`OracleConfig::validate`].
pub fn load_config_unvalidated(
    workspace: Option<&Path>,
    overrides: Option<&OracleConfig>,
) -> Result<OracleConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(OracleConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "oracle", "oracle") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".oracle").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // ORACLE_LLM__MODEL, ORACLE_ORACLE__MAX_ITERATIONS, ...
    figment = figment.merge(Env::prefixed("ORACLE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

/// Check whether any Oracle configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(config_dir) = directories::ProjectDirs::from("dev", "oracle", "oracle")
        && config_dir.config_dir().join("config.toml").exists()
    {
        return true;
    }

    workspace
        .map(|ws| ws.join(".oracle").join("config.toml").exists())
        .unwrap_or(false)
}
