//! Error types for the Oracle core library.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering the LLM surface, search backends, reasoner decisions, run control
//! and configuration.

/// Top-level error type for the Oracle core library.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Reasoner error: {0}")]
    Reasoner(#[from] ReasonerError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the search gateway and its backends.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Backend '{backend}' timed out after {timeout_ms}ms")]
    Timeout { backend: String, timeout_ms: u64 },

    #[error("Search unavailable: all {attempted} backend(s) failed (last: {last_error})")]
    Unavailable { attempted: usize, last_error: String },

    #[error("Index at {path} is unusable: {message}")]
    InvalidIndex { path: String, message: String },
}

/// Errors from the reasoner's decision functions.
#[derive(Debug, thiserror::Error)]
pub enum ReasonerError {
    #[error("Query planning failed: {message}")]
    PlanningFailed { message: String },

    #[error("Could not parse {operation} output: {message}")]
    Parse { operation: String, message: String },

    #[error("Model unavailable during {operation}: {message}")]
    ModelUnavailable { operation: String, message: String },
}

impl ReasonerError {
    /// Whether this failure follows the parse-error recovery rules.
    ///
    /// An unavailable model is handled exactly like unparseable output.
    pub fn is_recoverable_parse(&self) -> bool {
        matches!(
            self,
            ReasonerError::Parse { .. } | ReasonerError::ModelUnavailable { .. }
        )
    }
}

/// Fatal outcomes of a single question run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    #[error("Retrieval failed: {message}")]
    RetrievalFailed { message: String },

    #[error("Synthesis failed: {message}")]
    SynthesisFailed { message: String },

    #[error("Run cancelled during {state}")]
    Cancelled { state: String },

    #[error("Invalid run options: {message}")]
    InvalidOptions { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `OracleError`.
pub type Result<T> = std::result::Result<T, OracleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = OracleError::Llm(LlmError::ApiRequest {
            message: "connection refused".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: API request failed: connection refused"
        );
    }

    #[test]
    fn test_error_display_search() {
        let err = OracleError::Search(SearchError::Unavailable {
            attempted: 3,
            last_error: "no index".into(),
        });
        assert_eq!(
            err.to_string(),
            "Search error: Search unavailable: all 3 backend(s) failed (last: no index)"
        );

        let err = SearchError::Timeout {
            backend: "service".into(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "Backend 'service' timed out after 250ms");
    }

    #[test]
    fn test_error_display_run() {
        let err = OracleError::Run(RunError::RetrievalFailed {
            message: "first query returned nothing".into(),
        });
        assert_eq!(
            err.to_string(),
            "Run error: Retrieval failed: first query returned nothing"
        );

        let err = RunError::Cancelled {
            state: "searching".into(),
        };
        assert_eq!(err.to_string(), "Run cancelled during searching");

        let err = RunError::InvalidOptions {
            message: "max_iterations must be at least 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid run options: max_iterations must be at least 1"
        );
    }

    #[test]
    fn test_reasoner_error_recoverability() {
        let parse = ReasonerError::Parse {
            operation: "synthesize".into(),
            message: "no JSON object".into(),
        };
        let unavailable = ReasonerError::ModelUnavailable {
            operation: "synthesize".into(),
            message: "timeout".into(),
        };
        let planning = ReasonerError::PlanningFailed {
            message: "no queries".into(),
        };
        assert!(parse.is_recoverable_parse());
        assert!(unavailable.is_recoverable_parse());
        assert!(!planning.is_recoverable_parse());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OracleError = io_err.into();
        assert!(matches!(err, OracleError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: OracleError = serde_err.into();
        assert!(matches!(err, OracleError::Serialization(_)));
    }
}
