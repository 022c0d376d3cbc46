//! # Oracle Core
//!
//! Core library for the Oracle question-answering engine.
//! Provides the iterative retrieval controller, the reasoner's model-backed
//! decision functions, the evidence pool, the search gateway with its
//! fallback chain, the LLM interface (brain), and configuration.

pub mod brain;
pub mod config;
pub mod error;
pub mod evidence;
pub mod gateway;
pub mod oracle;
pub mod providers;
pub mod reasoner;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider, escape_for_prompt, extract_json};
pub use config::{
    LoopConfig, OracleConfig, SearchConfig, config_exists, load_config, load_config_unvalidated,
};
pub use error::{
    ConfigError, LlmError, OracleError, ReasonerError, Result, RunError, SearchError,
};
pub use evidence::{EvidenceItem, EvidencePool, Query, QueryOrigin};
pub use gateway::{RawHit, SearchBackend, SearchGateway};
pub use oracle::{
    Answer, IterationRecord, NoOpOracleCallback, Oracle, OracleCallback, OracleOptions,
    OracleReport, OracleRun, OutputFormat, RecordingOracleCallback, RunState, StopReason,
};
pub use providers::create_provider;
pub use reasoner::{ConfidenceLabel, Reasoner, Verdict};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
