//! Per-question run state: lifecycle, trace and final report.

use crate::error::RunError;
use crate::evidence::{EvidenceItem, EvidencePool, Query};
use crate::reasoner::{ConfidenceLabel, Verdict};
use crate::types::TokenUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Controller state. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Searching,
    Evaluating,
    Synthesizing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Planning => "planning",
            RunState::Searching => "searching",
            RunState::Evaluating => "evaluating",
            RunState::Synthesizing => "synthesizing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why the retrieval loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The last allowed iteration was reached.
    MaxIterations,
    /// The reasoner said stop.
    Verdict,
    /// Confidence met the configured threshold.
    ConfidenceThreshold,
    /// Follow-up planning produced no new queries.
    NoFollowups,
    /// Quick mode: one search pass only.
    QuickMode,
    /// The sufficiency check could not be parsed and was read as stop.
    EvaluationFailed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::MaxIterations => "max iterations reached",
            StopReason::Verdict => "reasoner verdict",
            StopReason::ConfidenceThreshold => "confidence threshold met",
            StopReason::NoFollowups => "no follow-up queries",
            StopReason::QuickMode => "quick mode",
            StopReason::EvaluationFailed => "evaluation failed",
        };
        f.write_str(s)
    }
}

/// One search pass and the evaluation that followed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub queries: Vec<Query>,
    /// Items new to the pool after this pass.
    pub added: usize,
    pub pool_size: usize,
    /// Queries whose gateway call failed outright.
    pub search_failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gaps: Vec<String>,
    /// Recovered degradations observed during this iteration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl IterationRecord {
    pub fn new(iteration: usize, queries: Vec<Query>) -> Self {
        Self {
            iteration,
            queries,
            added: 0,
            pool_size: 0,
            search_failures: 0,
            verdict: None,
            confidence: None,
            rationale: String::new(),
            gaps: Vec::new(),
            notes: Vec::new(),
        }
    }
}

/// The structured answer handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub answer_text: String,
    /// Every id refers to an item in the run's evidence pool.
    pub cited_source_ids: Vec<String>,
    pub confidence_label: ConfidenceLabel,
    #[serde(default)]
    pub followup_suggestions: Vec<String>,
}

impl Answer {
    pub(crate) const APOLOGY: &'static str = "Sorry, I couldn't put together a reliable answer \
to this question. The sources below were gathered while searching and may still help.";

    /// Fallback answer used when synthesis fails twice.
    pub fn degraded(pool: &EvidencePool) -> Self {
        Self {
            answer_text: Self::APOLOGY.to_string(),
            cited_source_ids: pool.source_ids(),
            confidence_label: ConfidenceLabel::Low,
            followup_suggestions: Vec::new(),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct OracleReport {
    pub run_id: Uuid,
    pub question: String,
    pub state: RunState,
    pub stop_reason: Option<StopReason>,
    #[serde(skip)]
    pub failure: Option<RunError>,
    pub answer: Answer,
    /// Evidence pool snapshot taken at synthesis time.
    pub evidence: Vec<EvidenceItem>,
    pub trace: Vec<IterationRecord>,
    /// Citations returned by synthesis that matched nothing in the pool.
    pub dropped_citations: Vec<String>,
    /// Tokens spent by the reasoner calls that returned a reply.
    pub usage: TokenUsage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OracleReport {
    /// Number of search passes executed.
    pub fn iterations(&self) -> usize {
        self.trace.len()
    }

    pub fn is_failed(&self) -> bool {
        self.state == RunState::Failed
    }

    /// Best-scoring snippet for `source_id`, if any.
    pub fn best_snippet(&self, source_id: &str) -> Option<&EvidenceItem> {
        self.evidence
            .iter()
            .filter(|item| item.source_id == source_id)
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Lifecycle object for one question. Created per run and consumed into an
/// `OracleReport`; nothing in it outlives the run.
#[derive(Debug)]
pub struct OracleRun {
    id: Uuid,
    question: String,
    state: RunState,
    pool: EvidencePool,
    trace: Vec<IterationRecord>,
    issued: HashSet<String>,
    usage: TokenUsage,
    started_at: DateTime<Utc>,
}

impl OracleRun {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            state: RunState::Planning,
            pool: EvidencePool::new(),
            trace: Vec::new(),
            issued: HashSet::new(),
            usage: TokenUsage::default(),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn pool(&self) -> &EvidencePool {
        &self.pool
    }

    pub(crate) fn transition(&mut self, state: RunState) {
        self.state = state;
    }

    /// Merge one iteration's results. Returns the count of new items.
    pub(crate) fn merge(&mut self, items: Vec<EvidenceItem>) -> usize {
        self.pool.add(items)
    }

    pub(crate) fn add_usage(&mut self, usage: &TokenUsage) {
        self.usage.accumulate(usage);
    }

    pub(crate) fn record(&mut self, record: IterationRecord) {
        self.trace.push(record);
    }

    /// Drop queries already issued in this run (or repeated within `queries`),
    /// keep at most `cap`, and remember the survivors as issued.
    pub(crate) fn fresh_queries(&mut self, queries: Vec<Query>, cap: usize) -> Vec<Query> {
        let mut fresh = Vec::new();
        for query in queries {
            if fresh.len() >= cap {
                break;
            }
            if self.issued.insert(query.normalized()) {
                fresh.push(query);
            }
        }
        fresh
    }

    pub(crate) fn finish(
        self,
        stop_reason: Option<StopReason>,
        failure: Option<RunError>,
        answer: Answer,
        dropped_citations: Vec<String>,
    ) -> OracleReport {
        OracleReport {
            run_id: self.id,
            question: self.question,
            state: self.state,
            stop_reason,
            failure,
            answer,
            evidence: self.pool.snapshot(),
            trace: self.trace,
            dropped_citations,
            usage: self.usage,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Progress notifications for a run.
pub trait OracleCallback: Send + Sync {
    /// Called on every state transition.
    fn on_state_change(&self, run_id: Uuid, state: RunState);
    /// Called once per query after its gateway call returns.
    fn on_search_complete(&self, query: &Query, hits: usize, failed: bool);
    /// Called when an iteration's record is final.
    fn on_iteration_complete(&self, record: &IterationRecord);
}

/// No-op callback.
pub struct NoOpOracleCallback;

impl OracleCallback for NoOpOracleCallback {
    fn on_state_change(&self, _run_id: Uuid, _state: RunState) {}
    fn on_search_complete(&self, _query: &Query, _hits: usize, _failed: bool) {}
    fn on_iteration_complete(&self, _record: &IterationRecord) {}
}

/// Callback that records every notification, for tests and diagnostics.
#[derive(Default)]
pub struct RecordingOracleCallback {
    states: Mutex<Vec<RunState>>,
    searches: Mutex<Vec<(String, usize, bool)>>,
    iterations: Mutex<Vec<IterationRecord>>,
}

impl RecordingOracleCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<RunState> {
        lock(&self.states).clone()
    }

    /// `(query text, hits, failed)` per gateway call.
    pub fn searches(&self) -> Vec<(String, usize, bool)> {
        lock(&self.searches).clone()
    }

    pub fn iterations(&self) -> Vec<IterationRecord> {
        lock(&self.iterations).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OracleCallback for RecordingOracleCallback {
    fn on_state_change(&self, _run_id: Uuid, state: RunState) {
        lock(&self.states).push(state);
    }
    fn on_search_complete(&self, query: &Query, hits: usize, failed: bool) {
        lock(&self.searches).push((query.text.clone(), hits, failed));
    }
    fn on_iteration_complete(&self, record: &IterationRecord) {
        lock(&self.iterations).push(record.clone());
    }
}
