//! Retrieval controller: the iterative plan → search → evaluate → synthesize loop.
//!
//! The loop is an explicit state machine with hard ceilings: at most
//! `max_iterations` search passes, a timeout on every external call, and a
//! cancellation check at every state boundary. Each run owns its evidence
//! pool; nothing is shared between runs.

pub mod output;
pub mod run;

pub use output::{OutputFormat, render, render_json, render_text};
pub use run::{
    Answer, IterationRecord, NoOpOracleCallback, OracleCallback, OracleReport, OracleRun,
    RecordingOracleCallback, RunState, StopReason,
};

use crate::config::OracleConfig;
use crate::error::RunError;
use crate::evidence::{EvidenceItem, Query};
use crate::gateway::SearchGateway;
use crate::reasoner::{ConfidenceLabel, Reasoner, Synthesis, Verdict};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-run options.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleOptions {
    /// One search pass, no evaluation or follow-up.
    pub quick: bool,
    /// Keep the iteration trace in rendered output.
    pub verbose: bool,
    pub max_iterations: usize,
    pub confidence_threshold: f64,
    pub output_format: OutputFormat,
    pub top_k: usize,
    pub max_queries_per_iteration: usize,
}

impl Default for OracleOptions {
    fn default() -> Self {
        Self::from_config(&OracleConfig::default())
    }
}

impl OracleOptions {
    pub fn from_config(config: &OracleConfig) -> Self {
        Self {
            quick: false,
            verbose: false,
            max_iterations: config.oracle.max_iterations,
            confidence_threshold: config.oracle.confidence_threshold,
            output_format: OutputFormat::Text,
            top_k: config.search.top_k,
            max_queries_per_iteration: config.oracle.max_queries_per_iteration,
        }
    }

    /// Reject options no run can honour.
    pub fn validate(&self) -> Result<(), RunError> {
        let invalid = |message: String| Err(RunError::InvalidOptions { message });
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.top_k == 0 {
            return invalid("top_k must be at least 1".into());
        }
        if self.max_queries_per_iteration == 0 {
            return invalid("max_queries_per_iteration must be at least 1".into());
        }
        Ok(())
    }
}

/// How the retrieval loop ended, before synthesis.
struct LoopOutcome {
    stop_reason: StopReason,
    last_confidence: Option<f64>,
}

/// The retrieval controller.
pub struct Oracle {
    gateway: Arc<SearchGateway>,
    reasoner: Arc<Reasoner>,
    callback: Arc<dyn OracleCallback>,
}

impl Oracle {
    pub fn new(gateway: Arc<SearchGateway>, reasoner: Arc<Reasoner>) -> Self {
        Self {
            gateway,
            reasoner,
            callback: Arc::new(NoOpOracleCallback),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn OracleCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn gateway(&self) -> &SearchGateway {
        &self.gateway
    }

    /// Answer `question`.
    ///
    /// Returns `Err` for invalid options, a first-pass retrieval failure or
    /// cancellation.
    /// A double synthesis failure still yields a report, in state `Failed`,
    /// carrying a degraded answer.
    pub async fn run(
        &self,
        question: &str,
        options: &OracleOptions,
    ) -> Result<OracleReport, RunError> {
        self.run_with_cancel(question, options, CancellationToken::new())
            .await
    }

    /// Like [`Oracle::run`], stopping with `RunError::Cancelled` once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        question: &str,
        options: &OracleOptions,
        cancel: CancellationToken,
    ) -> Result<OracleReport, RunError> {
        options.validate()?;
        let mut run = OracleRun::new(question);
        info!(
            run_id = %run.id(),
            quick = options.quick,
            max_iterations = options.max_iterations,
            "Starting oracle run"
        );

        match self.retrieve(&mut run, options, &cancel).await {
            Ok(outcome) => self.synthesize(run, outcome, &cancel).await,
            Err(e) => {
                run.transition(RunState::Failed);
                self.callback.on_state_change(run.id(), RunState::Failed);
                warn!(run_id = %run.id(), error = %e, "Oracle run failed");
                Err(e)
            }
        }
    }

    fn enter(
        &self,
        run: &mut OracleRun,
        state: RunState,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled {
                state: run.state().to_string(),
            });
        }
        run.transition(state);
        self.callback.on_state_change(run.id(), state);
        debug!(run_id = %run.id(), state = %state, "State transition");
        Ok(())
    }

    /// Await `fut` unless the run is cancelled first.
    async fn guarded<F: Future>(
        run: &OracleRun,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<F::Output, RunError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RunError::Cancelled {
                state: run.state().to_string(),
            }),
            out = fut => Ok(out),
        }
    }

    /// Planning and the search/evaluate loop.
    async fn retrieve(
        &self,
        run: &mut OracleRun,
        options: &OracleOptions,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, RunError> {
        let max_iterations = options.max_iterations;
        let cap = options.max_queries_per_iteration;
        let question = run.question().to_string();

        self.enter(run, RunState::Planning, cancel)?;
        let mut planning_note = None;
        let planned =
            match Self::guarded(run, cancel, self.reasoner.analyze_intent(&question)).await? {
                Ok(intent) => {
                    run.add_usage(&intent.usage);
                    debug!(
                        intent = %intent.restated_intent,
                        queries = intent.queries.len(),
                        "Planned initial queries"
                    );
                    intent.queries
                }
                Err(e) => {
                    warn!(error = %e, "Planning failed, searching for the raw question");
                    planning_note = Some(format!("planning degraded to raw question: {e}"));
                    vec![Query::initial(question.trim())]
                }
            };
        let mut queries = run.fresh_queries(planned, cap);
        if queries.is_empty() {
            queries = vec![Query::initial(question.trim())];
        }

        let mut iteration = 0;
        let mut last_confidence = None;

        loop {
            self.enter(run, RunState::Searching, cancel)?;
            let mut record = IterationRecord::new(iteration, queries.clone());
            if let Some(note) = planning_note.take() {
                record.notes.push(note);
            }

            let searches = queries
                .iter()
                .map(|q| self.gateway.search(q, options.top_k, iteration));
            let results = Self::guarded(run, cancel, futures::future::join_all(searches)).await?;

            let mut batch: Vec<EvidenceItem> = Vec::new();
            for (query, result) in queries.iter().zip(results) {
                match result {
                    Ok(items) => {
                        self.callback.on_search_complete(query, items.len(), false);
                        batch.extend(items);
                    }
                    Err(e) => {
                        self.callback.on_search_complete(query, 0, true);
                        record.search_failures += 1;
                        record.notes.push(format!("search for '{}' failed: {e}", query.text));
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(RunError::Cancelled {
                    state: run.state().to_string(),
                });
            }
            let added = run.merge(batch);
            record.added = added;
            record.pool_size = run.pool().len();
            info!(iteration, added, pool = record.pool_size, "Search pass merged");

            if iteration == 0 && added == 0 && record.search_failures == queries.len() {
                self.finish_record(run, record);
                return Err(RunError::RetrievalFailed {
                    message: "every search backend failed for the initial queries".into(),
                });
            }

            if options.quick {
                self.finish_record(run, record);
                return Ok(LoopOutcome {
                    stop_reason: StopReason::QuickMode,
                    last_confidence,
                });
            }

            self.enter(run, RunState::Evaluating, cancel)?;
            let at_limit = iteration + 1 >= max_iterations;
            let evaluation = Self::guarded(
                run,
                cancel,
                self.reasoner
                    .evaluate_sufficiency(&question, run.pool().items()),
            )
            .await?;

            let stop = match evaluation {
                Ok(sufficiency) => {
                    run.add_usage(&sufficiency.usage);
                    info!(
                        iteration,
                        verdict = %sufficiency.verdict,
                        confidence = sufficiency.confidence,
                        "Sufficiency evaluated"
                    );
                    record.verdict = Some(sufficiency.verdict);
                    record.confidence = Some(sufficiency.confidence);
                    record.rationale = sufficiency.rationale;
                    last_confidence = Some(sufficiency.confidence);

                    // Iteration ceiling is checked before the model's judgment.
                    if at_limit {
                        Some(StopReason::MaxIterations)
                    } else if sufficiency.verdict == Verdict::Stop {
                        Some(StopReason::Verdict)
                    } else if sufficiency.confidence >= options.confidence_threshold {
                        Some(StopReason::ConfidenceThreshold)
                    } else {
                        None
                    }
                }
                Err(e) => {
                    warn!(iteration, error = %e, "Sufficiency evaluation failed, treating as stop");
                    record.rationale = format!("evaluation unavailable: {e}");
                    record.notes.push(format!("evaluation failed, treated as stop: {e}"));
                    Some(if at_limit {
                        StopReason::MaxIterations
                    } else {
                        StopReason::EvaluationFailed
                    })
                }
            };

            if let Some(stop_reason) = stop {
                self.finish_record(run, record);
                return Ok(LoopOutcome {
                    stop_reason,
                    last_confidence,
                });
            }

            let plan = Self::guarded(
                run,
                cancel,
                self.reasoner
                    .plan_followup(&question, run.pool().items(), iteration),
            )
            .await?;

            let next = match plan {
                Ok(plan) => {
                    run.add_usage(&plan.usage);
                    record.gaps = plan.gaps;
                    let proposed = plan.queries.len();
                    let fresh = run.fresh_queries(plan.queries, cap);
                    if fresh.is_empty() && proposed > 0 {
                        record
                            .notes
                            .push("every follow-up query was already issued".into());
                    }
                    fresh
                }
                Err(e) => {
                    warn!(iteration, error = %e, "Follow-up planning failed, stopping");
                    record.notes.push(format!("follow-up planning failed: {e}"));
                    Vec::new()
                }
            };

            self.finish_record(run, record);
            if next.is_empty() {
                return Ok(LoopOutcome {
                    stop_reason: StopReason::NoFollowups,
                    last_confidence,
                });
            }

            queries = next;
            iteration += 1;
        }
    }

    fn finish_record(&self, run: &mut OracleRun, record: IterationRecord) {
        self.callback.on_iteration_complete(&record);
        run.record(record);
    }

    /// Synthesis with one retry on parse or model failure, citation filtering
    /// and the final report.
    async fn synthesize(
        &self,
        mut run: OracleRun,
        outcome: LoopOutcome,
        cancel: &CancellationToken,
    ) -> Result<OracleReport, RunError> {
        self.enter(&mut run, RunState::Synthesizing, cancel)?;
        let question = run.question().to_string();

        let mut last_error = None;
        let mut synthesis = None;
        for attempt in 1..=2 {
            let result = Self::guarded(
                &run,
                cancel,
                self.reasoner.synthesize(&question, run.pool().items()),
            )
            .await?;
            match result {
                Ok(s) => {
                    run.add_usage(&s.usage);
                    synthesis = Some(s);
                    break;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Synthesis failed");
                    let retry = e.is_recoverable_parse();
                    last_error = Some(e);
                    if !retry {
                        break;
                    }
                }
            }
        }

        let report = match synthesis {
            Some(s) => {
                let (answer, dropped) = self.build_answer(&run, s, outcome.last_confidence);
                run.transition(RunState::Done);
                self.callback.on_state_change(run.id(), RunState::Done);
                run.finish(Some(outcome.stop_reason), None, answer, dropped)
            }
            None => {
                let failure = RunError::SynthesisFailed {
                    message: last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no synthesis produced".into()),
                };
                warn!(run_id = %run.id(), error = %failure, "Returning degraded answer");
                let answer = Answer::degraded(run.pool());
                run.transition(RunState::Failed);
                self.callback.on_state_change(run.id(), RunState::Failed);
                run.finish(Some(outcome.stop_reason), Some(failure), answer, Vec::new())
            }
        };

        info!(
            run_id = %report.run_id,
            state = %report.state,
            iterations = report.iterations(),
            evidence = report.evidence.len(),
            tokens = report.usage.total(),
            "Oracle run finished"
        );
        Ok(report)
    }

    /// Keep only citations present in the pool and settle the confidence label.
    fn build_answer(
        &self,
        run: &OracleRun,
        synthesis: Synthesis,
        last_confidence: Option<f64>,
    ) -> (Answer, Vec<String>) {
        let (cited, dropped): (Vec<String>, Vec<String>) = synthesis
            .cited_source_ids
            .into_iter()
            .partition(|id| run.pool().contains_source(id));
        for id in &dropped {
            warn!(source_id = %id, "Dropping citation not present in evidence pool");
        }

        let confidence_label = synthesis.confidence_label.unwrap_or_else(|| {
            ConfidenceLabel::from_score(
                last_confidence
                    .or_else(|| run.pool().mean_score())
                    .unwrap_or(0.0),
            )
        });

        (
            Answer {
                answer_text: synthesis.answer_text,
                cited_source_ids: cited,
                confidence_label,
                followup_suggestions: synthesis.followup_suggestions,
            },
            dropped,
        )
    }
}
