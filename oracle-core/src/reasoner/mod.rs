//! Reasoner: language-model-backed decision functions.
//!
//! Each decision is one completion with a fixed prompt template followed by a
//! strict parse-and-validate step. The model is treated as a fallible external
//! function: timeouts and provider errors surface as
//! `ReasonerError::ModelUnavailable`, unusable replies as `ReasonerError::Parse`.

mod parse;
pub(crate) mod prompts;

use crate::brain::{LlmProvider, extract_json};
use crate::config::OracleConfig;
use crate::error::ReasonerError;
use crate::evidence::{EvidenceItem, Query};
use crate::types::{CompletionRequest, Message, TokenUsage};
use prompts::EvidenceBudget;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Continue searching or stop and synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Continue,
    Stop,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Continue => write!(f, "continue"),
            Verdict::Stop => write!(f, "stop"),
        }
    }
}

/// Coarse confidence attached to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    Low,
    Medium,
    High,
}

impl ConfidenceLabel {
    /// `>= 0.75` is high, `>= 0.4` medium, anything else low.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            ConfidenceLabel::High
        } else if score >= 0.4 {
            ConfidenceLabel::Medium
        } else {
            ConfidenceLabel::Low
        }
    }

    /// A scalar that maps back onto this label.
    pub fn representative_score(self) -> f64 {
        match self {
            ConfidenceLabel::Low => 0.2,
            ConfidenceLabel::Medium => 0.6,
            ConfidenceLabel::High => 0.9,
        }
    }
}

impl std::fmt::Display for ConfidenceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLabel::Low => write!(f, "low"),
            ConfidenceLabel::Medium => write!(f, "medium"),
            ConfidenceLabel::High => write!(f, "high"),
        }
    }
}

/// Output of `analyze_intent`. Always carries at least one query.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentAnalysis {
    pub restated_intent: String,
    pub queries: Vec<Query>,
    pub usage: TokenUsage,
}

/// Output of `plan_followup`. An empty query list means "stop".
#[derive(Debug, Clone, PartialEq)]
pub struct FollowupPlan {
    pub gaps: Vec<String>,
    pub queries: Vec<Query>,
    pub usage: TokenUsage,
}

/// Output of `evaluate_sufficiency`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sufficiency {
    pub verdict: Verdict,
    pub confidence: f64,
    pub rationale: String,
    pub usage: TokenUsage,
}

/// Output of `synthesize`, before citations are checked against the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer_text: String,
    pub cited_source_ids: Vec<String>,
    pub confidence_label: Option<ConfidenceLabel>,
    pub followup_suggestions: Vec<String>,
    pub usage: TokenUsage,
}

/// The four decision functions over a single provider.
pub struct Reasoner {
    provider: Arc<dyn LlmProvider>,
    call_timeout: Duration,
    temperature: f32,
    max_tokens: usize,
    max_queries: usize,
    budget: EvidenceBudget,
}

impl std::fmt::Debug for Reasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reasoner")
            .field("model", &self.provider.model_name())
            .field("call_timeout", &self.call_timeout)
            .field("max_queries", &self.max_queries)
            .finish()
    }
}

impl Reasoner {
    /// A reasoner with default limits.
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self::from_config(provider, &OracleConfig::default())
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &OracleConfig) -> Self {
        Self {
            provider,
            call_timeout: Duration::from_secs(config.oracle.llm_timeout_secs),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            max_queries: config.oracle.max_queries_per_iteration.max(1),
            budget: EvidenceBudget {
                max_items: config.oracle.max_prompt_items.max(1),
                max_snippet_chars: config.oracle.max_snippet_chars.max(1),
            },
        }
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Override the number of queries accepted from one planning reply.
    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// One bounded completion, reduced to the JSON object it contains and the
    /// tokens it cost.
    async fn call(
        &self,
        operation: &str,
        system: &str,
        user: String,
    ) -> Result<(serde_json::Value, TokenUsage), ReasonerError> {
        let request = CompletionRequest {
            messages: vec![Message::system(system), Message::user(user)],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            model: None,
            json_mode: true,
        };

        let response = tokio::time::timeout(self.call_timeout, self.provider.complete(request))
            .await
            .map_err(|_| ReasonerError::ModelUnavailable {
                operation: operation.to_string(),
                message: format!("timed out after {}s", self.call_timeout.as_secs_f64()),
            })?
            .map_err(|e| ReasonerError::ModelUnavailable {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            operation,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Reasoner call completed"
        );

        let value = extract_json(response.text()).ok_or_else(|| ReasonerError::Parse {
            operation: operation.to_string(),
            message: "reply contains no JSON object".into(),
        })?;
        Ok((value, response.usage))
    }

    /// Restate the question and propose the initial queries.
    ///
    /// Every failure, including a reply without usable queries, comes back as
    /// `ReasonerError::PlanningFailed`.
    pub async fn analyze_intent(&self, question: &str) -> Result<IntentAnalysis, ReasonerError> {
        let (value, usage) = self
            .call("analyze_intent", prompts::INTENT_SYSTEM, prompts::intent_user(question))
            .await
            .map_err(|e| ReasonerError::PlanningFailed {
                message: e.to_string(),
            })?;

        let queries = parse::query_list(
            &value,
            &["queries", "suggested_initial_queries", "suggested_queries", "search_queries"],
            self.max_queries,
        );
        if queries.is_empty() {
            return Err(ReasonerError::PlanningFailed {
                message: "reply contains no search queries".into(),
            });
        }

        Ok(IntentAnalysis {
            restated_intent: parse::string_field(&value, &["restated_intent", "intent"])
                .unwrap_or_else(|| question.trim().to_string()),
            queries: queries.into_iter().map(Query::initial).collect(),
            usage,
        })
    }

    /// Identify gaps in `evidence` and propose follow-up queries for the next round.
    pub async fn plan_followup(
        &self,
        question: &str,
        evidence: &[EvidenceItem],
        iteration: usize,
    ) -> Result<FollowupPlan, ReasonerError> {
        let (value, usage) = self
            .call(
                "plan_followup",
                prompts::FOLLOWUP_SYSTEM,
                prompts::followup_user(question, evidence, iteration, self.budget),
            )
            .await?;

        let queries = parse::query_list(
            &value,
            &["queries", "followup_queries", "follow_up_queries"],
            self.max_queries,
        );

        Ok(FollowupPlan {
            gaps: parse::string_list(&value, &["gaps", "gaps_identified"]),
            queries: queries
                .into_iter()
                .map(|q| Query::follow_up(q, iteration))
                .collect(),
            usage,
        })
    }

    /// Judge whether `evidence` (arrival order) answers the question.
    ///
    /// A reply must carry a verdict or a confidence. A missing verdict reads
    /// as `continue`; a missing confidence reads as `0.0`.
    pub async fn evaluate_sufficiency(
        &self,
        question: &str,
        evidence: &[EvidenceItem],
    ) -> Result<Sufficiency, ReasonerError> {
        let (value, usage) = self
            .call(
                "evaluate_sufficiency",
                prompts::SUFFICIENCY_SYSTEM,
                prompts::sufficiency_user(question, evidence, self.budget),
            )
            .await?;

        let verdict = parse::verdict(&value);
        let confidence = parse::confidence(&value);
        if verdict.is_none() && confidence.is_none() {
            return Err(ReasonerError::Parse {
                operation: "evaluate_sufficiency".into(),
                message: "reply has neither a verdict nor a confidence".into(),
            });
        }

        Ok(Sufficiency {
            verdict: verdict.unwrap_or(Verdict::Continue),
            confidence: confidence.unwrap_or(0.0),
            rationale: parse::string_field(&value, &["rationale", "reason", "reasoning"])
                .unwrap_or_default(),
            usage,
        })
    }

    /// Compose the answer from `evidence`. Citations are returned unchecked.
    pub async fn synthesize(
        &self,
        question: &str,
        evidence: &[EvidenceItem],
    ) -> Result<Synthesis, ReasonerError> {
        let (value, usage) = self
            .call(
                "synthesize",
                prompts::SYNTHESIS_SYSTEM,
                prompts::synthesis_user(question, evidence, self.budget),
            )
            .await?;

        let answer_text = parse::string_field(&value, &["answer_text", "answer", "text"])
            .ok_or_else(|| ReasonerError::Parse {
                operation: "synthesize".into(),
                message: "reply has no answer text".into(),
            })?;

        Ok(Synthesis {
            answer_text,
            cited_source_ids: parse::source_ids(&value),
            confidence_label: parse::confidence_label(&value),
            followup_suggestions: parse::string_list(
                &value,
                &["followup_suggestions", "follow_up_questions", "followups"],
            ),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;
    use crate::types::{CompletionRequest, CompletionResponse};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn reasoner(mock: MockLlmProvider) -> Reasoner {
        Reasoner::new(Arc::new(mock))
    }

    fn evidence() -> Vec<EvidenceItem> {
        vec![EvidenceItem::new(
            "docs/atom.md",
            "AtomRuntime is the actor scheduler",
            0.9,
            "AtomRuntime",
            0,
        )]
    }

    #[tokio::test]
    async fn test_analyze_intent() {
        let mock = MockLlmProvider::new();
        mock.queue_text(
            "Sure!\n```json\n{\"restated_intent\": \"Define AtomRuntime\", \"queries\": [\"AtomRuntime\", \"AtomRuntime design\"]}\n```",
        );
        let intent = reasoner(mock).analyze_intent("What is AtomRuntime?").await.unwrap();
        assert_eq!(intent.restated_intent, "Define AtomRuntime");
        assert_eq!(
            intent.queries,
            vec![Query::initial("AtomRuntime"), Query::initial("AtomRuntime design")]
        );
    }

    #[tokio::test]
    async fn test_analyze_intent_failures_are_planning_failed() {
        let mock = MockLlmProvider::new();
        mock.queue_text("I would search for AtomRuntime.");
        mock.queue_json(json!({"restated_intent": "x", "queries": []}));
        mock.queue_error(LlmError::Timeout { timeout_secs: 1 });
        let r = reasoner(mock);

        for _ in 0..3 {
            let err = r.analyze_intent("What is AtomRuntime?").await.unwrap_err();
            assert!(matches!(err, ReasonerError::PlanningFailed { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn test_analyze_intent_caps_queries() {
        let mock = MockLlmProvider::new();
        mock.queue_json(json!({"queries": ["a", "b", "c", "d", "e", "f"]}));
        let intent = reasoner(mock)
            .with_max_queries(2)
            .analyze_intent("q")
            .await
            .unwrap();
        assert_eq!(intent.queries.len(), 2);
        assert_eq!(intent.restated_intent, "q");
    }

    #[tokio::test]
    async fn test_plan_followup_tags_queries() {
        let mock = MockLlmProvider::new();
        mock.queue_json(json!({"gaps": ["who owns it"], "queries": ["AtomRuntime owner"]}));
        let plan = reasoner(mock)
            .plan_followup("What is AtomRuntime?", &evidence(), 1)
            .await
            .unwrap();
        assert_eq!(plan.gaps, vec!["who owns it"]);
        assert_eq!(plan.queries, vec![Query::follow_up("AtomRuntime owner", 1)]);
    }

    #[tokio::test]
    async fn test_plan_followup_empty_is_ok() {
        let mock = MockLlmProvider::new();
        mock.queue_json(json!({"gaps": [], "queries": []}));
        let plan = reasoner(mock).plan_followup("q", &evidence(), 0).await.unwrap();
        assert!(plan.queries.is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_sufficiency() {
        let mock = MockLlmProvider::new();
        mock.queue_json(json!({"verdict": "stop", "confidence": 0.83, "rationale": "defined in docs"}));
        mock.queue_json(json!({"confidence": 0.3}));
        mock.queue_json(json!({"rationale": "unsure"}));
        mock.queue_text("not json");
        let r = reasoner(mock);

        let s = r.evaluate_sufficiency("q", &evidence()).await.unwrap();
        assert_eq!(
            s,
            Sufficiency {
                verdict: Verdict::Stop,
                confidence: 0.83,
                rationale: "defined in docs".into(),
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                },
            }
        );

        let s = r.evaluate_sufficiency("q", &evidence()).await.unwrap();
        assert_eq!(s.verdict, Verdict::Continue);
        assert_eq!(s.confidence, 0.3);

        for _ in 0..2 {
            let err = r.evaluate_sufficiency("q", &evidence()).await.unwrap_err();
            assert!(err.is_recoverable_parse());
        }
    }

    #[tokio::test]
    async fn test_synthesize() {
        let mock = MockLlmProvider::new();
        mock.queue_json(json!({
            "answer_text": "AtomRuntime is the actor scheduler [docs/atom.md].",
            "cited_source_ids": ["docs/atom.md", "made/up.md"],
            "confidence_label": "high",
            "followup_suggestions": ["Who maintains AtomRuntime?"]
        }));
        mock.queue_json(json!({"cited_source_ids": ["docs/atom.md"]}));
        let r = reasoner(mock);

        let s = r.synthesize("What is AtomRuntime?", &evidence()).await.unwrap();
        assert_eq!(s.cited_source_ids, vec!["docs/atom.md", "made/up.md"]);
        assert_eq!(s.confidence_label, Some(ConfidenceLabel::High));
        assert_eq!(s.followup_suggestions.len(), 1);

        let err = r.synthesize("q", &evidence()).await.unwrap_err();
        assert!(matches!(err, ReasonerError::Parse { .. }));
    }

    struct SlowProvider;

    #[async_trait]
    impl LlmProvider for SlowProvider {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(MockLlmProvider::text_response("{}"))
        }
        fn model_name(&self) -> &str {
            "slow"
        }
        fn context_window(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn test_timeout_is_model_unavailable() {
        let r = Reasoner::new(Arc::new(SlowProvider)).with_timeout(Duration::from_millis(20));
        let err = r.evaluate_sufficiency("q", &[]).await.unwrap_err();
        assert!(matches!(err, ReasonerError::ModelUnavailable { .. }));
    }

    #[test]
    fn test_confidence_label_thresholds() {
        assert_eq!(ConfidenceLabel::from_score(0.83), ConfidenceLabel::High);
        assert_eq!(ConfidenceLabel::from_score(0.75), ConfidenceLabel::High);
        assert_eq!(ConfidenceLabel::from_score(0.4), ConfidenceLabel::Medium);
        assert_eq!(ConfidenceLabel::from_score(0.39), ConfidenceLabel::Low);
        for label in [ConfidenceLabel::Low, ConfidenceLabel::Medium, ConfidenceLabel::High] {
            assert_eq!(ConfidenceLabel::from_score(label.representative_score()), label);
        }
    }
}
