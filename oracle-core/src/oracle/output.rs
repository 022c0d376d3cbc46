//! Rendering an `OracleReport` as plain text or JSON.

use super::run::OracleReport;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Write;

const PREVIEW_CHARS: usize = 160;

/// How the final answer is printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "plain" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{other}' (expected text or json)")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render `report` in `format`. `verbose` adds the iteration trace.
pub fn render(report: &OracleReport, format: OutputFormat, verbose: bool) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(report, verbose)),
        OutputFormat::Json => render_json(report, verbose),
    }
}

/// The answer object, plus `trace` and `usage` when verbose and `error` when the run failed.
pub fn render_json(report: &OracleReport, verbose: bool) -> Result<String> {
    let answer = &report.answer;
    let mut value = json!({
        "answer_text": answer.answer_text,
        "cited_source_ids": answer.cited_source_ids,
        "confidence_label": answer.confidence_label,
        "followup_suggestions": answer.followup_suggestions,
        "state": report.state,
        "stop_reason": report.stop_reason,
    });
    if let Some(failure) = &report.failure {
        value["error"] = json!(failure.to_string());
    }
    if verbose {
        value["run_id"] = json!(report.run_id);
        value["trace"] = serde_json::to_value(&report.trace)?;
        value["usage"] = serde_json::to_value(report.usage)?;
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

pub fn render_text(report: &OracleReport, verbose: bool) -> String {
    let answer = &report.answer;
    let mut out = String::new();

    out.push_str(answer.answer_text.trim());
    out.push_str("\n\n");

    if !answer.cited_source_ids.is_empty() {
        out.push_str("Sources:\n");
        for (n, source_id) in answer.cited_source_ids.iter().enumerate() {
            let _ = write!(out, "  [{}] {source_id}", n + 1);
            if let Some(item) = report.best_snippet(source_id) {
                let _ = write!(out, "\n      {}", preview(&item.snippet));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    let _ = writeln!(out, "Confidence: {}", answer.confidence_label);

    if !answer.followup_suggestions.is_empty() {
        out.push_str("\nYou might also ask:\n");
        for suggestion in &answer.followup_suggestions {
            let _ = writeln!(out, "  - {suggestion}");
        }
    }

    if let Some(failure) = &report.failure {
        let _ = writeln!(out, "\nError: {failure}");
    }

    if verbose {
        out.push_str(&render_trace(report));
    }

    out
}

fn render_trace(report: &OracleReport) -> String {
    let mut out = String::from("\nTrace:\n");
    for record in &report.trace {
        let _ = writeln!(
            out,
            "  Iteration {}: {} quer{}, +{} evidence (pool {}){}",
            record.iteration,
            record.queries.len(),
            if record.queries.len() == 1 { "y" } else { "ies" },
            record.added,
            record.pool_size,
            match record.search_failures {
                0 => String::new(),
                n => format!(", {n} failed"),
            }
        );
        for query in &record.queries {
            let _ = writeln!(out, "    > {}", query.text);
        }
        if let Some(verdict) = record.verdict {
            let _ = write!(out, "    verdict: {verdict}");
            if let Some(confidence) = record.confidence {
                let _ = write!(out, " (confidence {confidence:.2})");
            }
            out.push('\n');
        }
        if !record.rationale.is_empty() {
            let _ = writeln!(out, "    rationale: {}", record.rationale);
        }
        for gap in &record.gaps {
            let _ = writeln!(out, "    gap: {gap}");
        }
        for note in &record.notes {
            let _ = writeln!(out, "    note: {note}");
        }
    }
    match report.stop_reason {
        Some(reason) => {
            let _ = writeln!(out, "  Stopped: {reason}");
        }
        None => out.push_str("  Stopped: -\n"),
    }
    if !report.dropped_citations.is_empty() {
        let _ = writeln!(
            out,
            "  Dropped citations: {}",
            report.dropped_citations.join(", ")
        );
    }
    let _ = writeln!(
        out,
        "  Tokens: {} ({} in, {} out)",
        report.usage.total(),
        report.usage.input_tokens,
        report.usage.output_tokens
    );
    let _ = writeln!(
        out,
        "  State: {} in {}ms",
        report.state,
        report.duration_ms()
    );
    out
}

fn preview(snippet: &str) -> String {
    let flat = snippet.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{EvidenceItem, Query};
    use crate::oracle::run::{Answer, IterationRecord, RunState, StopReason};
    use crate::reasoner::{ConfidenceLabel, Verdict};
    use crate::types::TokenUsage;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn report() -> OracleReport {
        let mut record = IterationRecord::new(0, vec![Query::initial("AtomRuntime")]);
        record.added = 1;
        record.pool_size = 1;
        record.verdict = Some(Verdict::Stop);
        record.confidence = Some(0.83);
        record.rationale = "defined in docs".into();

        OracleReport {
            run_id: Uuid::nil(),
            question: "What is AtomRuntime?".into(),
            state: RunState::Done,
            stop_reason: Some(StopReason::Verdict),
            failure: None,
            answer: Answer {
                answer_text: "AtomRuntime is the actor scheduler.".into(),
                cited_source_ids: vec!["docs/atom.md".into()],
                confidence_label: ConfidenceLabel::High,
                followup_suggestions: vec!["Who maintains it?".into()],
            },
            evidence: vec![EvidenceItem::new(
                "docs/atom.md",
                "AtomRuntime   is the\nactor scheduler",
                0.9,
                "AtomRuntime",
                0,
            )],
            trace: vec![record],
            dropped_citations: vec!["made/up.md".into()],
            usage: TokenUsage {
                input_tokens: 300,
                output_tokens: 120,
            },
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_json_shape() {
        let out = render(&report(), OutputFormat::Json, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(
            value,
            json!({
                "answer_text": "AtomRuntime is the actor scheduler.",
                "cited_source_ids": ["docs/atom.md"],
                "confidence_label": "high",
                "followup_suggestions": ["Who maintains it?"],
                "state": "done",
                "stop_reason": "verdict"
            })
        );
    }

    #[test]
    fn test_json_verbose_includes_trace() {
        let out = render(&report(), OutputFormat::Json, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        let trace = value["trace"].as_array().unwrap();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0]["verdict"], "stop");
        assert_eq!(trace[0]["queries"][0]["text"], "AtomRuntime");
        assert_eq!(value["usage"]["input_tokens"], 300);
    }

    #[test]
    fn test_text_output() {
        let out = render(&report(), OutputFormat::Text, false).unwrap();
        assert!(
            out.starts_with("AtomRuntime is the actor scheduler.\n\nSources:\n  [1] docs/atom.md")
        );
        assert!(out.contains("AtomRuntime is the actor scheduler\n"));
        assert!(out.contains("Confidence: high"));
        assert!(out.contains("  - Who maintains it?"));
        assert!(!out.contains("Trace:"));
    }

    #[test]
    fn test_text_verbose_trace() {
        let out = render_text(&report(), true);
        assert!(out.contains("Iteration 0: 1 query, +1 evidence (pool 1)"));
        assert!(out.contains("verdict: stop (confidence 0.83)"));
        assert!(out.contains("Stopped: reasoner verdict"));
        assert!(out.contains("Dropped citations: made/up.md"));
        assert!(out.contains("Tokens: 420 (300 in, 120 out)"));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_preview_truncates() {
        let long = "word ".repeat(100);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
    }
}
