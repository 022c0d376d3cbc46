//! Field-by-field parsing of model replies.
//!
//! Model output is loosely typed. Each helper looks for a field under a few
//! accepted names and coerces whatever shape it finds, returning `None` (or an
//! empty list) instead of failing so the caller can choose a fallback.

use super::{ConfidenceLabel, Verdict};
use serde_json::Value;

/// First string value found under any of `keys`, trimmed and non-empty.
pub(crate) fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
}

/// Query texts under any of `keys`, deduplicated case-insensitively and capped at `max`.
///
/// Accepts plain strings, objects with a `text`/`query` member, or a single
/// string in place of a list.
pub(crate) fn query_list(value: &Value, keys: &[&str], max: usize) -> Vec<String> {
    let Some(raw) = keys.iter().find_map(|k| value.get(*k)) else {
        return Vec::new();
    };

    let candidates: Vec<&Value> = match raw {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for item in candidates {
        let text = match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(_) => ["text", "query", "q"]
                .iter()
                .find_map(|k| item.get(*k).and_then(Value::as_str)),
            _ => None,
        };
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            continue;
        };
        let key = normalize(text);
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(text.to_string());
        if out.len() >= max {
            break;
        }
    }
    out
}

/// Plain strings under any of `keys`, keeping order.
pub(crate) fn string_list(value: &Value, keys: &[&str]) -> Vec<String> {
    match keys.iter().find_map(|k| value.get(*k)) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Cited source ids, deduplicated in the order the model listed them.
pub(crate) fn source_ids(value: &Value) -> Vec<String> {
    let Some(Value::Array(items)) = ["cited_source_ids", "citations", "sources"]
        .iter()
        .find_map(|k| value.get(*k))
    else {
        return Vec::new();
    };

    let mut out: Vec<String> = Vec::new();
    for item in items {
        let id = match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(_) => ["source_id", "id", "source"]
                .iter()
                .find_map(|k| item.get(*k).and_then(Value::as_str)),
            _ => None,
        };
        if let Some(id) = id.map(str::trim).filter(|s| !s.is_empty())
            && !out.iter().any(|existing| existing == id)
        {
            out.push(id.to_string());
        }
    }
    out
}

/// Sufficiency verdict from `verdict`/`decision` strings or a `sufficient` flag.
pub(crate) fn verdict(value: &Value) -> Option<Verdict> {
    for key in ["verdict", "decision", "sufficient"] {
        match value.get(key) {
            Some(Value::Bool(true)) => return Some(Verdict::Stop),
            Some(Value::Bool(false)) => return Some(Verdict::Continue),
            Some(Value::String(s)) => {
                match s.trim().to_lowercase().as_str() {
                    "stop" | "sufficient" | "enough" | "done" | "answer" | "yes" | "true" => {
                        return Some(Verdict::Stop);
                    }
                    "continue" | "insufficient" | "more" | "search" | "no" | "false" => {
                        return Some(Verdict::Continue);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
    None
}

/// Confidence scalar clamped into [0, 1].
///
/// Strings ending in `%` are percentages. Bare numbers from 2 up to 100 are
/// read as percentages too; anything else outside [0, 1] is clamped. Strings
/// may also hold one of the confidence labels.
pub(crate) fn confidence(value: &Value) -> Option<f64> {
    let raw = value.get("confidence")?;
    let (number, percent) = match raw {
        Value::Number(n) => (n.as_f64()?, false),
        Value::String(s) => {
            let s = s.trim();
            let (digits, percent) = match s.strip_suffix('%') {
                Some(rest) => (rest.trim(), true),
                None => (s, false),
            };
            match digits.parse::<f64>() {
                Ok(n) => (n, percent),
                Err(_) => return label_from_str(s).map(ConfidenceLabel::representative_score),
            }
        }
        _ => return None,
    };
    if number.is_nan() {
        return None;
    }
    let scaled = if percent || (2.0..=100.0).contains(&number) {
        number / 100.0
    } else {
        number
    };
    Some(scaled.clamp(0.0, 1.0))
}

/// Confidence label from a `confidence_label` (or `confidence`) field.
pub(crate) fn confidence_label(value: &Value) -> Option<ConfidenceLabel> {
    match value.get("confidence_label") {
        Some(Value::String(s)) => label_from_str(s),
        Some(Value::Number(n)) => n.as_f64().map(ConfidenceLabel::from_score),
        _ => match value.get("confidence") {
            Some(Value::String(s)) => label_from_str(s),
            _ => None,
        },
    }
}

fn label_from_str(s: &str) -> Option<ConfidenceLabel> {
    match s.trim().to_lowercase().as_str() {
        "high" => Some(ConfidenceLabel::High),
        "medium" | "moderate" | "med" => Some(ConfidenceLabel::Medium),
        "low" => Some(ConfidenceLabel::Low),
        _ => None,
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
