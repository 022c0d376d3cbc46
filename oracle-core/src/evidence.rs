//! Queries, evidence items and the per-run evidence pool.
//!
//! The pool accumulates passages across loop iterations. It only ever grows:
//! an item whose `(source_id, snippet)` pair is already present refreshes the
//! stored score to the maximum seen and keeps its original arrival position.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a query came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrigin {
    /// Seeded during planning.
    Initial,
    /// Produced by follow-up planning after an evaluation.
    FollowUp,
}

/// A search query issued by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<QueryOrigin>,
    /// Iteration that produced this query.
    pub iteration: usize,
}

impl Query {
    pub fn new(text: impl Into<String>, origin: Option<QueryOrigin>, iteration: usize) -> Self {
        Self {
            text: text.into(),
            origin,
            iteration,
        }
    }

    /// A query seeded during planning.
    pub fn initial(text: impl Into<String>) -> Self {
        Self::new(text, Some(QueryOrigin::Initial), 0)
    }

    /// A follow-up query produced while evaluating `iteration`.
    pub fn follow_up(text: impl Into<String>, iteration: usize) -> Self {
        Self::new(text, Some(QueryOrigin::FollowUp), iteration)
    }

    /// Case- and whitespace-insensitive key used to spot repeated queries.
    pub fn normalized(&self) -> String {
        self.text
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A retrieved passage with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// File path or conversation id.
    pub source_id: String,
    pub snippet: String,
    /// Backend relevance in [0, 1].
    pub score: f64,
    /// Text of the query that retrieved this passage.
    pub query: String,
    /// Iteration in which the passage was retrieved.
    pub iteration: usize,
}

impl EvidenceItem {
    /// Build an item, clamping the score into [0, 1] (NaN becomes 0).
    pub fn new(
        source_id: impl Into<String>,
        snippet: impl Into<String>,
        score: f64,
        query: impl Into<String>,
        iteration: usize,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            snippet: snippet.into(),
            score: clamp_score(score),
            query: query.into(),
            iteration,
        }
    }

    fn identity(&self) -> (String, String) {
        (self.source_id.clone(), self.snippet.clone())
    }
}

/// Clamp a backend score into [0, 1].
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Arrival-ordered, deduplicated evidence for one run.
#[derive(Debug, Clone, Default)]
pub struct EvidencePool {
    items: Vec<EvidenceItem>,
    positions: HashMap<(String, String), usize>,
}

impl EvidencePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of items. Returns how many were new.
    pub fn add<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = EvidenceItem>,
    {
        let mut added = 0;
        for item in items {
            let key = item.identity();
            match self.positions.get(&key) {
                Some(&pos) => {
                    let existing = &mut self.items[pos];
                    existing.score = existing.score.max(item.score);
                }
                None => {
                    self.positions.insert(key, self.items.len());
                    self.items.push(item);
                    added += 1;
                }
            }
        }
        added
    }

    /// Copy of every item in arrival order.
    pub fn snapshot(&self) -> Vec<EvidenceItem> {
        self.items.clone()
    }

    /// Borrow the items in arrival order.
    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether any item came from `source_id`.
    pub fn contains_source(&self, source_id: &str) -> bool {
        self.items.iter().any(|i| i.source_id == source_id)
    }

    /// Distinct source ids in order of first arrival.
    pub fn source_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.items
            .iter()
            .filter(|i| seen.insert(i.source_id.as_str()))
            .map(|i| i.source_id.clone())
            .collect()
    }

    /// Mean backend score, or `None` for an empty pool.
    pub fn mean_score(&self) -> Option<f64> {
        if self.items.is_empty() {
            return None;
        }
        let sum: f64 = self.items.iter().map(|i| i.score).sum();
        Some(sum / self.items.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn item(source: &str, snippet: &str, score: f64) -> EvidenceItem {
        EvidenceItem::new(source, snippet, score, "q", 0)
    }

    #[test]
    fn test_add_counts_only_new_items() {
        let mut pool = EvidencePool::new();
        let added = pool.add(vec![item("a.md", "alpha", 0.5), item("b.md", "beta", 0.4)]);
        assert_eq!(added, 2);

        let added = pool.add(vec![item("a.md", "alpha", 0.3), item("c.md", "gamma", 0.9)]);
        assert_eq!(added, 1);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_duplicate_keeps_position_and_max_score() {
        let mut pool = EvidencePool::new();
        pool.add(vec![item("a.md", "alpha", 0.2), item("b.md", "beta", 0.4)]);
        pool.add(vec![item("a.md", "alpha", 0.8)]);

        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].source_id, "a.md");
        assert!((snapshot[0].score - 0.8).abs() < f64::EPSILON);

        pool.add(vec![item("a.md", "alpha", 0.1)]);
        assert!((pool.items()[0].score - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_same_source_different_snippet_is_distinct() {
        let mut pool = EvidencePool::new();
        pool.add(vec![item("a.md", "alpha", 0.2), item("a.md", "alpha two", 0.2)]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.source_ids(), vec!["a.md".to_string()]);
    }

    #[test]
    fn test_duplicates_within_one_batch() {
        let mut pool = EvidencePool::new();
        let added = pool.add(vec![item("a.md", "alpha", 0.2), item("a.md", "alpha", 0.6)]);
        assert_eq!(added, 1);
        assert!((pool.items()[0].score - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_clamped() {
        assert_eq!(item("a", "x", 4.2).score, 1.0);
        assert_eq!(item("a", "x", -1.0).score, 0.0);
        assert_eq!(item("a", "x", f64::NAN).score, 0.0);
    }

    #[test]
    fn test_mean_score_and_contains() {
        let mut pool = EvidencePool::new();
        assert!(pool.mean_score().is_none());
        pool.add(vec![item("a.md", "alpha", 0.2), item("b.md", "beta", 0.6)]);
        assert!((pool.mean_score().unwrap() - 0.4).abs() < 1e-9);
        assert!(pool.contains_source("b.md"));
        assert!(!pool.contains_source("z.md"));
    }

    #[test]
    fn test_query_normalized() {
        let q = Query::follow_up("  Where   is AtomRuntime  DEFINED ", 1);
        assert_eq!(q.normalized(), "where is atomruntime defined");
        assert_eq!(q.origin, Some(QueryOrigin::FollowUp));
        assert_eq!(q.iteration, 1);
        assert_eq!(Query::initial("x").iteration, 0);
    }
}
