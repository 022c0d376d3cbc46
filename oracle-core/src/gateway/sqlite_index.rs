//! Direct low-level index backend: raw FTS5 queries against SQLite.
//!
//! Last resort in the chain: no query expansion, no re-ranking. The question
//! is reduced to quoted terms joined with `OR`, so FTS5 syntax characters in
//! natural language never reach the parser.

use super::{RawHit, SearchBackend};
use crate::error::SearchError;
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, params};
use std::path::PathBuf;

const BACKEND_NAME: &str = "sqlite";

/// Read-only FTS5 reader.
#[derive(Debug, Clone)]
pub struct SqliteIndexBackend {
    path: PathBuf,
    table: String,
}

impl SqliteIndexBackend {
    pub fn new(path: PathBuf, table: &str) -> Self {
        Self {
            path,
            table: table.to_string(),
        }
    }

    fn search_blocking(&self, query: &str, top_k: usize) -> Result<Vec<RawHit>, SearchError> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };

        if !self.path.exists() {
            return Err(SearchError::InvalidIndex {
                path: self.path.display().to_string(),
                message: "database file does not exist".into(),
            });
        }

        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| backend_error(format!("Failed to open database: {e}")))?;

        // Table names cannot be bound; only identifier characters are accepted.
        if !self
            .table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(backend_error(format!("Invalid table name '{}'", self.table)));
        }

        let sql = format!(
            "SELECT source_id, content, bm25({table}) AS score
             FROM {table}
             WHERE {table} MATCH ?1
             ORDER BY score
             LIMIT ?2",
            table = self.table
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| backend_error(format!("SQL prepare error: {e}")))?;

        let rows = stmt
            .query_map(params![match_expr, top_k as i64], |row| {
                let source_id: String = row.get(0)?;
                let content: String = row.get(1)?;
                let rank: f64 = row.get(2)?;
                Ok(RawHit::new(source_id, content, saturate_rank(rank)))
            })
            .map_err(|e| backend_error(format!("SQL query error: {e}")))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| backend_error(format!("Row error: {e}")))
    }
}

fn backend_error(message: String) -> SearchError {
    SearchError::Backend {
        backend: BACKEND_NAME.to_string(),
        message,
    }
}

/// Build an FTS5 MATCH expression from free text, or `None` if no terms remain.
pub(crate) fn fts_match_expression(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// bm25() is negative with better matches further below zero.
fn saturate_rank(rank: f64) -> f64 {
    let s = (-rank).max(0.0);
    s / (s + 1.0)
}

#[async_trait]
impl SearchBackend for SqliteIndexBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RawHit>, SearchError> {
        let this = self.clone();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || this.search_blocking(&query, top_k))
            .await
            .map_err(|e| backend_error(format!("Search task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_db(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE VIRTUAL TABLE chunks USING fts5(source_id UNINDEXED, content);
             INSERT INTO chunks VALUES ('chat/7', 'We agreed AtomRuntime replaces the old job runner');
             INSERT INTO chunks VALUES ('notes/garden.md', 'Plant the tomatoes after the last frost');
             INSERT INTO chunks VALUES ('notes/bikes.md', 'Chain needs oil every few hundred kilometres');",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_fts_search() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        build_db(&db);

        let backend = SqliteIndexBackend::new(db, "chunks");
        let hits = backend.search("What is AtomRuntime?", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_id, "chat/7");
        assert!(hits[0].score > 0.0 && hits[0].score < 1.0);
    }

    #[tokio::test]
    async fn test_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteIndexBackend::new(dir.path().join("missing.db"), "chunks");
        let err = backend.search("anything", 5).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidIndex { .. }));
    }

    #[tokio::test]
    async fn test_rejects_odd_table_name() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("index.db");
        build_db(&db);
        let backend = SqliteIndexBackend::new(db, "chunks; DROP TABLE chunks");
        assert!(backend.search("atomruntime", 5).await.is_err());
    }

    #[test]
    fn test_match_expression() {
        assert_eq!(
            fts_match_expression("What is \"AtomRuntime\"? is it*").as_deref(),
            Some("\"what\" OR \"is\" OR \"atomruntime\" OR \"it\"")
        );
        assert!(fts_match_expression("?!").is_none());
    }

    #[test]
    fn test_saturate_rank() {
        assert_eq!(saturate_rank(0.5), 0.0);
        assert!((saturate_rank(-1.0) - 0.5).abs() < 1e-9);
    }
}
