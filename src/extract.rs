//! SQL extraction from free-form model output
//!
//! Extraction is pattern matching, not parsing. The first rule that matches
//! wins:
//!
//! 1. the body of a fenced code block whose tag is exactly `sql` (any case),
//!    trimmed
//! 2. the longest `SELECT ... ;` span, trimmed
//!
//! A response with neither yields `None`, which is a normal outcome for
//! schema questions answered in prose.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Which rule produced the statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    FencedBlock,
    SelectSpan,
}

/// A single SQL statement lifted out of model output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedQuery {
    pub sql: String,
    pub source: ExtractionSource,
}

impl ExtractedQuery {
    pub fn as_str(&self) -> &str {
        &self.sql
    }
}

impl fmt::Display for ExtractedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

fn fenced_sql_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```[ \t]*sql[ \t]*\r?\n(.*?)```").expect("fenced sql pattern is valid")
    })
}

fn select_span_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\bSELECT\b.*;").expect("select span pattern is valid")
    })
}

/// Extract one SQL statement from `text`
///
/// # Examples
///
/// ```
/// use spatialmind::extract::extract_sql;
///
/// let answer = "Here you go:\n```sql\nSELECT name FROM cities;\n```\nDone.";
/// assert_eq!(extract_sql(answer).unwrap().sql, "SELECT name FROM cities;");
/// assert!(extract_sql("The cities table has a name column.").is_none());
/// ```
pub fn extract_sql(text: &str) -> Option<ExtractedQuery> {
    if let Some(sql) = fenced_sql_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|body| !body.is_empty())
    {
        return Some(ExtractedQuery {
            sql: sql.to_string(),
            source: ExtractionSource::FencedBlock,
        });
    }

    select_span_regex().find(text).map(|m| ExtractedQuery {
        sql: m.as_str().trim().to_string(),
        source: ExtractionSource::SelectSpan,
    })
}
