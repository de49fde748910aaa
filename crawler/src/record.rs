//! Core message types that flow through the pipeline (`spec.md` §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The unit of flow through the pipeline.
///
/// Invariant: `domain` is non-empty and equal to the authority component of
/// `url`. Producers (the seeder, the filter) are responsible for upholding
/// this; consumers may assume it.
///
/// `method`/`headers`/`body` are the fetcher's per-message request overrides
/// (`spec.md` §2: "Fetcher consumes `{url, domain, method?, headers?,
/// body?}`"); absent, the fetcher defaults to a bare `GET`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub url: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub r#override: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recrawl: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub user_inputted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl UrlRecord {
    pub fn new(url: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            domain: domain.into(),
            r#override: false,
            recrawl: false,
            user_inputted: false,
            method: None,
            headers: None,
            body: None,
        }
    }
}

/// A `UrlRecord` extended with the outcome of one fetch attempt.
///
/// `path` is set iff the fetcher chose a destination; the file at `path`
/// exists once the message is emitted (the fetcher always writes the staging
/// file, even on failure, for forensic value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    #[serde(flatten)]
    pub record: UrlRecord,
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<i32>,
}

/// A `FetchResult` augmented with the links discovered in its body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedResult {
    #[serde(flatten)]
    pub fetch: FetchResult,
    pub urls: Vec<UrlRecord>,
}

/// A `UrlRecord` annotated by the composite filter with a fetch priority.
///
/// Lower numbers are scheduled first (`spec.md` §4.5's priority table: 1
/// through 5, first match wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrioritizedUrl {
    #[serde(flatten)]
    pub record: UrlRecord,
    pub fetch_priority: u8,
}

/// One edge observed by the analyzer, persisted append-only by the logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub observed: i64,
}
