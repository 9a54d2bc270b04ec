use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Outer-HTML snippets are cut to this many characters.
pub const MAX_HTML_SNIPPET: usize = 300;

/// One concrete DOM location implicated by a violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
    pub html: String,
    /// CSS selectors, in the order the source reported them.
    pub target: Vec<String>,
    #[serde(rename = "failureSummary", default)]
    pub failure_summary: Option<String>,
}

impl NodeResult {
    pub fn new(html: &str, target: Vec<String>, failure_summary: Option<String>) -> Self {
        Self {
            html: truncate_html(html),
            target,
            failure_summary,
        }
    }
}

/// One rule failure. `id` is opaque and may recur across sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub impact: Option<String>,
    /// Order is load-bearing for report numbering.
    #[serde(default)]
    pub nodes: Vec<NodeResult>,
}

impl Violation {
    /// Impact tag, `"unknown"` when the source gave none.
    pub fn impact_or_unknown(&self) -> &str {
        self.impact.as_deref().unwrap_or("unknown")
    }
}

/// Shape every auditor must answer with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WcagCheckResponse {
    pub violations: Vec<Violation>,
}

/// Persisted entry for one canonical URL. Latest scan wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub violations: Vec<Violation>,
}

impl CacheRecord {
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.timestamp) > max_age
    }
}

/// Answer to a cache query: a hit, or an error payload when nothing is stored.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CacheLookup {
    Hit {
        url: String,
        violations: Vec<Violation>,
        cached: bool,
        timestamp: DateTime<Utc>,
    },
    Miss {
        error: String,
    },
}

/// Cut an outer-HTML snippet on a char boundary.
pub fn truncate_html(html: &str) -> String {
    html.chars().take(MAX_HTML_SNIPPET).collect()
}

/// Every JSON object or array embedded in `text`, tried at each opening
/// bracket in order. Prose before a document and trailing text after it are
/// skipped.
pub fn embedded_json_values(text: &str) -> impl Iterator<Item = serde_json::Value> + '_ {
    text.match_indices(['{', '['])
        .filter_map(move |(start, _)| {
            serde_json::Deserializer::from_str(&text[start..])
                .into_iter::<serde_json::Value>()
                .next()
                .and_then(Result::ok)
        })
}

// Older cache files carry naive local timestamps (`2024-05-01T12:00:00.123456`).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
