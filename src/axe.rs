use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::violations::types::{embedded_json_values, NodeResult, Violation};

#[derive(Debug, Error)]
pub enum RuleScanError {
    #[error("axe scan of {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("axe command `{program}` not found; install Node.js and @axe-core/cli")]
    ToolNotFound { program: String },

    #[error("axe exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("could not parse axe output: {0}")]
    Parse(String),

    #[error("axe I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuleScanError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RuleScanError::Timeout { .. } | RuleScanError::Failed { .. })
    }
}

/// Deterministic rule engine.
#[async_trait]
pub trait RuleScanner: Send + Sync {
    async fn scan(&self, url: &str) -> Result<Vec<Violation>, RuleScanError>;
}

/// Runs the axe-core CLI and reads its JSON report from stdout.
pub struct AxeCliScanner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl AxeCliScanner {
    /// `command` is split on whitespace, e.g. `npx @axe-core/cli`.
    pub fn new(command: &str, timeout: Duration) -> Self {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next().unwrap_or_else(|| "npx".to_string());
        Self {
            program,
            args: parts.collect(),
            timeout,
        }
    }
}

#[async_trait]
impl RuleScanner for AxeCliScanner {
    async fn scan(&self, url: &str) -> Result<Vec<Violation>, RuleScanError> {
        info!(url, command = %self.program, "running axe scan");
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .arg("--stdout")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RuleScanError::ToolNotFound {
                    program: self.program.clone(),
                },
                _ => RuleScanError::Io(e),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RuleScanError::Timeout {
                url: url.to_string(),
                secs: self.timeout.as_secs(),
            })??;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(url, stderr = %stderr.trim(), "axe stderr");
        }
        if !output.status.success() {
            return Err(RuleScanError::Failed {
                status: output.status.to_string(),
                stderr: stderr.chars().take(500).collect(),
            });
        }

        let violations = parse_axe_report(&String::from_utf8_lossy(&output.stdout))?;
        info!(url, violations = violations.len(), "axe scan complete");
        Ok(violations)
    }
}

/// Accepts the CLI's array of result objects or a single result object.
pub fn parse_axe_report(stdout: &str) -> Result<Vec<Violation>, RuleScanError> {
    // The CLI may print banner lines before the JSON and status lines after it.
    let json = embedded_json_values(stdout)
        .find(is_axe_report)
        .ok_or_else(|| RuleScanError::Parse("no axe results in output".into()))?;

    let results: Vec<&Value> = match &json {
        Value::Array(items) => items.iter().collect(),
        obj => vec![obj],
    };

    let mut violations = Vec::new();
    for result in results {
        let Some(list) = result["violations"].as_array() else {
            warn!("axe result without a violations list");
            continue;
        };
        violations.extend(list.iter().filter_map(violation_from_axe));
    }
    Ok(violations)
}

fn is_axe_report(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| item.get("violations").is_some()),
        Value::Object(obj) => obj.contains_key("violations"),
        _ => false,
    }
}

fn violation_from_axe(v: &Value) -> Option<Violation> {
    let id = v["id"].as_str()?.to_string();
    let description = v["description"]
        .as_str()
        .or_else(|| v["help"].as_str())
        .unwrap_or_default()
        .to_string();
    let nodes = v["nodes"]
        .as_array()
        .map(|nodes| nodes.iter().filter_map(node_from_axe).collect())
        .unwrap_or_default();
    Some(Violation {
        id,
        description,
        impact: v["impact"].as_str().map(str::to_string),
        nodes,
    })
}

fn node_from_axe(node: &Value) -> Option<NodeResult> {
    let target: Vec<String> = node["target"]
        .as_array()?
        .iter()
        .filter_map(|t| match t {
            Value::String(s) => Some(s.clone()),
            // Frame and shadow-DOM paths: the innermost selector is the element.
            Value::Array(path) => path.last().and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect();
    if target.is_empty() {
        return None;
    }
    Some(NodeResult::new(
        node["html"].as_str().unwrap_or_default(),
        target,
        node["failureSummary"].as_str().map(str::to_string),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_cli_array_output() {
        let stdout = r#"
Running axe-core 4.9.1 in chrome-headless
[{"url":"https://a.com","violations":[
  {"id":"image-alt","impact":"critical","description":"Images must have alternate text","help":"x",
   "nodes":[{"html":"<img src=\"a.png\">","target":["img"],"failureSummary":"Fix any of the following"}]},
  {"id":"region","impact":"moderate","description":"Content in landmarks",
   "nodes":[{"html":"<div>","target":[["iframe#f", "div.inner"]]}]}
]}]"#;
        let violations = parse_axe_report(stdout).unwrap();
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].id, "image-alt");
        assert_eq!(violations[0].impact.as_deref(), Some("critical"));
        assert_eq!(
            violations[0].nodes[0].failure_summary.as_deref(),
            Some("Fix any of the following")
        );
        assert_eq!(violations[1].nodes[0].target, vec!["div.inner".to_string()]);
    }

    #[test]
    fn test_parses_single_result_object() {
        let violations =
            parse_axe_report(r#"{"violations":[{"id":"label","description":"d","nodes":[]}]}"#)
                .unwrap();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].impact.is_none());
    }

    #[test]
    fn test_skips_bracketed_log_lines_and_trailing_status() {
        let stdout = "[info] Testing https://a.com\n\
            [{\"url\":\"https://a.com\",\"violations\":[{\"id\":\"label\",\"description\":\"d\",\"nodes\":[]}]}]\n\
            Saved 1 result";
        let violations = parse_axe_report(stdout).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].id, "label");
    }

    #[test]
    fn test_rejects_output_without_json() {
        assert!(matches!(
            parse_axe_report("Error: chromedriver not found"),
            Err(RuleScanError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let scanner = AxeCliScanner::new("definitely-not-an-axe-binary-7f3a", Duration::from_secs(5));
        let err = scanner.scan("https://a.com").await.unwrap_err();
        assert!(matches!(err, RuleScanError::ToolNotFound { .. }));
        assert!(!err.is_retryable());
    }
}
