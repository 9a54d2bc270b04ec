pub mod anthropic;
pub mod deepseek;
pub mod openai;
pub mod prompts;
pub mod registry;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::PageElement;
use crate::llm::TokenUsage;
use crate::violations::types::{embedded_json_values, truncate_html, Violation, WcagCheckResponse};

use registry::{ModelPricingInfo, Provider};

/// Every way a vendor call can fail. Vendor client types never cross this boundary.
#[derive(Debug, Error)]
pub enum AuditorError {
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("empty response from {0}")]
    EmptyResponse(Provider),

    #[error("failed to parse {provider} response: {reason}")]
    ResponseParse { provider: Provider, reason: String },
}

impl AuditorError {
    /// Network failures, rate limits and server errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuditorError::Transport { .. } => true,
            AuditorError::Api { status, .. } => *status == 429 || *status >= 500,
            AuditorError::EmptyResponse(_) | AuditorError::ResponseParse { .. } => false,
        }
    }
}

/// An AI vision auditor: inspects a screenshot plus the page's element list and
/// reports violations in the shared schema.
#[async_trait]
pub trait Auditor: Send + Sync {
    async fn run_check(
        &self,
        screenshot: &[u8],
        rule_reference: &str,
        elements: &[PageElement],
        system_instruction: Option<&str>,
    ) -> Result<Vec<Violation>, AuditorError>;

    fn model_name(&self) -> &str;
}

/// PNG bytes as a data URL.
pub fn screenshot_data_url(screenshot: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(screenshot))
}

pub fn screenshot_base64(screenshot: &[u8]) -> String {
    STANDARD.encode(screenshot)
}

/// Parse model output into violations, normalizing what vendors get wrong:
/// code fences around the JSON, a bare array instead of `{"violations": [...]}`,
/// oversize HTML snippets, blank impact tags and nodes without selectors.
pub fn parse_violations(
    provider: Provider,
    content: Option<&str>,
) -> Result<Vec<Violation>, AuditorError> {
    let content = content
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(AuditorError::EmptyResponse(provider))?;

    let scope = fenced_json(content).unwrap_or(content);
    let violations = embedded_json_values(scope)
        .find_map(|value| match value {
            serde_json::Value::Array(_) => serde_json::from_value::<Vec<Violation>>(value).ok(),
            _ => serde_json::from_value::<WcagCheckResponse>(value)
                .ok()
                .map(|resp| resp.violations),
        })
        .ok_or_else(|| AuditorError::ResponseParse {
            provider,
            reason: match serde_json::from_str::<WcagCheckResponse>(scope) {
                Err(e) => e.to_string(),
                Ok(_) => "no violations document in reply".to_string(),
            },
        })?;

    Ok(violations.into_iter().map(normalize).collect())
}

fn normalize(mut v: Violation) -> Violation {
    v.impact = v
        .impact
        .map(|i| i.trim().to_lowercase())
        .filter(|i| !i.is_empty());
    let before = v.nodes.len();
    v.nodes.retain_mut(|node| {
        node.target.retain(|s| !s.trim().is_empty());
        node.html = truncate_html(&node.html);
        !node.target.is_empty()
    });
    if v.nodes.len() < before {
        debug!(rule = %v.id, dropped = before - v.nodes.len(), "dropped nodes without selectors");
    }
    v
}

/// Body of the first ```` ```json ```` fence, if the reply has one.
fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```json")?;
    let body = &text[start + 7..];
    body.find("```").map(|end| body[..end].trim())
}

/// Report token usage and cost for one call. Missing usage is only noted.
pub fn log_usage(info: &ModelPricingInfo, usage: Option<TokenUsage>) {
    match usage {
        Some(u) => {
            let cost = info.calculate_cost(u.input_tokens, u.output_tokens);
            info!(
                model = %info.model,
                input_tokens = u.input_tokens,
                output_tokens = u.output_tokens,
                cost_usd = cost,
                "auditor usage"
            );
        }
        None => warn!(model = %info.model, "vendor did not report token usage"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_object() {
        let content = r#"{"violations":[{"id":"1.1.1","description":"Missing alt","impact":"Critical",
            "nodes":[{"html":"<img src=a.png>","target":["img.logo"],"failureSummary":"No alt"}]}]}"#;
        let violations = parse_violations(Provider::OpenAi, Some(content)).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].impact.as_deref(), Some("critical"));
        assert_eq!(violations[0].nodes[0].target, vec!["img.logo"]);
    }

    #[test]
    fn test_parse_fenced_reply_and_bare_array() {
        let fenced = "Here you go:\n```json\n{\"violations\": []}\n```";
        assert!(parse_violations(Provider::Anthropic, Some(fenced)).unwrap().is_empty());

        let array = r#"[{"id":"1.4.3","description":"Low contrast","nodes":[]}]"#;
        let violations = parse_violations(Provider::DeepSeek, Some(array)).unwrap();
        assert_eq!(violations[0].id, "1.4.3");
    }

    #[test]
    fn test_parse_tolerates_prose_around_the_document() {
        let content = r#"I checked [the header] and the nav. {"violations":[{"id":"2.4.4",
            "description":"Vague link","nodes":[{"html":"<a>more</a>","target":["a.more"]}]}]}
            Trailing note: contrast looked fine."#;
        let violations = parse_violations(Provider::Anthropic, Some(content)).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].id, "2.4.4");
    }

    #[test]
    fn test_empty_content_is_empty_response() {
        assert!(matches!(
            parse_violations(Provider::OpenAi, None),
            Err(AuditorError::EmptyResponse(Provider::OpenAi))
        ));
        assert!(matches!(
            parse_violations(Provider::OpenAi, Some("   ")),
            Err(AuditorError::EmptyResponse(_))
        ));
    }

    #[test]
    fn test_unparseable_content_is_parse_error() {
        let err = parse_violations(Provider::DeepSeek, Some("I found no issues.")).unwrap_err();
        assert!(matches!(err, AuditorError::ResponseParse { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_nodes_without_selectors_are_dropped() {
        let content = r#"{"violations":[{"id":"x","description":"d","impact":" ",
            "nodes":[{"html":"<a>","target":[""]},{"html":"<b>","target":["b"]}]}]}"#;
        let violations = parse_violations(Provider::OpenAi, Some(content)).unwrap();
        assert_eq!(violations[0].nodes.len(), 1);
        assert_eq!(violations[0].impact, None);
    }

    #[test]
    fn test_screenshot_data_url() {
        assert_eq!(screenshot_data_url(b"png"), "data:image/png;base64,cG5n");
    }

    #[test]
    fn test_retryable_classification() {
        let rate = AuditorError::Api {
            provider: Provider::OpenAi,
            status: 429,
            body: String::new(),
        };
        let auth = AuditorError::Api {
            provider: Provider::OpenAi,
            status: 401,
            body: String::new(),
        };
        assert!(rate.is_retryable());
        assert!(!auth.is_retryable());
    }
}
