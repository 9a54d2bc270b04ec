use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auditor::registry::Provider;
use crate::auditor::AuditorError;

/// Token counts reported by a vendor for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Raw result of a chat completion: content may be missing, usage is optional.
#[derive(Debug, Clone, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct ChatClient {
    client: reqwest::Client,
    provider: Provider,
    base_url: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(client: reqwest::Client, provider: Provider, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            provider,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// Non-streaming chat completion.
    pub async fn complete(&self, body: &serde_json::Value) -> Result<ChatCompletion, AuditorError> {
        let req = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body);
        let json = send_json(self.provider, req).await?;

        // choices[0].message.content may be null
        let content = json["choices"]
            .get(0)
            .and_then(|c| c["message"]["content"].as_str())
            .map(|s| s.to_string());

        let usage = json.get("usage").and_then(|u| {
            Some(TokenUsage {
                input_tokens: u["prompt_tokens"].as_u64()?,
                output_tokens: u["completion_tokens"].as_u64()?,
            })
        });

        Ok(ChatCompletion { content, usage })
    }
}

/// Send a request and decode a JSON body, mapping every failure onto `AuditorError`.
pub async fn send_json(
    provider: Provider,
    req: reqwest::RequestBuilder,
) -> Result<serde_json::Value, AuditorError> {
    let resp = req
        .send()
        .await
        .map_err(|source| AuditorError::Transport { provider, source })?;
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|source| AuditorError::Transport { provider, source })?;
    debug!(%provider, status = status.as_u16(), body_len = text.len(), "vendor response received");

    if !status.is_success() {
        return Err(AuditorError::Api {
            provider,
            status: status.as_u16(),
            body: text.chars().take(500).collect(),
        });
    }

    serde_json::from_str(&text).map_err(|e| AuditorError::ResponseParse {
        provider,
        reason: format!("response body is not JSON: {}", e),
    })
}
