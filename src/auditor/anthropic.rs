use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::registry::{ModelPricingInfo, Provider};
use super::{log_usage, parse_violations, prompts, screenshot_base64, Auditor, AuditorError};
use crate::browser::PageElement;
use crate::llm::{send_json, TokenUsage};
use crate::violations::types::Violation;

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages-API auditor; the JSON document is read from the first text block.
pub struct AnthropicAuditor {
    http: reqwest::Client,
    api_key: String,
    info: ModelPricingInfo,
}

impl AnthropicAuditor {
    pub fn new(http: reqwest::Client, api_key: &str, info: ModelPricingInfo) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            info,
        }
    }

    fn build_request(
        &self,
        screenshot: &[u8],
        rule_reference: &str,
        elements: &[PageElement],
        system_instruction: Option<&str>,
    ) -> serde_json::Value {
        let system = format!(
            "{}\n\n{}",
            prompts::system_prompt(system_instruction, rule_reference),
            prompts::JSON_SHAPE_INSTRUCTION
        );
        json!({
            "model": self.info.model,
            "max_tokens": 4096,
            "temperature": 0.1,
            "system": system,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompts::elements_text(elements)},
                    {"type": "text", "text": prompts::SCREENSHOT_CAPTION},
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/png",
                            "data": screenshot_base64(screenshot),
                        },
                    },
                ],
            }],
        })
    }
}

fn first_text_block(json: &serde_json::Value) -> Option<&str> {
    json["content"]
        .as_array()?
        .iter()
        .find(|block| block["type"] == "text")
        .and_then(|block| block["text"].as_str())
}

fn usage(json: &serde_json::Value) -> Option<TokenUsage> {
    let u = json.get("usage")?;
    Some(TokenUsage {
        input_tokens: u["input_tokens"].as_u64()?,
        output_tokens: u["output_tokens"].as_u64()?,
    })
}

#[async_trait]
impl Auditor for AnthropicAuditor {
    async fn run_check(
        &self,
        screenshot: &[u8],
        rule_reference: &str,
        elements: &[PageElement],
        system_instruction: Option<&str>,
    ) -> Result<Vec<Violation>, AuditorError> {
        debug!(model = %self.info.model, elements = elements.len(), "sending Anthropic audit request");
        let body = self.build_request(screenshot, rule_reference, elements, system_instruction);
        let req = self
            .http
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let json = send_json(Provider::Anthropic, req).await?;
        log_usage(&self.info, usage(&json));
        parse_violations(Provider::Anthropic, first_text_block(&json))
    }

    fn model_name(&self) -> &str {
        &self.info.model
    }
}
