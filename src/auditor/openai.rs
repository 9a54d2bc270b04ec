use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::registry::{ModelPricingInfo, Provider};
use super::{log_usage, parse_violations, prompts, screenshot_data_url, Auditor, AuditorError};
use crate::browser::PageElement;
use crate::llm::ChatClient;
use crate::violations::types::Violation;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI vision auditor using schema-constrained structured output.
pub struct OpenAiAuditor {
    chat: ChatClient,
    info: ModelPricingInfo,
}

impl OpenAiAuditor {
    pub fn new(http: reqwest::Client, api_key: &str, info: ModelPricingInfo) -> Self {
        Self {
            chat: ChatClient::new(http, Provider::OpenAi, OPENAI_BASE_URL, api_key),
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
        json!({
            "model": self.info.model,
            "temperature": 0.1,
            "max_tokens": 4096,
            "messages": [
                {
                    "role": "system",
                    "content": prompts::system_prompt(system_instruction, rule_reference),
                },
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompts::elements_text(elements)},
                        {"type": "text", "text": prompts::SCREENSHOT_CAPTION},
                        {"type": "image_url", "image_url": {"url": screenshot_data_url(screenshot)}},
                    ],
                },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "wcag_check_response",
                    "strict": true,
                    "schema": prompts::violation_schema(),
                },
            },
        })
    }
}

#[async_trait]
impl Auditor for OpenAiAuditor {
    async fn run_check(
        &self,
        screenshot: &[u8],
        rule_reference: &str,
        elements: &[PageElement],
        system_instruction: Option<&str>,
    ) -> Result<Vec<Violation>, AuditorError> {
        debug!(model = %self.info.model, elements = elements.len(), "sending OpenAI audit request");
        let body = self.build_request(screenshot, rule_reference, elements, system_instruction);
        let completion = self.chat.complete(&body).await?;
        log_usage(&self.info, completion.usage);
        parse_violations(Provider::OpenAi, completion.content.as_deref())
    }

    fn model_name(&self) -> &str {
        &self.info.model
    }
}
