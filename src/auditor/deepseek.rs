use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::registry::{ModelPricingInfo, Provider};
use super::{log_usage, parse_violations, prompts, screenshot_data_url, Auditor, AuditorError};
use crate::browser::PageElement;
use crate::llm::ChatClient;
use crate::violations::types::Violation;

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// DeepSeek auditor. JSON-object mode only, so the schema rides in the system prompt.
pub struct DeepSeekAuditor {
    chat: ChatClient,
    info: ModelPricingInfo,
}

impl DeepSeekAuditor {
    pub fn new(http: reqwest::Client, api_key: &str, info: ModelPricingInfo) -> Self {
        Self {
            chat: ChatClient::new(http, Provider::DeepSeek, DEEPSEEK_BASE_URL, api_key),
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
            "temperature": 0.1,
            "max_tokens": 4000,
            "messages": [
                {"role": "system", "content": system},
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompts::elements_text(elements)},
                        {"type": "text", "text": prompts::SCREENSHOT_CAPTION},
                        {"type": "image_url", "image_url": {"url": screenshot_data_url(screenshot)}},
                    ],
                },
            ],
            "response_format": {"type": "json_object"},
        })
    }
}

#[async_trait]
impl Auditor for DeepSeekAuditor {
    async fn run_check(
        &self,
        screenshot: &[u8],
        rule_reference: &str,
        elements: &[PageElement],
        system_instruction: Option<&str>,
    ) -> Result<Vec<Violation>, AuditorError> {
        debug!(model = %self.info.model, elements = elements.len(), "sending DeepSeek audit request");
        let body = self.build_request(screenshot, rule_reference, elements, system_instruction);
        let completion = self.chat.complete(&body).await?;
        log_usage(&self.info, completion.usage);
        parse_violations(Provider::DeepSeek, completion.content.as_deref())
    }

    fn model_name(&self) -> &str {
        &self.info.model
    }
}
