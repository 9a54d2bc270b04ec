use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::anthropic::AnthropicAuditor;
use super::deepseek::DeepSeekAuditor;
use super::openai::OpenAiAuditor;
use super::Auditor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    DeepSeek,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Anthropic, Provider::DeepSeek];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::DeepSeek => "deepseek",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn credential_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl Pricing {
    /// Cost in USD, rounded to six decimals.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_per_million;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_per_million;
        ((input_cost + output_cost) * 1_000_000.0).round() / 1_000_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricingInfo {
    pub model: String,
    pub provider: Provider,
    pub pricing: Pricing,
}

impl ModelPricingInfo {
    pub fn new(model: &str, provider: Provider, input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            model: model.to_string(),
            provider,
            pricing: Pricing {
                input_per_million,
                output_per_million,
            },
        }
    }

    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.pricing.cost(input_tokens, output_tokens)
    }
}

/// Immutable model catalogue, built once at start-up and shared by `Arc`.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelPricingInfo>,
}

impl ModelRegistry {
    pub fn builtin() -> Self {
        Self::from_entries([
            ModelPricingInfo::new("gpt-4o", Provider::OpenAi, 2.50, 10.00),
            ModelPricingInfo::new("gpt-4o-mini", Provider::OpenAi, 0.15, 0.60),
            ModelPricingInfo::new("gpt-4.1", Provider::OpenAi, 2.00, 8.00),
            ModelPricingInfo::new("gpt-4.1-mini", Provider::OpenAi, 0.40, 1.60),
            ModelPricingInfo::new("gpt-4.1-nano", Provider::OpenAi, 0.10, 0.40),
            ModelPricingInfo::new("deepseek-chat", Provider::DeepSeek, 0.27, 1.10),
            ModelPricingInfo::new("deepseek-reasoner", Provider::DeepSeek, 0.55, 2.19),
            ModelPricingInfo::new("claude-3-5-sonnet-latest", Provider::Anthropic, 3.00, 15.00),
            ModelPricingInfo::new("claude-3-5-haiku-latest", Provider::Anthropic, 0.80, 4.00),
        ])
    }

    pub fn from_entries(entries: impl IntoIterator<Item = ModelPricingInfo>) -> Self {
        Self {
            models: entries
                .into_iter()
                .map(|info| (info.model.clone(), info))
                .collect(),
        }
    }

    pub fn get(&self, model: &str) -> Option<&ModelPricingInfo> {
        self.models.get(model)
    }

    pub fn available_models(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn models_by_provider(&self, provider: Provider) -> Vec<String> {
        self.models
            .values()
            .filter(|info| info.provider == provider)
            .map(|info| info.model.clone())
            .collect()
    }

    pub fn provider_of(&self, model: &str) -> Option<Provider> {
        self.get(model).map(|info| info.provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelPricingInfo> {
        self.models.values()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unsupported model '{model}'. Available models: {}", available.join(", "))]
    UnsupportedModel {
        model: String,
        available: Vec<String>,
    },

    #[error("{credential} environment variable is required for {provider} models")]
    MissingCredential {
        credential: &'static str,
        provider: Provider,
    },
}

/// Provider API keys, keyed by their environment variable name.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    keys: HashMap<&'static str, String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let mut creds = Self::default();
        for provider in Provider::ALL {
            let var = provider.credential_var();
            if let Ok(key) = dotenv::var(var) {
                creds = creds.with(var, &key);
            }
        }
        creds
    }

    /// Blank values count as absent.
    pub fn with(mut self, var: &'static str, key: &str) -> Self {
        if !key.trim().is_empty() {
            self.keys.insert(var, key.trim().to_string());
        }
        self
    }

    pub fn get(&self, var: &str) -> Option<&str> {
        self.keys.get(var).map(|s| s.as_str())
    }
}

/// Turns a model name into a ready auditor.
pub trait AuditorResolver: Send + Sync {
    fn resolve(&self, model: &str) -> Result<Arc<dyn Auditor>, RegistryError>;
}

/// Registry-backed resolver. Validation is purely local: no request is made
/// until the returned auditor runs.
pub struct AuditorFactory {
    registry: Arc<ModelRegistry>,
    credentials: Credentials,
    http: reqwest::Client,
}

impl AuditorFactory {
    pub fn new(registry: Arc<ModelRegistry>, credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            registry,
            credentials,
            http,
        })
    }
}

impl AuditorResolver for AuditorFactory {
    fn resolve(&self, model: &str) -> Result<Arc<dyn Auditor>, RegistryError> {
        let info = self
            .registry
            .get(model)
            .ok_or_else(|| RegistryError::UnsupportedModel {
                model: model.to_string(),
                available: self.registry.available_models(),
            })?;

        let credential = info.provider.credential_var();
        let key = self
            .credentials
            .get(credential)
            .ok_or(RegistryError::MissingCredential {
                credential,
                provider: info.provider,
            })?;

        let auditor: Arc<dyn Auditor> = match info.provider {
            Provider::OpenAi => Arc::new(OpenAiAuditor::new(self.http.clone(), key, info.clone())),
            Provider::DeepSeek => {
                Arc::new(DeepSeekAuditor::new(self.http.clone(), key, info.clone()))
            }
            Provider::Anthropic => {
                Arc::new(AnthropicAuditor::new(self.http.clone(), key, info.clone()))
            }
        };
        Ok(auditor)
    }
}
