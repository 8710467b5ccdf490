//! Per-request model configuration.
//!
//! Every chat request may carry a full `AiConfig`; fields left out fall
//! back to server defaults. The same struct is handed to the model adapter
//! verbatim.

use serde::{Deserialize, Serialize};

use crate::core::error::{CoreError, CoreResult};

pub const DEFAULT_MAX_ITERATIONS: u32 = 999;
pub const DEFAULT_MAX_CONTEXT_TOKENS: u64 = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Adapter id, e.g. "openai".
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    /// 0 means unbounded.
    pub max_iterations: u32,
    pub max_context_tokens: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: 4000,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
        }
    }
}

impl AiConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.provider.is_empty() {
            return Err(CoreError::invalid_parameters("provider must not be empty"));
        }
        if self.model.is_empty() {
            return Err(CoreError::invalid_parameters("model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(CoreError::invalid_parameters(
                "temperature must be between 0.0 and 2.0",
            ));
        }
        if self.max_tokens == 0 {
            return Err(CoreError::invalid_parameters("max_tokens must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(CoreError::invalid_parameters("top_p must be between 0 and 1"));
        }
        for (name, value) in [
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ] {
            if !(-2.0..=2.0).contains(&value) {
                return Err(CoreError::invalid_parameters(format!(
                    "{name} must be between -2 and 2"
                )));
            }
        }
        if self.max_context_tokens == 0 {
            return Err(CoreError::invalid_parameters(
                "max_context_tokens must be at least 1",
            ));
        }
        Ok(())
    }
}
