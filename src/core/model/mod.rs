//! Model adapter contract.
//!
//! The engine depends on this interface only: an adapter takes the
//! flattened message list plus the available tool specs and yields a
//! stream of [`AdapterEvent`]s. Implementations are expected to be
//! fallible and cancellable.

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AiConfig;
use crate::core::error::{CoreError, CoreResult};
use crate::core::tools::ToolSpec;

/// Model-facing message: history flattened to role + text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
}

#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// A fragment of assistant text; adapters may emit one or many.
    TextFragment(String),
    ToolCall {
        id: String,
        name: String,
        parameters: Value,
    },
    /// Terminal event of a successful adapter turn.
    Done { usage: Usage },
}

#[async_trait]
pub trait ModelAdapter: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn send(
        &self,
        messages: &[AdapterMessage],
        tools: &[ToolSpec],
        config: &AiConfig,
        cancel: CancellationToken,
    ) -> CoreResult<mpsc::Receiver<AdapterEvent>>;
}

/// Process-wide mapping from `provider` id to adapter. Constructible and
/// injectable so tests can swap in scripted adapters.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ModelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in OpenAI-compatible adapter.
    pub fn with_default_adapters() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(openai::OpenAiCompatAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ModelAdapter>) {
        info!("registered model adapter: {}", adapter.provider_id());
        self.adapters.push(adapter);
    }

    pub fn get(&self, provider_id: &str) -> CoreResult<Arc<dyn ModelAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.provider_id() == provider_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::model_failure(format!("no adapter for provider '{provider_id}'"))
            })
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.provider_id()).collect()
    }
}
