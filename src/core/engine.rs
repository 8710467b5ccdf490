//! The task engine: the iterative agent loop.
//!
//! One run resolves or creates a task, then cycles request-model →
//! detect-tool-calls → execute-tools → append-results until the model
//! stops calling tools, the completion sentinel fires, the iteration
//! budget runs out, or the run is cancelled. Progress streams through a
//! bounded event channel; a slow consumer backpressures the loop and no
//! event is ever dropped.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AiConfig;
use crate::core::context::compaction::{ContextManager, HistorySummarizer};
use crate::core::error::{CoreError, CoreResult};
use crate::core::events::{EngineEvent, ToolCallSummary};
use crate::core::model::{AdapterEvent, AdapterMessage, AdapterRegistry, ModelAdapter, Usage};
use crate::core::session::index::{TaskIndex, TaskSeed};
use crate::core::session::store::ConversationStore;
use crate::core::session::{Message, Role, ToolCallRecord};
use crate::core::tools::completion::COMPLETION_TOOL_NAME;
use crate::core::tools::coordinator::ToolCoordinator;
use crate::core::tools::{ToolCallRequest, ToolContext};

/// Event channel capacity between engine and stream consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;
const DESCRIPTION_MAX_CHARS: usize = 100;

/// In-flight task ids, for rejecting concurrent runs against one task.
#[derive(Default)]
struct ActiveRuns {
    ids: Mutex<HashSet<String>>,
}

impl ActiveRuns {
    fn try_claim(&self, task_id: &str) -> bool {
        self.ids
            .lock()
            .expect("active-run lock poisoned")
            .insert(task_id.to_string())
    }

    fn release(&self, task_id: &str) {
        self.ids
            .lock()
            .expect("active-run lock poisoned")
            .remove(task_id);
    }
}

pub struct TaskEngine {
    repo_root: PathBuf,
    coordinator: Arc<ToolCoordinator>,
    adapters: Arc<AdapterRegistry>,
    store: Arc<ConversationStore>,
    index: Arc<TaskIndex>,
    active: Arc<ActiveRuns>,
}

enum Outcome {
    Completed { content: String, iteration: u32 },
    BudgetExhausted { max_iterations: u32 },
    Cancelled,
    ModelFailed(CoreError),
    /// The stream consumer went away; finish persistence quietly.
    ConsumerGone,
}

impl TaskEngine {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        coordinator: Arc<ToolCoordinator>,
        adapters: Arc<AdapterRegistry>,
        store: Arc<ConversationStore>,
        index: Arc<TaskIndex>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            coordinator,
            adapters,
            store,
            index,
            active: Arc::new(ActiveRuns::default()),
        }
    }

    /// Start a run. Returns the event stream; the loop itself executes on
    /// a spawned task. Fails fast (before any event) on invalid config, a
    /// busy task, or unreadable history.
    pub async fn run(
        &self,
        user_input: String,
        task_id: Option<String>,
        config: AiConfig,
        cancel: CancellationToken,
    ) -> CoreResult<mpsc::Receiver<EngineEvent>> {
        config.validate()?;

        let known = match &task_id {
            Some(id) => self.index.get(id).await.is_some(),
            None => false,
        };
        let (task_id, is_new_task, history) = if known {
            let id = task_id.expect("checked above");
            let history = self.store.load(&id).await?;
            (id, false, history)
        } else {
            (new_task_id(), true, Vec::new())
        };

        if !self.active.try_claim(&task_id) {
            return Err(CoreError::Busy { task_id });
        }

        let seed = TaskSeed {
            description: truncate_chars(&user_input, DESCRIPTION_MAX_CHARS),
            provider: Some(config.provider.clone()),
            model: Some(config.model.clone()),
            repository_path: Some(self.repo_root.display().to_string()),
        };
        self.index.upsert(&task_id, seed).await;
        if let Err(e) = self.index.save().await {
            self.active.release(&task_id);
            return Err(e);
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let driver = Driver {
            repo_root: self.repo_root.clone(),
            coordinator: Arc::clone(&self.coordinator),
            adapters: Arc::clone(&self.adapters),
            store: Arc::clone(&self.store),
            index: Arc::clone(&self.index),
            active: Arc::clone(&self.active),
            config,
            cancel,
            tx,
        };
        tokio::spawn(driver.run(task_id, is_new_task, user_input, history));
        Ok(rx)
    }
}

struct Driver {
    repo_root: PathBuf,
    coordinator: Arc<ToolCoordinator>,
    adapters: Arc<AdapterRegistry>,
    store: Arc<ConversationStore>,
    index: Arc<TaskIndex>,
    active: Arc<ActiveRuns>,
    config: AiConfig,
    cancel: CancellationToken,
    tx: mpsc::Sender<EngineEvent>,
}

impl Driver {
    async fn run(self, task_id: String, is_new_task: bool, user_input: String, history: Vec<Message>) {
        let result = self
            .drive(&task_id, is_new_task, user_input, history)
            .await;
        if let Err(e) = result {
            warn!("task {task_id} driver error: {e}");
        }
        self.active.release(&task_id);
    }

    async fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    async fn drive(
        &self,
        task_id: &str,
        is_new_task: bool,
        user_input: String,
        mut history: Vec<Message>,
    ) -> CoreResult<()> {
        info!(
            "task {task_id}: {} run, {} prior messages",
            if is_new_task { "new" } else { "resumed" },
            history.len()
        );
        if !self
            .emit(EngineEvent::TaskStarted {
                task_id: task_id.to_string(),
                is_new_task,
            })
            .await
        {
            return Ok(());
        }

        history.push(Message::user(user_input));

        let adapter = match self.adapters.get(&self.config.provider) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.emit(EngineEvent::Error {
                    message: e.to_string(),
                })
                .await;
                return self.persist(task_id, &history, None).await;
            }
        };

        let context_manager = ContextManager::new(self.config.max_context_tokens);
        let tool_ctx = ToolContext::new(self.repo_root.clone(), task_id.to_string())
            .with_cancel(self.cancel.clone());

        let mut accumulated: Option<Usage> = None;
        let mut iteration: u32 = 0;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break Outcome::Cancelled;
            }
            if self.config.max_iterations > 0 && iteration >= self.config.max_iterations {
                break Outcome::BudgetExhausted {
                    max_iterations: self.config.max_iterations,
                };
            }
            iteration += 1;

            // Keep the context under budget before every request.
            let working = if context_manager.over_soft(&history) {
                let summarizer = AdapterSummarizer {
                    adapter: &adapter,
                    config: &self.config,
                    cancel: self.cancel.clone(),
                };
                context_manager
                    .compact(history.clone(), Some(&summarizer))
                    .await
            } else {
                history.clone()
            };
            let adapter_messages = to_adapter_messages(&working);
            let tool_specs = self.coordinator.list_specs();

            if !self
                .emit(EngineEvent::ApiRequestStarted {
                    iteration,
                    message_count: adapter_messages.len(),
                })
                .await
            {
                break Outcome::ConsumerGone;
            }

            let mut events = match adapter
                .send(&adapter_messages, &tool_specs, &self.config, self.cancel.clone())
                .await
            {
                Ok(events) => events,
                Err(CoreError::Cancelled) => break Outcome::Cancelled,
                Err(e) => break Outcome::ModelFailed(e),
            };

            let mut content = String::new();
            let mut calls: Vec<ToolCallRecord> = Vec::new();
            let mut saw_done = false;
            while let Some(event) = events.recv().await {
                match event {
                    AdapterEvent::TextFragment(fragment) => {
                        if !self
                            .emit(EngineEvent::ApiResponse {
                                content: fragment.clone(),
                                iteration,
                            })
                            .await
                        {
                            break;
                        }
                        content.push_str(&fragment);
                    }
                    AdapterEvent::ToolCall {
                        id,
                        name,
                        parameters,
                    } => calls.push(ToolCallRecord {
                        id,
                        name,
                        parameters,
                        result: None,
                    }),
                    AdapterEvent::Done { usage } => {
                        saw_done = true;
                        let total = accumulated.get_or_insert(Usage::default());
                        total.tokens_in += usage.tokens_in;
                        total.tokens_out += usage.tokens_out;
                        total.cost += usage.cost;
                    }
                }
            }
            if !saw_done && content.is_empty() && calls.is_empty() {
                break Outcome::ModelFailed(CoreError::model_failure(
                    "adapter stream ended without producing output",
                ));
            }

            history.push(Message::assistant(content.clone(), calls.clone()));
            if calls.is_empty() {
                break Outcome::Completed { content, iteration };
            }

            if !self
                .emit(EngineEvent::ToolCallsDetected {
                    tool_calls: calls
                        .iter()
                        .map(|c| ToolCallSummary {
                            name: c.name.clone(),
                            parameters: c.parameters.clone(),
                        })
                        .collect(),
                    iteration,
                })
                .await
            {
                break Outcome::ConsumerGone;
            }

            let assistant_idx = history.len() - 1;
            let mut completion_text: Option<String> = None;
            let mut interrupted = false;
            for (call_idx, call) in calls.iter().enumerate() {
                if !self
                    .emit(EngineEvent::ToolExecutionStarted {
                        tool_name: call.name.clone(),
                        iteration,
                    })
                    .await
                {
                    interrupted = true;
                    break;
                }

                let request = ToolCallRequest {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    parameters: call.parameters.clone(),
                };
                let result = self.coordinator.execute(&request, &tool_ctx).await;

                if !self
                    .emit(EngineEvent::ToolExecutionCompleted {
                        tool_name: call.name.clone(),
                        result: result.clone(),
                        iteration,
                    })
                    .await
                {
                    interrupted = true;
                    break;
                }

                history[assistant_idx].tool_calls[call_idx].result = Some(result.clone());
                history.push(Message::tool_result(&call.id, &result));

                if call.name == COMPLETION_TOOL_NAME && result.success {
                    let text = result
                        .data
                        .as_ref()
                        .and_then(|d| d.get("result"))
                        .and_then(|r| r.as_str())
                        .unwrap_or(&content)
                        .to_string();
                    completion_text = Some(text);
                }
                if self.cancel.is_cancelled() {
                    interrupted = true;
                    break;
                }
            }

            if interrupted {
                if self.cancel.is_cancelled() {
                    break Outcome::Cancelled;
                }
                break Outcome::ConsumerGone;
            }
            if let Some(text) = completion_text {
                break Outcome::Completed {
                    content: text,
                    iteration,
                };
            }
        };

        match outcome {
            Outcome::Completed { content, iteration } => {
                let persisted = self.persist(task_id, &history, accumulated).await;
                if let Err(e) = persisted {
                    self.emit(EngineEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                    return Err(e);
                }
                self.emit(EngineEvent::Completion { content, iteration }).await;
                info!("task {task_id}: completed after {iteration} iterations");
                Ok(())
            }
            Outcome::BudgetExhausted { max_iterations } => {
                self.emit(EngineEvent::Error {
                    message: CoreError::BudgetExhausted { max_iterations }.to_string(),
                })
                .await;
                self.persist(task_id, &history, accumulated).await
            }
            Outcome::Cancelled => {
                let persisted = self.persist(task_id, &history, accumulated).await;
                self.emit(EngineEvent::Error {
                    message: "cancelled".to_string(),
                })
                .await;
                persisted
            }
            Outcome::ModelFailed(e) => {
                self.emit(EngineEvent::Error {
                    message: e.to_string(),
                })
                .await;
                self.persist(task_id, &history, accumulated).await
            }
            Outcome::ConsumerGone => self.persist(task_id, &history, accumulated).await,
        }
    }

    /// Best-effort terminal persistence: conversation files first, then the
    /// refreshed index row. Adapter-reported usage wins; the directory-size
    /// half-split is only the fallback.
    async fn persist(
        &self,
        task_id: &str,
        history: &[Message],
        usage: Option<Usage>,
    ) -> CoreResult<()> {
        let record = self
            .index
            .get(task_id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("task '{task_id}'")))?;
        self.store.save(task_id, history, &record).await?;

        let size = self.store.dir_size(task_id).await;
        let (tokens_in, tokens_out, cost) = match usage {
            Some(u) if u.tokens_in + u.tokens_out > 0 => {
                (
                    record.tokens_in + u.tokens_in,
                    record.tokens_out + u.tokens_out,
                    record.total_cost + u.cost,
                )
            }
            _ => (size / 2, size - size / 2, record.total_cost),
        };
        self.index
            .update_counters(task_id, tokens_in, tokens_out, cost, size)
            .await?;
        self.index.save().await
    }
}

/// Summarizer backing compaction stage 3 with the run's own adapter.
struct AdapterSummarizer<'a> {
    adapter: &'a Arc<dyn ModelAdapter>,
    config: &'a AiConfig,
    cancel: CancellationToken,
}

#[async_trait]
impl HistorySummarizer for AdapterSummarizer<'_> {
    async fn summarize(&self, messages: &[Message]) -> Option<String> {
        let mut transcript = String::new();
        for message in messages {
            if let Some(content) = &message.content {
                let role = match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::ToolResult => "tool",
                    Role::System => "system",
                };
                transcript.push_str(role);
                transcript.push_str(": ");
                transcript.push_str(&truncate_chars(content, 500));
                transcript.push('\n');
            }
        }
        let prompt = format!(
            "Summarize the following conversation so the task can continue from the \
             summary alone. Note the user's request, files touched, decisions made, \
             and work still outstanding.\n\n{transcript}"
        );
        let request = vec![AdapterMessage {
            role: "user".to_string(),
            content: prompt,
        }];

        let mut events = self
            .adapter
            .send(&request, &[], self.config, self.cancel.clone())
            .await
            .ok()?;
        let mut summary = String::new();
        while let Some(event) = events.recv().await {
            if let AdapterEvent::TextFragment(fragment) = event {
                summary.push_str(&fragment);
            }
        }
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            None
        } else {
            Some(summary)
        }
    }
}

/// Flatten history into the role + text form adapters consume. Tool calls
/// are rendered into the assistant text; tool results come back as user
/// messages.
fn to_adapter_messages(history: &[Message]) -> Vec<AdapterMessage> {
    history
        .iter()
        .map(|message| match message.role {
            Role::User => AdapterMessage {
                role: "user".to_string(),
                content: message.content.clone().unwrap_or_default(),
            },
            Role::System => AdapterMessage {
                role: "system".to_string(),
                content: message.content.clone().unwrap_or_default(),
            },
            Role::Assistant => {
                let mut content = message.content.clone().unwrap_or_default();
                for call in &message.tool_calls {
                    content.push_str(&format!(
                        "\n\n[tool call] {}({})",
                        call.name, call.parameters
                    ));
                }
                AdapterMessage {
                    role: "assistant".to_string(),
                    content,
                }
            }
            Role::ToolResult => AdapterMessage {
                role: "user".to_string(),
                content: format!(
                    "Tool result:\n{}",
                    message.content.as_deref().unwrap_or_default()
                ),
            },
        })
        .collect()
}

fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
