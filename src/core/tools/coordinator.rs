//! Tool registry and guarded dispatch.
//!
//! The coordinator owns the `name → handler` mapping, validates parameters
//! against the registered spec, and converts every failure mode — handler
//! errors, panics, deadline expiry, cancellation — into a `ToolResult`
//! failure. `execute` never returns an error.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::core::error::{CoreError, CoreResult};
use crate::core::tools::{Tool, ToolCallRequest, ToolContext, ToolResult, ToolSpec};

/// Worker-pool degree for batches of side-effect-free calls.
const BATCH_POOL_SIZE: usize = 4;

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, Arc<dyn Tool>>,
    // Registration order, for stable spec listings.
    order: Vec<String>,
}

#[derive(Default)]
pub struct ToolCoordinator {
    registry: RwLock<Registry>,
}

impl ToolCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator with the full default tool set registered.
    pub fn with_default_tools() -> Self {
        use crate::core::tools::{code, completion, file, git, search, write};

        let coordinator = Self::new();
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(file::ReadFileTool),
            Arc::new(file::ListFilesTool::new()),
            Arc::new(search::SearchFilesTool::new()),
            Arc::new(write::WriteToFileTool),
            Arc::new(write::ReplaceInFileTool),
            Arc::new(code::ListCodeDefinitionsTool),
            Arc::new(git::GitStatusTool),
            Arc::new(git::GitDiffTool),
            Arc::new(git::GitLogTool),
            Arc::new(git::GitBranchTool),
            Arc::new(completion::AttemptCompletionTool),
        ];
        for tool in tools {
            coordinator
                .register(tool)
                .expect("default tool names are unique");
        }
        coordinator
    }

    /// Register a handler. Registering a name twice fails; unregister first
    /// to replace a tool.
    pub fn register(&self, handler: Arc<dyn Tool>) -> CoreResult<()> {
        let name = handler.spec().name;
        let mut registry = self.registry.write().expect("registry lock poisoned");
        if registry.handlers.contains_key(&name) {
            return Err(CoreError::invalid_parameters(format!(
                "tool '{name}' is already registered"
            )));
        }
        info!("registered tool: {name}");
        registry.order.push(name.clone());
        registry.handlers.insert(name, handler);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut registry = self.registry.write().expect("registry lock poisoned");
        registry.order.retain(|n| n != name);
        registry.handlers.remove(name).is_some()
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .handlers
            .contains_key(name)
    }

    /// Tool specs in registration order, for inclusion in model prompts.
    pub fn list_specs(&self) -> Vec<ToolSpec> {
        let registry = self.registry.read().expect("registry lock poisoned");
        registry
            .order
            .iter()
            .filter_map(|name| registry.handlers.get(name))
            .map(|handler| handler.spec())
            .collect()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .handlers
            .get(name)
            .cloned()
    }

    /// Execute one call. Unknown tools, invalid parameters, handler errors,
    /// panics, deadline expiry, and cancellation all surface as failure
    /// results carrying the error kind in their message.
    pub async fn execute(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolResult {
        let Some(handler) = self.lookup(&call.name) else {
            return ToolResult::err(format!("unknown tool: {}", call.name));
        };
        dispatch(handler, call.clone(), ctx.clone()).await
    }

    /// Execute a batch. When every named handler declares itself
    /// side-effect-free the calls run concurrently on a bounded pool;
    /// otherwise they run sequentially in request order. Result order
    /// always matches call order.
    pub async fn execute_many(
        &self,
        calls: &[ToolCallRequest],
        ctx: &ToolContext,
    ) -> Vec<ToolResult> {
        let all_safe = calls.iter().all(|call| {
            self.lookup(&call.name)
                .map(|h| h.side_effect_free())
                .unwrap_or(false)
        });

        if !all_safe || calls.len() < 2 {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(call, ctx).await);
            }
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(BATCH_POOL_SIZE));
        let mut join_set: JoinSet<(usize, ToolResult)> = JoinSet::new();
        let mut indexed: Vec<(usize, ToolResult)> = Vec::with_capacity(calls.len());
        for (idx, call) in calls.iter().enumerate() {
            // A tool may have been unregistered since the all_safe check.
            let Some(handler) = self.lookup(&call.name) else {
                indexed.push((idx, ToolResult::err(format!("unknown tool: {}", call.name))));
                continue;
            };
            let semaphore = Arc::clone(&semaphore);
            let call = call.clone();
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                (idx, dispatch(handler, call, ctx).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => warn!("batched tool task failed to join: {e}"),
            }
        }
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}

/// Validate and run one handler inside a guarded scope: panics are
/// contained, the soft deadline is enforced, and cancellation waits for
/// the in-flight call rather than preempting it.
async fn dispatch(handler: Arc<dyn Tool>, call: ToolCallRequest, ctx: ToolContext) -> ToolResult {
    let spec = handler.spec();
    if let Err(detail) = spec.validate(&call.parameters) {
        return ToolResult::err(CoreError::invalid_parameters(detail).to_string());
    }

    let started = Instant::now();
    let deadline = ctx.deadline;
    let cancel = ctx.cancel.clone();
    let tool_name = call.name.clone();

    let mut join = tokio::spawn(async move { handler.execute(&call.parameters, &ctx).await });

    let outcome = tokio::select! {
        joined = &mut join => match joined {
            Ok(result) => result,
            Err(e) => {
                warn!("tool '{tool_name}' panicked: {e}");
                Err(CoreError::Io(std::io::Error::other(format!(
                    "tool '{tool_name}' aborted: {e}"
                ))))
            }
        },
        _ = tokio::time::sleep(deadline) => {
            join.abort();
            Err(CoreError::Io(std::io::Error::other(format!(
                "tool '{tool_name}' exceeded its {}s deadline",
                deadline.as_secs()
            ))))
        }
        _ = cancel.cancelled() => {
            // Cancellation between dispatch and completion waits for the
            // tool to finish; there is no in-tool preemption.
            match join.await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Cancelled),
            }
        }
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(data) => {
            // Result shaping: surface governance fields (truncation flags,
            // scan statistics) in the metadata alongside timing.
            let mut metadata = json!({ "elapsed_ms": elapsed_ms });
            if let Some(obj) = data.as_object() {
                if let Some(truncated) = obj.get("truncated") {
                    metadata["truncated"] = truncated.clone();
                }
                if let Some(stats) = obj.get("stats").and_then(|s| s.as_object()) {
                    for (key, value) in stats {
                        metadata[key] = value.clone();
                    }
                }
            }
            ToolResult::ok(data).with_metadata(metadata)
        }
        Err(e) => {
            let mut result = ToolResult::err(e.to_string());
            result.metadata = Some(json!({ "elapsed_ms": elapsed_ms }));
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::core::tools::{ParamType, ToolParameter};

    struct EchoTool {
        safe: bool,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                description: "echo".into(),
                parameters: vec![ToolParameter::required(
                    "message",
                    ParamType::String,
                    "text",
                )],
            }
        }

        fn side_effect_free(&self) -> bool {
            self.safe
        }

        async fn execute(&self, params: &Value, _ctx: &ToolContext) -> CoreResult<Value> {
            Ok(json!({"echo": params["message"]}))
        }
    }

    struct SlowTool {
        concurrent: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "slow".into(),
                description: "sleeps briefly".into(),
                parameters: vec![],
            }
        }

        fn side_effect_free(&self) -> bool {
            true
        }

        async fn execute(&self, _params: &Value, _ctx: &ToolContext) -> CoreResult<Value> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "panic".into(),
                description: "always panics".into(),
                parameters: vec![],
            }
        }

        async fn execute(&self, _params: &Value, _ctx: &ToolContext) -> CoreResult<Value> {
            panic!("boom");
        }
    }

    fn call(name: &str, params: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            parameters: params,
        }
    }

    fn ctx() -> (TempDir, ToolContext) {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path(), "t1");
        (dir, ctx)
    }

    #[test]
    fn duplicate_registration_fails() {
        let coordinator = ToolCoordinator::new();
        coordinator
            .register(Arc::new(EchoTool { safe: true }))
            .unwrap();
        let err = coordinator
            .register(Arc::new(EchoTool { safe: true }))
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidParameters");
    }

    #[test]
    fn unregister_then_register_succeeds() {
        let coordinator = ToolCoordinator::new();
        coordinator
            .register(Arc::new(EchoTool { safe: true }))
            .unwrap();
        assert!(coordinator.unregister("echo"));
        assert!(!coordinator.unregister("echo"));
        coordinator
            .register(Arc::new(EchoTool { safe: true }))
            .unwrap();
        assert!(coordinator.has("echo"));
    }

    #[test]
    fn list_specs_preserves_registration_order() {
        let coordinator = ToolCoordinator::with_default_tools();
        let names: Vec<String> = coordinator
            .list_specs()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names[0], "read_file");
        assert!(names.contains(&"attempt_completion".to_string()));
        // A second listing is identical.
        let again: Vec<String> = coordinator
            .list_specs()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, again);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_result() {
        let coordinator = ToolCoordinator::new();
        let (_dir, ctx) = ctx();
        let result = coordinator.execute(&call("ghost", json!({})), &ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn invalid_parameters_are_a_failure_result() {
        let coordinator = ToolCoordinator::new();
        coordinator
            .register(Arc::new(EchoTool { safe: true }))
            .unwrap();
        let (_dir, ctx) = ctx();
        let result = coordinator.execute(&call("echo", json!({})), &ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("InvalidParameters"));
    }

    struct TruncatingTool;

    #[async_trait]
    impl Tool for TruncatingTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "truncating".into(),
                description: "returns governance fields".into(),
                parameters: vec![],
            }
        }

        fn side_effect_free(&self) -> bool {
            true
        }

        async fn execute(&self, _params: &Value, _ctx: &ToolContext) -> CoreResult<Value> {
            Ok(json!({
                "content": "partial",
                "truncated": true,
                "stats": {"files_scanned": 42},
            }))
        }
    }

    #[tokio::test]
    async fn governance_fields_are_lifted_into_metadata() {
        let coordinator = ToolCoordinator::new();
        coordinator.register(Arc::new(TruncatingTool)).unwrap();
        let (_dir, ctx) = ctx();
        let result = coordinator
            .execute(&call("truncating", json!({})), &ctx)
            .await;
        assert!(result.success);
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata["truncated"], true);
        assert_eq!(metadata["files_scanned"], 42);
        assert!(metadata["elapsed_ms"].is_u64());
    }

    #[tokio::test]
    async fn successful_execution_carries_elapsed_metadata() {
        let coordinator = ToolCoordinator::new();
        coordinator
            .register(Arc::new(EchoTool { safe: true }))
            .unwrap();
        let (_dir, ctx) = ctx();
        let result = coordinator
            .execute(&call("echo", json!({"message": "hi"})), &ctx)
            .await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["echo"], "hi");
        assert!(result.metadata.unwrap()["elapsed_ms"].is_u64());
    }

    #[tokio::test]
    async fn panicking_handler_becomes_failure_result() {
        let coordinator = ToolCoordinator::new();
        coordinator.register(Arc::new(PanicTool)).unwrap();
        let (_dir, ctx) = ctx();
        let result = coordinator.execute(&call("panic", json!({})), &ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("aborted"));
    }

    #[tokio::test]
    async fn deadline_expiry_becomes_failure_result() {
        let coordinator = ToolCoordinator::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        coordinator
            .register(Arc::new(SlowTool {
                concurrent: concurrent.clone(),
                peak: peak.clone(),
            }))
            .unwrap();
        let (_dir, mut tool_ctx) = ctx();
        tool_ctx.deadline = Duration::from_millis(5);
        let result = coordinator.execute(&call("slow", json!({})), &tool_ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("deadline"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_of_safe_tools_runs_bounded_concurrently() {
        let coordinator = ToolCoordinator::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        coordinator
            .register(Arc::new(SlowTool {
                concurrent: concurrent.clone(),
                peak: peak.clone(),
            }))
            .unwrap();
        let (_dir, ctx) = ctx();

        let calls: Vec<ToolCallRequest> =
            (0..8).map(|_| call("slow", json!({}))).collect();
        let results = coordinator.execute_many(&calls, &ctx).await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.success));
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 2, "expected parallelism, saw peak {peak}");
        assert!(peak <= BATCH_POOL_SIZE, "pool exceeded: {peak}");
    }

    #[tokio::test]
    async fn batch_with_unsafe_tool_runs_sequentially_in_order() {
        let coordinator = ToolCoordinator::new();
        coordinator
            .register(Arc::new(EchoTool { safe: false }))
            .unwrap();
        let (_dir, ctx) = ctx();
        let calls = vec![
            call("echo", json!({"message": "a"})),
            call("echo", json!({"message": "b"})),
            call("echo", json!({"message": "c"})),
        ];
        let results = coordinator.execute_many(&calls, &ctx).await;
        let echoed: Vec<&str> = results
            .iter()
            .map(|r| r.data.as_ref().unwrap()["echo"].as_str().unwrap())
            .collect();
        assert_eq!(echoed, vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_results_preserve_call_order() {
        let coordinator = ToolCoordinator::new();
        coordinator
            .register(Arc::new(EchoTool { safe: true }))
            .unwrap();
        let (_dir, ctx) = ctx();
        let calls: Vec<ToolCallRequest> = (0..10)
            .map(|i| call("echo", json!({"message": format!("m{i}")})))
            .collect();
        let results = coordinator.execute_many(&calls, &ctx).await;
        for (i, result) in results.iter().enumerate() {
            assert_eq!(
                result.data.as_ref().unwrap()["echo"],
                format!("m{i}"),
            );
        }
    }
}
