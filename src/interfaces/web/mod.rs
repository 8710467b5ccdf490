//! HTTP surface: the SSE chat endpoint plus session management routes.

mod handlers;
mod router;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::AiConfig;
use crate::core::engine::TaskEngine;
use crate::core::error::{CoreError, CoreResult};
use crate::core::model::AdapterRegistry;
use crate::core::session::index::TaskIndex;
use crate::core::session::store::ConversationStore;
use crate::core::tools::coordinator::ToolCoordinator;

pub use router::build_router;

/// Everything bound to one repository root: its store, index, and engine.
#[derive(Clone)]
pub struct Workspace {
    pub store: Arc<ConversationStore>,
    pub index: Arc<TaskIndex>,
    pub engine: Arc<TaskEngine>,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ToolCoordinator>,
    pub adapters: Arc<AdapterRegistry>,
    pub default_config: AiConfig,
    workspaces: Arc<Mutex<HashMap<PathBuf, Workspace>>>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<ToolCoordinator>,
        adapters: Arc<AdapterRegistry>,
        default_config: AiConfig,
    ) -> Self {
        Self {
            coordinator,
            adapters,
            default_config,
            workspaces: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve the workspace for a repository path, creating and loading
    /// it on first use. One instance per canonical root for the lifetime
    /// of the process.
    pub async fn workspace(&self, repository_path: &str) -> CoreResult<Workspace> {
        let root = Path::new(repository_path);
        if !root.is_absolute() {
            return Err(CoreError::InvalidPath {
                path: repository_path.to_string(),
            });
        }
        let root = root.canonicalize().map_err(|_| CoreError::InvalidPath {
            path: repository_path.to_string(),
        })?;

        let mut workspaces = self.workspaces.lock().await;
        if let Some(workspace) = workspaces.get(&root) {
            return Ok(workspace.clone());
        }

        let store = Arc::new(ConversationStore::new(&root));
        let index = Arc::new(TaskIndex::new(&root));
        index.load().await?;
        let engine = Arc::new(TaskEngine::new(
            &root,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.adapters),
            Arc::clone(&store),
            Arc::clone(&index),
        ));
        let workspace = Workspace {
            store,
            index,
            engine,
        };
        workspaces.insert(root.clone(), workspace.clone());
        info!("opened workspace at {}", root.display());
        Ok(workspace)
    }
}

pub struct ApiServer {
    state: AppState,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(state: AppState, host: String, port: u16) -> Self {
        Self { state, host, port }
    }

    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;
        let router = build_router(self.state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API listening on http://{addr}");
        axum::serve(listener, router).await?;
        Ok(())
    }
}
