//! Typed errors for the task engine, tools, and session stores.
//!
//! Internal propagation inside handlers uses these variants directly; the
//! coordinator flattens them into `ToolResult` failures, and the engine
//! surfaces the terminal ones as `error` stream events. The `Display` text
//! always leads with the error kind so clients can match on it.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Path resolves outside the repository root or is malformed.
    #[error("InvalidPath: '{path}' resolves outside the repository root")]
    InvalidPath { path: String },

    /// Tool parameter missing or of the wrong type.
    #[error("InvalidParameters: {detail}")]
    InvalidParameters { detail: String },

    /// File, search text, or task does not exist.
    #[error("NotFound: {what}")]
    NotFound { what: String },

    /// On-disk JSON is unparseable. The file is left untouched.
    #[error("Corrupt: {} is not valid JSON: {detail}", path.display())]
    Corrupt { path: PathBuf, detail: String },

    /// The model adapter failed or returned malformed output.
    #[error("ModelFailure: {detail}")]
    ModelFailure { detail: String },

    /// Cooperative cancellation was observed.
    #[error("Cancelled")]
    Cancelled,

    /// The configured iteration budget was reached.
    #[error("BudgetExhausted: iteration budget of {max_iterations} exhausted")]
    BudgetExhausted { max_iterations: u32 },

    /// A run is already in flight for this task.
    #[error("Busy: task '{task_id}' already has a run in flight")]
    Busy { task_id: String },

    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn invalid_parameters(detail: impl Into<String>) -> Self {
        Self::InvalidParameters {
            detail: detail.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn model_failure(detail: impl Into<String>) -> Self {
        Self::ModelFailure {
            detail: detail.into(),
        }
    }

    /// The kind tag clients match against (the prefix of `Display`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "InvalidPath",
            Self::InvalidParameters { .. } => "InvalidParameters",
            Self::NotFound { .. } => "NotFound",
            Self::Corrupt { .. } => "Corrupt",
            Self::ModelFailure { .. } => "ModelFailure",
            Self::Cancelled => "Cancelled",
            Self::BudgetExhausted { .. } => "BudgetExhausted",
            Self::Busy { .. } => "Busy",
            Self::Io(_) => "IOError",
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Io(std::io::Error::other(e))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
