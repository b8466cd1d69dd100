//! Error types for the orchestrator core.
//!
//! These are the faults that cannot be modeled as a per-call `ToolResult`
//! status (see `types.rs`) and must instead abort a session outright or
//! prevent the process from starting at all. Tool-level failures never
//! become an `OrchestratorError` — they stay inside `ToolResult`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("catalog invalid: {0}")]
    CatalogInvalid(String),

    #[error("writer io error: {0}")]
    WriterIo(#[from] std::io::Error),

    #[error("writer serialize error: {0}")]
    WriterSerialize(#[from] serde_json::Error),

    #[error("mcp connect failed: server {server} - {source}")]
    McpConnect {
        server: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn catalog_invalid(msg: impl Into<String>) -> Self {
        Self::CatalogInvalid(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
