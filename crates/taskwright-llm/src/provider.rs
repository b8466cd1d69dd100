//! The streaming chat provider trait (§6.2). The orchestrator core depends
//! only on this trait; concrete providers (e.g. `anthropic::AnthropicProvider`)
//! are swappable implementations.

use std::pin::Pin;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::types::{ChatRequest, StreamDelta};

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// A streaming chat endpoint (§6.2). Implementations must support
/// client-side stop: the Session Loop simply drops the returned stream when
/// it detects `</execute_tools>`, and implementations must not keep billing
/// or generating once the stream is dropped.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Begin a streaming completion. If `cancel` fires, the stream must end
    /// (yielding no further items) promptly.
    async fn stream(
        &self,
        request: ChatRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream>;
}
