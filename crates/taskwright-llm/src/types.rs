//! Wire-level request/response shapes for the streaming chat interface
//! (§6.2). Deliberately simpler than a native-tool-calling provider's
//! types: the orchestrator's tool calls live inline in the text dialect
//! (§6.3), so the provider only ever needs to stream prose.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One request to stream a completion. `messages` excludes the system
/// message; that goes in `system` per the Anthropic-style Messages API
/// convention the reference provider speaks.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

/// Token usage reported by a provider at stream end, if any. Absent for
/// providers that don't report it — the Session Loop falls back to the
/// character-based estimate (§4.6) in that case.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One increment of a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of generated text, in emission order.
    Text(String),
    /// The stream ended normally.
    Done {
        stop_reason: Option<String>,
        usage: Option<Usage>,
    },
}
