//! The MCP wire protocol (§6.1): JSON-RPC-style request/response envelopes
//! exchanged over one WebSocket connection per server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct CallRequest {
    pub id: u64,
    pub method: &'static str,
    pub params: CallParams,
}

#[derive(Debug, Serialize)]
pub struct CallParams {
    pub action: String,
    pub arguments: Value,
}

impl CallRequest {
    pub fn call_tool(id: u64, action: impl Into<String>, arguments: Value) -> Self {
        Self {
            id,
            method: "call_tool",
            params: CallParams {
                action: action.into(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallResponse {
    pub id: u64,
    pub result: CallResultBody,
}

#[derive(Debug, Deserialize)]
pub struct CallResultBody {
    pub ok: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// Render a server payload for prompt injection: one line where possible,
/// JSON serialization otherwise, truncated with an ellipsis marker. The
/// untruncated value is kept separately as `raw` by the caller.
///
/// A server is untrusted input: its content must never be able to forge a
/// `<result>`/`</result>` tag and corrupt the spliced transcript (§3, §8
/// property 3), so any such substring is escaped before truncation.
pub fn render_content(data: &Value, truncate_bytes: usize) -> String {
    let rendered = match data {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    let rendered = sanitize_result_tags(&rendered);
    if rendered.len() <= truncate_bytes {
        rendered
    } else {
        let mut cut = truncate_bytes;
        while cut > 0 && !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}… [truncated, {} bytes total]", &rendered[..cut], rendered.len())
    }
}

/// Neutralize `<result` and `</result` so server content can never be
/// mistaken for a result tag once spliced into the transcript.
fn sanitize_result_tags(s: &str) -> String {
    s.replace("</result", "&lt;/result").replace("<result", "&lt;result")
}
