//! Shared scaffolding for the Session Loop scenario tests: a scripted LLM
//! provider (one scripted round per `stream()` call) and a tiny in-process
//! MCP server speaking the real wire protocol over a loopback socket.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use taskwright_core::catalog::{ActionDocument, Catalog, CatalogDocument, ServerDocument};
use taskwright_core::types::ParameterDef;
use taskwright_llm::{ChatRequest, LlmError, LlmProvider, LlmResult, LlmStream, StreamDelta};

pub fn text(s: &str) -> StreamDelta {
    StreamDelta::Text(s.to_string())
}

pub fn done() -> StreamDelta {
    StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None }
}

/// An `LlmProvider` that plays back one scripted round of deltas per
/// `stream()` call, in order. Panics if asked for more rounds than scripted
/// — every scenario test names its rounds up front.
pub struct ScriptedProvider {
    rounds: Mutex<std::collections::VecDeque<Vec<StreamDelta>>>,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Vec<StreamDelta>>) -> Self {
        Self { rounds: Mutex::new(rounds.into_iter().collect()) }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, _request: ChatRequest, _cancel: Option<CancellationToken>) -> LlmResult<LlmStream> {
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("scripted provider exhausted".to_string()))?;
        let events: Vec<LlmResult<StreamDelta>> = round.into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Catalog exposing `microsandbox.execute_python` and `deepsearch.research`,
/// matching the servers named in the scenario catalog (spec §6.4).
pub fn scenario_catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::from_document(CatalogDocument {
            servers: vec![
                ServerDocument {
                    name: "microsandbox".into(),
                    aliases: vec![],
                    actions: vec![ActionDocument {
                        name: "execute_python".into(),
                        aliases: vec![],
                        description: String::new(),
                        parameters: vec![ParameterDef {
                            name: "code".into(),
                            param_type: "string".into(),
                            required: true,
                            description: String::new(),
                        }],
                        default_action: Some("code".into()),
                        task_types: vec![],
                    }],
                },
                ServerDocument {
                    name: "deepsearch".into(),
                    aliases: vec![],
                    actions: vec![ActionDocument {
                        name: "research".into(),
                        aliases: vec![],
                        description: String::new(),
                        parameters: vec![ParameterDef {
                            name: "query".into(),
                            param_type: "string".into(),
                            required: true,
                            description: String::new(),
                        }],
                        default_action: Some("query".into()),
                        task_types: vec![],
                    }],
                },
            ],
        })
        .unwrap(),
    )
}

/// One scripted reply for the mock MCP server, keyed by call order (not by
/// action name — scenarios issue calls in a known sequence).
pub struct MockReply {
    pub ok: bool,
    pub data: Value,
    pub error: Option<String>,
}

impl MockReply {
    pub fn ok(data: Value) -> Self {
        Self { ok: true, data, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { ok: false, data: Value::Null, error: Some(message.into()) }
    }
}

/// Start a one-connection mock MCP server that answers each incoming
/// `call_tool` request with the next scripted reply, in the order
/// requests arrive (parallel children may arrive in any relative order
/// across connections, but this harness only needs one connection per
/// server and each scenario issues its calls on a single connection).
/// Returns the `ws://` URL to connect to.
pub async fn start_mock_mcp_server(replies: Vec<MockReply>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(_) => return,
        };
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => return,
        };
        let (mut tx, mut rx) = ws.split();
        let mut replies = replies.into_iter();

        while let Some(Ok(WsMessage::Text(text))) = rx.next().await {
            let request: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let id = request.get("id").and_then(Value::as_u64).unwrap_or(0);
            let reply = match replies.next() {
                Some(r) => r,
                None => break,
            };
            let response = serde_json::json!({
                "id": id,
                "result": {
                    "ok": reply.ok,
                    "data": reply.data,
                    "error": reply.error,
                }
            });
            if tx.send(WsMessage::Text(response.to_string())).await.is_err() {
                break;
            }
        }
    });

    format!("ws://{}", addr)
}
