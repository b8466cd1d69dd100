//! MCP Client Pool (C3): one WebSocket connection per server, shared
//! read-mostly across every Session.
//!
//! Each connection runs two background tasks — a reader and a writer — and
//! exposes a single `call` entry point that correlates requests to
//! responses by id. The only state shared across concurrent calls on one
//! connection is the id -> pending-response map, guarded by a mutex held
//! only for insertion and delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use taskwright_core::config::McpConfig;
use taskwright_core::types::{ResultStatus, ToolResult};

use crate::backoff::Backoff;
use crate::protocol::{render_content, CallRequest, CallResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
    Degraded,
    Reconnecting,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CallResponse>>>>;

struct Connection {
    server: String,
    url: String,
    next_id: AtomicU64,
    pending: PendingMap,
    outbound: Mutex<Option<tokio::sync::mpsc::UnboundedSender<WsMessage>>>,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    fn new(server: String, url: String) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            server,
            url,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbound: Mutex::new(None),
            state,
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Maintains one WebSocket connection per MCP server (§4.3). Connections are
/// established lazily on first `call` and kept alive across calls; a
/// dropped connection reconnects in the background with full-jitter
/// exponential backoff.
pub struct McpClientPool {
    connections: DashMap<String, Arc<Connection>>,
    config: McpConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("unknown server: {0}")]
    UnknownServer(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
}

impl McpClientPool {
    pub fn new(config: McpConfig) -> Self {
        Self {
            connections: DashMap::new(),
            config,
        }
    }

    fn connection(&self, server: &str) -> Result<Arc<Connection>, McpError> {
        if let Some(existing) = self.connections.get(server) {
            return Ok(existing.clone());
        }
        let url = self
            .config
            .servers
            .get(server)
            .ok_or_else(|| McpError::UnknownServer(server.to_string()))?
            .clone();
        let conn = Arc::new(Connection::new(server.to_string(), url));
        self.connections.insert(server.to_string(), conn.clone());
        Ok(conn)
    }

    /// Issue one tool call against `server`/`action`, honoring `timeout` as
    /// a hard per-call ceiling independent of connection health.
    pub async fn call(
        &self,
        server: &str,
        action: &str,
        args: Value,
        timeout: Duration,
    ) -> ToolResult {
        let started = std::time::Instant::now();
        let conn = match self.connection(server) {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::error(
                    0,
                    ResultStatus::TransportError,
                    format!("transport_error: {}", e),
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        if conn.state() != ConnectionState::Ready && conn.state() != ConnectionState::Degraded {
            if let Err(e) = self.ensure_connected(&conn).await {
                return ToolResult::error(
                    0,
                    ResultStatus::TransportError,
                    format!("transport_error: {}", e),
                    started.elapsed().as_millis() as u64,
                );
            }
        }

        let id = conn.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        conn.pending.lock().await.insert(id, tx);

        let request = CallRequest::call_tool(id, action, args);
        let frame = match serde_json::to_string(&request) {
            Ok(s) => s,
            Err(e) => {
                conn.pending.lock().await.remove(&id);
                return ToolResult::error(
                    0,
                    ResultStatus::TransportError,
                    format!("transport_error: failed to encode request: {}", e),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let sent = {
            let guard = conn.outbound.lock().await;
            match guard.as_ref() {
                Some(tx) => tx.send(WsMessage::Text(frame)).is_ok(),
                None => false,
            }
        };
        if !sent {
            conn.pending.lock().await.remove(&id);
            return ToolResult::error(
                0,
                ResultStatus::TransportError,
                "transport_error: connection closed".to_string(),
                started.elapsed().as_millis() as u64,
            );
        }

        let outcome = tokio::time::timeout(timeout, rx).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(response)) => {
                if response.result.ok {
                    let content = render_content(&response.result.data, self.config.content_truncate_bytes);
                    ToolResult::success(0, content, response.result.data, duration_ms)
                } else {
                    let msg = response
                        .result
                        .error
                        .unwrap_or_else(|| "tool reported failure".to_string());
                    ToolResult::error(0, ResultStatus::ToolError, msg, duration_ms)
                }
            }
            Ok(Err(_)) => {
                // Sender dropped: the reader task died, meaning the connection
                // dropped mid-call.
                ToolResult::error(
                    0,
                    ResultStatus::TransportError,
                    "transport_error: connection closed".to_string(),
                    duration_ms,
                )
            }
            Err(_) => {
                conn.pending.lock().await.remove(&id);
                ToolResult::error(0, ResultStatus::Timeout, "timeout".to_string(), duration_ms)
            }
        }
    }

    /// Cancel every call currently pending on `server`'s connection, if it
    /// exists. Used when a Session is cancelled mid-flight.
    pub async fn cancel_server(&self, server: &str) {
        if let Some(conn) = self.connections.get(server) {
            let mut pending = conn.pending.lock().await;
            pending.clear();
        }
    }

    /// Cancel every call pending on every connection. Used by the Runtime
    /// Controller once a shutdown's grace period elapses (§4.9).
    pub async fn cancel_all(&self) {
        let servers: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for server in servers {
            self.cancel_server(&server).await;
        }
    }

    async fn ensure_connected(&self, conn: &Arc<Connection>) -> Result<(), McpError> {
        let url = url::Url::parse(&conn.url)
            .map_err(|e| McpError::ConnectFailed(format!("{}: {}", conn.url, e)))?;

        let connect_fut = tokio_tungstenite::connect_async(url.as_str());
        let connect_result =
            tokio::time::timeout(Duration::from_secs(self.config.connect_timeout_s), connect_fut)
                .await;

        let (ws_stream, _) = match connect_result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(McpError::ConnectFailed(e.to_string())),
            Err(_) => return Err(McpError::ConnectFailed("connect timed out".to_string())),
        };

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<WsMessage>();
        *conn.outbound.lock().await = Some(out_tx.clone());
        let _ = conn.state.send(ConnectionState::Ready);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let ping_interval = Duration::from_secs(self.config.ping_interval_s.max(1));
        let ping_tx = out_tx;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if ping_tx.send(WsMessage::Ping(Vec::new())).is_err() {
                    break;
                }
            }
        });

        let pending = conn.pending.clone();
        let server = conn.server.clone();
        let state_tx = conn.state.clone();
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_s);
        tokio::spawn(async move {
            loop {
                let next = tokio::time::timeout(idle_timeout, ws_rx.next()).await;
                let msg = match next {
                    Ok(Some(Ok(m))) => m,
                    Ok(Some(Err(e))) => {
                        warn!(server = %server, "mcp connection error: {}", e);
                        break;
                    }
                    Ok(None) => {
                        debug!(server = %server, "mcp connection closed by peer");
                        break;
                    }
                    Err(_) => {
                        debug!(server = %server, "mcp connection idle timeout");
                        break;
                    }
                };

                if let WsMessage::Text(text) = msg {
                    if let Ok(response) = serde_json::from_str::<CallResponse>(&text) {
                        if let Some(tx) = pending.lock().await.remove(&response.id) {
                            let _ = tx.send(response);
                        }
                    }
                }
            }
            // Connection dropped: every pending call resolves as
            // transport_error because its sender is dropped here.
            pending.lock().await.clear();
            let _ = state_tx.send(ConnectionState::Reconnecting);
        });

        Ok(())
    }

    /// Background reconnect loop for one server, intended to run for the
    /// life of the process. Exits only when `cancel` fires.
    pub async fn run_reconnect_loop(self: Arc<Self>, server: String, cancel: CancellationToken) {
        let mut backoff = Backoff::new(
            self.config.reconnect_backoff_base_ms,
            self.config.reconnect_backoff_cap_ms,
        );
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let conn = match self.connection(&server) {
                Ok(c) => c,
                Err(_) => return,
            };
            if conn.state() == ConnectionState::Reconnecting || conn.state() == ConnectionState::Connecting {
                match self.ensure_connected(&conn).await {
                    Ok(()) => backoff.reset(),
                    Err(e) => {
                        warn!(server = %server, "reconnect failed: {}", e);
                        let delay = backoff.next_delay();
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    }
}
