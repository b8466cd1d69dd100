//! Invocation Executor (C4): turns a parsed `Invocation` into an ordered
//! `[ToolResult]`, handling parallel fan-out/fan-in, sequential placeholder
//! substitution, per-call and aggregate timeouts, and cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use taskwright_core::config::McpConfig;
use taskwright_core::types::{Invocation, Payload, ResultStatus, SingleCall, ToolResult};
use taskwright_mcp::McpClientPool;

use crate::block_parser::extract_placeholders;
use crate::placeholder::find_placeholder;

pub struct Executor {
    pool: Arc<McpClientPool>,
    config: McpConfig,
}

impl Executor {
    pub fn new(pool: Arc<McpClientPool>, config: McpConfig) -> Self {
        Self { pool, config }
    }

    /// Evaluate one `Invocation`, honoring `cancel` for in-flight calls.
    pub async fn execute(&self, invocation: &Invocation, cancel: CancellationToken) -> Vec<ToolResult> {
        match invocation {
            Invocation::Single(call) => {
                vec![self.call_one(call, 0, cancel).await]
            }
            Invocation::Parallel { children } => self.execute_parallel(children, cancel).await,
            Invocation::Sequential { children } => self.execute_sequential(children, cancel).await,
        }
    }

    async fn call_one(&self, call: &SingleCall, index: usize, cancel: CancellationToken) -> ToolResult {
        let timeout = Duration::from_secs(self.config.per_call_timeout_s);
        let args = call.payload.as_json();
        let fut = self.pool.call(&call.server, &call.action, args, timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => ToolResult::error(index, ResultStatus::Cancelled, "cancelled".to_string(), 0),
            result = fut => {
                let mut r = result;
                r.index = index;
                r
            }
        }
    }

    async fn execute_parallel(&self, children: &[SingleCall], cancel: CancellationToken) -> Vec<ToolResult> {
        let aggregate_cap = Duration::from_secs(self.config.per_call_timeout_s);
        let started = Instant::now();

        let futures = children.iter().enumerate().map(|(i, call)| {
            let cancel = cancel.clone();
            async move { self.call_one(call, i, cancel).await }
        });

        let gathered = futures::future::join_all(futures);
        let outcome = tokio::time::timeout(aggregate_cap, gathered).await;

        match outcome {
            Ok(results) => results,
            Err(_) => {
                // Aggregate deadline fired: every child becomes a timeout,
                // regardless of how far any individual call had progressed.
                let elapsed = started.elapsed().as_millis() as u64;
                (0..children.len())
                    .map(|i| ToolResult::error(i, ResultStatus::Timeout, "timeout".to_string(), elapsed))
                    .collect()
            }
        }
    }

    async fn execute_sequential(&self, children: &[SingleCall], cancel: CancellationToken) -> Vec<ToolResult> {
        let mut results: Vec<ToolResult> = Vec::with_capacity(children.len());

        for (i, call) in children.iter().enumerate() {
            if cancel.is_cancelled() {
                results.push(ToolResult::error(i, ResultStatus::Cancelled, "cancelled".to_string(), 0));
                continue;
            }

            // Abort every unexecuted sibling if any referenced prior result failed.
            let mut aborted_on: Option<usize> = None;
            for (k, _path) in extract_placeholders(&call.payload) {
                if let Some(prior) = results.get(k) {
                    if !prior.is_success() {
                        aborted_on = Some(k);
                        break;
                    }
                }
            }
            if let Some(k) = aborted_on {
                for j in i..children.len() {
                    results.push(ToolResult::error(
                        j,
                        ResultStatus::ToolError,
                        format!("aborted: prior step {} failed", k),
                        0,
                    ));
                }
                break;
            }

            let substituted = substitute_placeholders(&call.payload, &results);
            let resolved = SingleCall {
                server: call.server.clone(),
                action: call.action.clone(),
                payload: substituted,
            };
            results.push(self.call_one(&resolved, i, cancel.clone()).await);
        }

        results
    }
}

/// Replace every `{results[k](.path)?}` placeholder in `payload`'s
/// string-typed leaves with the textual projection of `results[k]`.
fn substitute_placeholders(payload: &Payload, results: &[ToolResult]) -> Payload {
    match payload {
        Payload::Raw(s) => Payload::Raw(substitute_in_string(s, results)),
        Payload::Json(serde_json::Value::Object(map)) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let new_v = match v {
                    serde_json::Value::String(s) => {
                        serde_json::Value::String(substitute_in_string(s, results))
                    }
                    other => other.clone(),
                };
                out.insert(k.clone(), new_v);
            }
            Payload::Json(serde_json::Value::Object(out))
        }
        Payload::Json(serde_json::Value::String(s)) => {
            Payload::Json(serde_json::Value::String(substitute_in_string(s, results)))
        }
        other => other.clone(),
    }
}

fn substitute_in_string(s: &str, results: &[ToolResult]) -> String {
    let mut out = String::new();
    let mut rest = s;
    loop {
        match find_placeholder(rest) {
            Some(m) => {
                out.push_str(&rest[..m.start]);
                let span = &rest[m.start..m.start + m.len];
                match results.get(m.index) {
                    Some(result) => out.push_str(&result.project(m.path.as_deref())),
                    None => out.push_str(span),
                }
                rest = &rest[m.start + m.len..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}
