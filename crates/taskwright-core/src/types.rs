//! Shared data model: task specs, the tool catalog's schema types, the
//! invocation tree, per-call results, trajectory steps and the final
//! trajectory record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of work a task represents. Used only to filter the catalog
/// rendering injected into the system prompt (`Catalog::render_for_prompt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Code,
    Web,
    Reasoning,
    Research,
}

/// Immutable input to one Session. Created by ingestion (out of scope here);
/// consumed by the Runtime Controller and handed, unmutated, to exactly one
/// Session for the duration of its life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub description: String,
    pub task_type: TaskType,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

fn default_max_steps() -> u32 {
    10
}

fn default_timeout_s() -> u64 {
    300
}

/// Hard ceiling on `max_steps` regardless of what a task requests.
pub const HARD_MAX_STEPS: u32 = 100;

impl TaskSpec {
    /// `max_steps` clamped to the hard cap. The Session Loop uses this,
    /// never the raw field, when evaluating the step budget.
    pub fn effective_max_steps(&self) -> u32 {
        self.max_steps.min(HARD_MAX_STEPS)
    }
}

/// One named, typed parameter of a tool action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    #[serde(default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// Loaded once at startup from the catalog document (§6.4). Immutable for
/// the life of the process; reload requires a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub server_name: String,
    pub action_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub default_action: Option<String>,
    /// Task types this action should be advertised for; empty means every
    /// task type.
    #[serde(default)]
    pub task_types: Vec<TaskType>,
}

/// A parsed tool payload: either the raw tag body (not JSON) or one parsed
/// JSON value. `Raw` is wrapped into the catalog-defined default parameter
/// at resolve time (C2 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Raw(String),
    Json(serde_json::Value),
}

impl Payload {
    pub fn as_json(&self) -> serde_json::Value {
        match self {
            Payload::Raw(s) => serde_json::Value::String(s.clone()),
            Payload::Json(v) => v.clone(),
        }
    }
}

/// A single leaf call: one `<server><action>body</action></server>` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleCall {
    pub server: String,
    pub action: String,
    pub payload: Payload,
}

/// The product of the Tool Block Parser (C2). Nesting is at most one level:
/// a `Parallel`/`Sequential` block's children are always `Single`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Invocation {
    Single(SingleCall),
    Parallel { children: Vec<SingleCall> },
    Sequential { children: Vec<SingleCall> },
}

impl Invocation {
    pub fn child_count(&self) -> usize {
        match self {
            Invocation::Single(_) => 1,
            Invocation::Parallel { children } | Invocation::Sequential { children } => {
                children.len()
            }
        }
    }
}

/// Outcome of one tool execution. `content` is what the LLM sees;
/// `raw` is retained only for the trajectory and for placeholder
/// substitution in a later sequential sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    ToolError,
    Timeout,
    TransportError,
    Cancelled,
    /// The LLM's tool block was malformed (§7). Distinct from `ToolError`
    /// because the fault is in the model's own output, not in the server.
    ParseError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub index: usize,
    pub status: ResultStatus,
    pub content: String,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn success(index: usize, content: impl Into<String>, raw: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            index,
            status: ResultStatus::Success,
            content: content.into(),
            raw: Some(raw),
            duration_ms,
        }
    }

    pub fn error(index: usize, status: ResultStatus, content: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            index,
            status,
            content: content.into(),
            raw: None,
            duration_ms,
        }
    }

    /// The textual projection used by placeholder substitution: the
    /// structured `raw` payload (optionally narrowed by a dotted path) if
    /// present, else the rendered `content`.
    pub fn project(&self, path: Option<&str>) -> String {
        match (&self.raw, path) {
            (Some(raw), Some(path)) => project_path(raw, path)
                .map(render_json_leaf)
                .unwrap_or_else(|| self.content.clone()),
            (Some(raw), None) => render_json_leaf(raw.clone()),
            (None, _) => self.content.clone(),
        }
    }
}

fn project_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut cur = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        cur = cur.get(segment)?;
    }
    Some(cur)
}

fn render_json_leaf(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// The kind of one atomic trajectory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thought,
    ToolCall,
    Observation,
    Answer,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    Thought { text: String },
    ToolCall { raw_block: String, invocation: Invocation },
    Observation { results: Vec<ToolResult> },
    Answer { text: String },
    Error { reason: String, detail: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: u64,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub payload: StepPayload,
}

/// Why a Session stopped producing steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Answer,
    MaxSteps,
    MaxTokens,
    Timeout,
    LoopDetected,
    FatalError,
    /// The Session was cancelled (task-level abort or controller shutdown).
    /// Not named in the distilled spec's termination enum; added because
    /// §5 and §8 (property 8) require a distinguishable outcome for it.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Token/tool usage counters carried alongside a trajectory.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub tool_calls: u64,
}

/// The final, persisted record of one task's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryResult {
    pub task_id: String,
    pub success: bool,
    pub final_answer: Option<String>,
    pub steps: Vec<Step>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub usage: UsageCounters,
    pub termination_reason: TerminationReason,
}
