//! Initial prompt assembly (§4.6): the fixed policy preamble that teaches
//! the model the XML dialect, plus the catalog rendering and the task's
//! own description.

use taskwright_core::catalog::Catalog;
use taskwright_core::types::{TaskSpec, TaskType};

const POLICY_PREAMBLE: &str = r#"You solve tasks by reasoning step by step and, when you need real
information or computation, invoking tools through the dialect below.

- Wrap free reasoning in <think>...</think>. It is never executed.
- To call one tool: <server_name><action_name>payload</action_name></server_name><execute_tools />
- To call several at once with no ordering between them: wrap the calls in
  <parallel>...</parallel><execute_tools />
- To call several in order, where a later call may use an earlier one's
  result: wrap the calls in <sequential>...</sequential><execute_tools />,
  and reference a prior call's result with {results[k]} or {results[k].path}
  where k is the zero-based position of the earlier call.
- After <execute_tools />, STOP. Do not write what you expect the result to
  be — the real result will be given back to you as
  <result index="N">...</result>, and only then should you continue.
- Once you have your final answer, write it in <answer>...</answer> and
  stop. Do not call any more tools after that.
- Do not repeat an identical tool call expecting a different result; if a
  call fails, change your approach.
"#;

/// The system-role message: policy preamble + the catalog rendering
/// relevant to this task's type.
pub fn build_system_prompt(catalog: &Catalog, task_type: TaskType) -> String {
    let tools = catalog.render_for_prompt(Some(task_type));
    format!("{}\n# Available tools\n\n{}", POLICY_PREAMBLE, tools)
}

/// The user-role message: task description plus any context the caller
/// attached, rendered as a simple key: value listing.
pub fn build_user_message(task: &TaskSpec) -> String {
    if task.context.is_empty() {
        return task.description.clone();
    }
    let mut out = task.description.clone();
    out.push_str("\n\nContext:\n");
    let mut keys: Vec<&String> = task.context.keys().collect();
    keys.sort();
    for key in keys {
        out.push_str(&format!("- {}: {}\n", key, task.context[key]));
    }
    out
}
