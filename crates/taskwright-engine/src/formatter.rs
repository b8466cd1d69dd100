//! Result Formatter (C5): renders a block's `[ToolResult]` into the exact
//! text spliced back into the conversation as an assistant continuation.

use taskwright_core::types::ToolResult;

/// Render one invocation block's results as the `<result index="N">...`
/// text the LLM sees. Positional, independent of completion order —
/// callers are expected to have already sorted `results` by `index`.
pub fn format_results(results: &[ToolResult]) -> String {
    let mut out = String::new();
    for r in results {
        out.push_str(&format!(
            "<result index=\"{}\">{}</result>\n",
            r.index, r.content
        ));
    }
    out
}
