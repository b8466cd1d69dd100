//! Companion reader for trajectory JSONL files, used by tests and
//! operational tooling — never by the write path. Parses line-by-line and
//! skips any line that fails to deserialize, so a crash-truncated final
//! line does not poison an otherwise-valid file.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::warn;

/// Read every line of `path` as `T`, skipping (and logging) lines that
/// fail to parse. Returns an empty vec if the file doesn't exist.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => out.push(record),
            Err(e) => warn!(path = %path.display(), line = i, error = %e, "skipping unparsable trajectory line"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::StructuredRecord;

    fn temp_file() -> std::path::PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("taskwright-traj-reader-test-{}.jsonl", id))
    }

    #[test]
    fn missing_file_yields_empty_vec() {
        let records: Vec<StructuredRecord> = read_records(Path::new("/nonexistent/path.jsonl"));
        assert!(records.is_empty());
    }

    #[test]
    fn trailing_partial_line_is_skipped_not_fatal() {
        let path = temp_file();
        let good = serde_json::json!({
            "timestamp": "2026-07-26T00:00:00Z",
            "task_id": "t1",
            "trajectory": {
                "task_id": "t1",
                "success": true,
                "final_answer": "42",
                "steps": [],
                "started_at": "2026-07-26T00:00:00Z",
                "ended_at": "2026-07-26T00:00:01Z",
                "total_duration_ms": 1000,
                "usage": {"prompt_tokens": 1, "completion_tokens": 1, "tool_calls": 0},
                "termination_reason": "answer"
            }
        });
        let content = format!("{}\n{{\"task_id\": \"truncat", serde_json::to_string(&good).unwrap());
        std::fs::write(&path, content).unwrap();

        let records: Vec<StructuredRecord> = read_records(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].task_id, "t1");

        let _ = std::fs::remove_file(&path);
    }
}
