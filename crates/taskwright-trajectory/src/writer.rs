//! Trajectory Writer (C7): appends two JSONL artifacts per finished task —
//! a raw record (transcript-level) and a structured record (full
//! `TrajectoryResult`) — into files grouped by day/week/month.
//!
//! Writes are append-only and serialized per target file by a mutex held
//! for the duration of one line's write, so concurrent Sessions never
//! interleave partial lines. On crash, at most the last line may be
//! truncated; the reader (`reader.rs`) tolerates that.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use taskwright_core::config::{Grouping, TrajectoryConfig};
use taskwright_core::types::TrajectoryResult;

/// One line of `raw_trajectories_<period>.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub task_description: String,
    pub duration_ms: u64,
    pub success: bool,
    pub final_answer: Option<String>,
    pub raw_transcript: String,
    pub transcript_length: usize,
}

/// One line of `trajectories_<period>.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub trajectory: TrajectoryResult,
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to create directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to open {0}: {1}")]
    Open(PathBuf, std::io::Error),
    #[error("failed to append to {0}: {1}")]
    Append(PathBuf, std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Process-wide trajectory writer. Cheap to clone (everything behind `Arc`);
/// the Runtime Controller holds one and hands a clone to every Session.
#[derive(Clone)]
pub struct TrajectoryWriter {
    output_dir: PathBuf,
    grouping: Grouping,
    locks: Arc<DashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl TrajectoryWriter {
    pub fn new(config: &TrajectoryConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.output_dir),
            grouping: config.grouping,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Persist both artifacts for one finished task. Description and raw
    /// transcript are supplied separately since `TrajectoryResult` itself
    /// doesn't carry the task's input description or the byte-level
    /// transcript — only the Session that produced them has those.
    pub async fn record(
        &self,
        task_description: &str,
        raw_transcript: &str,
        result: &TrajectoryResult,
    ) -> Result<(), WriteError> {
        let period = self.current_period();
        let dir = self.output_dir.join(&period);

        let raw = RawRecord {
            timestamp: Utc::now(),
            task_id: result.task_id.clone(),
            task_description: task_description.to_string(),
            duration_ms: result.total_duration_ms,
            success: result.success,
            final_answer: result.final_answer.clone(),
            raw_transcript: raw_transcript.to_string(),
            transcript_length: raw_transcript.len(),
        };
        let raw_path = dir.join(format!("raw_trajectories_{}.jsonl", period));
        self.append_line(&raw_path, &raw).await?;

        let structured = StructuredRecord {
            timestamp: Utc::now(),
            task_id: result.task_id.clone(),
            trajectory: result.clone(),
        };
        let structured_path = dir.join(format!("trajectories_{}.jsonl", period));
        self.append_line(&structured_path, &structured).await?;

        Ok(())
    }

    fn current_period(&self) -> String {
        let now = Utc::now();
        match self.grouping {
            Grouping::Daily => now.format("%Y-%m-%d").to_string(),
            Grouping::Weekly => now.format("%G-W%V").to_string(),
            Grouping::Monthly => now.format("%Y-%m").to_string(),
        }
    }

    async fn append_line<T: Serialize>(&self, path: &Path, record: &T) -> Result<(), WriteError> {
        let line = serde_json::to_string(record)?;
        let lock = self
            .locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let path = path.to_path_buf();
        let join_path = path.clone();
        tokio::task::spawn_blocking(move || append_line_sync(&path, &line))
            .await
            .map_err(|e| WriteError::Append(join_path, std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))??;
        Ok(())
    }
}

fn append_line_sync(path: &Path, line: &str) -> Result<(), WriteError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WriteError::CreateDir(parent.to_path_buf(), e))?;
    }
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| WriteError::Open(path.to_path_buf(), e))?;
    writeln!(f, "{}", line).map_err(|e| WriteError::Append(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwright_core::types::{TerminationReason, UsageCounters};

    fn sample_result() -> TrajectoryResult {
        TrajectoryResult {
            task_id: "t1".into(),
            success: true,
            final_answer: Some("42".into()),
            steps: Vec::new(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            total_duration_ms: 10,
            usage: UsageCounters::default(),
            termination_reason: TerminationReason::Answer,
        }
    }

    fn temp_dir() -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("taskwright-traj-test-{}-{}", std::process::id(), id))
    }

    #[tokio::test]
    async fn record_writes_both_files() {
        let dir = temp_dir();
        let config = TrajectoryConfig {
            output_dir: dir.to_string_lossy().to_string(),
            grouping: Grouping::Daily,
        };
        let writer = TrajectoryWriter::new(&config);
        writer.record("do a thing", "raw text", &sample_result()).await.unwrap();

        let period = writer.current_period();
        let raw_path = dir.join(&period).join(format!("raw_trajectories_{}.jsonl", period));
        let structured_path = dir.join(&period).join(format!("trajectories_{}.jsonl", period));
        assert!(raw_path.exists());
        assert!(structured_path.exists());

        let raw_content = std::fs::read_to_string(&raw_path).unwrap();
        assert!(raw_content.contains("\"task_id\":\"t1\""));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn concurrent_records_do_not_interleave_lines() {
        let dir = temp_dir();
        let config = TrajectoryConfig {
            output_dir: dir.to_string_lossy().to_string(),
            grouping: Grouping::Daily,
        };
        let writer = TrajectoryWriter::new(&config);

        let mut handles = Vec::new();
        for i in 0..8 {
            let writer = writer.clone();
            let mut result = sample_result();
            result.task_id = format!("t{}", i);
            handles.push(tokio::spawn(async move {
                writer.record("task", "transcript", &result).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let period = writer.current_period();
        let structured_path = dir.join(&period).join(format!("trajectories_{}.jsonl", period));
        let content = std::fs::read_to_string(&structured_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 8);
        for line in lines {
            assert!(serde_json::from_str::<serde_json::Value>(line).is_ok());
        }

        let _ = std::fs::remove_dir_all(&dir);
    }
}
