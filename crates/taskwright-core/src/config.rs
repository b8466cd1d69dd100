//! Orchestrator configuration. Loaded from TOML at startup, falls back to
//! defaults if no config file exists. Every nested struct is independently
//! defaultable so a partial file only overrides what it names.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub session: SessionConfig,
    pub budgets: BudgetConfig,
    pub mcp: McpConfig,
    pub trajectory: TrajectoryConfig,
    pub catalog_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Size of the Runtime Controller's Session worker pool.
    pub max_concurrent_sessions: usize,
    /// Grace period before in-flight MCP calls are forcibly cancelled on shutdown.
    pub shutdown_grace_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub default_max_steps: u32,
    pub hard_max_steps: u32,
    /// Ring buffer size for loop-detection fingerprints.
    pub loop_window: usize,
    /// A fingerprint appearing this many times within the window is a loop.
    pub loop_repeat_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Canonical server name -> WebSocket URL.
    pub servers: HashMap<String, String>,
    pub connect_timeout_s: u64,
    pub per_call_timeout_s: u64,
    pub idle_timeout_s: u64,
    pub ping_interval_s: u64,
    pub reconnect_backoff_base_ms: u64,
    pub reconnect_backoff_cap_ms: u64,
    pub content_truncate_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grouping {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    pub output_dir: String,
    pub grouping: Grouping,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            budgets: BudgetConfig::default(),
            mcp: McpConfig::default(),
            trajectory: TrajectoryConfig::default(),
            catalog_path: "catalog.toml".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 4,
            shutdown_grace_s: 30,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_max_steps: 10,
            hard_max_steps: crate::types::HARD_MAX_STEPS,
            loop_window: 5,
            loop_repeat_threshold: 3,
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: HashMap::new(),
            connect_timeout_s: 10,
            per_call_timeout_s: 60,
            idle_timeout_s: 300,
            ping_interval_s: 30,
            reconnect_backoff_base_ms: 500,
            reconnect_backoff_cap_ms: 30_000,
            content_truncate_bytes: 4096,
        }
    }
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            output_dir: "trajectories".to_string(),
            grouping: Grouping::Daily,
        }
    }
}

impl OrchestratorConfig {
    /// Load config from a TOML file, falling back to defaults. Unknown keys
    /// in the file are tolerated by serde's default struct handling; they are
    /// simply ignored rather than rejected.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("failed to parse {}: {} — using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("no config at {} — using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_budgets() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.budgets.default_max_steps, 10);
        assert_eq!(cfg.budgets.hard_max_steps, 100);
        assert_eq!(cfg.session.max_concurrent_sessions, 4);
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let cfg = OrchestratorConfig::load(Path::new("/nonexistent/path/config.toml"));
        assert_eq!(cfg.mcp.reconnect_backoff_base_ms, 500);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let toml_str = r#"
            [session]
            max_concurrent_sessions = 8
        "#;
        let cfg: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.session.max_concurrent_sessions, 8);
        assert_eq!(cfg.session.shutdown_grace_s, 30);
        assert_eq!(cfg.budgets.default_max_steps, 10);
    }
}
