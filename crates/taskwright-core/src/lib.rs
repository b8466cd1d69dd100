//! Shared types, configuration, error taxonomy, and the Tool Catalog for
//! the reasoning orchestrator.

pub mod catalog;
pub mod config;
pub mod error;
pub mod types;

pub use catalog::Catalog;
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
