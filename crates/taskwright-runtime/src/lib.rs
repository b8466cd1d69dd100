//! Runtime Controller (C9): wires the Catalog, LLM provider, MCP pool and
//! Trajectory Writer into a bounded Session worker pool.

pub mod controller;

pub use controller::RuntimeController;
