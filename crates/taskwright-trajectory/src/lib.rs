//! Trajectory Writer (C7): grouped, append-only JSONL persistence for
//! finished task trajectories, plus a tolerant reader for tests and
//! operational tooling.

pub mod reader;
pub mod writer;

pub use reader::read_records;
pub use writer::{RawRecord, StructuredRecord, TrajectoryWriter, WriteError};
