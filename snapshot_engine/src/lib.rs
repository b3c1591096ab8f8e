//! Resumable, partitioned snapshot engine for MongoDB-compatible
//! collections: plans `_id` ranges, streams them through a pool of reader
//! threads into a byte-bounded queue, and serializes the result to
//! rotated, optionally compressed JSONL/CSV/Parquet files, all checkpointed
//! in a durable manifest so an interrupted run can resume without
//! duplicating documents.

pub mod client;
pub mod config;
pub mod document;
mod error;
mod manifest;
mod orchestrator;
mod partitioner;
mod queue;
mod reader;
mod telemetry;
mod writer;

pub use error::{Error, ErrorKind, Result};
pub use manifest::ManifestDocument;
pub use orchestrator::{run, SnapshotOutcome};
pub use partitioner::plan as plan_partitions;
