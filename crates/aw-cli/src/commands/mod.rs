//! CLI command implementations.

pub mod ingest;

pub use ingest::{run_conflicts, run_ingest, IngestArgs};
