//! # aw-observability
//!
//! Logging infrastructure for Asset Warden.
//!
//! This crate initialises a `tracing` subscriber (plain or JSON output,
//! filtered through `RUST_LOG` when set) and provides span helpers for
//! ingestion runs.

pub mod logging;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
