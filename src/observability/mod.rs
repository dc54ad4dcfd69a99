//! Observability utilities for the workflow server.
//!
//! Console logging goes through `tracing`; this module adds the durable
//! side: one markdown transcript file per workflow run.

pub mod logger;

// Re-export main types for convenience
pub use logger::TranscriptLogger;
