// ABOUTME: Audit trail — one immutable entry per terminal gate decision.
// ABOUTME: In-memory store with optional JSONL persistence, stats, filtering, and export.

pub mod entry;
pub mod export;
pub mod log;

pub use entry::*;
pub use export::*;
pub use log::*;
