//! Usage event sink.
//!
//! Consumes usage events from per-namespace Kafka topics, validates them
//! against the namespace's meters, deduplicates them, and writes them to
//! ClickHouse in batches. Offsets are committed only after a batch is durably
//! stored, so delivery is at-least-once.
//!
//! ## Error logging
//!
//! Log errors with `error = ?e` or `{e:#}` so the cause chain stays visible.

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod context;
pub mod dead_letter;
pub mod dedupe;
pub mod error;
pub mod event;
pub mod health;
pub mod message;
pub mod meter;
pub mod metrics_consts;
pub mod namespace;
pub mod offset_tracker;
pub mod server;
pub mod sink;
pub mod storage;
pub mod test_utils;
pub mod topic;
pub mod validate;
