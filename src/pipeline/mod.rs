//! Incremental ingestion pipeline.
//!
//! Outgoing messages flow through:
//! 1. `MessageSource::fetch_since()`: read-only query above the watermark
//! 2. `IngestState::process()`: watermark, dedup, trigger detection
//! 3. `Poller`: completion, formatting, delivery
//!
//! Nothing is persisted. A restart starts again from the newest message.

pub mod ingest;
pub mod poller;
pub mod types;

pub use ingest::{IngestState, SEEN_CAP};
pub use poller::{CycleReport, Poller, PollerConfig, StopOutcome, spawn_poller, stop_poller};
pub use types::{DecodedMessage, TriggerEvent};
