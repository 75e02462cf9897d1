//! Watermark and dedup state for incremental ingestion.
//!
//! Every poll re-reads everything above the watermark, and polls can overlap
//! with rows already handled. `IngestState` turns those reads into an ordered
//! stream where each triggering row produces at most one event.
//!
//! Both fields are updated inside a single `process` call before any event is
//! returned. Changing when either one is updated independently of the other
//! breaks the at-most-once guarantee.

use std::collections::HashSet;

use tracing::debug;

use crate::pipeline::types::{DecodedMessage, TriggerEvent};

/// Seen ids kept before the set is cleared.
pub const SEEN_CAP: usize = 1000;

#[derive(Debug)]
pub struct IngestState {
    trigger_prefix: String,
    watermark: i64,
    seen: HashSet<i64>,
}

impl IngestState {
    /// Start from `watermark`; rows at or below it are treated as history.
    pub fn new(trigger_prefix: impl Into<String>, watermark: i64) -> Self {
        Self {
            trigger_prefix: trigger_prefix.into(),
            watermark,
            seen: HashSet::new(),
        }
    }

    /// Highest row id observed so far. Never decreases.
    pub fn watermark(&self) -> i64 {
        self.watermark
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn trigger_prefix(&self) -> &str {
        &self.trigger_prefix
    }

    /// Consume one poll's worth of rows (ascending by id) and return the
    /// trigger events they produce.
    pub fn process(&mut self, rows: &[DecodedMessage]) -> Vec<TriggerEvent> {
        let mut events = Vec::new();

        for row in rows {
            // Advance first, so non-triggering rows are never fetched again.
            if row.id > self.watermark {
                self.watermark = row.id;
            }

            if self.seen.contains(&row.id) {
                continue;
            }

            let Some(prompt) = self.extract_prompt(&row.text) else {
                continue;
            };

            self.seen.insert(row.id);
            if self.seen.len() > SEEN_CAP {
                debug!(cap = SEEN_CAP, "Seen set over capacity, clearing");
                self.seen.clear();
            }

            events.push(TriggerEvent {
                id: row.id,
                chat_guid: row.chat_guid.clone(),
                chat_identifier: row.chat_identifier.clone(),
                prompt: prompt.to_string(),
            });
        }

        events
    }

    fn extract_prompt<'a>(&self, text: &'a str) -> Option<&'a str> {
        let prompt = text.strip_prefix(self.trigger_prefix.as_str())?.trim();
        (!prompt.is_empty()).then_some(prompt)
    }
}
