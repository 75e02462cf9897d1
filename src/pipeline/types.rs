//! Shared types for the ingestion pipeline.

// ── Decoded message ─────────────────────────────────────────────────

/// An outgoing message whose text has been resolved.
///
/// The store only yields these when the text is non-empty after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// `message.ROWID`, increasing with insertion order.
    pub id: i64,
    /// Trimmed message text.
    pub text: String,
    /// `chat.guid`, used to address the reply.
    pub chat_guid: String,
    /// `chat.chat_identifier` (phone number, email, or group id), for logs.
    pub chat_identifier: String,
}

// ── Trigger event ───────────────────────────────────────────────────

/// A message that asked for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub id: i64,
    pub chat_guid: String,
    pub chat_identifier: String,
    /// Message text with the trigger prefix stripped and trimmed. Never empty.
    pub prompt: String,
}
