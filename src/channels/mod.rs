//! Outbound reply delivery.

pub mod imessage;

pub use imessage::AppleScriptSender;

use async_trait::async_trait;

use crate::error::ChannelError;

/// Sends a reply into an existing conversation.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Channel name, for logs.
    fn name(&self) -> &str;

    /// Deliver `text` to the chat identified by `chat_guid`.
    async fn deliver(&self, chat_guid: &str, text: &str) -> Result<(), ChannelError>;
}
