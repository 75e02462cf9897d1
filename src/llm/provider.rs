//! Completion provider trait.

use async_trait::async_trait;

use crate::error::LlmError;

/// Something that turns a prompt into a reply.
///
/// Built once at start-up and handed to the poller, so tests can swap in a
/// stub without touching the network.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Answer a single prompt. The reply is returned as the model wrote it.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}
