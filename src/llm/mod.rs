//! LLM integration.
//!
//! Uses the rig-core crate for HTTP transport and the `RigResponder` to
//! bridge a rig agent to our `Responder` trait.

pub mod provider;
mod rig_adapter;

pub use provider::Responder;
pub use rig_adapter::RigResponder;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// System prompt for replies that will be read in Messages.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant responding via iMessage. \
Keep responses concise and suitable for text messages. \
Use plain text only. Use numbered lists, bullet points (•), and short paragraphs for structure. \
NEVER use markdown: no **, no __, no ##, no ` backticks, no [links](url). Just plain text.";

/// Configuration for creating a responder.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u64,
}

/// Install the ring crypto provider for rustls. Must run before any TLS use.
///
/// A provider that is already installed is kept.
pub fn install_crypto_provider() -> Result<(), LlmError> {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return Ok(());
    }
    if rustls::crypto::ring::default_provider().install_default().is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err(LlmError::Tls("failed to install rustls crypto provider".to_string()));
    }
    Ok(())
}

/// Create the OpenAI-backed responder.
pub fn create_responder(config: &LlmConfig) -> Result<Arc<dyn Responder>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let agent = client
        .agent(config.model.as_str())
        .preamble(SYSTEM_PROMPT)
        .max_tokens(config.max_tokens)
        .build();

    tracing::info!(model = %config.model, max_tokens = config.max_tokens, "Using OpenAI");
    Ok(Arc::new(RigResponder::new(agent, "openai", &config.model)))
}
