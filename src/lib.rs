//! iMessages AI: answers your own `@`-prefixed iMessages with a chat model.

pub mod channels;
pub mod config;
pub mod error;
pub mod format;
pub mod llm;
pub mod pipeline;
pub mod store;
