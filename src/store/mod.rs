//! Messages database access: read-only queries and body decoding.

pub mod attributed_body;
pub mod chat_db;

pub use attributed_body::decode_attributed_body;
pub use chat_db::{ChatDb, LogRow, MessageSource, resolve_text};
