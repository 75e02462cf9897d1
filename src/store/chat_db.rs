//! Read-only access to the Messages database (`~/Library/Messages/chat.db`).
//!
//! Messages owns the file and writes to it constantly, so every call opens a
//! fresh read-only connection and drops it before returning. Nothing here
//! takes a write lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use crate::error::StoreError;
use crate::pipeline::DecodedMessage;
use crate::store::attributed_body::decode_attributed_body;

/// How long a query waits on a writer before reporting `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

const NEW_OUTGOING_SQL: &str = "
    SELECT m.ROWID, m.text, m.attributedBody, c.guid, c.chat_identifier
    FROM message m
    JOIN chat_message_join cmj ON m.ROWID = cmj.message_id
    JOIN chat c ON cmj.chat_id = c.ROWID
    WHERE m.ROWID > ?1 AND m.is_from_me = 1
    ORDER BY m.ROWID ASC";

/// A raw outgoing message row joined to its chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub id: i64,
    pub text: Option<String>,
    pub attributed_body: Option<Vec<u8>>,
    pub chat_guid: String,
    pub chat_identifier: String,
}

impl LogRow {
    /// Resolve the row's text and drop it if there is none.
    pub fn resolve(self) -> Option<DecodedMessage> {
        let text = resolve_text(self.text.as_deref(), self.attributed_body.as_deref())?;
        Some(DecodedMessage {
            id: self.id,
            text,
            chat_guid: self.chat_guid,
            chat_identifier: self.chat_identifier,
        })
    }
}

/// Pick the message text: the `text` column when it has any non-whitespace
/// content, otherwise whatever the archived body decodes to.
pub fn resolve_text(text: Option<&str>, attributed_body: Option<&[u8]>) -> Option<String> {
    if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(text.to_string());
    }
    attributed_body.and_then(decode_attributed_body)
}

/// Source of new outgoing messages.
///
/// Calls are blocking; the poller runs them on tokio's blocking pool.
pub trait MessageSource: Send + Sync {
    /// Highest message id currently in the store (0 when empty).
    fn latest_rowid(&self) -> Result<i64, StoreError>;

    /// Outgoing messages with id greater than `after_id`, ascending, with
    /// text resolved. Rows without text are left out.
    fn fetch_since(&self, after_id: i64) -> Result<Vec<DecodedMessage>, StoreError>;
}

/// Handle to a Messages database file. Holds only the path.
#[derive(Debug, Clone)]
pub struct ChatDb {
    path: PathBuf,
}

impl ChatDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/Library/Messages/chat.db`.
    pub fn default_path(home: &Path) -> PathBuf {
        home.join("Library").join("Messages").join("chat.db")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| match StoreError::from(e) {
            StoreError::Query(reason) => StoreError::Open {
                path: self.path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Raw rows after `after_id`, before text resolution.
    pub fn fetch_rows(&self, after_id: i64) -> Result<Vec<LogRow>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(NEW_OUTGOING_SQL)?;
        let rows = stmt
            .query_map(params![after_id], |row| {
                Ok(LogRow {
                    id: row.get(0)?,
                    text: text_column(row.get_ref(1)?),
                    attributed_body: blob_column(row.get_ref(2)?),
                    chat_guid: text_column(row.get_ref(3)?).unwrap_or_default(),
                    chat_identifier: text_column(row.get_ref(4)?).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Text stored in a column, dropping invalid UTF-8. SQLite does not enforce
/// encoding, so a single bad row must not fail the whole read.
fn text_column(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) => Some(bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()),
        _ => None,
    }
}

/// Blob stored in a column. Any other storage class counts as absent.
fn blob_column(value: ValueRef<'_>) -> Option<Vec<u8>> {
    match value {
        ValueRef::Blob(bytes) => Some(bytes.to_vec()),
        _ => None,
    }
}

impl MessageSource for ChatDb {
    fn latest_rowid(&self) -> Result<i64, StoreError> {
        let conn = self.open()?;
        let max: Option<i64> = conn.query_row("SELECT MAX(ROWID) FROM message", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    fn fetch_since(&self, after_id: i64) -> Result<Vec<DecodedMessage>, StoreError> {
        let rows = self.fetch_rows(after_id)?;
        let total = rows.len();
        let messages: Vec<DecodedMessage> = rows.into_iter().filter_map(LogRow::resolve).collect();
        if total > 0 {
            debug!(after_id, rows = total, with_text = messages.len(), "Fetched outgoing messages");
        }
        Ok(messages)
    }
}
