//! Read-only access to the source chat.db
//!
//! The source database is externally owned and may be written concurrently
//! by the Messages application. Connections are opened read-only with no
//! locking imposed, which trades blocking for possibly slightly stale reads.
//! Rows are mapped to typed records immediately after fetch so nothing
//! downstream touches positional indices.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Local, TimeZone};
use rusqlite::{params, Connection, OpenFlags, Row};
use tracing::debug;

use crate::error::{ChatPrepError, Result};
use crate::models::{RawHandle, RawMessage};

/// Cocoa epoch offset (2001-01-01 in Unix time).
pub const COCOA_EPOCH_OFFSET: i64 = 978_307_200;

/// Timestamp format used throughout the prepared store.
pub const DATE_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert a raw source timestamp to Unix seconds.
///
/// Modern databases store nanoseconds since the Cocoa epoch; pre-High-Sierra
/// databases stored seconds. Magnitude disambiguates the two.
#[must_use]
pub fn cocoa_to_unix(raw: i64) -> i64 {
    let secs = if raw.abs() >= 1_000_000_000_000 {
        raw / 1_000_000_000
    } else {
        raw
    };
    secs + COCOA_EPOCH_OFFSET
}

/// Format a raw source timestamp as a local timestamp string.
#[must_use]
pub fn format_source_date(raw: i64) -> String {
    let unix = cocoa_to_unix(raw);
    Local
        .timestamp_opt(unix, 0)
        .single()
        .map_or_else(String::new, |dt| dt.format(DATE_FMT).to_string())
}

const SELECT_MESSAGES_AFTER: &str = "
SELECT
    m.ROWID,
    m.guid,
    (SELECT cmj.chat_id FROM chat_message_join cmj
     WHERE cmj.message_id = m.ROWID LIMIT 1) AS chat_id,
    m.text,
    m.attributedBody,
    m.date,
    m.is_from_me,
    h.id AS handle,
    COALESCE(m.associated_message_type, 0),
    m.associated_message_guid
FROM message m
LEFT JOIN handle h ON m.handle_id = h.ROWID
WHERE m.ROWID > ?1
ORDER BY m.ROWID ASC
LIMIT ?2
";

const SELECT_HANDLES_AFTER: &str = "
SELECT h.ROWID, h.id
FROM handle h
WHERE h.ROWID > ?1
ORDER BY h.ROWID ASC
LIMIT ?2
";

const SELECT_CHAT_PARTICIPANTS: &str = "
SELECT chj.chat_id, h.id
FROM chat_handle_join chj
JOIN handle h ON h.ROWID = chj.handle_id
ORDER BY chj.chat_id
";

const SELECT_ALL_CHAT_IDS: &str = "SELECT c.ROWID FROM chat c ORDER BY c.ROWID";

const SELECT_CHAT_NAMES: &str = "
SELECT c.ROWID, c.display_name
FROM chat c
WHERE c.display_name IS NOT NULL AND c.display_name != ''
";

const SELECT_MAX_DATE: &str = "SELECT MAX(m.date) FROM message m";

const SELECT_MAX_ROWID: &str = "SELECT MAX(m.ROWID) FROM message m";

/// Read-only handle on the source chat.db.
pub struct SourceStore {
    conn: Connection,
    path: PathBuf,
}

impl SourceStore {
    /// Open the source database read-only.
    ///
    /// A missing or unreadable path surfaces as
    /// [`ChatPrepError::SourceUnavailable`] so callers can distinguish "no
    /// accessible source" from query failures.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, std::time::Duration::from_secs(5))
    }

    /// Open with an explicit busy timeout for contended reads.
    pub fn open_with_timeout(path: &Path, busy_timeout: std::time::Duration) -> Result<Self> {
        if !path.is_file() {
            return Err(ChatPrepError::SourceUnavailable(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|_| ChatPrepError::SourceUnavailable(path.to_path_buf()))?;
        conn.busy_timeout(busy_timeout)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Path this store was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch message rows with ROWID strictly greater than `after_rowid`,
    /// ascending, at most `limit` rows.
    pub fn messages_after(&self, after_rowid: i64, limit: usize) -> Result<Vec<RawMessage>> {
        let mut stmt = self.conn.prepare_cached(SELECT_MESSAGES_AFTER)?;
        let rows = stmt.query_map(params![after_rowid, limit as i64], map_raw_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        debug!(after_rowid, count = messages.len(), "fetched source messages");
        Ok(messages)
    }

    /// Fetch handle rows with ROWID strictly greater than `after_rowid`.
    pub fn handles_after(&self, after_rowid: i64, limit: usize) -> Result<Vec<RawHandle>> {
        let mut stmt = self.conn.prepare_cached(SELECT_HANDLES_AFTER)?;
        let rows = stmt.query_map(params![after_rowid, limit as i64], |row| {
            Ok(RawHandle {
                rowid: row.get(0)?,
                identifier: row.get(1)?,
            })
        })?;

        let mut handles = Vec::new();
        for row in rows {
            handles.push(row?);
        }
        Ok(handles)
    }

    /// Full `(chat id, participant handles)` relation.
    ///
    /// Every chat appears in the result, including chats with no membership
    /// rows, so the canonicalizer can assign each one a group.
    pub fn chat_participants(&self) -> Result<BTreeMap<i64, Vec<String>>> {
        let mut participants: BTreeMap<i64, Vec<String>> = BTreeMap::new();

        let mut chat_stmt = self.conn.prepare_cached(SELECT_ALL_CHAT_IDS)?;
        let chat_ids = chat_stmt.query_map([], |row| row.get::<_, i64>(0))?;
        for chat_id in chat_ids {
            participants.entry(chat_id?).or_default();
        }

        let mut stmt = self.conn.prepare_cached(SELECT_CHAT_PARTICIPANTS)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (chat_id, handle) = row?;
            participants.entry(chat_id).or_default().push(handle);
        }

        Ok(participants)
    }

    /// Explicit display names set on source chats, keyed by chat id.
    pub fn chat_display_names(&self) -> Result<BTreeMap<i64, String>> {
        let mut stmt = self.conn.prepare_cached(SELECT_CHAT_NAMES)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut names = BTreeMap::new();
        for row in rows {
            let (chat_id, name) = row?;
            names.insert(chat_id, name);
        }
        Ok(names)
    }

    /// Most recent message timestamp in the source, formatted, if any
    /// messages exist. Used by callers to compute staleness.
    pub fn max_message_date(&self) -> Result<Option<String>> {
        let raw: Option<i64> = self.conn.query_row(SELECT_MAX_DATE, [], |row| row.get(0))?;
        Ok(raw.map(format_source_date))
    }

    /// Highest message ROWID in the source, zero when the table is empty.
    /// Compared against the prepared checkpoint to detect an index that has
    /// fallen behind.
    pub fn max_message_rowid(&self) -> Result<i64> {
        let max: Option<i64> = self.conn.query_row(SELECT_MAX_ROWID, [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }
}

/// Map a source row to a typed `RawMessage`.
fn map_raw_message(row: &Row) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        rowid: row.get(0)?,
        guid: row.get(1)?,
        chat_id: row.get(2)?,
        text: row.get(3)?,
        body: row.get(4)?,
        date: row.get(5)?,
        is_from_me: row.get::<_, i64>(6)? != 0,
        handle: row.get(7)?,
        associated_type: row.get(8)?,
        associated_guid: row.get(9)?,
    })
}
