//! Shared fixtures: a synthetic source chat.db built in a temp directory.
#![allow(dead_code)] // each test binary uses a different slice of this

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tempfile::TempDir;

use chat_prep::source::COCOA_EPOCH_OFFSET;

/// A disposable source database shaped like the Messages schema.
pub struct SourceFixture {
    _dir: TempDir,
    pub source_path: PathBuf,
    pub store_path: PathBuf,
}

impl SourceFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let source_path = dir.path().join("chat.db");
        let store_path = dir.path().join("prepared.db");

        let conn = Connection::open(&source_path).expect("open source");
        conn.execute_batch(
            "CREATE TABLE handle (
                 ROWID INTEGER PRIMARY KEY,
                 id TEXT NOT NULL
             );
             CREATE TABLE chat (
                 ROWID INTEGER PRIMARY KEY,
                 display_name TEXT
             );
             CREATE TABLE chat_handle_join (
                 chat_id INTEGER NOT NULL,
                 handle_id INTEGER NOT NULL
             );
             CREATE TABLE message (
                 ROWID INTEGER PRIMARY KEY,
                 guid TEXT,
                 text TEXT,
                 attributedBody BLOB,
                 date INTEGER NOT NULL,
                 is_from_me INTEGER NOT NULL DEFAULT 0,
                 handle_id INTEGER,
                 associated_message_type INTEGER DEFAULT 0,
                 associated_message_guid TEXT
             );
             CREATE TABLE chat_message_join (
                 chat_id INTEGER NOT NULL,
                 message_id INTEGER NOT NULL
             );",
        )
        .expect("source ddl");

        Self {
            _dir: dir,
            source_path,
            store_path,
        }
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.source_path).expect("open source")
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn add_handle(&self, rowid: i64, identifier: &str) {
        self.conn()
            .execute(
                "INSERT INTO handle (ROWID, id) VALUES (?, ?)",
                params![rowid, identifier],
            )
            .expect("insert handle");
    }

    pub fn add_chat(&self, rowid: i64, display_name: Option<&str>, handle_rowids: &[i64]) {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO chat (ROWID, display_name) VALUES (?, ?)",
            params![rowid, display_name],
        )
        .expect("insert chat");
        for handle_id in handle_rowids {
            conn.execute(
                "INSERT INTO chat_handle_join (chat_id, handle_id) VALUES (?, ?)",
                params![rowid, handle_id],
            )
            .expect("insert membership");
        }
    }

    pub fn add_message(&self, msg: &FixtureMessage) {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO message
                 (ROWID, guid, text, attributedBody, date, is_from_me,
                  handle_id, associated_message_type, associated_message_guid)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                msg.rowid,
                msg.guid(),
                msg.text,
                msg.body,
                msg.date,
                i64::from(msg.is_from_me),
                msg.handle_id,
                msg.associated_type,
                msg.associated_guid,
            ],
        )
        .expect("insert message");
        if let Some(chat_id) = msg.chat_id {
            conn.execute(
                "INSERT INTO chat_message_join (chat_id, message_id) VALUES (?, ?)",
                params![chat_id, msg.rowid],
            )
            .expect("insert join");
        }
    }
}

/// One synthetic message row, with sensible defaults for the common case.
pub struct FixtureMessage {
    pub rowid: i64,
    pub chat_id: Option<i64>,
    pub text: Option<String>,
    pub body: Option<Vec<u8>>,
    pub date: i64,
    pub is_from_me: bool,
    pub handle_id: Option<i64>,
    pub associated_type: i64,
    pub associated_guid: Option<String>,
}

impl FixtureMessage {
    pub fn incoming(rowid: i64, chat_id: i64, handle_id: i64, text: &str, date: i64) -> Self {
        Self {
            rowid,
            chat_id: Some(chat_id),
            text: Some(text.to_string()),
            body: None,
            date,
            is_from_me: false,
            handle_id: Some(handle_id),
            associated_type: 0,
            associated_guid: None,
        }
    }

    pub fn outgoing(rowid: i64, chat_id: i64, text: &str, date: i64) -> Self {
        Self {
            rowid,
            chat_id: Some(chat_id),
            text: Some(text.to_string()),
            body: None,
            date,
            is_from_me: true,
            handle_id: None,
            associated_type: 0,
            associated_guid: None,
        }
    }

    pub fn reaction(
        rowid: i64,
        chat_id: i64,
        handle_id: i64,
        code: i64,
        target_rowid: i64,
        date: i64,
    ) -> Self {
        Self {
            rowid,
            chat_id: Some(chat_id),
            text: None,
            body: None,
            date,
            is_from_me: false,
            handle_id: Some(handle_id),
            associated_type: code,
            associated_guid: Some(format!("p:0/GUID-{target_rowid}")),
        }
    }

    pub fn guid(&self) -> String {
        format!("GUID-{}", self.rowid)
    }
}

/// Raw source timestamp (Cocoa-epoch nanoseconds) for a Unix second count.
pub fn raw_date(unix_secs: i64) -> i64 {
    (unix_secs - COCOA_EPOCH_OFFSET) * 1_000_000_000
}

/// Raw timestamps spaced one minute apart from a fixed base.
pub fn raw_minute(n: i64) -> i64 {
    raw_date(1_700_000_000 + n * 60)
}

/// A minimal typedstream archive carrying one string, laid out the way
/// Messages archives an attributed body.
pub fn body_blob(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut blob = Vec::new();
    blob.extend_from_slice(b"\x04\x0bstreamtyped\x81\xe8\x03\x84\x01\x40\x84\x84\x84");
    blob.extend_from_slice(b"\x0fNSMutableString\x01\x84\x84\x08NSString\x01\x94\x84\x01+");
    if bytes.len() < 0x81 {
        blob.push(u8::try_from(bytes.len()).expect("short length"));
    } else {
        blob.push(0x81);
        blob.extend_from_slice(&u16::try_from(bytes.len()).expect("u16 length").to_le_bytes());
    }
    blob.extend_from_slice(bytes);
    blob.extend_from_slice(b"\x86\x84\x02iI\x01");
    blob
}
