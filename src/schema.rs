//! Prepared-store schema definitions
//!
//! This module provides constants for table and column names used with
//! rusqlite, plus the DDL executed on open and rebuild.

/// Expected schema version. A stored version that differs triggers a full
/// drop-and-recreate, because the prepared store is a derived cache and the
/// source chat.db remains authoritative.
pub const SCHEMA_VERSION: i64 = 3;

/// Prepared messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Primary key column (equals source ROWID)
    pub const MESSAGE_ID: &str = "message_id";
    /// Source chat id column
    pub const CHAT_ID: &str = "chat_id";
    /// Canonical group key column
    pub const GROUP_KEY: &str = "group_key";
    /// Local timestamp column
    pub const DATE: &str = "date";
    /// Raw sender handle column
    pub const SENDER: &str = "sender";
    /// Flag indicating the message was sent by the local user
    pub const IS_FROM_ME: &str = "is_from_me";
    /// Resolved display text column
    pub const TEXT: &str = "text";
    /// Link-of-interest flag column
    pub const HAS_LINK: &str = "has_link";
    /// First extracted link column
    pub const LINK_URL: &str = "link_url";
    /// Content hash column
    pub const CONTENT_HASH: &str = "content_hash";
    /// Message GUID column
    pub const GUID: &str = "guid";
    /// Tapback type column
    pub const ASSOCIATED_TYPE: &str = "associated_type";
    /// Tapback target GUID column
    pub const ASSOCIATED_GUID: &str = "associated_guid";
}

/// Full-text index over prepared message text
pub mod messages_fts {
    /// Virtual table name
    pub const TABLE: &str = "messages_fts";
    /// Indexed text column
    pub const TEXT: &str = "text";
}

/// Prepared contacts table schema
pub mod contacts {
    /// Table name
    pub const TABLE: &str = "contacts";
    /// Primary key column (equals source handle ROWID)
    pub const HANDLE_ID: &str = "handle_id";
    /// Raw contact string column
    pub const IDENTIFIER: &str = "identifier";
    /// Display name column
    pub const DISPLAY_NAME: &str = "display_name";
    /// Avatar reference column
    pub const AVATAR_REF: &str = "avatar_ref";
    /// Last-seen timestamp column
    pub const LAST_SEEN: &str = "last_seen";
}

/// Canonical chat-group index schema
pub mod chat_groups {
    /// Table name
    pub const TABLE: &str = "chat_groups";
    /// Primary key column
    pub const GROUP_KEY: &str = "group_key";
    /// JSON array of member source chat ids
    pub const CHAT_IDS: &str = "chat_ids";
    /// Participant count column
    pub const MEMBER_COUNT: &str = "member_count";
    /// Source chat display name column
    pub const DISPLAY_NAME: &str = "display_name";
    /// Most recent message timestamp column
    pub const LAST_MESSAGE_DATE: &str = "last_message_date";
}

/// Metadata/checkpoint table schema (one row per key)
pub mod meta {
    /// Table name
    pub const TABLE: &str = "meta";
    /// Key column
    pub const KEY: &str = "key";
    /// Value column
    pub const VALUE: &str = "value";

    /// Stored schema version
    pub const SCHEMA_VERSION: &str = "schema_version";
    /// Last processed source message ROWID
    pub const LAST_MESSAGE_ROWID: &str = "last_message_rowid";
    /// Last processed source handle ROWID
    pub const LAST_CONTACT_ROWID: &str = "last_contact_rowid";
    /// Timestamp of the last forced full reindex
    pub const LAST_FULL_REINDEX: &str = "last_full_reindex";
}

/// DDL for all prepared-store tables.
///
/// The FTS index is a self-contained FTS5 table keyed by message rowid so
/// that `INSERT OR REPLACE` keeps it consistent under idempotent re-ingest.
pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    message_id      INTEGER PRIMARY KEY,
    chat_id         INTEGER,
    group_key       TEXT NOT NULL,
    date            TEXT NOT NULL,
    sender          TEXT,
    is_from_me      INTEGER NOT NULL DEFAULT 0,
    text            TEXT NOT NULL DEFAULT '',
    has_link        INTEGER NOT NULL DEFAULT 0,
    link_url        TEXT,
    content_hash    TEXT,
    guid            TEXT,
    associated_type INTEGER NOT NULL DEFAULT 0,
    associated_guid TEXT
);

CREATE INDEX IF NOT EXISTS idx_messages_group_date ON messages(group_key, date);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
CREATE INDEX IF NOT EXISTS idx_messages_assoc_guid ON messages(associated_guid)
    WHERE associated_guid IS NOT NULL;

CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    text,
    tokenize = 'unicode61 remove_diacritics 2'
);

CREATE TABLE IF NOT EXISTS contacts (
    handle_id    INTEGER PRIMARY KEY,
    identifier   TEXT NOT NULL,
    display_name TEXT,
    avatar_ref   TEXT,
    last_seen    TEXT
);

CREATE INDEX IF NOT EXISTS idx_contacts_identifier ON contacts(identifier);

CREATE TABLE IF NOT EXISTS chat_groups (
    group_key         TEXT PRIMARY KEY,
    chat_ids          TEXT NOT NULL,
    member_count      INTEGER NOT NULL DEFAULT 0,
    display_name      TEXT,
    last_message_date TEXT
);
";

/// DDL that removes every prepared table, used by the rebuild path.
pub const DROP_TABLES: &str = "
DROP TABLE IF EXISTS messages;
DROP TABLE IF EXISTS messages_fts;
DROP TABLE IF EXISTS contacts;
DROP TABLE IF EXISTS chat_groups;
DROP TABLE IF EXISTS meta;
";
