//! Prepared store: the derived, locally-owned cache optimized for search
//!
//! Owns the on-disk schema (messages, contacts, FTS index, chat groups,
//! meta/checkpoints) that ingestion writes into and queries read from.
//! Writes run with relaxed durability (WAL, deferred sync) because
//! correctness comes from idempotent re-ingestion, not per-write fsync.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{ChatGroup, Checkpoint, Contact, PreparedMessage};
use crate::schema::{self, chat_groups, contacts, messages, messages_fts, meta};
use crate::source::DATE_FMT;

/// Type alias for the prepared-store connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
/// Type alias for a pooled connection
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Handle on the prepared store.
pub struct PreparedStore {
    pool: DbPool,
    path: PathBuf,
}

impl PreparedStore {
    /// Open (or create) the prepared store at `path`.
    ///
    /// On every open the stored schema version is compared against
    /// [`schema::SCHEMA_VERSION`]; a mismatch drops and recreates everything,
    /// since a stale schema makes the cache untrustworthy and the source
    /// database remains authoritative.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_sized(path, 8)
    }

    /// Open with an explicit pool size.
    pub fn open_sized(path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;",
            )
        });
        let pool = Pool::builder().max_size(max_connections.max(1)).build(manager)?;

        let store = Self {
            pool,
            path: path.to_path_buf(),
        };

        let conn = store.get_connection()?;
        store.ensure_schema(&conn)?;
        Ok(store)
    }

    /// Path of the backing database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a connection from the pool.
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Create tables if absent and enforce the schema-version invariant.
    fn ensure_schema(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(schema::CREATE_TABLES)?;

        let stored = meta_get(conn, meta::SCHEMA_VERSION)?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        if stored == 0 {
            // Fresh store.
            meta_set(conn, meta::SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
        } else if stored != schema::SCHEMA_VERSION {
            warn!(
                stored,
                expected = schema::SCHEMA_VERSION,
                "prepared-store schema version mismatch, rebuilding"
            );
            self.rebuild_on(conn)?;
        }

        Ok(())
    }

    /// Drop and recreate all prepared tables, resetting every checkpoint.
    ///
    /// Used for schema drift and for caller-requested full reindexes. Data
    /// loss is acceptable here: the prepared store is a derived cache.
    pub fn rebuild(&self) -> Result<()> {
        let conn = self.get_connection()?;
        self.rebuild_on(&conn)
    }

    fn rebuild_on(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(schema::DROP_TABLES)?;
        conn.execute_batch(schema::CREATE_TABLES)?;
        meta_set(conn, meta::SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
        meta_set(conn, meta::LAST_MESSAGE_ROWID, "0")?;
        meta_set(conn, meta::LAST_CONTACT_ROWID, "0")?;
        meta_set(
            conn,
            meta::LAST_FULL_REINDEX,
            &Local::now().format(DATE_FMT).to_string(),
        )?;
        info!(path = %self.path.display(), "prepared store rebuilt");
        Ok(())
    }

    /// Read both checkpoints.
    pub fn checkpoint(&self) -> Result<Checkpoint> {
        let conn = self.get_connection()?;
        Ok(Checkpoint {
            last_message_rowid: meta_get(&conn, meta::LAST_MESSAGE_ROWID)?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            last_contact_rowid: meta_get(&conn, meta::LAST_CONTACT_ROWID)?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        })
    }

    /// Most recent message timestamp in the prepared store, if any rows
    /// exist. Callers compare this against the source's max date to display
    /// staleness.
    pub fn last_processed_date(&self) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        let date: Option<String> = conn.query_row(
            &format!(
                "SELECT MAX({}) FROM {}",
                messages::DATE,
                messages::TABLE
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(date)
    }

    /// Total prepared message rows.
    pub fn message_count(&self) -> Result<i64> {
        let conn = self.get_connection()?;
        Ok(conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", messages::TABLE),
            [],
            |row| row.get(0),
        )?)
    }
}

/// Read one meta value.
pub fn meta_get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE {} = ?",
                meta::VALUE,
                meta::TABLE,
                meta::KEY
            ),
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Write one meta value (insert or replace).
pub fn meta_set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} ({}, {}) VALUES (?, ?)",
            meta::TABLE,
            meta::KEY,
            meta::VALUE
        ),
        params![key, value],
    )?;
    Ok(())
}

/// Upsert one prepared message and its FTS row.
///
/// `INSERT OR REPLACE` keyed by message id is what makes re-ingestion from
/// an earlier checkpoint safe: the same source row always lands on the same
/// prepared row, never a duplicate.
pub fn upsert_message(conn: &Connection, msg: &PreparedMessage) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            messages::TABLE,
            messages::MESSAGE_ID,
            messages::CHAT_ID,
            messages::GROUP_KEY,
            messages::DATE,
            messages::SENDER,
            messages::IS_FROM_ME,
            messages::TEXT,
            messages::HAS_LINK,
            messages::LINK_URL,
            messages::CONTENT_HASH,
            messages::GUID,
            messages::ASSOCIATED_TYPE,
            messages::ASSOCIATED_GUID,
        ),
        params![
            msg.message_id,
            msg.chat_id,
            msg.group_key,
            msg.date,
            msg.sender,
            msg.is_from_me,
            msg.text,
            msg.has_link,
            msg.link_url,
            msg.content_hash,
            msg.guid,
            msg.associated_type,
            msg.associated_guid,
        ],
    )?;

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (rowid, {}) VALUES (?, ?)",
            messages_fts::TABLE,
            messages_fts::TEXT
        ),
        params![msg.message_id, msg.text],
    )?;

    Ok(())
}

/// Upsert a contact, refining the display name without ever clearing it.
pub fn upsert_contact(conn: &Connection, contact: &Contact) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {table} ({id}, {ident}, {name}, {avatar}, {seen})
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT({id}) DO UPDATE SET
                 {ident} = excluded.{ident},
                 {name} = COALESCE(excluded.{name}, {table}.{name}),
                 {avatar} = COALESCE(excluded.{avatar}, {table}.{avatar}),
                 {seen} = excluded.{seen}",
            table = contacts::TABLE,
            id = contacts::HANDLE_ID,
            ident = contacts::IDENTIFIER,
            name = contacts::DISPLAY_NAME,
            avatar = contacts::AVATAR_REF,
            seen = contacts::LAST_SEEN,
        ),
        params![
            contact.handle_id,
            contact.identifier,
            contact.display_name,
            contact.avatar_ref,
            contact.last_seen,
        ],
    )?;
    Ok(())
}

/// Upsert a chat group, keeping the most recent last-message date.
pub fn upsert_chat_group(conn: &Connection, group: &ChatGroup) -> Result<()> {
    let chat_ids = serde_json::to_string(&group.chat_ids)?;
    conn.execute(
        &format!(
            "INSERT INTO {table} ({key}, {ids}, {count}, {name}, {last})
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT({key}) DO UPDATE SET
                 {ids} = excluded.{ids},
                 {count} = excluded.{count},
                 {name} = COALESCE(excluded.{name}, {table}.{name}),
                 {last} = MAX(COALESCE({table}.{last}, ''), COALESCE(excluded.{last}, ''))",
            table = chat_groups::TABLE,
            key = chat_groups::GROUP_KEY,
            ids = chat_groups::CHAT_IDS,
            count = chat_groups::MEMBER_COUNT,
            name = chat_groups::DISPLAY_NAME,
            last = chat_groups::LAST_MESSAGE_DATE,
        ),
        params![
            group.group_key,
            chat_ids,
            group.member_count,
            group.display_name,
            group.last_message_date,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trip() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(schema::CREATE_TABLES).expect("ddl");

        assert_eq!(meta_get(&conn, "missing").expect("get"), None);
        meta_set(&conn, "k", "1").expect("set");
        meta_set(&conn, "k", "2").expect("overwrite");
        assert_eq!(meta_get(&conn, "k").expect("get"), Some("2".to_string()));
    }

    #[test]
    fn contact_display_name_is_never_cleared() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(schema::CREATE_TABLES).expect("ddl");

        let named = Contact {
            handle_id: 1,
            identifier: "+15551234567".into(),
            display_name: Some("Phil".into()),
            avatar_ref: None,
            last_seen: Some("2024-01-01 00:00:00".into()),
        };
        upsert_contact(&conn, &named).expect("insert");

        let nameless = Contact {
            display_name: None,
            last_seen: Some("2024-02-01 00:00:00".into()),
            ..named.clone()
        };
        upsert_contact(&conn, &nameless).expect("upsert");

        let (name, seen): (Option<String>, Option<String>) = conn
            .query_row(
                "SELECT display_name, last_seen FROM contacts WHERE handle_id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("row");
        assert_eq!(name.as_deref(), Some("Phil"));
        assert_eq!(seen.as_deref(), Some("2024-02-01 00:00:00"));
    }
}
