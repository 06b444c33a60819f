//! Data models for ingestion and the prepared store
//!
//! This module contains all data structures used throughout the application:
//! raw rows read from the source chat.db, prepared records owned by the
//! prepared store, and the view types returned by the query layer.

use serde::{Deserialize, Serialize};

/// A raw message row read from the source chat.db.
///
/// Externally owned and immutable; constructed immediately after the row
/// fetch so downstream code never touches positional tuples.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Source ROWID (monotonically increasing, not necessarily contiguous)
    pub rowid: i64,
    /// Message GUID
    pub guid: Option<String>,
    /// Chat the message belongs to (first membership row)
    pub chat_id: Option<i64>,
    /// Plain-text body, if the source stored one
    pub text: Option<String>,
    /// Proprietary rich-text blob (attributedBody)
    pub body: Option<Vec<u8>>,
    /// Raw timestamp: Cocoa-epoch offset, nanoseconds on modern databases
    pub date: i64,
    /// True if sent by the local user
    pub is_from_me: bool,
    /// Sender handle string (phone/email), absent for self
    pub handle: Option<String>,
    /// Tapback/reaction type; zero for standalone messages
    pub associated_type: i64,
    /// GUID of the message a reaction targets
    pub associated_guid: Option<String>,
}

/// A raw handle row read from the source chat.db.
#[derive(Debug, Clone)]
pub struct RawHandle {
    /// Source handle ROWID (stable across runs)
    pub rowid: i64,
    /// Contact string (phone number or email)
    pub identifier: String,
}

/// A normalized message as written to the prepared store.
///
/// Keyed by the source ROWID; re-ingesting the same row overwrites
/// deterministically (insert-or-replace, never append).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedMessage {
    /// Primary key, equals the source ROWID
    pub message_id: i64,
    /// Source chat the message belongs to
    pub chat_id: Option<i64>,
    /// Canonical group key assigned by the chat canonicalizer
    pub group_key: String,
    /// Local timestamp, `%Y-%m-%d %H:%M:%S`
    pub date: String,
    /// Sender handle string, stored raw (normalized at query time)
    pub sender: Option<String>,
    /// True if sent by the local user
    pub is_from_me: bool,
    /// Resolved display text (plain text wins over decoded blob)
    pub text: String,
    /// True when the text contains a link of interest
    pub has_link: bool,
    /// First matching link URL, if any
    pub link_url: Option<String>,
    /// SHA-256 fingerprint of text+sender+date; absent for empty messages
    pub content_hash: Option<String>,
    /// Message GUID, used as reaction target
    pub guid: Option<String>,
    /// Tapback/reaction type; zero for standalone messages
    pub associated_type: i64,
    /// GUID of the reaction target, if this row is a reaction
    pub associated_guid: Option<String>,
}

/// A contact as stored in the prepared store.
///
/// Upserted by ingestion; the display name may be refined by later runs but
/// is never destructively cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Primary key, equals the source handle ROWID
    pub handle_id: i64,
    /// Raw contact string (phone number or email)
    pub identifier: String,
    /// Best-known display name
    pub display_name: Option<String>,
    /// Opaque avatar reference populated by external callers
    pub avatar_ref: Option<String>,
    /// Timestamp of the last ingestion run that touched this contact
    pub last_seen: Option<String>,
}

/// A canonical conversation group in the prepared store.
///
/// The group key is a pure function of the normalized participant set, so
/// re-running ingestion from scratch reproduces identical groupings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatGroup {
    /// Canonical key: `canon:` + sorted normalized handles, or `chat:<id>`
    pub group_key: String,
    /// Physical source chat ids that share this participant set
    pub chat_ids: Vec<i64>,
    /// Number of participants in the group
    pub member_count: i64,
    /// Explicit display name set on a source chat, when one exists
    pub display_name: Option<String>,
    /// Most recent message timestamp within the group
    pub last_message_date: Option<String>,
}

/// Checkpoint state persisted in the prepared store's meta table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checkpoint {
    /// High-water mark over the source message table
    pub last_message_rowid: i64,
    /// High-water mark over the source handle table
    pub last_contact_rowid: i64,
}

/// Result of one ingestion invocation.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    /// Path of the prepared store that was written
    pub prepared_db_path: String,
    /// Message rows processed in this run
    pub messages_processed: usize,
    /// Contact rows processed in this run
    pub contacts_processed: usize,
    /// True when the schema was dropped and rebuilt before ingesting
    pub rebuilt: bool,
}

/// A chat-list entry grouped by canonical identity.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    /// Canonical group key
    pub chat_id: String,
    /// Member source chat ids
    pub chat_ids: Vec<i64>,
    /// Display name (joined participant names)
    pub name: String,
    /// Participant handle strings
    pub members: Vec<String>,
    /// Total messages across all member chats
    pub total_messages: i64,
    /// Most recent message timestamp
    pub last_message_date: Option<String>,
    /// A few most recent messages, newest first
    pub recent_messages: Vec<MessageView>,
}

/// A message as returned to the API layer, with reactions attached.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    /// Resolved display text
    pub text: String,
    /// Sender handle string
    pub sender: Option<String>,
    /// Local timestamp string
    pub date: String,
    /// True if sent by the local user
    pub is_from_me: bool,
    /// Reactions targeting this message
    pub reactions: Vec<Reaction>,
}

/// A tapback attached to a message.
#[derive(Debug, Clone, Serialize)]
pub struct Reaction {
    /// Human-readable label (loved, liked, ...)
    pub kind: String,
    /// Reacting sender handle string
    pub sender: Option<String>,
    /// Local timestamp string
    pub date: String,
}

/// Criteria for the advanced multi-criteria search.
///
/// Criteria combine with logical AND; an unset criterion is a no-op filter.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    /// Free-text query over chat names and participants
    pub query: Option<String>,
    /// Inclusive start date, `YYYY-MM-DD`
    pub start_date: Option<String>,
    /// Inclusive end date, `YYYY-MM-DD`
    pub end_date: Option<String>,
    /// Participant display-name or handle fragments
    pub participant_names: Vec<String>,
    /// Full-text match over message content
    pub message_content: Option<String>,
    /// Maximum number of chats to return
    pub limit: Option<usize>,
}

/// One item on a streaming search channel.
///
/// `Done`, `TimedOut`, and `Failed` are the completion sentinels; after any
/// of them, the producer sends nothing further.
#[derive(Debug)]
pub enum StreamItem {
    /// One matching chat
    Chat(ChatSummary),
    /// Search completed normally
    Done,
    /// Wall-clock bound exceeded; results so far are valid but incomplete
    TimedOut,
    /// Search aborted on an error; results so far are valid but incomplete
    Failed(String),
}

/// Category assigned to an extracted link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// open.spotify.com or spotify.link
    Spotify,
    /// youtube.com or youtu.be
    YouTube,
    /// Any other http(s) URL
    Other,
}

/// Map a source tapback code to a display label.
///
/// Codes 2000-2005 are additions; 3000-3005 are removals and yield `None`.
/// The mapping is version-sensitive in the source schema, so it lives here
/// as the single place to adjust.
#[must_use]
pub fn reaction_label(associated_type: i64) -> Option<&'static str> {
    match associated_type {
        2000 => Some("loved"),
        2001 => Some("liked"),
        2002 => Some("disliked"),
        2003 => Some("laughed"),
        2004 => Some("emphasized"),
        2005 => Some("questioned"),
        _ => None,
    }
}

/// True when the code marks any tapback row, including removals.
#[must_use]
pub fn is_reaction(associated_type: i64) -> bool {
    (2000..=3005).contains(&associated_type)
}
