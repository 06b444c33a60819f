//! Query layer over the prepared store
//!
//! Search, filter, and aggregate operations consumed by the external API
//! layer: paged recent messages with reactions attached, the chat list
//! grouped by canonical identity, name search, advanced multi-criteria
//! search, and a streaming variant. When the prepared store's full-text
//! index has nothing usable, content matching falls back to scanning the
//! raw source and decoding blobs on demand: slower, never wrong.

use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::cache::LruCache;
use crate::decoder::decode_body;
use crate::error::{ChatPrepError, Result};
use crate::handles::lookup_variants;
use crate::metrics as prep_metrics;
use crate::models::{
    reaction_label, ChatSummary, MessageView, Reaction, SearchCriteria, StreamItem,
};
use crate::schema::{chat_groups, contacts, messages};
use crate::source::SourceStore;
use crate::store::PreparedStore;

/// Wall-clock bound on a streaming search.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// How many recent messages a chat-list entry carries.
const RECENT_PER_CHAT: usize = 5;

/// Decode-cache capacity; the same blob is decoded repeatedly across
/// overlapping fallback queries.
const DECODE_CACHE_CAPACITY: usize = 4096;

/// Query engine bound to one prepared store.
///
/// Constructed once and threaded through calls; there is deliberately no
/// process-wide "current store" state, so multiple stores can coexist in
/// one process (and in tests).
pub struct QueryEngine {
    store: Arc<PreparedStore>,
    decode_cache: Mutex<LruCache<i64, String>>,
}

impl QueryEngine {
    /// Create an engine over an opened prepared store.
    #[must_use]
    pub fn new(store: Arc<PreparedStore>) -> Self {
        Self::with_cache_capacity(store, DECODE_CACHE_CAPACITY)
    }

    /// Create an engine with an explicit decode-cache capacity.
    #[must_use]
    pub fn with_cache_capacity(store: Arc<PreparedStore>, capacity: usize) -> Self {
        Self {
            store,
            decode_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The prepared store this engine reads.
    #[must_use]
    pub fn store(&self) -> &Arc<PreparedStore> {
        &self.store
    }

    /// Chat list grouped by canonical identity, most recent first.
    pub fn chat_list(&self) -> Result<Vec<ChatSummary>> {
        let started = Instant::now();
        let conn = self.store.get_connection()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {key}, {ids}, {name}, NULLIF({last}, '')
             FROM {table}
             ORDER BY COALESCE({last}, '') DESC",
            table = chat_groups::TABLE,
            key = chat_groups::GROUP_KEY,
            ids = chat_groups::CHAT_IDS,
            name = chat_groups::DISPLAY_NAME,
            last = chat_groups::LAST_MESSAGE_DATE,
        ))?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (group_key, chat_ids_json, display_name, last_date) = row?;
            let chat_ids: Vec<i64> = serde_json::from_str(&chat_ids_json)?;
            summaries.push(self.group_summary(
                &conn,
                &group_key,
                chat_ids,
                display_name,
                last_date,
            )?);
        }

        prep_metrics::record_query("chat_list", started.elapsed());
        Ok(summaries)
    }

    /// Chats whose display name or members contain `query`, case-insensitive.
    pub fn search_chats_by_name(&self, query: &str) -> Result<Vec<ChatSummary>> {
        let needle = query.trim().to_lowercase();
        let mut chats = self.chat_list()?;
        if needle.is_empty() {
            return Ok(chats);
        }
        chats.retain(|chat| {
            chat.name.to_lowercase().contains(&needle)
                || chat
                    .members
                    .iter()
                    .any(|m| m.to_lowercase().contains(&needle))
        });
        Ok(chats)
    }

    /// Advanced multi-criteria search.
    ///
    /// Criteria combine with logical AND; an unset criterion filters
    /// nothing. `source_path` enables the raw-source fallback for content
    /// matching when the FTS index has no usable rows. A search exceeding
    /// the wall-clock bound returns [`ChatPrepError::QueryTimeout`] so the
    /// caller can narrow the criteria.
    pub fn advanced_search(
        &self,
        criteria: &SearchCriteria,
        source_path: Option<&PathBuf>,
    ) -> Result<Vec<ChatSummary>> {
        let started = Instant::now();
        let candidates = self.chat_list()?;
        let conn = self.store.get_connection()?;
        let fallback = self.content_fallback(&conn, criteria, source_path)?;

        let mut matches = Vec::new();
        for chat in candidates {
            if started.elapsed() >= STREAM_TIMEOUT {
                return Err(ChatPrepError::QueryTimeout(STREAM_TIMEOUT.as_secs()));
            }
            if self.chat_matches(&conn, &chat, criteria, fallback.as_ref())? {
                matches.push(chat);
                if let Some(limit) = criteria.limit {
                    if matches.len() >= limit {
                        break;
                    }
                }
            }
        }

        prep_metrics::record_query("advanced_search", started.elapsed());
        Ok(matches)
    }

    /// Streaming advanced search: per-chat results are pushed onto the
    /// returned channel as they match, ending with a `Done` or `TimedOut`
    /// sentinel. The producer thread is never killed; it observes the
    /// elapsed-time bound itself and stops, and a dropped receiver ends it
    /// early.
    #[must_use]
    pub fn stream_advanced_search(
        self: &Arc<Self>,
        criteria: SearchCriteria,
        source_path: Option<PathBuf>,
        timeout: Duration,
    ) -> Receiver<StreamItem> {
        let (tx, rx) = sync_channel::<StreamItem>(64);
        let engine = Arc::clone(self);

        std::thread::spawn(move || {
            let started = Instant::now();
            let outcome = engine.stream_worker(&criteria, source_path.as_ref(), timeout, started, &tx);
            let sentinel = match outcome {
                Ok(true) => StreamItem::Done,
                Ok(false) => StreamItem::TimedOut,
                Err(e) => {
                    warn!(error = %e, "streaming search failed");
                    StreamItem::Failed(e.to_string())
                }
            };
            let _ = tx.send(sentinel);
        });

        rx
    }

    /// Body of the streaming producer. Returns Ok(true) on completion,
    /// Ok(false) when the time bound was hit.
    fn stream_worker(
        &self,
        criteria: &SearchCriteria,
        source_path: Option<&PathBuf>,
        timeout: Duration,
        started: Instant,
        tx: &std::sync::mpsc::SyncSender<StreamItem>,
    ) -> Result<bool> {
        let candidates = self.chat_list()?;
        let conn = self.store.get_connection()?;
        let fallback = self.content_fallback(&conn, criteria, source_path)?;

        let mut sent = 0usize;
        for chat in candidates {
            if started.elapsed() > timeout {
                return Ok(false);
            }
            if self.chat_matches(&conn, &chat, criteria, fallback.as_ref())? {
                if tx.send(StreamItem::Chat(chat)).is_err() {
                    // Receiver gone; stop producing.
                    return Ok(true);
                }
                sent += 1;
                if criteria.limit.is_some_and(|limit| sent >= limit) {
                    break;
                }
            }
        }
        Ok(true)
    }

    /// Recent messages for a set of source chat ids, with reactions
    /// attached to their target messages via associated-GUID matching.
    pub fn recent_messages(
        &self,
        chat_ids: &[i64],
        limit: usize,
        offset: usize,
        ascending: bool,
        search: Option<&str>,
    ) -> Result<Vec<MessageView>> {
        let started = Instant::now();
        let conn = self.store.get_connection()?;

        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; chat_ids.len()].join(", ");

        let mut sql = format!(
            "SELECT {text}, {sender}, {date}, {from_me}, {guid}
             FROM {table}
             WHERE {chat} IN ({placeholders})
               AND {assoc} NOT BETWEEN 2000 AND 3005",
            table = messages::TABLE,
            text = messages::TEXT,
            sender = messages::SENDER,
            date = messages::DATE,
            from_me = messages::IS_FROM_ME,
            guid = messages::GUID,
            chat = messages::CHAT_ID,
            assoc = messages::ASSOCIATED_TYPE,
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = chat_ids
            .iter()
            .map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>)
            .collect();

        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            sql.push_str(&format!(
                " AND {} IN (SELECT rowid FROM messages_fts WHERE messages_fts MATCH ?)",
                messages::MESSAGE_ID
            ));
            params.push(Box::new(fts_phrase(term)));
        }

        sql.push_str(&format!(
            " ORDER BY {} {} LIMIT ? OFFSET ?",
            messages::DATE,
            if ascending { "ASC" } else { "DESC" }
        ));
        params.push(Box::new(limit as i64));
        params.push(Box::new(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut views = Vec::new();
        let mut guids = Vec::new();
        for row in rows {
            let (text, sender, date, is_from_me, guid) = row?;
            guids.push(guid);
            views.push(MessageView {
                text,
                sender,
                date,
                is_from_me,
                reactions: Vec::new(),
            });
        }

        self.attach_reactions(&conn, chat_ids, &guids, &mut views)?;
        prep_metrics::record_query("recent_messages", started.elapsed());
        Ok(views)
    }

    /// Fill in `reactions` for each view whose GUID is targeted by a
    /// tapback row. Removal codes resolve to no label and are dropped.
    fn attach_reactions(
        &self,
        conn: &Connection,
        chat_ids: &[i64],
        guids: &[Option<String>],
        views: &mut [MessageView],
    ) -> Result<()> {
        let placeholders = vec!["?"; chat_ids.len()].join(", ");
        let sql = format!(
            "SELECT {assoc_guid}, {assoc_type}, {sender}, {date}
             FROM {table}
             WHERE {chat} IN ({placeholders})
               AND {assoc_type} BETWEEN 2000 AND 3005
               AND {assoc_guid} IS NOT NULL",
            table = messages::TABLE,
            assoc_guid = messages::ASSOCIATED_GUID,
            assoc_type = messages::ASSOCIATED_TYPE,
            sender = messages::SENDER,
            date = messages::DATE,
            chat = messages::CHAT_ID,
        );

        let params: Vec<Box<dyn rusqlite::ToSql>> = chat_ids
            .iter()
            .map(|id| Box::new(*id) as Box<dyn rusqlite::ToSql>)
            .collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        for row in rows {
            let (assoc_guid, assoc_type, sender, date) = row?;
            let Some(kind) = reaction_label(assoc_type) else {
                continue;
            };
            let target = target_guid(&assoc_guid);
            for (view, guid) in views.iter_mut().zip(guids) {
                if guid.as_deref() == Some(target) {
                    view.reactions.push(Reaction {
                        kind: kind.to_string(),
                        sender: sender.clone(),
                        date: date.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Build one chat-list entry for a group row.
    fn group_summary(
        &self,
        conn: &Connection,
        group_key: &str,
        chat_ids: Vec<i64>,
        display_name: Option<String>,
        last_date: Option<String>,
    ) -> Result<ChatSummary> {
        let members: Vec<String> = group_key
            .strip_prefix("canon:")
            .map(|joined| joined.split(',').map(ToString::to_string).collect())
            .unwrap_or_default();

        // An explicit name set on the source chat wins; otherwise derive one
        // from the resolved members.
        let name = if let Some(name) = display_name {
            name
        } else if members.is_empty() {
            chat_ids
                .first()
                .map_or_else(|| group_key.to_string(), |id| format!("Chat {id}"))
        } else {
            members
                .iter()
                .map(|m| self.resolve_display_name(conn, m))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };

        let total_messages: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ? AND {} NOT BETWEEN 2000 AND 3005",
                messages::TABLE,
                messages::GROUP_KEY,
                messages::ASSOCIATED_TYPE,
            ),
            [group_key],
            |row| row.get(0),
        )?;

        let recent_messages = self.recent_messages(&chat_ids, RECENT_PER_CHAT, 0, false, None)?;

        Ok(ChatSummary {
            chat_id: group_key.to_string(),
            chat_ids,
            name,
            members,
            total_messages,
            last_message_date: last_date,
            recent_messages,
        })
    }

    /// Resolve a normalized member handle to a display name, trying each
    /// lookup variant against the contacts table before falling back to the
    /// handle itself.
    fn resolve_display_name(&self, conn: &Connection, member: &str) -> Result<String> {
        for variant in lookup_variants(member) {
            let name: Option<Option<String>> = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM {} WHERE {} = ?",
                        contacts::DISPLAY_NAME,
                        contacts::TABLE,
                        contacts::IDENTIFIER,
                    ),
                    [&variant],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(Some(display)) = name {
                if !display.trim().is_empty() {
                    return Ok(display);
                }
            }
        }
        Ok(member.to_string())
    }

    /// Does this chat satisfy every set criterion?
    fn chat_matches(
        &self,
        conn: &Connection,
        chat: &ChatSummary,
        criteria: &SearchCriteria,
        fallback: Option<&ContentFallback>,
    ) -> Result<bool> {
        if let Some(query) = criteria.query.as_deref().map(str::trim) {
            if !query.is_empty() {
                let needle = query.to_lowercase();
                let hit = chat.name.to_lowercase().contains(&needle)
                    || chat
                        .members
                        .iter()
                        .any(|m| m.to_lowercase().contains(&needle));
                if !hit {
                    return Ok(false);
                }
            }
        }

        for fragment in &criteria.participant_names {
            let needle = fragment.trim().to_lowercase();
            if needle.is_empty() {
                continue;
            }
            let mut hit = chat.name.to_lowercase().contains(&needle);
            if !hit {
                for member in &chat.members {
                    if member.to_lowercase().contains(&needle)
                        || self
                            .resolve_display_name(conn, member)?
                            .to_lowercase()
                            .contains(&needle)
                    {
                        hit = true;
                        break;
                    }
                }
            }
            if !hit {
                return Ok(false);
            }
        }

        if criteria.start_date.is_some() || criteria.end_date.is_some() {
            if !self.has_message_in_range(
                conn,
                &chat.chat_id,
                criteria.start_date.as_deref(),
                criteria.end_date.as_deref(),
            )? {
                return Ok(false);
            }
        }

        if let Some(content) = criteria.message_content.as_deref().map(str::trim) {
            if !content.is_empty() {
                let hit = match fallback {
                    Some(fallback) => fallback.chat_contains(self, &chat.chat_ids, content)?,
                    None => self.fts_group_contains(conn, &chat.chat_id, content)?,
                };
                if !hit {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    fn has_message_in_range(
        &self,
        conn: &Connection,
        group_key: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<bool> {
        let mut sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?",
            messages::TABLE,
            messages::GROUP_KEY,
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(group_key.to_string())];

        if let Some(start) = start {
            sql.push_str(&format!(" AND {} >= ?", messages::DATE));
            params.push(Box::new(start.to_string()));
        }
        if let Some(end) = end {
            // A bare day needs to include everything on that day.
            sql.push_str(&format!(" AND {} <= ?", messages::DATE));
            params.push(Box::new(format!("{end} 23:59:59")));
        }
        sql.push(')');

        let exists: bool =
            conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(exists)
    }

    /// FTS content test for one group.
    fn fts_group_contains(&self, conn: &Connection, group_key: &str, term: &str) -> Result<bool> {
        let exists: bool = conn.query_row(
            &format!(
                "SELECT EXISTS(
                     SELECT 1 FROM {table} m
                     WHERE m.{group} = ?
                       AND m.{id} IN (SELECT rowid FROM messages_fts WHERE messages_fts MATCH ?)
                 )",
                table = messages::TABLE,
                group = messages::GROUP_KEY,
                id = messages::MESSAGE_ID,
            ),
            rusqlite::params![group_key, fts_phrase(term)],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Decide whether content matching must bypass the FTS index.
    ///
    /// The index is unusable when it holds no rows while ingestion has never
    /// run or the store was just rebuilt, and equally when the source has
    /// message rows past the ingestion checkpoint that the index cannot know
    /// about yet. Both cases scan the raw source instead; slower,
    /// behaviorally equivalent, never incomplete.
    fn content_fallback(
        &self,
        conn: &Connection,
        criteria: &SearchCriteria,
        source_path: Option<&PathBuf>,
    ) -> Result<Option<ContentFallback>> {
        if criteria
            .message_content
            .as_deref()
            .map_or(true, |c| c.trim().is_empty())
        {
            return Ok(None);
        }
        let Some(path) = source_path else {
            return Ok(None);
        };

        let fts_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM messages_fts", [], |row| row.get(0))?;
        if fts_rows == 0 {
            debug!("full-text index empty, falling back to raw source scan");
            return Ok(Some(ContentFallback {
                source: SourceStore::open(path)?,
            }));
        }

        let source = SourceStore::open(path)?;
        let checkpoint = self.store.checkpoint()?.last_message_rowid;
        if source.max_message_rowid()? > checkpoint {
            debug!(checkpoint, "full-text index behind the source, falling back to raw source scan");
            return Ok(Some(ContentFallback { source }));
        }

        Ok(None)
    }

    /// Decode a blob through the bounded memoization cache.
    fn decode_cached(&self, message_id: i64, body: Option<&[u8]>) -> Option<String> {
        if let Ok(mut cache) = self.decode_cache.lock() {
            if let Some(text) = cache.get(&message_id) {
                prep_metrics::record_cache_lookup(true);
                return Some(text);
            }
        }
        prep_metrics::record_cache_lookup(false);
        let decoded = body.and_then(decode_body);
        match decoded {
            Some(text) => {
                if let Ok(mut cache) = self.decode_cache.lock() {
                    cache.put(message_id, text.clone());
                }
                Some(text)
            }
            None => {
                prep_metrics::record_decode_failure();
                None
            }
        }
    }
}

/// Raw-source content scan used when the FTS index cannot answer.
struct ContentFallback {
    source: SourceStore,
}

impl ContentFallback {
    /// True when any message in the given source chats contains `term`,
    /// decoding rich-text blobs on demand.
    fn chat_contains(&self, engine: &QueryEngine, chat_ids: &[i64], term: &str) -> Result<bool> {
        let needle = term.to_lowercase();
        let mut after = 0i64;
        loop {
            let rows = self.source.messages_after(after, 1000)?;
            if rows.is_empty() {
                return Ok(false);
            }
            after = rows.last().map_or(after, |m| m.rowid);

            for raw in rows {
                let in_chat = raw.chat_id.is_some_and(|id| chat_ids.contains(&id));
                if !in_chat {
                    continue;
                }
                let text = match raw.text.as_deref().filter(|t| !t.trim().is_empty()) {
                    Some(t) => t.to_string(),
                    None => engine
                        .decode_cached(raw.rowid, raw.body.as_deref())
                        .unwrap_or_default(),
                };
                if text.to_lowercase().contains(&needle) {
                    return Ok(true);
                }
            }
        }
    }
}

/// Quote a user term as an FTS5 phrase so punctuation cannot become query
/// syntax.
fn fts_phrase(term: &str) -> String {
    format!("\"{}\"", term.replace('"', " "))
}

/// Reaction target GUIDs arrive as `p:0/<guid>` or `bp:<guid>`; reduce to
/// the bare GUID for matching.
fn target_guid(assoc: &str) -> &str {
    let bare = assoc.rsplit_once('/').map_or(assoc, |(_, guid)| guid);
    bare.strip_prefix("bp:").unwrap_or(bare)
}
