//! Checkpointed ingestion engine
//!
//! Tails the source message and handle tables from their last-processed
//! ROWIDs, runs each row through normalization and chat canonicalization,
//! and writes batches into the prepared store. Every batch commits
//! atomically together with its checkpoint advance, so a failure mid-run
//! retains all fully-committed batches and a retry resumes from the last
//! good point instead of starting over.

use std::collections::HashMap;

use chrono::Local;
use tracing::{info, instrument, warn};

use crate::canonical::{canonical_key, ChatGrouping};
use crate::error::{ChatPrepError, Result};
use crate::metrics as prep_metrics;
use crate::models::{ChatGroup, Contact, IngestOutcome, PreparedMessage};
use crate::normalize::normalize_fields;
use crate::source::{format_source_date, SourceStore, DATE_FMT};
use crate::store::{
    meta_set, upsert_chat_group, upsert_contact, upsert_message, PreparedStore,
};
use crate::schema::meta;

/// Default page size for source reads.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Run one ingestion pass from `source` into `store`.
///
/// `force_rebuild` resets both checkpoints and drops/recreates the prepared
/// schema first. Returns the processed counts; zero counts mean the store
/// was already current.
#[instrument(skip_all, fields(source = %source.path().display()))]
pub fn ingest(
    source: &SourceStore,
    store: &PreparedStore,
    batch_size: usize,
    force_rebuild: bool,
) -> Result<IngestOutcome> {
    let batch_size = if batch_size == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        batch_size
    };

    if force_rebuild {
        store.rebuild()?;
    }

    // The grouping is recomputed from the live participant relation on every
    // run; the canonical key is a pure function of that set, so groupings
    // reproduce identically without any stored cross-reference.
    let participants = source.chat_participants()?;
    let grouping = ChatGrouping::build(&participants);

    // Participant count per group: the union of the member chats' normalized
    // handles, plus the local user.
    let mut group_members: HashMap<String, Vec<String>> = HashMap::new();
    for (key, chat_ids) in grouping.iter() {
        let handles = group_members.entry(key.to_string()).or_default();
        for chat_id in chat_ids {
            for handle in participants.get(chat_id).map_or(&[][..], Vec::as_slice) {
                if !handles.contains(handle) {
                    handles.push(handle.clone());
                }
            }
        }
    }

    // Explicit display names set on source chats win over derived names; a
    // group spanning several chats takes the first named one.
    let chat_names = source.chat_display_names()?;
    let mut group_names: HashMap<String, String> = HashMap::new();
    for (key, chat_ids) in grouping.iter() {
        if let Some(name) = chat_ids.iter().find_map(|id| chat_names.get(id)) {
            group_names.insert(key.to_string(), name.clone());
        }
    }

    seed_chat_groups(store, &grouping, &group_members, &group_names)?;

    let messages_processed = ingest_messages(
        source,
        store,
        &grouping,
        &group_members,
        &group_names,
        batch_size,
    )?;
    let contacts_processed = ingest_contacts(source, store, batch_size)?;

    info!(
        messages_processed,
        contacts_processed, force_rebuild, "ingestion pass complete"
    );

    Ok(IngestOutcome {
        prepared_db_path: store.path().display().to_string(),
        messages_processed,
        contacts_processed,
        rebuilt: force_rebuild,
    })
}

/// Ensure every canonical group has a row before messages reference it.
fn seed_chat_groups(
    store: &PreparedStore,
    grouping: &ChatGrouping,
    group_members: &HashMap<String, Vec<String>>,
    group_names: &HashMap<String, String>,
) -> Result<()> {
    let mut conn = store.get_connection()?;
    let tx = conn.transaction().map_err(ChatPrepError::from)?;
    for (key, chat_ids) in grouping.iter() {
        let members = group_members.get(key).map_or(0, Vec::len);
        upsert_chat_group(
            &tx,
            &ChatGroup {
                group_key: key.to_string(),
                chat_ids: chat_ids.to_vec(),
                member_count: members as i64 + 1, // participants plus the local user
                display_name: group_names.get(key).cloned(),
                last_message_date: None,
            },
        )?;
    }
    tx.commit().map_err(ChatPrepError::from)?;
    Ok(())
}

/// Tail the source message table from the checkpoint, batch by batch.
fn ingest_messages(
    source: &SourceStore,
    store: &PreparedStore,
    grouping: &ChatGrouping,
    group_members: &HashMap<String, Vec<String>>,
    group_names: &HashMap<String, String>,
    batch_size: usize,
) -> Result<usize> {
    let mut checkpoint = store.checkpoint().map(|c| c.last_message_rowid)?;
    let mut processed = 0usize;

    loop {
        let rows = source
            .messages_after(checkpoint, batch_size)
            .map_err(|e| ChatPrepError::Ingest(format!("source read failed: {e}")))?;
        if rows.is_empty() {
            break;
        }

        let batch_max = rows.last().map_or(checkpoint, |m| m.rowid);
        let mut group_dates: HashMap<String, String> = HashMap::new();

        let mut conn = store.get_connection()?;
        let tx = conn.transaction().map_err(ChatPrepError::from)?;

        for raw in &rows {
            let group_key = match raw.chat_id {
                Some(chat_id) => grouping
                    .key_for(chat_id)
                    .map_or_else(|| canonical_key(chat_id, &[]), str::to_string),
                // Orphan rows with no chat membership share a sink group.
                None => "chat:0".to_string(),
            };

            let date = format_source_date(raw.date);
            let fields = normalize_fields(
                raw.text.as_deref(),
                raw.body.as_deref(),
                raw.handle.as_deref(),
                &date,
            );

            let prepared = PreparedMessage {
                message_id: raw.rowid,
                chat_id: raw.chat_id,
                group_key: group_key.clone(),
                date: date.clone(),
                sender: raw.handle.clone(),
                is_from_me: raw.is_from_me,
                text: fields.final_text,
                has_link: fields.has_link,
                link_url: fields.first_link_url,
                content_hash: fields.content_hash,
                guid: raw.guid.clone(),
                associated_type: raw.associated_type,
                associated_guid: raw.associated_guid.clone(),
            };
            upsert_message(&tx, &prepared)?;

            // Track the highest timestamp per group in this same pass, so
            // group aggregates never need a second full scan.
            let entry = group_dates.entry(group_key).or_default();
            if date > *entry {
                *entry = date;
            }
        }

        for (key, date) in &group_dates {
            let members = group_members.get(key).map_or(0, Vec::len);
            upsert_chat_group(
                &tx,
                &ChatGroup {
                    group_key: key.clone(),
                    chat_ids: grouping.members_of(key).to_vec(),
                    member_count: members as i64 + 1,
                    display_name: group_names.get(key).cloned(),
                    last_message_date: Some(date.clone()),
                },
            )?;
        }

        // Checkpoint advances inside the same transaction as the batch, so a
        // crash can never leave it ahead of the committed rows.
        meta_set(&tx, meta::LAST_MESSAGE_ROWID, &batch_max.to_string())?;
        tx.commit().map_err(ChatPrepError::from)?;

        processed += rows.len();
        checkpoint = batch_max;
        prep_metrics::record_ingest_batch(rows.len());
    }

    Ok(processed)
}

/// Tail the source handle table by its own independent checkpoint.
fn ingest_contacts(
    source: &SourceStore,
    store: &PreparedStore,
    batch_size: usize,
) -> Result<usize> {
    let mut checkpoint = store.checkpoint().map(|c| c.last_contact_rowid)?;
    let mut processed = 0usize;
    let now = Local::now().format(DATE_FMT).to_string();

    loop {
        let handles = source
            .handles_after(checkpoint, batch_size)
            .map_err(|e| ChatPrepError::Ingest(format!("handle read failed: {e}")))?;
        if handles.is_empty() {
            break;
        }

        let batch_max = handles.last().map_or(checkpoint, |h| h.rowid);

        let mut conn = store.get_connection()?;
        let tx = conn.transaction().map_err(ChatPrepError::from)?;
        for handle in &handles {
            if handle.identifier.trim().is_empty() {
                warn!(rowid = handle.rowid, "skipping handle with empty identifier");
                continue;
            }
            upsert_contact(
                &tx,
                &Contact {
                    handle_id: handle.rowid,
                    identifier: handle.identifier.clone(),
                    display_name: None,
                    avatar_ref: None,
                    last_seen: Some(now.clone()),
                },
            )?;
        }
        meta_set(&tx, meta::LAST_CONTACT_ROWID, &batch_max.to_string())?;
        tx.commit().map_err(ChatPrepError::from)?;

        processed += handles.len();
        checkpoint = batch_max;
    }

    Ok(processed)
}
