//! Chat identity canonicalization
//!
//! The source database frequently carries several physical chat rows for the
//! same human conversation (a leftover of app-level chat merging). Grouping
//! by the normalized participant set collapses those rows into one logical
//! conversation with a key that is recomputable identically on every run.

use std::collections::{BTreeMap, BTreeSet};

use crate::handles::normalize_handle;

/// Key prefix for groups derived from a participant set.
const CANON_PREFIX: &str = "canon:";

/// Key prefix for the fallback when a chat has no resolvable participants.
const CHAT_PREFIX: &str = "chat:";

/// Deterministic mapping between source chats and canonical groups.
#[derive(Debug, Default)]
pub struct ChatGrouping {
    /// Source chat id to canonical key
    by_chat: BTreeMap<i64, String>,
    /// Canonical key to member chat ids, sorted
    members: BTreeMap<String, Vec<i64>>,
}

impl ChatGrouping {
    /// Group chats by their normalized participant sets.
    ///
    /// Input is the full `(source chat id, participant handles)` relation for
    /// the chats being ingested. Two chats with equal normalized participant
    /// sets receive the same key regardless of handle order or raw formatting.
    /// A chat with no resolvable participants keys off its own id so it still
    /// maps to exactly one group.
    #[must_use]
    pub fn build(participants: &BTreeMap<i64, Vec<String>>) -> Self {
        let mut grouping = Self::default();

        for (&chat_id, handles) in participants {
            let key = canonical_key(chat_id, handles);
            grouping
                .members
                .entry(key.clone())
                .or_default()
                .push(chat_id);
            grouping.by_chat.insert(chat_id, key);
        }

        grouping
    }

    /// Canonical key for a source chat id, if the chat was part of the build.
    #[must_use]
    pub fn key_for(&self, chat_id: i64) -> Option<&str> {
        self.by_chat.get(&chat_id).map(String::as_str)
    }

    /// Member chat ids for a canonical key.
    #[must_use]
    pub fn members_of(&self, key: &str) -> &[i64] {
        self.members.get(key).map_or(&[], Vec::as_slice)
    }

    /// Iterate over `(key, member chat ids)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[i64])> {
        self.members
            .iter()
            .map(|(key, ids)| (key.as_str(), ids.as_slice()))
    }

    /// Number of distinct groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when no chats were grouped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Compute the canonical key for one chat.
///
/// Pure function of the participant set: handles are normalized, collected
/// into a set (dropping empties), sorted, and joined. Sorting is what makes
/// the key order-independent.
#[must_use]
pub fn canonical_key(chat_id: i64, handles: &[String]) -> String {
    let normalized: BTreeSet<String> = handles
        .iter()
        .map(|h| normalize_handle(h))
        .filter(|h| !h.is_empty())
        .collect();

    if normalized.is_empty() {
        format!("{CHAT_PREFIX}{chat_id}")
    } else {
        let joined = normalized.into_iter().collect::<Vec<_>>().join(",");
        format!("{CANON_PREFIX}{joined}")
    }
}
