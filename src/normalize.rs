//! Message field normalization
//!
//! Given the raw text field, the rich-text blob, the sender, and the
//! formatted timestamp, this module produces the canonical per-message
//! fields: the resolved display text, link extraction over it, and the
//! content hash external callers use for dedupe independent of row ids.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::decoder::decode_body;
use crate::models::LinkKind;

/// Domains whose links mark a message as a link of interest.
const INTEREST_DOMAINS: [&str; 2] = ["open.spotify.com", "spotify.link"];

/// Normalized fields for one message.
#[derive(Debug, Clone, Default)]
pub struct NormalizedFields {
    /// Resolved display text; empty string when nothing is recoverable
    pub final_text: String,
    /// True when the text contains a link of interest
    pub has_link: bool,
    /// First matching link, if any
    pub first_link_url: Option<String>,
    /// Stable fingerprint; absent for empty messages
    pub content_hash: Option<String>,
}

/// Normalize one message's fields.
///
/// Text precedence: a non-empty plain-text field wins verbatim; otherwise
/// the decoded blob text; otherwise empty string (never null). Empty
/// messages are not hashed since they are not meaningfully unique.
#[must_use]
pub fn normalize_fields(
    text: Option<&str>,
    body: Option<&[u8]>,
    sender: Option<&str>,
    date: &str,
) -> NormalizedFields {
    let final_text = match text {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => body.and_then(decode_body).unwrap_or_default(),
    };

    let links = extract_links(&final_text);
    let first_link_url = links.first().cloned();
    let has_link = links
        .iter()
        .any(|url| classify_link(url) == LinkKind::Spotify);

    let content_hash = if final_text.trim().is_empty() {
        None
    } else {
        Some(content_hash(&final_text, sender.unwrap_or(""), date))
    };

    NormalizedFields {
        final_text,
        has_link,
        first_link_url,
        content_hash,
    }
}

/// Extract http(s) links of interest from text, in order of appearance.
///
/// Allowlist-first: Spotify and YouTube links match always; other URLs are
/// included so downstream link aggregation can categorize them as `Other`.
#[must_use]
pub fn extract_links(text: &str) -> Vec<String> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
    let re = URL_RE.get_or_init(|| Regex::new(r"https?://[^\s<>\)\]]+").unwrap());

    re.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', '!', '?']).to_string())
        .collect()
}

/// Categorize an extracted link for downstream aggregation.
#[must_use]
pub fn classify_link(url: &str) -> LinkKind {
    let lowered = url.to_lowercase();
    if INTEREST_DOMAINS.iter().any(|d| lowered.contains(d)) {
        LinkKind::Spotify
    } else if lowered.contains("youtube.com") || lowered.contains("youtu.be") {
        LinkKind::YouTube
    } else {
        LinkKind::Other
    }
}

/// Identity form of a link: the URL with its query string stripped.
///
/// Share links carry per-send tracking parameters (`?si=...`) that would
/// make identical tracks compare unequal.
#[must_use]
pub fn link_identity(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// Stable one-way fingerprint over text + sender + timestamp.
///
/// Inputs are lowercased and trimmed so formatting drift between runs does
/// not change the hash.
#[must_use]
pub fn content_hash(text: &str, sender: &str, date: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.trim().to_lowercase());
    hasher.update("|");
    hasher.update(sender.trim().to_lowercase());
    hasher.update("|");
    hasher.update(date.trim());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_wins_over_blob() {
        let blob = b"\x04\x0bstreamtyped junk".to_vec();
        let fields = normalize_fields(Some("plain body"), Some(&blob), Some("x"), "2024-01-01 00:00:00");
        assert_eq!(fields.final_text, "plain body");
    }

    #[test]
    fn empty_message_gets_empty_text_and_no_hash() {
        let fields = normalize_fields(None, None, Some("x"), "2024-01-01 00:00:00");
        assert_eq!(fields.final_text, "");
        assert!(fields.content_hash.is_none());
        assert!(!fields.has_link);
    }

    #[test]
    fn spotify_link_round_trip() {
        let text = "check this out https://open.spotify.com/track/abc123?si=xyz";
        let links = extract_links(text);
        assert_eq!(links, vec!["https://open.spotify.com/track/abc123?si=xyz"]);
        assert_eq!(
            link_identity(&links[0]),
            "https://open.spotify.com/track/abc123"
        );

        let fields = normalize_fields(Some(text), None, None, "2024-01-01 00:00:00");
        assert!(fields.has_link);
        assert_eq!(fields.first_link_url.as_deref(), Some(links[0].as_str()));
    }

    #[test]
    fn link_classification() {
        assert_eq!(
            classify_link("https://open.spotify.com/track/abc"),
            LinkKind::Spotify
        );
        assert_eq!(classify_link("https://spotify.link/xyz"), LinkKind::Spotify);
        assert_eq!(classify_link("https://youtu.be/abc"), LinkKind::YouTube);
        assert_eq!(classify_link("https://example.com/a"), LinkKind::Other);
    }

    #[test]
    fn generic_link_does_not_set_interest_flag() {
        let fields = normalize_fields(
            Some("see https://example.com/page"),
            None,
            None,
            "2024-01-01 00:00:00",
        );
        assert!(!fields.has_link);
        assert_eq!(
            fields.first_link_url.as_deref(),
            Some("https://example.com/page")
        );
    }

    #[test]
    fn hash_is_stable_across_formatting() {
        let a = content_hash("Hello World ", "  +1555 ", "2024-01-01 00:00:00");
        let b = content_hash("hello world", "+1555", "2024-01-01 00:00:00");
        assert_eq!(a, b);
        let c = content_hash("hello world", "+1556", "2024-01-01 00:00:00");
        assert_ne!(a, c);
    }

    #[test]
    fn trailing_punctuation_is_trimmed_from_links() {
        let links = extract_links("listen: https://open.spotify.com/track/abc.");
        assert_eq!(links, vec!["https://open.spotify.com/track/abc"]);
    }
}
