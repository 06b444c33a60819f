mod common;

use proptest::prelude::*;

use chat_prep::decoder::decode_body;
use chat_prep::handles::normalize_handle;
use chat_prep::normalize::{content_hash, extract_links};

use common::body_blob;

proptest! {
    /// Decoding is total: any byte soup yields Some or None, never a panic.
    #[test]
    fn decode_never_panics(blob in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = decode_body(&blob);
    }

    /// A well-formed archive round-trips its payload exactly, including
    /// payloads long enough to need the escaped length encoding.
    #[test]
    fn well_formed_blob_round_trips(text in "[a-zA-Z0-9 ,.!]{1,300}") {
        let decoded = decode_body(&body_blob(&text));
        prop_assert_eq!(decoded.as_deref(), Some(text.as_str()));
    }

    /// Truncating an archive anywhere must degrade to None, not panic.
    #[test]
    fn truncated_blob_never_panics(text in "[a-z ]{1,100}", cut in 0usize..64) {
        let mut blob = body_blob(&text);
        let keep = blob.len().saturating_sub(cut);
        blob.truncate(keep);
        let _ = decode_body(&blob);
    }

    /// Phone canonicalization keeps exactly the digits, shedding one
    /// leading country-code `1` when 11 or more digits remain.
    #[test]
    fn phone_normalization_matches_digit_contract(raw in "[+0-9(). -]{0,30}") {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        let normalized = normalize_handle(&raw);
        if digits.len() >= 11 && digits.starts_with('1') {
            prop_assert_eq!(normalized, digits[1..].to_string());
        } else {
            prop_assert_eq!(normalized, digits);
        }
    }

    /// Canonicalizing an email is idempotent.
    #[test]
    fn normalize_email_is_idempotent(local in "[a-zA-Z0-9.]{1,12}", domain in "[a-zA-Z0-9.]{1,12}") {
        let raw = format!("{local}@{domain}");
        let once = normalize_handle(&raw);
        prop_assert_eq!(normalize_handle(&once), once.clone());
    }

    /// The content hash is always 64 lowercase hex characters.
    #[test]
    fn content_hash_shape(text in ".{0,80}", sender in ".{0,20}") {
        let hash = content_hash(&text, &sender, "2024-01-01 00:00:00");
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    /// Link extraction never panics and only returns http(s) prefixes.
    #[test]
    fn extract_links_is_total(text in ".{0,200}") {
        for link in extract_links(&text) {
            prop_assert!(link.starts_with("http://") || link.starts_with("https://"));
        }
    }
}
