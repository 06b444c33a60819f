//! Rich-text blob decoder
//!
//! The source chat.db stores messages with no plain-text column populated as
//! an `attributedBody` blob: a `streamtyped` archive of the attributed-string
//! object graph. Only the body string is of interest here, so the decoder
//! walks the archive for the first `NSString`/`NSMutableString` payload and
//! extracts it.
//!
//! Decoding is a total function of the input bytes: malformed, truncated, or
//! unrecognized blobs yield `None` and never an error. Callers that decode
//! the same blob repeatedly memoize the result through [`crate::cache::LruCache`].

/// Magic bytes near the start of every typedstream archive.
const STREAMTYPED_MAGIC: &[u8] = b"streamtyped";

/// Archived class tag covering both string classes. A mutable string is
/// archived with `NSString` inlined right after it as the superclass name,
/// so one needle finds either layout.
const STRING_TAG: &[u8] = b"NSString";

/// Data marker that precedes the length-prefixed string payload.
const DATA_MARKER: u8 = 0x2B; // '+'

/// How far past the class tag the data marker may sit. The gap holds the
/// archiver's inline class-hierarchy bytes and is five bytes in practice.
const MARKER_WINDOW: usize = 12;

/// Extract the message body from an `attributedBody` blob.
///
/// Returns `None` for anything that is not a well-formed typedstream archive
/// carrying a non-empty string, including arbitrary garbage input.
#[must_use]
pub fn decode_body(blob: &[u8]) -> Option<String> {
    // The magic sits a couple of bytes in, after the stream version prefix.
    let header = blob.get(..16.min(blob.len()))?;
    find(header, STREAMTYPED_MAGIC)?;

    let tag_at = find(blob, STRING_TAG)?;
    let after_tag = tag_at + STRING_TAG.len();

    let window_end = (after_tag + MARKER_WINDOW).min(blob.len());
    let marker = blob[after_tag..window_end]
        .iter()
        .position(|&b| b == DATA_MARKER)?;
    let mut pos = after_tag + marker + 1;

    let len = read_length(blob, &mut pos)?;
    let payload = blob.get(pos..pos + len)?;
    let text = String::from_utf8_lossy(payload).into_owned();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Read a typedstream integer at `pos`, advancing past it.
///
/// Single byte below 0x81, or an `0x81`/`0x82` escape for little-endian
/// u16/u32 values.
fn read_length(blob: &[u8], pos: &mut usize) -> Option<usize> {
    let first = *blob.get(*pos)?;
    match first {
        0x81 => {
            let bytes = blob.get(*pos + 1..*pos + 3)?;
            *pos += 3;
            Some(usize::from(u16::from_le_bytes([bytes[0], bytes[1]])))
        }
        0x82 => {
            let bytes = blob.get(*pos + 1..*pos + 5)?;
            *pos += 5;
            usize::try_from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])).ok()
        }
        b if b < 0x81 => {
            *pos += 1;
            Some(usize::from(b))
        }
        _ => None,
    }
}

/// First index of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
