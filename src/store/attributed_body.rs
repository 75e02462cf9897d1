//! Plain-text extraction from the `attributedBody` column.
//!
//! Newer versions of Messages leave `message.text` NULL and store the body
//! as an NSArchiver-serialised `NSAttributedString`. The string payload sits
//! right after the class name:
//!
//! ```text
//! NSString <ctrl> + <length-prefix> <UTF-8 text> 0x86 0x84 <attributes…>
//! ```
//!
//! Length prefix after `+`:
//! - `0x00..=0x7F` single-byte length, text at +1
//! - `0x81` 2-byte LE length, text at +3
//! - `0x82` 3-byte LE length, text at +4
//!
//! Only the plain-string case is handled. Anything else decodes to `None`.

/// Class markers, tried in order.
const CLASS_MARKERS: [&[u8]; 2] = [b"NSString", b"NSMutableString"];

/// Precedes the length prefix of the string payload.
const PAYLOAD_START: u8 = 0x2B;

/// Start of the trailing attribute archive.
const PAYLOAD_END: [u8; 2] = [0x86, 0x84];

/// Extract the plain text of an archived attributed string.
///
/// Total over all inputs: malformed or unrecognised blobs yield `None`.
pub fn decode_attributed_body(blob: &[u8]) -> Option<String> {
    if blob.is_empty() {
        return None;
    }

    let rest = CLASS_MARKERS.iter().find_map(|marker| {
        find(blob, marker).map(|idx| &blob[idx + marker.len()..])
    })?;

    let plus = rest.iter().position(|&b| b == PAYLOAD_START)?;
    let rest = &rest[plus + 1..];

    let skip = match *rest.first()? {
        0x00..=0x7F => 1,
        0x81 => 3,
        0x82 => 4,
        _ => 1,
    };
    let payload = rest.get(skip..).unwrap_or_default();

    let payload = match find(payload, &PAYLOAD_END) {
        Some(end) => &payload[..end],
        None => payload,
    };

    let text: String = payload.utf8_chunks().map(|chunk| chunk.valid()).collect();
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
