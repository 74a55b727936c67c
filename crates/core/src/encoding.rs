//! Decoding of raw subtitle bytes.
//! UTF-8 with a byte-order mark is tried first, then plain UTF-8, then a
//! single-byte legacy encoding that accepts any input.

use encoding_rs::{UTF_8, WINDOWS_1252};
use serde::Serialize;
use tracing::debug;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Which decoding succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceEncoding {
    Utf8Bom,
    Utf8,
    Windows1252,
}

/// Decode `bytes` with the first encoding that accepts them.
pub fn decode(bytes: &[u8]) -> (String, SourceEncoding) {
    if let Some(rest) = bytes.strip_prefix(BOM) {
        if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(rest) {
            return (text.into_owned(), SourceEncoding::Utf8Bom);
        }
    }
    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text.into_owned(), SourceEncoding::Utf8);
    }
    debug!("input is not UTF-8, decoding as windows-1252");
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    (text.into_owned(), SourceEncoding::Windows1252)
}
