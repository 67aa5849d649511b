//! UTF-8 validation for text messages
//!
//! Backed by `simdutf8`, which picks SSE4.2/AVX2/NEON at runtime and
//! falls back to std elsewhere.

/// Validate that the input is valid UTF-8
#[inline]
pub fn validate_utf8(data: &[u8]) -> bool {
    simdutf8::basic::from_utf8(data).is_ok()
}

/// Validate UTF-8 that may end in the middle of a multi-byte sequence
///
/// Returns:
/// - (true, n) if all complete sequences are valid, where n is the number of
///   trailing bytes that form an incomplete sequence (0-3 bytes)
/// - (false, 0) if there's an invalid UTF-8 sequence
///
/// Used while reassembling fragmented text messages, where a character
/// can straddle a fragment boundary.
pub fn validate_utf8_incomplete(data: &[u8]) -> (bool, usize) {
    match simdutf8::compat::from_utf8(data) {
        Ok(_) => (true, 0),
        Err(e) if e.error_len().is_none() => (true, data.len() - e.valid_up_to()),
        Err(_) => (false, 0),
    }
}
