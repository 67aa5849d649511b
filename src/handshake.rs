//! WebSocket handshake support
//!
//! - Capture of the client's `Sec-WebSocket-Key` from header callbacks
//! - Accept key derivation (Base64 of SHA-1 over key + GUID)
//! - The three responses the server ever writes over plain HTTP

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::{ACCEPT_KEY_LEN, CLIENT_KEY_LEN, WS_GUID};

/// Header carrying the client nonce
pub const KEY_HEADER: &str = "Sec-WebSocket-Key";

/// Page served to any request that does not ask for an upgrade
pub const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Generate the Sec-WebSocket-Accept key
///
/// This computes: Base64(SHA-1(key + GUID)). The key must be exactly
/// [`CLIENT_KEY_LEN`] bytes; anything else fails the handshake.
pub fn generate_accept_key(key: &[u8]) -> Result<String> {
    if key.len() != CLIENT_KEY_LEN {
        return Err(Error::HandshakeFailed("Sec-WebSocket-Key must be 24 bytes"));
    }

    let mut src = [0u8; CLIENT_KEY_LEN + WS_GUID.len()];
    src[..CLIENT_KEY_LEN].copy_from_slice(key);
    src[CLIENT_KEY_LEN..].copy_from_slice(WS_GUID.as_bytes());

    let hash = Sha1::digest(src);
    let accept = STANDARD.encode(hash);
    debug_assert_eq!(accept.len(), ACCEPT_KEY_LEN);
    Ok(accept)
}

/// Incremental capture of the `Sec-WebSocket-Key` header value
///
/// Fed from the parser's field/value callbacks. A field callback naming
/// the key header arms the capture and clears the buffer; value callbacks
/// append until the next field callback disarms it. Field and value may
/// arrive in separate parser invocations, and other headers may sit
/// anywhere around the key.
///
/// The header name is compared ASCII case-insensitively, as HTTP field
/// names are, so `sec-websocket-key` arms the capture too.
#[derive(Debug, Default)]
pub struct KeyCapture {
    armed: bool,
    seen: bool,
    buf: [u8; CLIENT_KEY_LEN],
    /// Bytes offered for the value, may exceed the buffer
    len: usize,
}

impl KeyCapture {
    /// Create an empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Header name callback
    pub fn on_header_field(&mut self, name: &[u8]) {
        self.armed = name.eq_ignore_ascii_case(KEY_HEADER.as_bytes());
        if self.armed {
            self.seen = true;
            self.len = 0;
            self.buf.fill(0);
        }
    }

    /// Header value callback
    pub fn on_header_value(&mut self, value: &[u8]) {
        if !self.armed {
            return;
        }
        let end = self.len + value.len();
        if end <= CLIENT_KEY_LEN {
            self.buf[self.len..end].copy_from_slice(value);
        }
        self.len = end;
    }

    /// Whether a key header has been seen
    pub fn is_captured(&self) -> bool {
        self.seen
    }

    /// Validate the captured key and derive the accept key from it
    ///
    /// The capture buffer is cleared whether or not derivation succeeds.
    pub fn take_accept_key(&mut self) -> Result<String> {
        let result = if !self.seen {
            Err(Error::HandshakeFailed("missing Sec-WebSocket-Key"))
        } else if self.len != CLIENT_KEY_LEN {
            Err(Error::HandshakeFailed("Sec-WebSocket-Key must be 24 bytes"))
        } else if STANDARD
            .decode(self.buf)
            .map_or(true, |nonce| nonce.len() != 16)
        {
            Err(Error::HandshakeFailed("Sec-WebSocket-Key is not a base64 nonce"))
        } else {
            generate_accept_key(&self.buf)
        };

        *self = Self::default();
        result
    }
}

/// Build the `101 Switching Protocols` response
pub fn build_response(accept_key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Build the response to a plain (non-upgrade) request
///
/// The connection is closed once this has been written.
pub fn build_page_response() -> Bytes {
    build_closing_response("200 OK", "text/html; charset=utf-8", INDEX_HTML)
}

/// Build the response to an upgrade request with an unusable key
pub fn build_bad_request_response() -> Bytes {
    build_closing_response(
        "400 Bad Request",
        "text/plain; charset=utf-8",
        "invalid WebSocket handshake\n",
    )
}

fn build_closing_response(status: &str, content_type: &str, body: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + body.len());

    buf.put_slice(b"HTTP/1.1 ");
    buf.put_slice(status.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Connection: close\r\n");
    buf.put_slice(b"Content-Type: ");
    buf.put_slice(content_type.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &[u8] = b"dGhlIHNhbXBsZSBub25jZQ==";
    const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    #[test]
    fn test_generate_accept_key() {
        // Test vector from RFC 6455
        let accept = generate_accept_key(SAMPLE_KEY).unwrap();
        assert_eq!(accept, SAMPLE_ACCEPT);
        assert_eq!(accept.len(), ACCEPT_KEY_LEN);
    }

    #[test]
    fn test_generate_accept_key_is_deterministic() {
        let first = generate_accept_key(b"AQIDBAUGBwgJCgsMDQ4PEA==").unwrap();
        let second = generate_accept_key(b"AQIDBAUGBwgJCgsMDQ4PEA==").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, SAMPLE_ACCEPT);
    }

    #[test]
    fn test_generate_accept_key_rejects_wrong_length() {
        assert!(generate_accept_key(b"short").is_err());
        assert!(generate_accept_key(&[b'A'; 25]).is_err());
    }

    #[test]
    fn test_capture_with_split_field_and_value() {
        let mut capture = KeyCapture::new();
        capture.on_header_field(b"Host");
        capture.on_header_value(b"example.com");
        capture.on_header_field(KEY_HEADER.as_bytes());
        capture.on_header_value(&SAMPLE_KEY[..10]);
        capture.on_header_value(&SAMPLE_KEY[10..]);
        capture.on_header_field(b"Upgrade");
        capture.on_header_value(b"websocket");

        assert!(capture.is_captured());
        assert_eq!(capture.take_accept_key().unwrap(), SAMPLE_ACCEPT);
        assert!(!capture.is_captured());
    }

    #[test]
    fn test_capture_matches_name_case_insensitively() {
        let mut capture = KeyCapture::new();
        capture.on_header_field(b"sec-websocket-key");
        capture.on_header_value(SAMPLE_KEY);
        assert_eq!(capture.take_accept_key().unwrap(), SAMPLE_ACCEPT);
    }

    #[test]
    fn test_capture_rejects_missing_key() {
        let mut capture = KeyCapture::new();
        capture.on_header_field(b"Upgrade");
        capture.on_header_value(b"websocket");
        assert!(matches!(
            capture.take_accept_key(),
            Err(Error::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_capture_rejects_short_and_long_keys() {
        let mut capture = KeyCapture::new();
        capture.on_header_field(KEY_HEADER.as_bytes());
        capture.on_header_value(b"dGhlIHNhbXBsZQ==");
        assert!(capture.take_accept_key().is_err());

        capture.on_header_field(KEY_HEADER.as_bytes());
        capture.on_header_value(b"dGhlIHNhbXBsZSBub25jZQ==AAAA");
        assert!(capture.take_accept_key().is_err());
    }

    #[test]
    fn test_capture_rejects_non_base64_key() {
        let mut capture = KeyCapture::new();
        capture.on_header_field(KEY_HEADER.as_bytes());
        capture.on_header_value(b"!!!!!!!!!!!!!!!!!!!!!!!!");
        assert!(capture.take_accept_key().is_err());
    }

    #[test]
    fn test_repeated_key_header_overwrites() {
        let mut capture = KeyCapture::new();
        capture.on_header_field(KEY_HEADER.as_bytes());
        capture.on_header_value(b"AQIDBAUGBwgJCgsMDQ4PEA==");
        capture.on_header_field(KEY_HEADER.as_bytes());
        capture.on_header_value(SAMPLE_KEY);
        assert_eq!(capture.take_accept_key().unwrap(), SAMPLE_ACCEPT);
    }

    #[test]
    fn test_build_response() {
        let response = build_response(SAMPLE_ACCEPT);
        let response_str = std::str::from_utf8(&response).unwrap();
        assert!(response_str.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response_str.contains("Upgrade: websocket\r\n"));
        assert!(response_str.contains("Connection: Upgrade\r\n"));
        assert!(response_str.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response_str.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_page_response_is_terminated() {
        let response = build_page_response();
        let mut headers = [httparse::EMPTY_HEADER; 8];
        let mut parsed = httparse::Response::new(&mut headers);
        let head_len = match parsed.parse(&response).unwrap() {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => panic!("response head incomplete"),
        };

        assert_eq!(parsed.code, Some(200));
        let length = parsed
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("Content-Length"))
            .map(|h| std::str::from_utf8(h.value).unwrap().parse::<usize>().unwrap())
            .unwrap();
        assert_eq!(response.len() - head_len, length);
        assert!(
            parsed
                .headers
                .iter()
                .any(|h| h.name == "Connection" && h.value == b"close")
        );
    }

    #[test]
    fn test_bad_request_response() {
        let response = build_bad_request_response();
        assert!(response.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }
}
