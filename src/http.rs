//! Callback-driven HTTP request parser
//!
//! Wraps `httparse` behind an incremental `execute` call: bytes are fed
//! as they arrive, the request head is retained until complete, and the
//! request is then reported through [`RequestHandler`] callbacks.
//!
//! `execute` returns how many of the fed bytes were consumed. A short
//! count means the request is malformed, except after an upgrade
//! request, where the remainder belongs to the new protocol.

use bytes::BytesMut;

/// Maximum number of headers accepted in one request
const MAX_HEADERS: usize = 32;

/// Receiver of parse events
pub trait RequestHandler {
    /// Request target
    fn on_url(&mut self, _url: &[u8]) {}

    /// Header name, always followed by one or more value calls
    fn on_header_field(&mut self, _name: &[u8]) {}

    /// Header value (or a piece of one)
    fn on_header_value(&mut self, _value: &[u8]) {}

    /// End of the request head; `upgrade` is set when the client asked to
    /// switch protocols
    fn on_headers_complete(&mut self, upgrade: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Accumulating the request head
    Head,
    /// Head parsed and reported
    Complete { upgrade: bool },
    /// Malformed input seen; consumes nothing further
    Failed,
}

/// Incremental HTTP/1.x request parser
#[derive(Debug)]
pub struct RequestParser {
    buf: BytesMut,
    max_head_size: usize,
    state: ParserState,
}

impl RequestParser {
    /// Create a parser retaining at most `max_head_size` bytes of request head
    pub fn new(max_head_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_head_size,
            state: ParserState::Head,
        }
    }

    /// Whether the parsed request asked for a protocol upgrade
    pub fn is_upgrade(&self) -> bool {
        matches!(self.state, ParserState::Complete { upgrade: true })
    }

    /// Whether the request head has been fully parsed
    pub fn is_complete(&self) -> bool {
        matches!(self.state, ParserState::Complete { .. })
    }

    /// Feed bytes to the parser, returning how many were consumed
    ///
    /// On an upgrade request the count stops at the end of the head. Bytes
    /// after the head of a plain request (a body or a pipelined request)
    /// are counted as consumed and discarded: the connection is answered
    /// once and closed.
    pub fn execute<H: RequestHandler>(&mut self, handler: &mut H, data: &[u8]) -> usize {
        match self.state {
            ParserState::Head => {}
            ParserState::Complete { upgrade: false } => return data.len(),
            ParserState::Complete { upgrade: true } | ParserState::Failed => return 0,
        }

        let retained = self.buf.len();
        self.buf.extend_from_slice(data);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let head_len = match req.parse(&self.buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > self.max_head_size {
                    self.state = ParserState::Failed;
                    return 0;
                }
                return data.len();
            }
            Err(_) => {
                self.state = ParserState::Failed;
                return 0;
            }
        };

        if head_len > self.max_head_size {
            self.state = ParserState::Failed;
            return 0;
        }

        handler.on_url(req.path.unwrap_or("/").as_bytes());

        let mut upgrade_header = false;
        let mut connection_upgrade = false;
        for header in req.headers.iter() {
            handler.on_header_field(header.name.as_bytes());
            handler.on_header_value(header.value);

            if header.name.eq_ignore_ascii_case("upgrade") {
                upgrade_header = !header.value.is_empty();
            } else if header.name.eq_ignore_ascii_case("connection") {
                connection_upgrade |= header
                    .value
                    .split(|b| *b == b',')
                    .any(|token| token.trim_ascii().eq_ignore_ascii_case(b"upgrade"));
            }
        }

        let upgrade = upgrade_header && connection_upgrade;
        handler.on_headers_complete(upgrade);

        self.state = ParserState::Complete { upgrade };
        self.buf = BytesMut::new();

        if upgrade {
            head_len - retained
        } else {
            data.len()
        }
    }
}
