//! Per-connection protocol state machine
//!
//! A connection starts in [`Phase::Handshaking`], feeding socket bytes to
//! the HTTP parser. An upgrade request with a usable key moves it to
//! [`Phase::WebSocket`] after queueing the `101` response; anything else
//! queues a single HTTP response and moves it to [`Phase::Draining`],
//! where it stays until that response is written.
//!
//! Each call to [`Connection::on_ready`] is one unit of work. It returns
//! [`Step::Close`] when the owner should drop the connection.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use mio::Token;
use tracing::{debug, trace};

use crate::Config;
use crate::codec::{EventContext, MessageHandler, Outbox, Transport};
use crate::error::Error;
use crate::handshake::{self, KeyCapture};
use crate::http::{RequestHandler, RequestParser};
use crate::protocol::Message;

/// Handshake-phase state
#[derive(Debug)]
pub struct Handshake {
    parser: RequestParser,
    key: KeyCapture,
}

impl Handshake {
    fn new(config: &Config) -> Self {
        Self {
            parser: RequestParser::new(config.max_request_size),
            key: KeyCapture::new(),
        }
    }
}

/// Where a connection is in its lifetime
pub enum Phase {
    /// Reading the HTTP request
    Handshaking(Handshake),
    /// Upgraded; frames are echoed
    WebSocket(EventContext<EchoHandler>),
    /// Writing a final HTTP response before closing
    Draining,
}

impl Phase {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Handshaking(_) => "handshaking",
            Phase::WebSocket(_) => "websocket",
            Phase::Draining => "draining",
        }
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a connection was retired
#[derive(Debug)]
pub enum CloseCause {
    /// Peer closed before the handshake finished
    PeerClosed,
    /// Final HTTP response delivered
    ResponseSent,
    /// The HTTP parser rejected the request
    Malformed,
    /// Socket error outside the codec
    Io(io::ErrorKind),
    /// The codec reported a transport failure
    Codec(Error),
    /// The codec has nothing left to read or write
    SessionEnded,
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::PeerClosed => f.write_str("peer closed"),
            CloseCause::ResponseSent => f.write_str("response sent"),
            CloseCause::Malformed => f.write_str("malformed request"),
            CloseCause::Io(kind) => write!(f, "socket error: {kind}"),
            CloseCause::Codec(e) => write!(f, "{e}"),
            CloseCause::SessionEnded => f.write_str("websocket session ended"),
        }
    }
}

/// Outcome of one unit of work
#[derive(Debug)]
#[must_use]
pub enum Step {
    /// Keep the connection
    Continue,
    /// Drop the connection
    Close(CloseCause),
}

/// Re-queues every data message unchanged
#[derive(Debug, Default)]
pub struct EchoHandler {
    echoed: u64,
}

impl EchoHandler {
    /// Number of messages echoed so far
    pub fn echoed(&self) -> u64 {
        self.echoed
    }
}

impl MessageHandler for EchoHandler {
    fn on_message(&mut self, msg: &Message, outbox: &mut Outbox<'_>) {
        if msg.is_control() {
            return;
        }
        if outbox.queue(msg.clone()).is_ok() {
            self.echoed += 1;
            debug!(opcode = ?msg.opcode(), len = msg.as_bytes().len(), "echo");
        }
    }
}

enum Outcome {
    Upgrade(Bytes),
    Respond(Bytes),
}

/// Parser callbacks for one `execute` call
struct HandshakeCallbacks<'a> {
    key: &'a mut KeyCapture,
    outcome: Option<Outcome>,
}

impl RequestHandler for HandshakeCallbacks<'_> {
    fn on_url(&mut self, url: &[u8]) {
        trace!(url = %String::from_utf8_lossy(url), "request");
    }

    fn on_header_field(&mut self, name: &[u8]) {
        trace!(name = %String::from_utf8_lossy(name), "header");
        self.key.on_header_field(name);
    }

    fn on_header_value(&mut self, value: &[u8]) {
        self.key.on_header_value(value);
    }

    fn on_headers_complete(&mut self, upgrade: bool) {
        if !upgrade {
            trace!("plain request");
            self.outcome = Some(Outcome::Respond(handshake::build_page_response()));
            return;
        }

        self.outcome = Some(match self.key.take_accept_key() {
            Ok(accept) => {
                trace!(%accept, "upgrade accepted");
                Outcome::Upgrade(handshake::build_response(&accept))
            }
            Err(e) => {
                debug!(error = %e, "upgrade rejected");
                Outcome::Respond(handshake::build_bad_request_response())
            }
        });
    }
}

/// A client connection
pub struct Connection<S> {
    stream: S,
    token: Token,
    peer: SocketAddr,
    phase: Phase,
    /// HTTP response bytes not yet written
    outbound: BytesMut,
    ready: bool,
}

impl<S> Connection<S> {
    /// Wrap a freshly accepted stream
    pub fn new(stream: S, token: Token, peer: SocketAddr, config: &Config) -> Self {
        Self {
            stream,
            token,
            peer,
            phase: Phase::Handshaking(Handshake::new(config)),
            outbound: BytesMut::new(),
            ready: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Flag the connection for servicing in the current wake-up
    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// Clear and return the readiness flag
    pub fn take_ready(&mut self) -> bool {
        std::mem::take(&mut self.ready)
    }
}

impl<S: Transport> Connection<S> {
    /// Advance the state machine by one unit of work
    ///
    /// `scratch` receives raw socket reads during the handshake.
    pub fn on_ready(&mut self, scratch: &mut [u8], config: &Config) -> Step {
        match self.phase {
            Phase::Handshaking(_) => self.drive_handshake(scratch, config),
            Phase::WebSocket(_) => self.drive_websocket(),
            Phase::Draining => self.drive_draining(scratch, config),
        }
    }

    fn drive_handshake(&mut self, scratch: &mut [u8], config: &Config) -> Step {
        loop {
            let n = match self.stream.recv(scratch) {
                Ok(0) => return Step::Close(CloseCause::PeerClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Step::Continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Step::Close(CloseCause::Io(e.kind())),
            };

            let Phase::Handshaking(handshake) = &mut self.phase else {
                return Step::Continue;
            };
            let mut callbacks = HandshakeCallbacks {
                key: &mut handshake.key,
                outcome: None,
            };
            let consumed = handshake.parser.execute(&mut callbacks, &scratch[..n]);
            let outcome = callbacks.outcome;

            match outcome {
                Some(Outcome::Upgrade(response)) => {
                    self.outbound.extend_from_slice(&response);
                    let leftover = &scratch[consumed..n];
                    if !leftover.is_empty() {
                        trace!(len = leftover.len(), "frame bytes after request head");
                    }
                    let ctx = EventContext::server(EchoHandler::default(), config)
                        .with_buffered(leftover);
                    self.phase = Phase::WebSocket(ctx);
                    return self.drive_websocket();
                }
                Some(Outcome::Respond(response)) => {
                    self.outbound.extend_from_slice(&response);
                    self.phase = Phase::Draining;
                    return self.drive_draining(scratch, config);
                }
                None if consumed != n => return Step::Close(CloseCause::Malformed),
                None => {}
            }
        }
    }

    fn drive_websocket(&mut self) -> Step {
        match self.flush_outbound() {
            Ok(true) => {}
            Ok(false) => return Step::Continue,
            Err(cause) => return Step::Close(cause),
        }

        let Phase::WebSocket(ctx) = &mut self.phase else {
            return Step::Continue;
        };

        // A paused read left input in the socket that no later edge will
        // report, so keep pumping while sending reopens the read side.
        loop {
            let mut throttled = ctx.read_paused();
            if ctx.want_read() {
                if let Err(e) = ctx.recv(&mut self.stream) {
                    return Step::Close(CloseCause::Codec(e));
                }
                throttled |= ctx.read_paused();
            }
            if ctx.want_write() {
                if let Err(e) = ctx.send(&mut self.stream) {
                    return Step::Close(CloseCause::Codec(e));
                }
            }
            if !(throttled && ctx.want_read()) {
                break;
            }
        }

        if !ctx.want_read() && !ctx.want_write() {
            Step::Close(CloseCause::SessionEnded)
        } else {
            Step::Continue
        }
    }

    fn drive_draining(&mut self, scratch: &mut [u8], config: &Config) -> Step {
        match self.flush_outbound() {
            Ok(true) => {
                self.discard_input(scratch, config.max_request_size);
                Step::Close(CloseCause::ResponseSent)
            }
            Ok(false) => Step::Continue,
            Err(cause) => Step::Close(cause),
        }
    }

    /// Read and drop whatever the peer already sent, up to `limit` bytes
    ///
    /// Closing with unread input makes the kernel answer with a reset,
    /// which can destroy the response before the client reads it.
    fn discard_input(&mut self, scratch: &mut [u8], limit: usize) {
        let mut discarded = 0;
        while discarded < limit {
            match self.stream.recv(scratch) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        if discarded > 0 {
            trace!(token = self.token.0, discarded, "dropped input after response");
        }
    }

    /// Write pending HTTP bytes, returning whether all were written
    fn flush_outbound(&mut self) -> Result<bool, CloseCause> {
        while !self.outbound.is_empty() {
            match self.stream.send(&self.outbound) {
                Ok(0) => return Err(CloseCause::Io(io::ErrorKind::WriteZero)),
                Ok(n) => self.outbound.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CloseCause::Io(e.kind())),
            }
        }
        Ok(true)
    }
}
