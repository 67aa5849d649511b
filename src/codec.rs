//! Event-driven WebSocket codec
//!
//! [`EventContext`] owns everything a server-side WebSocket session needs
//! between readiness events: the receive buffer, the frame parser, the
//! outbound message queue and the partially written frame. The owner
//! drives it with two pumps:
//!
//! - [`EventContext::recv`] reads until the transport would block, decodes
//!   frames and hands every complete message to the [`MessageHandler`]
//! - [`EventContext::send`] writes queued messages until the transport
//!   would block
//!
//! [`want_read`](EventContext::want_read) and
//! [`want_write`](EventContext::want_write) tell the owner whether either
//! pump still has work. Once both report `false` the session is over.
//!
//! Reading pauses while the outbound backlog is at or above
//! `Config::max_pending_bytes` and resumes once `send` drains it below.
//!
//! Ping, pong and close are answered here. The handler still sees them
//! and can ignore them.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::Config;
use crate::error::{CloseReason, Error, Result};
use crate::protocol::{Message, Protocol};

/// Raw byte I/O used by the codec
///
/// Both calls are non-blocking: "no progress possible right now" is
/// reported as `io::ErrorKind::WouldBlock`, and a zero-length read is end
/// of stream.
pub trait Transport {
    /// Read raw bytes
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write raw bytes, returning how many were accepted
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;
}

impl<T: Read + Write> Transport for T {
    #[inline]
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    #[inline]
    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write(data)
    }
}

/// Per-message callback
pub trait MessageHandler {
    /// Called for every complete message, control messages included
    fn on_message(&mut self, msg: &Message, outbox: &mut Outbox<'_>);
}

/// Outbound message queue
#[derive(Debug, Default)]
struct SendQueue {
    pending: VecDeque<Message>,
    /// Payload bytes held in `pending`
    bytes: usize,
    close_queued: bool,
}

impl SendQueue {
    fn push(&mut self, msg: Message) -> Result<()> {
        if self.close_queued {
            return Err(Error::InvalidState("close frame already queued"));
        }
        self.close_queued = msg.is_close();
        self.bytes += msg.as_bytes().len();
        self.pending.push_back(msg);
        Ok(())
    }

    fn pop(&mut self) -> Option<Message> {
        let msg = self.pending.pop_front()?;
        self.bytes -= msg.as_bytes().len();
        Some(msg)
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Handle given to a [`MessageHandler`] for queueing replies
pub struct Outbox<'a> {
    queue: &'a mut SendQueue,
}

impl Outbox<'_> {
    /// Queue a message for sending
    ///
    /// Fails once a close frame has been queued.
    pub fn queue(&mut self, msg: Message) -> Result<()> {
        self.queue.push(msg)
    }
}

/// Server-side WebSocket session state
pub struct EventContext<H> {
    protocol: Protocol,
    handler: H,
    read_buf: BytesMut,
    scratch: Box<[u8]>,
    queue: SendQueue,
    /// Encoded frame partially written to the transport
    in_flight: Bytes,
    in_flight_close: bool,
    max_pending: usize,
    read_enabled: bool,
    write_enabled: bool,
    messages: Vec<Message>,
}

impl<H: MessageHandler> EventContext<H> {
    /// Create a server session using the limits in `config`
    pub fn server(handler: H, config: &Config) -> Self {
        Self {
            protocol: Protocol::new(config.max_frame_size, config.max_message_size),
            handler,
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            scratch: vec![0u8; config.read_buffer_size.max(1)].into_boxed_slice(),
            queue: SendQueue::default(),
            in_flight: Bytes::new(),
            in_flight_close: false,
            max_pending: config.max_pending_bytes.max(1),
            read_enabled: true,
            write_enabled: true,
            messages: Vec::new(),
        }
    }

    /// Seed the receive buffer with bytes read before the session began
    pub fn with_buffered(mut self, data: &[u8]) -> Self {
        self.read_buf.extend_from_slice(data);
        self
    }

    /// Whether the receive pump should run
    #[inline]
    pub fn want_read(&self) -> bool {
        self.read_enabled && !self.backlogged()
    }

    /// Reading is still enabled but paused until the backlog drains
    #[inline]
    pub fn read_paused(&self) -> bool {
        self.read_enabled && self.backlogged()
    }

    /// Bytes queued or partially written, not yet accepted by the transport
    pub fn pending_bytes(&self) -> usize {
        self.queue.bytes + self.in_flight.len()
    }

    #[inline]
    fn backlogged(&self) -> bool {
        self.pending_bytes() >= self.max_pending
    }

    /// Whether the send pump has anything to write
    #[inline]
    pub fn want_write(&self) -> bool {
        self.write_enabled && (!self.in_flight.is_empty() || !self.queue.is_empty())
    }

    /// The message handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Queue a message from outside a callback
    pub fn queue_msg(&mut self, msg: Message) -> Result<()> {
        if !self.write_enabled {
            return Err(Error::InvalidState("send side already closed"));
        }
        self.queue.push(msg)
    }

    /// Receive pump
    ///
    /// Decodes anything already buffered, then reads until the transport
    /// would block, reading is disabled by a close, or the outbound backlog
    /// reaches its limit. A read error or end of stream disables both pumps
    /// and returns [`Error::CallbackFailure`].
    pub fn recv<T: Transport>(&mut self, io: &mut T) -> Result<()> {
        self.dispatch();

        while self.want_read() {
            match io.recv(&mut self.scratch) {
                Ok(0) => {
                    self.disable();
                    return Err(Error::CallbackFailure("unexpected end of stream"));
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&self.scratch[..n]);
                    self.dispatch();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "websocket read failed");
                    self.disable();
                    return Err(Error::CallbackFailure("read failed"));
                }
            }
        }

        Ok(())
    }

    /// Send pump
    ///
    /// Writes queued messages in order. Writing stops for good once a
    /// close frame is fully written.
    pub fn send<T: Transport>(&mut self, io: &mut T) -> Result<()> {
        while self.write_enabled {
            if self.in_flight.is_empty() {
                let Some(msg) = self.queue.pop() else {
                    break;
                };
                let mut buf = BytesMut::new();
                self.protocol.encode_message(&msg, &mut buf);
                self.in_flight = buf.freeze();
                self.in_flight_close = msg.is_close();
            }

            match io.send(&self.in_flight) {
                Ok(0) => {
                    self.disable();
                    return Err(Error::CallbackFailure("transport accepted no bytes"));
                }
                Ok(n) => {
                    self.in_flight.advance(n);
                    if self.in_flight.is_empty() && self.in_flight_close {
                        self.write_enabled = false;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "websocket write failed");
                    self.disable();
                    return Err(Error::CallbackFailure("write failed"));
                }
            }
        }

        Ok(())
    }

    fn disable(&mut self) {
        self.read_enabled = false;
        self.write_enabled = false;
    }

    /// Decode buffered frames and run callbacks
    fn dispatch(&mut self) {
        if !self.read_enabled || self.read_buf.is_empty() {
            return;
        }

        let mut messages = std::mem::take(&mut self.messages);
        let result = self.protocol.process_into(&mut self.read_buf, &mut messages);

        for msg in messages.drain(..) {
            self.on_message(msg);
        }
        self.messages = messages;

        if let Err(e) = result {
            debug!(error = %e, "websocket protocol violation");
            self.fail(&e);
        }
    }

    fn on_message(&mut self, msg: Message) {
        match &msg {
            Message::Ping(payload) if !self.queue.close_queued => {
                let _ = self.queue.push(Message::Pong(payload.clone()));
            }
            Message::Close(reason) => {
                self.read_enabled = false;
                self.read_buf.clear();
                if !self.queue.close_queued {
                    let reply = reason.as_ref().map(|r| CloseReason::new(r.code, ""));
                    let _ = self.queue.push(Message::Close(reply));
                }
            }
            _ => {}
        }

        let mut outbox = Outbox {
            queue: &mut self.queue,
        };
        self.handler.on_message(&msg, &mut outbox);
    }

    /// Stop reading and queue a close carrying the matching status code
    fn fail(&mut self, error: &Error) {
        self.read_enabled = false;
        self.read_buf.clear();
        if !self.queue.close_queued {
            let reason = CloseReason::new(error.close_code(), "");
            let _ = self.queue.push(Message::Close(Some(reason)));
        }
    }
}
