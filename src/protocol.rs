//! WebSocket protocol implementation
//!
//! This module handles the server side of the protocol state machine:
//! - Message fragmentation and reassembly
//! - Close frame validation
//! - Message encoding

use bytes::{Bytes, BytesMut};

use crate::error::{CloseReason, Error, Result};
use crate::frame::{Frame, FrameParser, OpCode, encode_frame};
use crate::utf8::{validate_utf8, validate_utf8_incomplete};

/// WebSocket message (complete, possibly assembled from fragments)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message (UTF-8 validated)
    Text(Bytes),
    /// Binary message
    Binary(Bytes),
    /// Ping message
    Ping(Bytes),
    /// Pong message
    Pong(Bytes),
    /// Close message
    Close(Option<CloseReason>),
}

impl Message {
    /// Create a text message from a string
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(Bytes::from(s.into()))
    }

    /// Create a binary message
    #[inline]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Message::Binary(data.into())
    }

    /// Opcode this message travels under
    #[inline]
    pub fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Ping(_) => OpCode::Ping,
            Message::Pong(_) => OpCode::Pong,
            Message::Close(_) => OpCode::Close,
        }
    }

    /// Check if this is a close message
    #[inline]
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Check if this is a control message
    #[inline]
    pub fn is_control(&self) -> bool {
        self.opcode().is_control()
    }

    /// Get message as text (returns None for non-text messages)
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get message payload bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(b) | Message::Binary(b) | Message::Ping(b) | Message::Pong(b) => b,
            Message::Close(_) => &[],
        }
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Message::Binary(Bytes::from(v))
    }
}

/// Server-side WebSocket protocol handler
///
/// Handles frame parsing, message assembly, and close frame validation.
pub struct Protocol {
    parser: FrameParser,
    /// Fragment buffer for message reassembly
    fragment_buf: BytesMut,
    /// Opcode of current fragmented message
    fragment_opcode: Option<OpCode>,
    max_message_size: usize,
}

impl Protocol {
    /// Create a new protocol handler expecting masked client frames
    pub fn new(max_frame_size: usize, max_message_size: usize) -> Self {
        Self {
            parser: FrameParser::new(max_frame_size, true),
            fragment_buf: BytesMut::new(),
            fragment_opcode: None,
            max_message_size,
        }
    }

    /// Process incoming data into a reusable message buffer
    ///
    /// Control frames are surfaced inline and may sit between fragments of
    /// a data message. Parsing stops after a close frame.
    pub fn process_into(&mut self, buf: &mut BytesMut, messages: &mut Vec<Message>) -> Result<()> {
        while !buf.is_empty() {
            let Some(frame) = self.parser.parse(buf)? else {
                break;
            };
            if let Some(msg) = self.handle_frame(frame)? {
                let is_close = msg.is_close();
                messages.push(msg);
                if is_close {
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.header.opcode {
            OpCode::Continuation => self.handle_continuation(frame),
            OpCode::Text | OpCode::Binary => self.handle_data(frame),
            OpCode::Close => self.handle_close(frame),
            OpCode::Ping => Ok(Some(Message::Ping(frame.payload))),
            OpCode::Pong => Ok(Some(Message::Pong(frame.payload))),
        }
    }

    fn handle_data(&mut self, frame: Frame) -> Result<Option<Message>> {
        if self.fragment_opcode.is_some() {
            return Err(Error::Protocol("expected continuation frame"));
        }

        let opcode = frame.header.opcode;
        if frame.header.fin {
            return Self::complete(opcode, frame.payload).map(Some);
        }

        if frame.payload.len() > self.max_message_size {
            return Err(Error::MessageTooLarge);
        }
        self.fragment_opcode = Some(opcode);
        self.fragment_buf.clear();
        self.fragment_buf.extend_from_slice(&frame.payload);
        self.check_partial_text(opcode)?;
        Ok(None)
    }

    fn handle_continuation(&mut self, frame: Frame) -> Result<Option<Message>> {
        let opcode = self
            .fragment_opcode
            .ok_or(Error::Protocol("unexpected continuation frame"))?;

        if self.fragment_buf.len() + frame.payload.len() > self.max_message_size {
            return Err(Error::MessageTooLarge);
        }
        self.fragment_buf.extend_from_slice(&frame.payload);

        if frame.header.fin {
            self.fragment_opcode = None;
            let data = self.fragment_buf.split().freeze();
            Self::complete(opcode, data).map(Some)
        } else {
            self.check_partial_text(opcode)?;
            Ok(None)
        }
    }

    fn check_partial_text(&self, opcode: OpCode) -> Result<()> {
        if opcode == OpCode::Text {
            let (valid, _incomplete) = validate_utf8_incomplete(&self.fragment_buf);
            if !valid {
                return Err(Error::InvalidUtf8);
            }
        }
        Ok(())
    }

    fn complete(opcode: OpCode, data: Bytes) -> Result<Message> {
        match opcode {
            OpCode::Text => {
                if !validate_utf8(&data) {
                    return Err(Error::InvalidUtf8);
                }
                Ok(Message::Text(data))
            }
            OpCode::Binary => Ok(Message::Binary(data)),
            _ => Err(Error::Protocol("invalid fragment opcode")),
        }
    }

    fn handle_close(&mut self, frame: Frame) -> Result<Option<Message>> {
        let reason = match frame.payload.len() {
            0 => None,
            1 => return Err(Error::Protocol("invalid close frame payload")),
            _ => {
                let code = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
                if !CloseReason::is_valid_code(code) {
                    return Err(Error::InvalidCloseCode(code));
                }
                let text = &frame.payload[2..];
                if !validate_utf8(text) {
                    return Err(Error::InvalidUtf8);
                }
                Some(CloseReason::new(code, String::from_utf8_lossy(text)))
            }
        };

        Ok(Some(Message::Close(reason)))
    }

    /// Encode a message for sending (server frames are never masked)
    pub fn encode_message(&self, msg: &Message, buf: &mut BytesMut) {
        match msg {
            Message::Close(reason) => {
                let mut payload = BytesMut::new();
                if let Some(r) = reason {
                    payload.extend_from_slice(&r.code.to_be_bytes());
                    payload.extend_from_slice(r.reason.as_bytes());
                }
                encode_frame(buf, OpCode::Close, &payload, true, None);
            }
            other => encode_frame(buf, other.opcode(), other.as_bytes(), true, None),
        }
    }
}
