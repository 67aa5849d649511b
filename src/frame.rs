//! WebSocket frame parsing and serialization
//!
//! RFC 6455 framing for the server side: client frames arrive masked and
//! are unmasked in place, server frames go out unmasked.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::mask::apply_mask;
use crate::{MAX_FRAME_HEADER_SIZE, MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }
}

/// A parsed WebSocket frame header
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Mask flag (must be true for client->server)
    pub masked: bool,
    /// Payload length
    pub payload_len: u64,
    /// Masking key (if masked)
    pub mask: Option<[u8; 4]>,
}

/// A complete WebSocket frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Frame payload (already unmasked)
    pub payload: Bytes,
}

/// Frame parser state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Waiting for a complete header (2..=14 bytes)
    Header,
    /// Header consumed, waiting for the full payload
    Payload,
}

/// Incremental frame parser
///
/// Bytes stay in the caller's buffer until a whole header (and then a
/// whole payload) is available, so a frame may arrive across any number
/// of reads.
pub struct FrameParser {
    state: ParseState,
    /// Parsed header (once complete)
    header: Option<FrameHeader>,
    /// Maximum frame size
    max_frame_size: usize,
    /// Whether to expect masked frames (server mode)
    expect_masked: bool,
}

impl FrameParser {
    /// Create a new frame parser
    pub fn new(max_frame_size: usize, expect_masked: bool) -> Self {
        Self {
            state: ParseState::Header,
            header: None,
            max_frame_size,
            expect_masked,
        }
    }

    #[inline]
    fn reset(&mut self) {
        self.state = ParseState::Header;
        self.header = None;
    }

    /// Parse a frame from the buffer
    ///
    /// Returns:
    /// - Ok(Some(frame)) if a complete frame was parsed
    /// - Ok(None) if more data is needed
    /// - Err(e) if parsing failed
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            match self.state {
                ParseState::Header => {
                    let Some((header, header_size)) = self.parse_header(buf)? else {
                        return Ok(None);
                    };
                    buf.advance(header_size);
                    self.header = Some(header);
                    self.state = ParseState::Payload;
                }

                ParseState::Payload => {
                    let header = self
                        .header
                        .take()
                        .ok_or(Error::InvalidState("payload without header"))?;
                    let payload_len = header.payload_len as usize;

                    if buf.len() < payload_len {
                        self.header = Some(header);
                        return Ok(None);
                    }

                    let mut payload = buf.split_to(payload_len);
                    if let Some(mask) = header.mask {
                        apply_mask(&mut payload, mask);
                    }

                    self.reset();
                    return Ok(Some(Frame {
                        header,
                        payload: payload.freeze(),
                    }));
                }
            }
        }
    }

    /// Decode a header from the front of `buf` without consuming it
    ///
    /// Returns the header and its encoded size once enough bytes are present.
    fn parse_header(&self, buf: &[u8]) -> Result<Option<(FrameHeader, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let fin = b0 & 0x80 != 0;

        // No extensions are negotiated, so every RSV bit must be clear
        if b0 & 0x70 != 0 {
            return Err(Error::Protocol("RSV bits must be 0"));
        }

        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(Error::InvalidFrame("invalid opcode"))?;

        if opcode.is_control() && !fin {
            return Err(Error::Protocol("control frame must not be fragmented"));
        }

        let masked = b1 & 0x80 != 0;
        let len_byte = b1 & 0x7F;

        if self.expect_masked && !masked {
            return Err(Error::Protocol("client frames must be masked"));
        }
        if !self.expect_masked && masked {
            return Err(Error::Protocol("server frames must not be masked"));
        }

        let (payload_len, len_size) = match len_byte {
            0..=125 => (len_byte as u64, 2),
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
                if len < 126 {
                    return Err(Error::Protocol("payload length not minimal"));
                }
                (len, 4)
            }
            _ => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len <= 0xFFFF {
                    return Err(Error::Protocol("payload length not minimal"));
                }
                if len >> 63 != 0 {
                    return Err(Error::Protocol("payload length MSB must be 0"));
                }
                (len, 10)
            }
        };

        if opcode.is_control() && payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            return Err(Error::Protocol("control frame too large"));
        }

        if payload_len > self.max_frame_size as u64 {
            return Err(Error::FrameTooLarge);
        }

        let header_size = len_size + if masked { 4 } else { 0 };
        debug_assert!(header_size <= MAX_FRAME_HEADER_SIZE);
        if buf.len() < header_size {
            return Ok(None);
        }

        let mask = masked.then(|| {
            [
                buf[len_size],
                buf[len_size + 1],
                buf[len_size + 2],
                buf[len_size + 3],
            ]
        });

        Ok(Some((
            FrameHeader {
                fin,
                opcode,
                masked,
                payload_len,
                mask,
            },
            header_size,
        )))
    }
}

/// Encode a frame into a buffer
///
/// For masked frames (client mode) the payload is copied and masked.
pub fn encode_frame(
    buf: &mut BytesMut,
    opcode: OpCode,
    payload: &[u8],
    fin: bool,
    mask: Option<[u8; 4]>,
) {
    let payload_len = payload.len();

    let header_size = 2
        + if payload_len > MEDIUM_MESSAGE_THRESHOLD {
            8
        } else if payload_len > SMALL_MESSAGE_THRESHOLD {
            2
        } else {
            0
        }
        + if mask.is_some() { 4 } else { 0 };

    buf.reserve(header_size + payload_len);

    let mut b0 = opcode as u8;
    if fin {
        b0 |= 0x80;
    }
    buf.put_u8(b0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };

    if payload_len <= SMALL_MESSAGE_THRESHOLD {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= MEDIUM_MESSAGE_THRESHOLD {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(payload_len as u64);
    }

    if let Some(m) = mask {
        buf.put_slice(&m);
        let start = buf.len();
        buf.put_slice(payload);
        apply_mask(&mut buf[start..], m);
    } else {
        buf.put_slice(payload);
    }
}
