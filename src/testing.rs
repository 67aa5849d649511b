//! In-memory stream for driving connections and codecs in unit tests

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use bytes::BytesMut;

use crate::frame::{OpCode, encode_frame};

/// Scripted non-blocking stream
///
/// Reads drain `input` and report `WouldBlock` once it is empty (or EOF
/// when `eof` is set). Writes append to `output`, optionally capped per
/// call, and report `WouldBlock` while `block_writes` is set.
#[derive(Debug, Default)]
pub(crate) struct MockStream {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
    pub eof: bool,
    pub block_writes: bool,
    pub write_limit: Option<usize>,
    pub fail_reads: bool,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, data: &[u8]) {
        self.input.extend(data.iter().copied());
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_reads {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        if self.input.is_empty() {
            if self.eof {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.block_writes {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        self.output.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Encode a masked client frame
pub(crate) fn client_frame(opcode: OpCode, payload: &[u8], fin: bool) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, opcode, payload, fin, Some([0x5a, 0xa5, 0x3c, 0xc3]));
    buf.to_vec()
}
