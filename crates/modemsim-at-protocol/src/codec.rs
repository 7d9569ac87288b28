//! Line framing for AT command input.
//!
//! Peers terminate commands with `\r\n`, but not consistently. The framer
//! accepts three terminators:
//! - `\r\n`, the canonical one
//! - a bare `\n`
//! - a bare `\r` followed by anything else; the following byte is pushed
//!   back and starts the next line
//!
//! After a `\r` the framer only looks at the next byte if it has already
//! arrived. If nothing is buffered the line is emitted straight away and a
//! `\n` arriving later is swallowed, so a command is never held back waiting
//! for its line feed.

use std::io::Read;
use std::iter::FusedIterator;

use bytes::{Buf, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

/// Maximum command line length in bytes.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Size of a single read from the underlying stream.
const READ_CHUNK: usize = 256;

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Encode a line for transmission by appending `\r\n`.
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(line.len() + 2);
    buf.extend_from_slice(line.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// Splits a byte stream into command lines.
///
/// Bytes are decoded one-to-one into characters (Latin-1). End of stream is
/// reported as [`ProtocolError::ConnectionLost`]; any partial line is dropped.
///
/// The framer is also an [`Iterator`] of lines which ends after the first
/// error.
#[derive(Debug)]
pub struct LineFramer<R> {
    /// The underlying byte stream.
    reader: R,
    /// Bytes read from the stream but not yet consumed.
    buffer: BytesMut,
    /// A byte that ended a bare-CR line and belongs to the next one.
    pushback: Option<u8>,
    /// The previous line ended on a CR whose LF had not arrived yet.
    swallow_lf: bool,
    /// Set once an error has been returned from the iterator.
    finished: bool,
}

impl<R: Read> LineFramer<R> {
    /// Create a new framer over a byte stream.
    pub fn new(reader: R) -> Self {
        LineFramer {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            pushback: None,
            swallow_lf: false,
            finished: false,
        }
    }

    /// Block until the next complete line is available.
    pub fn read_line(&mut self) -> ProtocolResult<String> {
        let mut line = String::new();
        let mut len = 0usize;

        loop {
            let byte = self.next_byte()?;

            if std::mem::take(&mut self.swallow_lf) && byte == LF {
                continue;
            }

            match byte {
                LF => return Ok(line),
                CR => {
                    if let Some(next) = self.ready_byte() {
                        if next != LF {
                            log::warn!("Got 0x{:02X} instead of <LF> after <CR>", next);
                            self.pushback = Some(next);
                        }
                    } else {
                        self.swallow_lf = true;
                    }
                    return Ok(line);
                }
                other => {
                    if len >= MAX_LINE_LENGTH {
                        return Err(ProtocolError::LineTooLong {
                            max: MAX_LINE_LENGTH,
                        });
                    }
                    line.push(char::from(other));
                    len += 1;
                }
            }
        }
    }

    /// Number of bytes read from the stream but not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + usize::from(self.pushback.is_some())
    }

    /// Get the next byte, blocking on the stream if nothing is buffered.
    fn next_byte(&mut self) -> ProtocolResult<u8> {
        if let Some(byte) = self.pushback.take() {
            return Ok(byte);
        }
        if self.buffer.is_empty() {
            self.fill()?;
        }
        Ok(self.buffer.get_u8())
    }

    /// Take the next byte only if it is already buffered.
    fn ready_byte(&mut self) -> Option<u8> {
        if let Some(byte) = self.pushback.take() {
            return Some(byte);
        }
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.get_u8())
        }
    }

    fn fill(&mut self) -> ProtocolResult<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => return Err(ProtocolError::ConnectionLost),
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        }
    }
}

impl<R: Read> Iterator for LineFramer<R> {
    type Item = ProtocolResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_line() {
            Ok(line) => Some(Ok(line)),
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> FusedIterator for LineFramer<R> {}
