//! Raw framing: messages delimited by JSON syntax alone.
//!
//! Send writes payload bytes verbatim. Recv runs an incremental boundary
//! scanner over the inbound stream and yields each complete top-level JSON
//! value. The scanner tracks nesting depth and string/escape state only;
//! full validation is left to the JSON decoder downstream.
//!
//! A malformed byte at a value boundary desynchronizes the stream, so scan
//! errors are fatal to the channel.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};

/// Read buffer size for the scanner's input chunks.
const READ_CHUNK: usize = 8 * 1024;

/// Scanner state: what kind of value the cursor is inside.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    /// Between values; skipping whitespace.
    Idle,
    /// Inside an object or array; tracking nesting depth.
    Structure,
    /// Inside a top-level string literal.
    Str,
    /// Inside a top-level scalar (number, true/false/null).
    Scalar,
}

/// Incremental JSON value-boundary scanner.
///
/// Bytes are pushed in as they arrive; [`JsonScanner::next_value`] extracts
/// complete values as soon as their final byte is present, buffering any
/// partial tail for the next push.
pub(crate) struct JsonScanner {
    buf: BytesMut,
    pos: usize,
    start: usize,
    mode: Mode,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl JsonScanner {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            pos: 0,
            start: 0,
            mode: Mode::Idle,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// Append raw bytes from the stream.
    pub(crate) fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Scan forward and extract the next complete value, if any.
    pub(crate) fn next_value(&mut self, max: usize) -> Result<Option<Bytes>> {
        while self.pos < self.buf.len() {
            let b = self.buf[self.pos];
            match self.mode {
                Mode::Idle => match b {
                    b' ' | b'\t' | b'\r' | b'\n' => {
                        self.pos += 1;
                        self.start = self.pos;
                    }
                    b'{' | b'[' => {
                        self.mode = Mode::Structure;
                        self.depth = 1;
                        self.start = self.pos;
                        self.pos += 1;
                    }
                    b'"' => {
                        self.mode = Mode::Str;
                        self.start = self.pos;
                        self.pos += 1;
                    }
                    b'}' | b']' | b',' | b':' => {
                        return Err(RpcError::Frame(format!(
                            "unexpected {:?} at start of JSON value",
                            b as char
                        )));
                    }
                    _ => {
                        self.mode = Mode::Scalar;
                        self.start = self.pos;
                        self.pos += 1;
                    }
                },
                Mode::Structure => {
                    if self.in_string {
                        if self.escaped {
                            self.escaped = false;
                        } else if b == b'\\' {
                            self.escaped = true;
                        } else if b == b'"' {
                            self.in_string = false;
                        }
                    } else if b == b'"' {
                        self.in_string = true;
                    } else if b == b'{' || b == b'[' {
                        self.depth += 1;
                    } else if b == b'}' || b == b']' {
                        self.depth -= 1;
                        if self.depth == 0 {
                            self.pos += 1;
                            return Ok(Some(self.take()));
                        }
                    }
                    self.pos += 1;
                }
                Mode::Str => {
                    let done = !self.escaped && b == b'"';
                    if self.escaped {
                        self.escaped = false;
                    } else if b == b'\\' {
                        self.escaped = true;
                    }
                    self.pos += 1;
                    if done {
                        return Ok(Some(self.take()));
                    }
                }
                Mode::Scalar => match b {
                    b' ' | b'\t' | b'\r' | b'\n' | b',' | b':' | b'"' | b'{' | b'[' | b'}'
                    | b']' => {
                        // The delimiter is left in place for the next scan.
                        return Ok(Some(self.take()));
                    }
                    _ => self.pos += 1,
                },
            }
        }
        if self.buf.len() - self.start > max {
            return Err(RpcError::Frame("message exceeds maximum size".to_string()));
        }
        Ok(None)
    }

    /// Resolve the scanner at end of input: a pending scalar completes, an
    /// idle scanner reports a clean end, anything else ended mid-value.
    pub(crate) fn finish(&mut self) -> Result<Option<Bytes>> {
        match self.mode {
            Mode::Scalar => Ok(Some(self.take())),
            Mode::Idle => Ok(None),
            _ => Err(RpcError::Frame(
                "unexpected end of input inside JSON value".to_string(),
            )),
        }
    }

    /// Detach the completed value `buf[start..pos]` and reset for the next.
    fn take(&mut self) -> Bytes {
        let mut head = self.buf.split_to(self.pos);
        let value = head.split_off(self.start);
        self.pos = 0;
        self.start = 0;
        self.mode = Mode::Idle;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        value.freeze()
    }
}

pub(crate) async fn send<W>(writer: &mut W, msg: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(msg).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn recv<R>(reader: &mut R, scan: &mut JsonScanner, max: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    loop {
        if let Some(msg) = scan.next_value(max)? {
            return Ok(msg);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return match scan.finish()? {
                Some(msg) => Ok(msg),
                None => Err(RpcError::Eof),
            };
        }
        scan.push(&chunk[..n]);
    }
}
