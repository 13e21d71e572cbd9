//! Framing layer: discrete JSON message payloads over a byte stream.
//!
//! A [`Framing`] describes a wire discipline; [`Framing::channel`] binds it
//! to a reader/writer pair and yields a [`Channel`] with `send`, `recv`, and
//! `close`. Variants:
//!
//! - [`Framing::Raw`] - no explicit delimiter; messages are framed by JSON
//!   syntax on the way in and written verbatim on the way out
//! - [`Framing::Line`] - one payload per LF-terminated line
//! - [`Framing::Varint`] - LEB128 length prefix followed by the payload
//! - [`Framing::Header`] - HTTP-like header block with `Content-Length`
//!   (and optionally `Content-Type`); presets [`Framing::json`] and
//!   [`Framing::lsp`]
//!
//! Framing errors are fatal: once `recv` reports [`RpcError::Frame`] or an
//! I/O error, the channel is no longer usable. A clean close at a message
//! boundary is reported as [`RpcError::Eof`].
//!
//! # Example
//!
//! ```
//! use jsonwire::channel::Framing;
//!
//! assert_eq!(Framing::from_name("line"), Some(Framing::Line));
//! assert_eq!(Framing::from_name("lsp"), Some(Framing::lsp()));
//! assert_eq!(Framing::from_name("bogus"), None);
//! ```

mod header;
mod line;
mod pipe;
mod raw;
mod varint;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Result, RpcError};

use raw::JsonScanner;

pub use pipe::pipe;

/// MIME type used by the [`Framing::lsp`] preset.
pub const LSP_MIME: &str = "application/vscode-jsonrpc; charset=utf-8";

/// Default cap on a single received message, applied by the framings that
/// learn the size up front and by the raw scanner's accumulation buffer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Boxed reader half of a transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writer half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A wire discipline for delimiting JSON payloads on a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// No explicit framing; reads are delimited by JSON syntax.
    Raw,
    /// One LF-terminated payload per line.
    Line,
    /// LEB128 length prefix, then exactly that many bytes.
    Varint,
    /// Header block with `Content-Length` and an optional `Content-Type`.
    Header(Option<String>),
}

impl Framing {
    /// Header framing with MIME type `application/json`.
    pub fn json() -> Framing {
        Framing::Header(Some("application/json".to_string()))
    }

    /// Header framing with the Language Server Protocol MIME type.
    pub fn lsp() -> Framing {
        Framing::Header(Some(LSP_MIME.to_string()))
    }

    /// Resolve an external framing name: `raw`, `line`, `varint`, `json`,
    /// `lsp`, or `header:<mime>` (empty mime omits the Content-Type header).
    pub fn from_name(name: &str) -> Option<Framing> {
        match name {
            "raw" => Some(Framing::Raw),
            "line" => Some(Framing::Line),
            "varint" => Some(Framing::Varint),
            "json" => Some(Framing::json()),
            "lsp" => Some(Framing::lsp()),
            _ => name.strip_prefix("header:").map(|mime| {
                if mime.is_empty() {
                    Framing::Header(None)
                } else {
                    Framing::Header(Some(mime.to_string()))
                }
            }),
        }
    }

    /// Bind this framing to a reader and a writable sink.
    pub fn channel<R, W>(&self, reader: R, writer: W) -> Channel
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.channel_with_limit(reader, writer, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Bind this framing with a custom maximum message size.
    pub fn channel_with_limit<R, W>(&self, reader: R, writer: W, max_message: usize) -> Channel
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Channel {
            tx: ChannelTx {
                writer: Box::new(writer),
                framing: self.clone(),
            },
            rx: ChannelRx {
                reader: BufReader::new(Box::new(reader) as BoxedReader),
                framing: self.clone(),
                scan: JsonScanner::new(),
                max_message,
            },
        }
    }
}

/// A framed message channel over a byte stream.
pub struct Channel {
    tx: ChannelTx,
    rx: ChannelRx,
}

impl Channel {
    /// Send one payload.
    pub async fn send(&mut self, msg: &[u8]) -> Result<()> {
        self.tx.send(msg).await
    }

    /// Receive the next payload.
    pub async fn recv(&mut self) -> Result<Bytes> {
        self.rx.recv().await
    }

    /// Shut down the write side.
    pub async fn close(&mut self) -> Result<()> {
        self.tx.close().await
    }

    /// Split into independently owned send and receive halves.
    pub fn split(self) -> (ChannelTx, ChannelRx) {
        (self.tx, self.rx)
    }
}

/// The send half of a [`Channel`].
pub struct ChannelTx {
    writer: BoxedWriter,
    framing: Framing,
}

impl ChannelTx {
    /// Frame and write one payload, flushing before returning.
    pub async fn send(&mut self, msg: &[u8]) -> Result<()> {
        match &self.framing {
            Framing::Raw => raw::send(&mut self.writer, msg).await,
            Framing::Line => line::send(&mut self.writer, msg).await,
            Framing::Varint => varint::send(&mut self.writer, msg).await,
            Framing::Header(mime) => header::send(&mut self.writer, mime.as_deref(), msg).await,
        }
    }

    /// Shut down the write side of the transport.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// The receive half of a [`Channel`].
pub struct ChannelRx {
    reader: BufReader<BoxedReader>,
    framing: Framing,
    scan: JsonScanner,
    max_message: usize,
}

impl ChannelRx {
    /// Read the next framed payload.
    ///
    /// Returns [`RpcError::Eof`] when the peer closed the stream at a
    /// message boundary; EOF mid-message surfaces as an I/O error.
    pub async fn recv(&mut self) -> Result<Bytes> {
        match &self.framing {
            Framing::Raw => raw::recv(&mut self.reader, &mut self.scan, self.max_message).await,
            Framing::Line => line::recv(&mut self.reader).await,
            Framing::Varint => varint::recv(&mut self.reader, self.max_message).await,
            Framing::Header(mime) => {
                header::recv(&mut self.reader, mime.as_deref(), self.max_message).await
            }
        }
    }
}
