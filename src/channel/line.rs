//! Line framing: one payload per LF-terminated line.
//!
//! Payloads must not themselves contain LF; send refuses them rather than
//! corrupting the stream. Recv strips the trailing LF and an optional CR
//! before it, and accepts a final unterminated line at end of input.

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};

pub(crate) async fn send<W>(writer: &mut W, msg: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if msg.contains(&b'\n') {
        return Err(RpcError::Frame(
            "line framing cannot carry a payload containing LF".to_string(),
        ));
    }
    writer.write_all(msg).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn recv<R>(reader: &mut R) -> Result<Bytes>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(RpcError::Eof);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(Bytes::from(line))
}
