//! Header framing: an HTTP-like header block, a blank line, then the body.
//!
//! Each message is sent as:
//!
//! ```text
//! Content-Type: <mime-type>\r\n
//! Content-Length: <nbytes>\r\n
//! \r\n
//! <payload>
//! ```
//!
//! The `Content-Type` line is omitted when no MIME type is configured.
//! On receive, header names are case-insensitive, unknown headers are
//! ignored, an incoming `Content-Type` must match the configured type, and
//! `Content-Length` is required and must be a non-negative decimal. Any
//! violation is fatal to the channel.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};

pub(crate) async fn send<W>(writer: &mut W, mime: Option<&str>, msg: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut head = String::new();
    if let Some(mime) = mime {
        head.push_str("Content-Type: ");
        head.push_str(mime);
        head.push_str("\r\n");
    }
    head.push_str("Content-Length: ");
    head.push_str(&msg.len().to_string());
    head.push_str("\r\n\r\n");

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(msg).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn recv<R>(reader: &mut R, mime: Option<&str>, max: usize) -> Result<Bytes>
where
    R: AsyncBufRead + AsyncRead + Unpin + ?Sized,
{
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut first = true;
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            if first {
                return Err(RpcError::Eof);
            }
            return Err(RpcError::Frame(
                "unexpected end of header block".to_string(),
            ));
        }
        first = false;

        let text = std::str::from_utf8(&line)
            .map_err(|_| RpcError::Frame("invalid header line".to_string()))?
            .trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            break;
        }
        match text.split_once(':') {
            Some((name, value)) => {
                headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
            }
            None => return Err(RpcError::Frame("invalid header line".to_string())),
        }
    }

    // An incoming content-type, if present, must match what we expect.
    if let Some(ctype) = headers.get("content-type") {
        if mime != Some(ctype.as_str()) {
            return Err(RpcError::Frame(format!(
                "invalid content-type {ctype:?}"
            )));
        }
    }

    let clen = headers
        .get("content-length")
        .ok_or_else(|| RpcError::Frame("missing required content-length".to_string()))?;
    let size: usize = clen
        .parse()
        .map_err(|_| RpcError::Frame(format!("invalid content-length {clen:?}")))?;
    if size > max {
        return Err(RpcError::Frame("message exceeds maximum size".to_string()));
    }

    let mut data = vec![0u8; size];
    reader.read_exact(&mut data).await?;
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn framed(mime: Option<&str>, msg: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        send(&mut out, mime, msg).await.unwrap();
        out
    }

    fn reading(bytes: Vec<u8>) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(bytes))
    }

    #[tokio::test]
    async fn test_send_with_mime() {
        let out = framed(Some("application/json"), b"123\n").await;
        assert_eq!(
            out,
            b"Content-Type: application/json\r\nContent-Length: 4\r\n\r\n123\n"
        );
    }

    #[tokio::test]
    async fn test_send_without_mime() {
        let out = framed(None, b"{}").await;
        assert_eq!(out, b"Content-Length: 2\r\n\r\n{}");
    }

    #[tokio::test]
    async fn test_round_trip() {
        let mime = Some("application/json");
        let mut reader = reading(framed(mime, br#"{"id":1}"#).await);
        let got = recv(&mut reader, mime, usize::MAX).await.unwrap();
        assert_eq!(&got[..], br#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_header_names_case_insensitive() {
        let mut reader = reading(b"content-LENGTH: 2\r\n\r\nok".to_vec());
        let got = recv(&mut reader, None, usize::MAX).await.unwrap();
        assert_eq!(&got[..], b"ok");
    }

    #[tokio::test]
    async fn test_unknown_headers_ignored() {
        let mut reader =
            reading(b"X-Custom: whatever\r\nContent-Length: 2\r\n\r\nok".to_vec());
        let got = recv(&mut reader, None, usize::MAX).await.unwrap();
        assert_eq!(&got[..], b"ok");
    }

    #[tokio::test]
    async fn test_mismatched_content_type_rejected() {
        let bytes = framed(Some("text/plain"), b"ok").await;
        let mut reader = reading(bytes);
        let err = recv(&mut reader, Some("application/json"), usize::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Frame(_)));
    }

    #[tokio::test]
    async fn test_unexpected_content_type_rejected() {
        // No MIME configured, but the peer declared one anyway.
        let bytes = framed(Some("application/json"), b"ok").await;
        let mut reader = reading(bytes);
        let err = recv(&mut reader, None, usize::MAX).await.unwrap_err();
        assert!(matches!(err, RpcError::Frame(_)));
    }

    #[tokio::test]
    async fn test_missing_content_length_rejected() {
        let mut reader = reading(b"Content-Type: application/json\r\n\r\n".to_vec());
        let err = recv(&mut reader, Some("application/json"), usize::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Frame(_)));
    }

    #[tokio::test]
    async fn test_negative_content_length_rejected() {
        let mut reader = reading(b"Content-Length: -5\r\n\r\n".to_vec());
        let err = recv(&mut reader, None, usize::MAX).await.unwrap_err();
        assert!(matches!(err, RpcError::Frame(_)));
    }

    #[tokio::test]
    async fn test_malformed_header_line_rejected() {
        let mut reader = reading(b"not a header\r\n\r\n".to_vec());
        let err = recv(&mut reader, None, usize::MAX).await.unwrap_err();
        assert!(matches!(err, RpcError::Frame(_)));
    }

    #[tokio::test]
    async fn test_eof_at_boundary() {
        let mut reader = reading(Vec::new());
        assert!(matches!(
            recv(&mut reader, None, usize::MAX).await,
            Err(RpcError::Eof)
        ));
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let mut reader = reading(b"Content-Length: 10\r\n\r\nshort".to_vec());
        let err = recv(&mut reader, None, usize::MAX).await.unwrap_err();
        assert!(matches!(err, RpcError::Io(_)));
    }
}
