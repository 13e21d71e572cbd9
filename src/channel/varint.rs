//! Varint framing: LEB128 length prefix, then the payload bytes.
//!
//! The length is encoded 7 bits per byte, least-significant group first,
//! with the high bit set on every byte except the last. A zero-length
//! payload is the single byte `0x00`.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};

/// Maximum encoded length of a u64 varint.
const MAX_PREFIX: usize = 10;

pub(crate) async fn send<W>(writer: &mut W, msg: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut prefix = [0u8; MAX_PREFIX];
    let mut n = 0;
    let mut value = msg.len() as u64;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        prefix[n] = byte;
        n += 1;
        if value == 0 {
            break;
        }
    }
    writer.write_all(&prefix[..n]).await?;
    writer.write_all(msg).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn recv<R>(reader: &mut R, max: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len: u64 = 0;
    let mut shift: u32 = 0;
    let mut first = true;
    loop {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte).await {
            Ok(_) => {}
            // EOF before the first prefix byte is a clean close.
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof && first => {
                return Err(RpcError::Eof);
            }
            Err(err) => return Err(err.into()),
        }
        first = false;
        let b = byte[0];
        if shift >= 64 || (shift == 63 && (b & 0x7f) > 1) {
            return Err(RpcError::Frame("varint length overflows u64".to_string()));
        }
        len |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    if len > max as u64 {
        return Err(RpcError::Frame("message exceeds maximum size".to_string()));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn encode(msg: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        send(&mut out, msg).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_prefix_encoding() {
        assert_eq!(encode(b"").await, vec![0x00]);
        assert_eq!(encode(b"abc").await, vec![0x03, b'a', b'b', b'c']);

        let long = vec![b'x'; 300];
        let framed = encode(&long).await;
        // 300 = 0b10_0101100 -> 0xac 0x02
        assert_eq!(&framed[..2], &[0xac, 0x02]);
        assert_eq!(framed.len(), 2 + 300);
    }

    #[tokio::test]
    async fn test_round_trip() {
        for msg in [&b""[..], b"x", br#"{"id":1,"method":"m"}"#] {
            let framed = encode(msg).await;
            let mut reader = Cursor::new(framed);
            let got = recv(&mut reader, usize::MAX).await.unwrap();
            assert_eq!(&got[..], msg);
        }
    }

    #[tokio::test]
    async fn test_eof_before_prefix() {
        let mut reader = Cursor::new(Vec::new());
        assert!(matches!(
            recv(&mut reader, usize::MAX).await,
            Err(RpcError::Eof)
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_payload() {
        let mut reader = Cursor::new(vec![0x05, b'a', b'b']);
        let err = recv(&mut reader, usize::MAX).await.unwrap_err();
        assert!(matches!(err, RpcError::Io(_)));
    }

    #[tokio::test]
    async fn test_overlong_prefix_rejected() {
        let mut reader = Cursor::new(vec![0xff; 11]);
        let err = recv(&mut reader, usize::MAX).await.unwrap_err();
        assert!(matches!(err, RpcError::Frame(_)));
    }

    #[tokio::test]
    async fn test_length_above_limit_rejected() {
        let mut framed = Vec::new();
        send(&mut framed, &vec![0u8; 100]).await.unwrap();
        let mut reader = Cursor::new(framed);
        let err = recv(&mut reader, 64).await.unwrap_err();
        assert!(matches!(err, RpcError::Frame(_)));
    }
}
