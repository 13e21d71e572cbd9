//! In-process channel pairs over memory pipes.
//!
//! Useful for wiring a [`Server`](crate::Server) directly to a
//! [`Client`](crate::Client) in tests without a real transport.

use tokio::io::{duplex, split};

use super::{Channel, Framing};

/// Buffer capacity of each in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Create two connected channel endpoints sharing the given framing.
///
/// Whatever one endpoint sends, the other receives. Closing one endpoint's
/// write side delivers EOF to the other's reads.
pub fn pipe(framing: Framing) -> (Channel, Channel) {
    let (lhs, rhs) = duplex(PIPE_CAPACITY);
    let (lhs_read, lhs_write) = split(lhs);
    let (rhs_read, rhs_write) = split(rhs);
    (
        framing.channel(lhs_read, lhs_write),
        framing.channel(rhs_read, rhs_write),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;

    #[tokio::test]
    async fn test_pipe_round_trip() {
        let (mut lhs, mut rhs) = pipe(Framing::Raw);

        lhs.send(br#""apple""#).await.unwrap();
        assert_eq!(rhs.recv().await.unwrap(), &br#""apple""#[..]);

        rhs.send(b"[1,2,3]").await.unwrap();
        assert_eq!(lhs.recv().await.unwrap(), &b"[1,2,3]"[..]);
    }

    #[tokio::test]
    async fn test_pipe_close_propagates_eof() {
        let (mut lhs, mut rhs) = pipe(Framing::Line);
        lhs.close().await.unwrap();
        assert!(matches!(rhs.recv().await, Err(RpcError::Eof)));
    }

    #[tokio::test]
    async fn test_pipe_concurrent_send_recv() {
        let (lhs, mut rhs) = pipe(Framing::Varint);
        let sender = tokio::spawn(async move {
            let mut lhs = lhs;
            for i in 0..50u32 {
                let msg = format!("{{\"n\":{i}}}");
                lhs.send(msg.as_bytes()).await.unwrap();
            }
        });
        for i in 0..50u32 {
            let got = rhs.recv().await.unwrap();
            assert_eq!(got, format!("{{\"n\":{i}}}").as_bytes());
        }
        sender.await.unwrap();
    }
}
