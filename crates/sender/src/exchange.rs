//! One request/response exchange over a connected stream

use std::time::Duration;

use sigil_common::{SigilError, SigilResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

/// Write `data` (if any) and collect the reply.
///
/// Reading stops at EOF, when the buffer is full, or when `read_timeout`
/// elapses. Bytes already received are returned even if the read then fails
/// or times out; an error is reported only when nothing arrived.
pub async fn exchange<S>(
    stream: &mut S,
    data: &[u8],
    write_timeout: Duration,
    read_timeout: Duration,
    buffer_size: usize,
) -> SigilResult<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if !data.is_empty() {
        match timeout(write_timeout, stream.write_all(data)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SigilError::from_io(e)),
            Err(_) => return Err(SigilError::Timeout("write timed out".into())),
        }
        // flush matters for TLS streams
        if let Ok(Err(e)) = timeout(write_timeout, stream.flush()).await {
            return Err(SigilError::from_io(e));
        }
    }

    let deadline = Instant::now() + read_timeout;
    let mut buf = vec![0u8; buffer_size];
    let mut filled = 0;
    while filled < buf.len() {
        match timeout_at(deadline, stream.read(&mut buf[filled..])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if filled > 0 => {
                debug!("read error after {} bytes: {}", filled, e);
                break;
            }
            Ok(Err(e)) => return Err(SigilError::from_io(e)),
            Err(_) if filled > 0 => break,
            Err(_) => return Err(SigilError::Timeout("read timed out".into())),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_reply_at_eof() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut req = [0u8; 4];
            server.read_exact(&mut req).await.unwrap();
            assert_eq!(&req, b"PING");
            server.write_all(b"PONG").await.unwrap();
        });
        let reply = exchange(
            &mut client,
            b"PING",
            Duration::from_secs(1),
            Duration::from_secs(1),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(reply, b"PONG");
    }

    #[tokio::test]
    async fn partial_reply_survives_timeout() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let peer = tokio::spawn(async move {
            server.write_all(b"220 ready\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(server);
        });
        let reply = exchange(
            &mut client,
            b"",
            Duration::from_secs(1),
            Duration::from_millis(100),
            1024,
        )
        .await
        .unwrap();
        assert_eq!(reply, b"220 ready\r\n");
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn silence_is_a_timeout() {
        let (mut client, _server) = tokio::io::duplex(64);
        let err = exchange(
            &mut client,
            b"",
            Duration::from_secs(1),
            Duration::from_millis(50),
            1024,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SigilError::Timeout(_)));
        assert!(!err.is_closed());
    }

    #[tokio::test]
    async fn buffer_size_caps_reply() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            server.write_all(&[b'a'; 32]).await.unwrap();
        });
        let reply = exchange(
            &mut client,
            b"",
            Duration::from_secs(1),
            Duration::from_secs(1),
            8,
        )
        .await
        .unwrap();
        assert_eq!(reply.len(), 8);
    }
}
