//! One-shot line transport
//!
//! Helpers for the "connect, send one line, read one line, close" exchange used by
//! request forwarding, heartbeats and the load generator.

use crate::error::{Result, SumLoopError};
use std::time::Duration;
use sumloop_proto::{trim_line, ProtocolError, MAX_LINE_BYTES};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Time limits for a single exchange
#[derive(Debug, Clone, Copy)]
pub struct ExchangeTimeouts {
    /// Establishing the connection
    pub connect: Duration,

    /// Sending the request and receiving the reply
    pub response: Duration,
}

impl ExchangeTimeouts {
    pub fn new(connect: Duration, response: Duration) -> Self {
        Self { connect, response }
    }
}

/// Open a connection to `endpoint`, send `line`, and return the single reply line.
pub async fn exchange(endpoint: &str, line: &str, timeouts: ExchangeTimeouts) -> Result<String> {
    let mut stream = timeout(timeouts.connect, TcpStream::connect(endpoint))
        .await
        .map_err(|_| {
            SumLoopError::timeout(format!(
                "connect to {} timed out after {:?}",
                endpoint, timeouts.connect
            ))
        })?
        .map_err(|e| SumLoopError::transport(format!("connect to {} failed: {}", endpoint, e)))?;

    trace!("Connected to {}, sending {}", endpoint, line);

    let reply = timeout(timeouts.response, async {
        write_line(&mut stream, line).await?;
        read_line(&mut stream).await?.ok_or_else(|| {
            SumLoopError::transport(format!("{} closed the connection without replying", endpoint))
        })
    })
    .await
    .map_err(|_| {
        SumLoopError::timeout(format!(
            "no response from {} within {:?}",
            endpoint, timeouts.response
        ))
    })??;

    Ok(reply)
}

/// Write `line` followed by a newline and flush
pub async fn write_line<W>(writer: &mut W, line: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut framed = String::with_capacity(line.len() + 1);
    framed.push_str(line);
    framed.push('\n');

    writer.write_all(framed.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a single line without its terminator.
///
/// Returns `Ok(None)` when the peer closes before sending anything. A final line
/// without a terminator is accepted.
pub async fn read_line<R>(reader: R) -> Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader.take(MAX_LINE_BYTES as u64));
    let mut buf = String::new();

    let read = reader.read_line(&mut buf).await?;
    if read == 0 {
        return Ok(None);
    }
    if read >= MAX_LINE_BYTES && !buf.ends_with('\n') {
        return Err(ProtocolError::LineTooLong(MAX_LINE_BYTES).into());
    }

    Ok(Some(trim_line(&buf).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio::net::TcpListener;

    fn timeouts() -> ExchangeTimeouts {
        ExchangeTimeouts::new(Duration::from_secs(1), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_exchange_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let line = read_line(&mut stream).await.unwrap().unwrap();
            write_line(&mut stream, &format!("ECHO:{}", line)).await.unwrap();
            line
        });

        let reply = exchange(&endpoint, "SUM:1,2", timeouts()).await.unwrap();
        assert_eq!(reply, "ECHO:SUM:1,2");
        assert_eq!(server.await.unwrap(), "SUM:1,2");
    }

    #[tokio::test]
    async fn test_exchange_connection_refused() {
        // Grab a free port and release it so nothing listens there
        let endpoint = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let err = exchange(&endpoint, "SUM:1", timeouts()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_exchange_times_out_on_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let timeouts = ExchangeTimeouts::new(Duration::from_secs(1), Duration::from_millis(100));
        let err = exchange(&endpoint, "SUM:1", timeouts).await.unwrap_err();
        assert!(matches!(err, SumLoopError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_read_line_variants() {
        assert_eq!(read_line(&b""[..]).await.unwrap(), None);
        assert_eq!(
            read_line(&b"ACK\r\nignored\n"[..]).await.unwrap(),
            Some("ACK".to_string())
        );
        assert_eq!(
            read_line(&b"no terminator"[..]).await.unwrap(),
            Some("no terminator".to_string())
        );

        let oversized = vec![b'1'; MAX_LINE_BYTES + 10];
        let err = read_line(&oversized[..]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }
}
