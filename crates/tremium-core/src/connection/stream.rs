//! Idle-timeout framing over raw byte streams

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

/// Longest command line accepted, independent of the streaming chunk size
pub(crate) const MAX_COMMAND_LINE: usize = 1024;

/// How a timeout-terminated transfer finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEnd {
    /// Sender closed or reset the connection
    PeerClosed,
    /// No bytes arrived within the idle timeout
    IdleTimeout,
}

impl fmt::Display for TransferEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferEnd::PeerClosed => f.write_str("peer_closed"),
            TransferEnd::IdleTimeout => f.write_str("idle_timeout"),
        }
    }
}

/// Outcome of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub bytes: u64,
    pub ended_by: TransferEnd,
}

/// First line of a connection plus any payload bytes read past it
#[derive(Debug, Default)]
pub(crate) struct CommandLine {
    pub line: Vec<u8>,
    pub leftover: Vec<u8>,
}

/// Resets and aborts mid-stream count as the peer closing
pub(crate) fn is_peer_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

/// Read the command line
///
/// Stops at the first `\n`, after `limit` bytes, at end of stream, or when
/// the peer goes quiet for `idle`. Returns `None` if nothing arrived.
pub(crate) async fn read_command_line<R>(
    reader: &mut R,
    limit: usize,
    idle: Duration,
) -> io::Result<Option<CommandLine>>
where
    R: AsyncRead + Unpin,
{
    let limit = limit.max(1);
    let mut buf = Vec::with_capacity(limit);
    let mut chunk = vec![0u8; limit];

    while buf.len() < limit {
        let want = limit - buf.len();
        let n = match timeout(idle, reader.read(&mut chunk[..want])).await {
            Err(_) => break,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) if is_peer_closed(&e) => break,
            Ok(Err(e)) => return Err(e),
        };
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let leftover = buf.split_off(pos + 1);
            buf.truncate(pos);
            return Ok(Some(CommandLine {
                line: buf,
                leftover,
            }));
        }
    }

    if buf.is_empty() {
        Ok(None)
    } else {
        Ok(Some(CommandLine {
            line: buf,
            leftover: Vec::new(),
        }))
    }
}

/// Copy everything the peer sends into `sink` until it closes or goes idle
pub(crate) async fn receive_into<R, W>(
    reader: &mut R,
    sink: &mut W,
    chunk_size: usize,
    idle: Duration,
) -> io::Result<Transfer>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut bytes = 0u64;

    let ended_by = loop {
        let n = match timeout(idle, reader.read(&mut chunk)).await {
            Err(_) => break TransferEnd::IdleTimeout,
            Ok(Ok(0)) => break TransferEnd::PeerClosed,
            Ok(Ok(n)) => n,
            Ok(Err(e)) if is_peer_closed(&e) => break TransferEnd::PeerClosed,
            Ok(Err(e)) => return Err(e),
        };
        sink.write_all(&chunk[..n]).await?;
        bytes += n as u64;
    };

    sink.flush().await?;
    Ok(Transfer { bytes, ended_by })
}

/// Stream all of `source` to the peer
pub(crate) async fn send_from<R, W>(
    source: &mut R,
    writer: &mut W,
    chunk_size: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::with_capacity(chunk_size.max(1), source);
    let bytes = tokio::io::copy_buf(&mut reader, writer).await?;
    writer.flush().await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_millis(100);

    #[tokio::test]
    async fn test_command_line_splits_payload() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(b"STORE_FILE a.log\nfirst bytes").await.unwrap();

        let read = read_command_line(&mut server, 64, IDLE).await.unwrap().unwrap();
        assert_eq!(read.line, b"STORE_FILE a.log");
        assert_eq!(read.leftover, b"first bytes");
    }

    #[tokio::test]
    async fn test_unterminated_command_ends_on_idle() {
        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(b"GET_UPDATE a.tar.gz").await.unwrap();

        let read = read_command_line(&mut server, 64, IDLE).await.unwrap().unwrap();
        assert_eq!(read.line, b"GET_UPDATE a.tar.gz");
        assert!(read.leftover.is_empty());
    }

    #[tokio::test]
    async fn test_silent_peer_yields_no_command() {
        let (_client, mut server) = tokio::io::duplex(256);
        assert!(read_command_line(&mut server, 64, IDLE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_peer_yields_no_command() {
        let (client, mut server) = tokio::io::duplex(256);
        drop(client);
        assert!(read_command_line(&mut server, 64, IDLE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_until_peer_closes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let sender = tokio::spawn(async move {
            client.write_all(&[7u8; 1000]).await.unwrap();
        });

        let mut sink = Vec::new();
        let transfer = receive_into(&mut server, &mut sink, 16, Duration::from_secs(5))
            .await
            .unwrap();
        sender.await.unwrap();

        assert_eq!(transfer.bytes, 1000);
        assert_eq!(transfer.ended_by, TransferEnd::PeerClosed);
        assert_eq!(sink, vec![7u8; 1000]);
    }

    #[tokio::test]
    async fn test_receive_until_idle() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"partial").await.unwrap();

        let mut sink = Vec::new();
        let transfer = receive_into(&mut server, &mut sink, 16, IDLE).await.unwrap();

        assert_eq!(transfer.ended_by, TransferEnd::IdleTimeout);
        assert_eq!(sink, b"partial");
        drop(client);
    }

    #[tokio::test]
    async fn test_send_from_copies_everything() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let payload: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let mut source = payload.as_slice();

        let receiver = tokio::spawn(async move {
            let mut received = Vec::new();
            server.read_to_end(&mut received).await.unwrap();
            received
        });

        let sent = send_from(&mut source, &mut client, 100).await.unwrap();
        drop(client);

        assert_eq!(sent, 3000);
        assert_eq!(receiver.await.unwrap(), payload);
    }
}
