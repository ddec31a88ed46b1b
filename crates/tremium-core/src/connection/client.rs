//! Active role: the node dials the hub once per command

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument};
use tremium_proto::{decode_update_list, validate_file_name, Command, CommandError};

use super::stream::{receive_into, send_from, Transfer};
use crate::config::{NodeConfig, ProtocolConfig};
use crate::error::ProtocolError;
use crate::state::{ConnectionSession, ConnectionState};

/// Client for the hub's command protocol
#[derive(Debug, Clone)]
pub struct HubClient {
    addr: String,
    protocol: ProtocolConfig,
}

impl HubClient {
    pub fn new(addr: impl Into<String>, protocol: ProtocolConfig) -> Self {
        Self {
            addr: addr.into(),
            protocol,
        }
    }

    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(&config.hub_addr, config.protocol.clone())
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Dial the hub and send the command line
    async fn open(&self, command: &Command) -> Result<(TcpStream, ConnectionSession), ProtocolError> {
        let mut session = ConnectionSession::dialing(&self.addr);
        let connect_timeout = self.protocol.connect_timeout();

        let mut stream = match timeout(connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ProtocolError::Connect {
                    addr: self.addr.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(ProtocolError::ConnectTimeout {
                    addr: self.addr.clone(),
                    timeout: connect_timeout,
                });
            }
        };
        session.advance(ConnectionState::Connected)?;

        session.advance(ConnectionState::Dispatching)?;
        stream.write_all(command.to_line().as_bytes()).await?;
        stream.flush().await?;
        debug!(command = %command, "command sent");

        Ok((stream, session))
    }

    /// Ask the hub which archives this node should install
    ///
    /// # Errors
    /// Returns `ProtocolError::NoReply` if the hub closes or goes idle
    /// without sending anything, or any connection error
    #[instrument(skip(self), fields(hub = %self.addr))]
    pub async fn check_available_updates(&self, node_id: &str) -> Result<Vec<String>, ProtocolError> {
        let command = Command::CheckAvailableUpdates {
            node_id: node_id.to_string(),
        };
        let (mut stream, mut session) = self.open(&command).await?;

        let mut reply = Vec::new();
        let transfer = receive_into(
            &mut stream,
            &mut reply,
            self.protocol.chunk_size(),
            self.protocol.idle_timeout(),
        )
        .await?;
        session.close();

        if transfer.bytes == 0 {
            return Err(ProtocolError::NoReply {
                addr: self.addr.clone(),
            });
        }
        let reply = String::from_utf8(reply).map_err(|_| ProtocolError::InvalidReply {
            addr: self.addr.clone(),
        })?;

        let updates = decode_update_list(&reply);
        info!(count = updates.len(), "received available updates");
        Ok(updates)
    }

    /// Download `file_name` from the hub into `dest_dir`
    ///
    /// A zero-byte transfer is not an error here; the hub sends nothing for
    /// archives it does not have.
    ///
    /// # Errors
    /// Returns error for an invalid file name, a destination that cannot be
    /// created, or a connection failure
    #[instrument(skip(self, dest_dir), fields(hub = %self.addr))]
    pub async fn get_update(&self, file_name: &str, dest_dir: &Path) -> Result<Transfer, ProtocolError> {
        validate_file_name(file_name)?;
        let command = Command::GetUpdate {
            file_name: file_name.to_string(),
        };
        let (mut stream, mut session) = self.open(&command).await?;
        session.advance(ConnectionState::Streaming)?;

        let path = dest_dir.join(file_name);
        let mut file = File::create(&path)
            .await
            .map_err(|source| ProtocolError::File {
                path: path.clone(),
                source,
            })?;

        let transfer = receive_into(
            &mut stream,
            &mut file,
            self.protocol.chunk_size(),
            self.protocol.idle_timeout(),
        )
        .await?;
        session.close();

        info!(bytes = transfer.bytes, ended_by = %transfer.ended_by, "downloaded update");
        Ok(transfer)
    }

    /// Upload a local file into the hub transfer directory
    ///
    /// Half-closes after the last byte, then waits for the hub to close (or
    /// go idle) so the hub has consumed everything before this returns.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, its name is not a valid
    /// transfer name, or the connection fails
    #[instrument(skip(self), fields(hub = %self.addr, file = %path.display()))]
    pub async fn store_file(&self, path: &Path) -> Result<Transfer, ProtocolError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CommandError::InvalidFileName {
                name: path.display().to_string(),
                reason: "not a UTF-8 file name",
            })?;
        validate_file_name(file_name)?;

        let mut file = File::open(path).await.map_err(|source| ProtocolError::File {
            path: path.to_path_buf(),
            source,
        })?;

        let command = Command::StoreFile {
            file_name: file_name.to_string(),
        };
        let (mut stream, mut session) = self.open(&command).await?;
        session.advance(ConnectionState::Streaming)?;

        let bytes = send_from(&mut file, &mut stream, self.protocol.chunk_size()).await?;
        stream.shutdown().await?;

        let drained = receive_into(
            &mut stream,
            &mut tokio::io::sink(),
            self.protocol.chunk_size(),
            self.protocol.idle_timeout(),
        )
        .await?;
        session.close();

        info!(bytes, ended_by = %drained.ended_by, "uploaded file");
        Ok(Transfer {
            bytes,
            ended_by: drained.ended_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    fn protocol() -> ProtocolConfig {
        ProtocolConfig {
            idle_timeout_ms: 100,
            connect_timeout_ms: 500,
            ..ProtocolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HubClient::new(addr.to_string(), protocol());
        let err = client.check_available_updates("nodeA").await.unwrap_err();
        assert!(err.is_connection_error(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_silent_hub_is_no_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(socket);
        });

        let client = HubClient::new(addr.to_string(), protocol());
        let err = client.check_available_updates("nodeA").await.unwrap_err();
        assert!(matches!(err, ProtocolError::NoReply { .. }));
        hub.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_names_rejected_before_connecting() {
        let client = HubClient::new("127.0.0.1:9", protocol());
        let dir = tempfile::tempdir().unwrap();

        let err = client.get_update("../etc/passwd", dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Command(CommandError::InvalidFileName { .. })
        ));
    }
}
