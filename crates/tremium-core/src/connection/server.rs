//! Passive role: serve one command per accepted connection

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, field, info, instrument, warn, Span};
use tremium_proto::{encode_update_list, Command};

use super::stream::{read_command_line, receive_into, send_from, CommandLine, MAX_COMMAND_LINE};
use crate::archive::{resolve_candidates, ArchivePattern};
use crate::config::{HubConfig, ProtocolConfig};
use crate::error::{ArchiveError, ProtocolError};
use crate::state::{ConnectionSession, ConnectionState};

/// Hub-side command dispatcher, shared by all connection workers
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    image_archive_dir: PathBuf,
    file_transfer_dir: PathBuf,
    pattern: ArchivePattern,
    protocol: ProtocolConfig,
}

impl ConnectionHandler {
    pub fn new(
        image_archive_dir: impl Into<PathBuf>,
        file_transfer_dir: impl Into<PathBuf>,
        pattern: ArchivePattern,
        protocol: ProtocolConfig,
    ) -> Self {
        Self {
            image_archive_dir: image_archive_dir.into(),
            file_transfer_dir: file_transfer_dir.into(),
            pattern,
            protocol,
        }
    }

    /// Build a handler from hub settings
    ///
    /// # Errors
    /// Returns error if the archive naming pattern is invalid
    pub fn from_config(config: &HubConfig) -> Result<Self, ArchiveError> {
        Ok(Self::new(
            &config.image_archive_dir,
            &config.file_transfer_dir,
            ArchivePattern::new(&config.archive_pattern)?,
            config.protocol.clone(),
        ))
    }

    #[must_use]
    pub fn image_archive_dir(&self) -> &Path {
        &self.image_archive_dir
    }

    #[must_use]
    pub fn file_transfer_dir(&self) -> &Path {
        &self.file_transfer_dir
    }

    /// Run one connection to completion
    ///
    /// Never fails: errors are logged and the connection is closed either
    /// way. Files written before a failure stay on disk.
    #[instrument(skip(self, stream), fields(command = field::Empty))]
    pub async fn serve<S>(&self, mut stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut session = ConnectionSession::accepted(peer);

        if let Err(e) = self.exchange(&mut stream, &mut session).await {
            warn!(error = %e, state = %session.state(), "connection failed");
        }

        session.close();
        if let Err(e) = stream.shutdown().await {
            debug!(error = %e, "shutdown after exchange failed");
        }
    }

    async fn exchange<S>(
        &self,
        stream: &mut S,
        session: &mut ConnectionSession,
    ) -> Result<(), ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        session.advance(ConnectionState::AwaitingCommand)?;

        let idle = self.protocol.idle_timeout();
        let Some(CommandLine { line, leftover }) =
            read_command_line(stream, MAX_COMMAND_LINE, idle).await?
        else {
            debug!("no command before idle timeout, closing");
            return Ok(());
        };

        session.advance(ConnectionState::Dispatching)?;
        let command = Command::parse_bytes(&line)?;
        Span::current().record("command", command.kind().keyword());
        debug!(argument = command.argument(), "dispatching command");

        match command {
            Command::CheckAvailableUpdates { node_id } => {
                self.check_available_updates(stream, &node_id).await
            }
            Command::GetUpdate { file_name } => {
                session.advance(ConnectionState::Streaming)?;
                self.send_update(stream, &file_name).await
            }
            Command::StoreFile { file_name } => {
                session.advance(ConnectionState::Streaming)?;
                self.store_file(stream, &file_name, &leftover).await
            }
        }
    }

    async fn check_available_updates<S>(
        &self,
        stream: &mut S,
        node_id: &str,
    ) -> Result<(), ProtocolError>
    where
        S: AsyncWrite + Unpin,
    {
        let dir = self.image_archive_dir.clone();
        let pattern = self.pattern.clone();
        let owned_id = node_id.to_string();
        let candidates =
            tokio::task::spawn_blocking(move || resolve_candidates(&owned_id, &dir, &pattern))
                .await
                .map_err(|e| ProtocolError::Worker(e.to_string()))??;

        let reply = encode_update_list(&candidates);
        stream.write_all(reply.as_bytes()).await?;
        stream.flush().await?;

        info!(node_id, updates = candidates.len(), "sent available updates");
        Ok(())
    }

    async fn send_update<S>(&self, stream: &mut S, file_name: &str) -> Result<(), ProtocolError>
    where
        S: AsyncWrite + Unpin,
    {
        let path = self.image_archive_dir.join(file_name);
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(file = file_name, "requested update not found, sending nothing");
                return Ok(());
            }
            Err(source) => return Err(ProtocolError::File { path, source }),
        };

        let bytes = send_from(&mut file, stream, self.protocol.chunk_size()).await?;
        info!(file = file_name, bytes, "sent update");
        Ok(())
    }

    async fn store_file<S>(
        &self,
        stream: &mut S,
        file_name: &str,
        leftover: &[u8],
    ) -> Result<(), ProtocolError>
    where
        S: AsyncRead + Unpin,
    {
        let path = self.file_transfer_dir.join(file_name);
        let mut file = File::create(&path)
            .await
            .map_err(|source| ProtocolError::File {
                path: path.clone(),
                source,
            })?;

        if !leftover.is_empty() {
            file.write_all(leftover)
                .await
                .map_err(|source| ProtocolError::File {
                    path: path.clone(),
                    source,
                })?;
        }

        let transfer = receive_into(
            stream,
            &mut file,
            self.protocol.chunk_size(),
            self.protocol.idle_timeout(),
        )
        .await?;

        info!(
            file = file_name,
            bytes = transfer.bytes + leftover.len() as u64,
            ended_by = %transfer.ended_by,
            "stored file"
        );
        Ok(())
    }
}
