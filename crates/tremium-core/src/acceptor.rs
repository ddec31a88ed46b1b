//! Hub listener: one worker task per accepted connection

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionHandler;
use crate::error::AcceptorError;

/// Accept loop for the hub endpoint
pub struct Acceptor {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
    admission: Option<Arc<Semaphore>>,
}

impl Acceptor {
    /// Bind the listening endpoint
    ///
    /// `max_connections` caps concurrently served connections; `None` leaves
    /// them unbounded.
    ///
    /// # Errors
    /// Returns `AcceptorError::Bind` if the address cannot be bound
    pub async fn bind(
        addr: &str,
        handler: ConnectionHandler,
        max_connections: Option<usize>,
    ) -> Result<Self, AcceptorError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AcceptorError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            handler: Arc::new(handler),
            admission: max_connections.map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
        })
    }

    /// # Errors
    /// Returns error if the socket address cannot be read
    pub fn local_addr(&self) -> Result<SocketAddr, AcceptorError> {
        self.listener.local_addr().map_err(AcceptorError::LocalAddr)
    }

    /// Accept until a fatal error
    ///
    /// # Errors
    /// See [`Acceptor::run_until`]
    pub async fn run(self) -> Result<(), AcceptorError> {
        self.run_until(std::future::pending()).await
    }

    /// Accept until `shutdown` resolves or accepting fails
    ///
    /// Workers still running at that point are aborted.
    ///
    /// # Errors
    /// Returns `AcceptorError::Accept` when the listener fails; the caller
    /// decides whether to restart
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), AcceptorError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut workers = JoinSet::new();
        info!(addr = ?self.listener.local_addr().ok(), "accepting connections");

        loop {
            while let Some(finished) = workers.try_join_next() {
                if let Err(e) = finished {
                    if e.is_panic() {
                        warn!(error = %e, "connection worker panicked");
                    }
                }
            }

            let permit = match &self.admission {
                Some(admission) => tokio::select! {
                    () = &mut shutdown => break,
                    permit = Arc::clone(admission).acquire_owned() => {
                        Some(permit.map_err(|_| AcceptorError::AdmissionClosed)?)
                    }
                },
                None => None,
            };

            let accepted = tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            let (socket, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, active = workers.len(), "accept failed, aborting workers");
                    workers.abort_all();
                    return Err(AcceptorError::Accept(e));
                }
            };

            debug!(%peer, "accepted connection");
            let handler = Arc::clone(&self.handler);
            workers.spawn(async move {
                let _permit = permit;
                handler.serve(socket, peer.to_string()).await;
            });
        }

        info!(active = workers.len(), "acceptor shutting down");
        workers.shutdown().await;
        Ok(())
    }
}
