//! Connection state machine types

use std::fmt;

use tracing::debug;

use crate::error::ProtocolError;

/// States of one single-shot connection exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    AwaitingCommand,
    Dispatching,
    Streaming,
    Closed,
}

impl ConnectionState {
    /// Check whether moving to `next` is allowed
    ///
    /// Every state may close; nothing leaves `Closed`.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{AwaitingCommand, Closed, Connected, Connecting, Dispatching, Streaming};

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Connecting, Connected) => true,
            (Connected, AwaitingCommand | Dispatching) => true,
            (AwaitingCommand, Dispatching) => true,
            (Dispatching, Streaming) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::AwaitingCommand => "awaiting_command",
            ConnectionState::Dispatching => "dispatching",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which side of the exchange a session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Hub: accepts, waits for a command, serves it
    Passive,
    /// Node: dials, sends a command, streams
    Active,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Passive => f.write_str("passive"),
            Role::Active => f.write_str("active"),
        }
    }
}

/// Tracks the state of one connection
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    peer: String,
    role: Role,
    state: ConnectionState,
}

impl ConnectionSession {
    /// Session for a connection the hub has just accepted
    #[must_use]
    pub fn accepted(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            role: Role::Passive,
            state: ConnectionState::Connected,
        }
    }

    /// Session for a connection the node is about to dial
    #[must_use]
    pub fn dialing(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            role: Role::Active,
            state: ConnectionState::Connecting,
        }
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `next`
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidTransition` if `next` is not reachable
    pub fn advance(&mut self, next: ConnectionState) -> Result<(), ProtocolError> {
        if !self.state.can_transition_to(next) {
            return Err(ProtocolError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        debug!(
            peer = %self.peer,
            role = %self.role,
            from = %self.state,
            to = %next,
            "connection transition"
        );
        self.state = next;
        Ok(())
    }

    /// Close the session; closing twice is a no-op
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            // Closing is valid from every open state
            let _ = self.advance(ConnectionState::Closed);
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }
}
