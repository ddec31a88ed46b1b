//! tremium-core: Hub/Node maintenance protocol and file logic
//!
//! Implements the connection state machine shared by the hub server and the
//! node client, the hub acceptor, the node maintenance run, archive
//! resolution and file retention.

pub mod acceptor;
pub mod archive;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod retention;
pub mod state;

pub use acceptor::Acceptor;
pub use archive::{match_superseded_image, resolve_candidates, ArchiveName, ArchivePattern};
pub use config::{HubConfig, LogConfig, NodeConfig, ProtocolConfig, RetentionConfig};
pub use connection::{ConnectionHandler, HubClient, Transfer, TransferEnd};
pub use error::{AcceptorError, ArchiveError, MaintenanceError, ProtocolError, RetentionError};
pub use maintenance::{DataFile, MaintenanceOrchestrator, MaintenanceReport, UpdateEntry};
pub use retention::{purge_expired, RetentionSchedule};
pub use state::{ConnectionSession, ConnectionState, Role};
