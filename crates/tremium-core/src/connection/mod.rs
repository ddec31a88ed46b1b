//! One-shot command connections between node and hub
//!
//! Each connection carries exactly one command line followed by an optional
//! raw payload. There is no length prefix: a transfer ends when the sender
//! closes or the receiver sees no bytes for the idle timeout.

mod client;
mod server;
mod stream;

pub use client::HubClient;
pub use server::ConnectionHandler;
pub use stream::{Transfer, TransferEnd};
