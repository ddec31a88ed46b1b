//! Error types for tremium-proto

use thiserror::Error;

/// Errors raised while parsing or validating a command line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Nothing was received before the command line ended
    #[error("empty command line")]
    Empty,

    /// First word is not one of the three supported commands
    #[error("unrecognized command: {0:?}")]
    Unrecognized(String),

    /// Command was recognized but carries no argument
    #[error("command {0} requires an argument")]
    MissingArgument(&'static str),

    /// Command line is not valid UTF-8
    #[error("command line is not valid UTF-8")]
    InvalidEncoding,

    /// File name argument is unusable as a single directory entry
    #[error("invalid file name {name:?}: {reason}")]
    InvalidFileName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },
}
