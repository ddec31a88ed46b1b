//! Command line grammar
//!
//! A connection opens with exactly one `<COMMAND> <ARGUMENT>` line. The node
//! side terminates it with `\n`; older peers send it unterminated, so parsing
//! works on whatever text the caller considers the first line.

use std::fmt;

use crate::error::CommandError;

/// The three commands a hub understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CheckAvailableUpdates,
    GetUpdate,
    StoreFile,
}

impl CommandKind {
    /// Wire keyword for this command
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            CommandKind::CheckAvailableUpdates => "CHECK_AVAILABLE_UPDATES",
            CommandKind::GetUpdate => "GET_UPDATE",
            CommandKind::StoreFile => "STORE_FILE",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "CHECK_AVAILABLE_UPDATES" => Some(CommandKind::CheckAvailableUpdates),
            "GET_UPDATE" => Some(CommandKind::GetUpdate),
            "STORE_FILE" => Some(CommandKind::StoreFile),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A parsed command message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for the latest archives relevant to a node id
    CheckAvailableUpdates { node_id: String },
    /// Download one archive from the hub image directory
    GetUpdate { file_name: String },
    /// Upload one file into the hub transfer directory
    StoreFile { file_name: String },
}

impl Command {
    /// Parse the first line of a connection
    ///
    /// # Errors
    /// Returns error for an empty line, an unknown keyword, a missing
    /// argument, or a file name that is not a plain directory entry
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_matches(|c: char| c == '\n' || c == '\r' || c == '\0');
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(CommandError::Empty);
        }

        let (word, argument) = match trimmed.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (trimmed, ""),
        };

        let kind = CommandKind::from_keyword(word)
            .ok_or_else(|| CommandError::Unrecognized(trimmed.to_string()))?;

        if argument.is_empty() {
            return Err(CommandError::MissingArgument(kind.keyword()));
        }

        match kind {
            CommandKind::CheckAvailableUpdates => Ok(Command::CheckAvailableUpdates {
                node_id: argument.to_string(),
            }),
            CommandKind::GetUpdate => Ok(Command::GetUpdate {
                file_name: validate_file_name(argument)?.to_string(),
            }),
            CommandKind::StoreFile => Ok(Command::StoreFile {
                file_name: validate_file_name(argument)?.to_string(),
            }),
        }
    }

    /// Parse raw bytes, rejecting anything that is not UTF-8
    ///
    /// # Errors
    /// See [`Command::parse`]
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, CommandError> {
        let line = std::str::from_utf8(bytes).map_err(|_| CommandError::InvalidEncoding)?;
        Self::parse(line)
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::CheckAvailableUpdates { .. } => CommandKind::CheckAvailableUpdates,
            Command::GetUpdate { .. } => CommandKind::GetUpdate,
            Command::StoreFile { .. } => CommandKind::StoreFile,
        }
    }

    /// The argument as sent on the wire
    #[must_use]
    pub fn argument(&self) -> &str {
        match self {
            Command::CheckAvailableUpdates { node_id } => node_id,
            Command::GetUpdate { file_name } | Command::StoreFile { file_name } => file_name,
        }
    }

    /// Encode as a newline-terminated command line
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{} {}\n", self.kind(), self.argument())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.argument())
    }
}

/// Check that a name can be used as a single entry inside a hub/node directory
///
/// Commas are rejected because update lists are comma separated.
///
/// # Errors
/// Returns `CommandError::InvalidFileName` describing the first violated rule
pub fn validate_file_name(name: &str) -> Result<&str, CommandError> {
    let reject = |reason| {
        Err(CommandError::InvalidFileName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("empty name");
    }
    if name == "." || name == ".." {
        return reject("parent directory reference");
    }
    if name.contains('/') || name.contains('\\') {
        return reject("path separator");
    }
    if name.contains(',') {
        return reject("comma");
    }
    if name.chars().any(char::is_control) {
        return reject("control character");
    }
    Ok(name)
}
