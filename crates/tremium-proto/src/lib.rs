//! tremium-proto: Hub/Node wire vocabulary
//!
//! Contains the command line grammar, the update-list reply encoding and the
//! file-name rules shared by the hub server and the node client.

pub mod command;
pub mod error;
pub mod reply;

pub use command::{Command, CommandKind, validate_file_name};
pub use error::CommandError;
pub use reply::{decode_update_list, encode_update_list, EMPTY_UPDATE_LIST};
