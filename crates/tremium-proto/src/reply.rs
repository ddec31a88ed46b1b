//! `CHECK_AVAILABLE_UPDATES` reply encoding
//!
//! The reply is a single comma separated list of archive names. An empty list
//! is sent as one space so the node can tell it apart from a hub that never
//! answered.

/// Wire form of an empty update list
pub const EMPTY_UPDATE_LIST: &str = " ";

/// Encode archive names for the reply
#[must_use]
pub fn encode_update_list<S: AsRef<str>>(names: &[S]) -> String {
    if names.is_empty() {
        return EMPTY_UPDATE_LIST.to_string();
    }
    names
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode a reply into archive names
///
/// Surrounding whitespace is dropped, so both `" "` and a trailing newline
/// decode cleanly.
#[must_use]
pub fn decode_update_list(reply: &str) -> Vec<String> {
    reply
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
