//! Image archive resolution
//!
//! Archives follow `<id-prefix>_<component>_<YYYY-MM-DD_HH-MM-SS>.tar.gz`.
//! The hub picks the newest eligible archive per component for a node; the
//! node maps an incoming archive to the installed one it replaces.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::{debug, trace};

use crate::error::ArchiveError;

/// Timestamp layout embedded in archive and data file names
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const HUB_ARCHIVE_SUFFIX: &str = ".tar.gz";
const NODE_ARCHIVE_SUFFIX: &str = ".gz";

/// Compiled archive naming pattern
///
/// Capture group 2 is the component name and group 3 the timestamp; the
/// id-prefix is whatever precedes the component.
#[derive(Debug, Clone)]
pub struct ArchivePattern {
    regex: Regex,
}

impl ArchivePattern {
    /// Compile and validate a naming pattern
    ///
    /// # Errors
    /// Returns error if the regex is invalid or has fewer than three groups
    pub fn new(pattern: &str) -> Result<Self, ArchiveError> {
        let regex = Regex::new(pattern).map_err(|source| ArchiveError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let found = regex.captures_len().saturating_sub(1);
        if found < 3 {
            return Err(ArchiveError::MissingCaptureGroups {
                pattern: pattern.to_string(),
                found,
            });
        }

        Ok(Self { regex })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Split an archive file name into its parts
    ///
    /// Returns `None` when the name does not match or the timestamp is not a
    /// real date.
    #[must_use]
    pub fn parse<'a>(&self, file_name: &'a str) -> Option<ArchiveName<'a>> {
        let captures = self.regex.captures(file_name)?;
        let component = captures.get(2)?;
        let timestamp = captures.get(3)?;
        let parsed = NaiveDateTime::parse_from_str(timestamp.as_str(), TIMESTAMP_FORMAT).ok()?;

        Some(ArchiveName {
            file_name,
            id_prefix: drop_separator(&file_name[..component.start()]),
            component: component.as_str(),
            timestamp: parsed,
            registry_name: drop_separator(&file_name[..timestamp.start()]),
        })
    }
}

/// Remove the single separator character preceding a capture
fn drop_separator(text: &str) -> &str {
    let mut chars = text.chars();
    chars.next_back();
    chars.as_str()
}

/// A file name that follows the archive naming pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName<'a> {
    /// Full file name
    pub file_name: &'a str,
    /// Node id prefix (itself a regex) the archive targets
    pub id_prefix: &'a str,
    /// Software component name
    pub component: &'a str,
    /// Build timestamp
    pub timestamp: NaiveDateTime,
    /// Name without timestamp and suffix, used for registry references
    pub registry_name: &'a str,
}

impl ArchiveName<'_> {
    /// Whether `node_id` starts with a match of the archive's id-prefix
    #[must_use]
    pub fn targets(&self, node_id: &str) -> bool {
        match Regex::new(&format!("^(?:{})", self.id_prefix)) {
            Ok(prefix) => prefix.is_match(node_id),
            Err(e) => {
                debug!(archive = %self.file_name, error = %e, "id prefix is not a valid pattern");
                false
            }
        }
    }
}

/// Names of regular files (symlinks followed) in `dir`, sorted
pub(crate) fn regular_file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let is_file = fs::metadata(entry.path())
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if is_file {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

/// Latest eligible archive per component for `node_id`
///
/// Scans `archive_dir` for `.tar.gz` files matching `pattern`, keeps those
/// whose id-prefix matches the start of `node_id`, and returns the newest per
/// component, sorted by file name. Names that do not parse, or that contain
/// commas, are skipped.
///
/// # Errors
/// Returns error if the directory cannot be listed
pub fn resolve_candidates(
    node_id: &str,
    archive_dir: &Path,
    pattern: &ArchivePattern,
) -> Result<Vec<String>, ArchiveError> {
    let names = regular_file_names(archive_dir).map_err(|source| ArchiveError::Scan {
        path: archive_dir.to_path_buf(),
        source,
    })?;

    let mut latest: BTreeMap<&str, (NaiveDateTime, &str)> = BTreeMap::new();

    for name in &names {
        if !name.ends_with(HUB_ARCHIVE_SUFFIX) {
            continue;
        }
        if name.contains(',') {
            debug!(archive = %name, "skipping archive with comma in its name");
            continue;
        }
        let Some(archive) = pattern.parse(name) else {
            trace!(archive = %name, "skipping file outside naming pattern");
            continue;
        };
        if !archive.targets(node_id) {
            continue;
        }

        let newer = latest
            .get(archive.component)
            .is_none_or(|(current, _)| archive.timestamp > *current);
        if newer {
            latest.insert(archive.component, (archive.timestamp, archive.file_name));
        }
    }

    let mut candidates: Vec<String> = latest
        .into_values()
        .map(|(_, name)| name.to_string())
        .collect();
    candidates.sort();

    debug!(node_id, count = candidates.len(), "resolved update candidates");
    Ok(candidates)
}

/// Installed archive that `update_file_name` replaces, if any
///
/// Looks in the node's `archive_dir` for another `.gz` file of the same
/// component. When several exist the first in file-name order wins.
///
/// # Errors
/// Returns error if the directory cannot be listed
pub fn match_superseded_image(
    update_file_name: &str,
    archive_dir: &Path,
    pattern: &ArchivePattern,
) -> Result<Option<String>, ArchiveError> {
    let Some(update) = pattern.parse(update_file_name) else {
        return Ok(None);
    };

    let names = regular_file_names(archive_dir).map_err(|source| ArchiveError::Scan {
        path: archive_dir.to_path_buf(),
        source,
    })?;

    let superseded = names.into_iter().find(|name| {
        name.ends_with(NODE_ARCHIVE_SUFFIX)
            && name != update_file_name
            && pattern
                .parse(name)
                .is_some_and(|installed| installed.component == update.component)
    });

    Ok(superseded)
}
