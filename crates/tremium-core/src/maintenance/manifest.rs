//! Update manifest consumed by the external image installer

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::archive::ArchiveName;
use crate::error::MaintenanceError;

/// Final line of every manifest
pub const MANIFEST_END: &str = "End";

/// One pending image substitution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEntry {
    /// Registry reference of the image being replaced
    pub old_ref: String,
    /// Downloaded archive holding the new image
    pub archive_file: String,
    /// Registry reference of the new image
    pub new_ref: String,
}

impl UpdateEntry {
    #[must_use]
    pub fn from_images(registry_prefix: &str, superseded: &ArchiveName<'_>, update: &ArchiveName<'_>) -> Self {
        Self {
            old_ref: format!("{registry_prefix}{}", superseded.registry_name),
            archive_file: update.file_name.to_string(),
            new_ref: format!("{registry_prefix}{}", update.registry_name),
        }
    }
}

impl fmt::Display for UpdateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.old_ref, self.archive_file, self.new_ref)
    }
}

/// Replace the manifest with `entries`
///
/// Written to a sibling temp file first and renamed over the old manifest,
/// so the installer never reads a partial list.
///
/// # Errors
/// Returns error if the temp file cannot be written or renamed
pub fn write_manifest(path: &Path, entries: &[UpdateEntry]) -> Result<(), MaintenanceError> {
    let mut contents = String::new();
    for entry in entries {
        contents.push_str(&entry.to_string());
        contents.push('\n');
    }
    contents.push_str(MANIFEST_END);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| MaintenanceError::io("create manifest directory", parent, e))?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file =
        fs::File::create(&tmp).map_err(|e| MaintenanceError::io("create", &tmp, e))?;
    file.write_all(contents.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| MaintenanceError::io("write", &tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| MaintenanceError::io("replace manifest", path, e))
}

/// Entries listed before the `End` line; malformed lines are skipped
#[must_use]
pub fn parse_manifest(contents: &str) -> Vec<UpdateEntry> {
    contents
        .lines()
        .map(str::trim)
        .take_while(|line| *line != MANIFEST_END)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let entry = UpdateEntry {
                old_ref: parts.next()?.to_string(),
                archive_file: parts.next()?.to_string(),
                new_ref: parts.next()?.to_string(),
            };
            parts.next().is_none().then_some(entry)
        })
        .collect()
}
