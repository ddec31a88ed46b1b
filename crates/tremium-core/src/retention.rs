//! Age-based purge of transfer directories

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeDelta};
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::archive::{regular_file_names, TIMESTAMP_FORMAT};
use crate::error::RetentionError;

static EMBEDDED_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}_\d{2}-\d{2}-\d{2}").expect("timestamp pattern is valid")
});

const LOG_SUFFIX: &str = ".log";

/// Delete expired files from `target_dir`
///
/// Returns the number of files deleted.
///
/// # Errors
/// Returns error if the directory cannot be listed or a file cannot be removed
pub fn purge_expired(target_dir: &Path, max_age_days: u32) -> Result<usize, RetentionError> {
    // Ages beyond the representable range keep every timestamped file
    let cutoff = TimeDelta::try_days(i64::from(max_age_days))
        .and_then(|age| Local::now().naive_local().checked_sub_signed(age))
        .unwrap_or(NaiveDateTime::MIN);
    purge_expired_before(target_dir, cutoff)
}

/// Delete files whose embedded timestamp is older than `cutoff`
///
/// Files without a parseable timestamp are deleted only when they end in
/// `.log`. A missing directory is left alone.
///
/// # Errors
/// Returns error if the directory cannot be listed or a file cannot be removed
#[instrument(skip_all, fields(dir = %target_dir.display(), cutoff = %cutoff))]
pub fn purge_expired_before(
    target_dir: &Path,
    cutoff: NaiveDateTime,
) -> Result<usize, RetentionError> {
    let names = match regular_file_names(target_dir) {
        Ok(names) => names,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("directory missing, nothing to purge");
            return Ok(0);
        }
        Err(source) => {
            return Err(RetentionError::Scan {
                path: target_dir.to_path_buf(),
                source,
            });
        }
    };

    let mut deleted = 0;
    for name in names {
        if !is_expired(&name, cutoff) {
            continue;
        }

        let path = target_dir.join(&name);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(file = %name, "deleted expired file");
                deleted += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(RetentionError::Remove { path, source }),
        }
    }

    if deleted > 0 {
        info!(deleted, "purged expired files");
    }
    Ok(deleted)
}

fn is_expired(name: &str, cutoff: NaiveDateTime) -> bool {
    let timestamp = EMBEDDED_TIMESTAMP
        .find(name)
        .and_then(|m| NaiveDateTime::parse_from_str(m.as_str(), TIMESTAMP_FORMAT).ok());

    match timestamp {
        Some(timestamp) => timestamp < cutoff,
        None => name.ends_with(LOG_SUFFIX),
    }
}

/// Periodic purge running in the background
#[derive(Debug, Clone)]
pub struct RetentionSchedule {
    target_dir: PathBuf,
    max_age_days: u32,
    interval: Duration,
}

impl RetentionSchedule {
    #[must_use]
    pub fn new(target_dir: impl Into<PathBuf>, max_age_days: u32, interval: Duration) -> Self {
        Self {
            target_dir: target_dir.into(),
            max_age_days,
            interval,
        }
    }

    /// Start purging, first pass immediately
    ///
    /// A failed pass is logged and the schedule continues. Abort the returned
    /// handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let dir = self.target_dir.clone();
                let max_age_days = self.max_age_days;
                match tokio::task::spawn_blocking(move || purge_expired(&dir, max_age_days)).await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "scheduled purge failed"),
                    Err(e) => warn!(error = %e, "scheduled purge task panicked"),
                }
            }
        })
    }
}
