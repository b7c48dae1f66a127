use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Configure retention of backup artifacts.
///
/// If either value is [None] the corresponding policy is disabled; artifacts
/// are deleted when *any* enabled policy selects them.
#[derive(Copy, Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Delete artifacts older than this many days.
    pub max_age_days: Option<u16>,

    /// Keep only the newest N artifacts, by modification time.
    pub keep_last: Option<usize>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: Some(35),
            keep_last: Some(30),
        }
    }
}

/// Prune artifacts in `dir` whose file name ends in `suffix`.
///
/// Deletion is best-effort: a file that can't be removed is logged and
/// skipped. Only reading the directory itself is fallible. The newest
/// artifact is exempt from every policy: it is the one the current run
/// just wrote, and retention must never delete it, not even under
/// `keep_last = 0` or `max_age_days = 0`.
///
/// Returns the number of deleted artifacts.
pub fn prune(
    dir: &Path,
    suffix: &str,
    config: &RetentionConfig,
    dry_run: bool,
) -> std::io::Result<usize> {
    let mut artifacts: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(suffix) {
            continue;
        }

        let modified = entry.metadata()?.modified()?;
        artifacts.push((entry.path(), modified));
    }

    // newest first
    artifacts.sort_by(|(_, a), (_, b)| b.cmp(a));

    let now = SystemTime::now();
    let max_age = config
        .max_age_days
        .map(|days| Duration::from_secs(u64::from(days) * SECONDS_PER_DAY));

    let mut deleted = 0;
    for (index, (path, modified)) in artifacts.iter().enumerate() {
        // index 0 is the artifact this run just created
        if index == 0 {
            continue;
        }

        let beyond_count = config.keep_last.is_some_and(|keep| index >= keep);
        let beyond_age = max_age.is_some_and(|max_age| {
            now.duration_since(*modified)
                .is_ok_and(|age| age > max_age)
        });

        if !(beyond_count || beyond_age) {
            continue;
        }

        if dry_run {
            log::info!(target: "retention", "Would delete: {}", path.display());
            deleted += 1;
            continue;
        }

        match fs::remove_file(path) {
            Ok(()) => {
                log::debug!(target: "retention", "Deleted: {}", path.display());
                deleted += 1;
            }
            Err(e) => {
                log::warn!(target: "retention", "Deleting {} failed: {e}", path.display());
            }
        }
    }

    Ok(deleted)
}
