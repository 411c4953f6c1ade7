use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::RunKind;

const RESULTS_MARKER: &str = "_results";
const LOG_MARKER: &str = ".log";

/// Whether a file inside a run folder belongs in the download.
pub fn is_collected(kind: RunKind, file_name: &str) -> bool {
    file_name.contains(RESULTS_MARKER)
        || (kind == RunKind::FullInfo && file_name.contains(LOG_MARKER))
}

/// Copy the result (and for full-information runs, log) files of `run_dir`
/// into `destination`, keeping their names.
///
/// A failure mid-way leaves the files copied so far in place.
pub async fn collect_run_files(run_dir: &Path, destination: &Path, kind: RunKind) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(destination)
        .await
        .with_context(|| format!("Failed to create {}", destination.display()))?;

    let mut entries = tokio::fs::read_dir(run_dir)
        .await
        .with_context(|| format!("Failed to list {}", run_dir.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        // Follows symlinks, so a linked results file is copied as its target.
        let metadata = tokio::fs::metadata(entry.path())
            .await
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        if !metadata.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(file = ?entry.file_name(), "Skipping run file with non UTF-8 name");
            continue;
        };
        if is_collected(kind, &name) {
            files.push(name);
        } else {
            debug!(file = %name, "Skipping run file");
        }
    }
    files.sort();

    let mut copied = Vec::with_capacity(files.len());
    for name in files {
        let src = run_dir.join(&name);
        let dst = destination.join(&name);
        tokio::fs::copy(&src, &dst)
            .await
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
        info!("Copied {}", dst.display());
        copied.push(dst);
    }

    Ok(copied)
}
