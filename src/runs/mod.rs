pub mod collector;
pub mod locator;

pub use collector::collect_run_files;
pub use locator::{locate_run, RunFilter};

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;

/// How a run was produced, which decides its folder naming and which files
/// it leaves behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Interactive agent run: `{pathology}_{agent}_{model}_..._{timestamp}{addendum}`.
    #[default]
    Standard,
    /// All patient information given upfront:
    /// `{pathology}_{model}_..._{timestamp}_FULL_INFO{addendum}`.
    FullInfo,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunKind::Standard => write!(f, "standard"),
            RunKind::FullInfo => write!(f, "full_info"),
        }
    }
}

/// Copy the selected run of every (model, pathology) pair into the
/// configured destination. Returns the copied file paths.
pub async fn download_all(config: &Config) -> Result<Vec<PathBuf>> {
    let dl = &config.download;
    let kind = dl.kind();
    let addendum = dl.addendum();
    let destination = dl.destination(&config.sota_dir);

    info!(
        kind = %kind,
        addendum = %addendum,
        folder_position = dl.folder_position,
        destination = %destination.display(),
        "Downloading runs"
    );

    let mut copied = Vec::new();
    for model in &config.models {
        for pathology in &config.pathologies {
            let filter = match kind {
                RunKind::Standard => {
                    RunFilter::standard(pathology, &config.agent, model, &addendum)
                }
                RunKind::FullInfo => RunFilter::full_info(pathology, model, &addendum),
            };
            let folder = locate_run(&config.logs_dir, &filter, dl.folder_position)
                .await
                .with_context(|| format!("Failed to locate run for {} / {}", model, pathology))?;
            info!(model = %model, pathology = %pathology, folder = %folder, "Selected run");

            let files = collect_run_files(&config.logs_dir.join(&folder), &destination, kind)
                .await
                .with_context(|| format!("Failed to collect files from {}", folder))?;
            copied.extend(files);
        }
    }

    info!("Downloaded {} files", copied.len());
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadConfig;

    #[test]
    fn test_run_kind_serde_names() {
        let kind: RunKind = serde_json::from_str("\"full_info\"").unwrap();
        assert_eq!(kind, RunKind::FullInfo);
        assert_eq!(serde_json::to_string(&RunKind::Standard).unwrap(), "\"standard\"");
        assert_eq!(RunKind::default(), RunKind::Standard);
    }

    #[tokio::test]
    async fn test_download_all_standard_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tmp.path().join("logs");
        for (patho, stamp) in [
            ("appendicitis", "01-01-2023_10:00:00"),
            ("appendicitis", "02-01-2023_09:00:00"),
            ("pancreatitis", "05-03-2023_08:30:00"),
        ] {
            let dir = logs.join(format!("{}_ZeroShot_m1__{}", patho, stamp));
            tokio::fs::create_dir_all(&dir).await.unwrap();
            tokio::fs::write(dir.join(format!("{}_{}_results.jsonl", patho, stamp)), "{}")
                .await
                .unwrap();
        }

        let config = Config {
            logs_dir: logs,
            sota_dir: tmp.path().join("sota"),
            models: vec!["m1".into()],
            pathologies: vec!["appendicitis".into(), "pancreatitis".into()],
            download: DownloadConfig {
                full_info: false,
                ..DownloadConfig::default()
            },
            ..Config::default()
        };

        let copied = download_all(&config).await.expect("should download");
        assert_eq!(copied.len(), 2);
        let dest = tmp.path().join("sota").join("CDM_VANILLA");
        assert!(dest
            .join("appendicitis_02-01-2023_09:00:00_results.jsonl")
            .exists());
        assert!(!dest
            .join("appendicitis_01-01-2023_10:00:00_results.jsonl")
            .exists());
    }

    #[tokio::test]
    async fn test_download_all_missing_run_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            logs_dir: tmp.path().to_path_buf(),
            sota_dir: tmp.path().join("sota"),
            ..Config::default()
        };
        assert!(download_all(&config).await.is_err());
    }
}
