use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{debug, warn};

use super::RunKind;
use crate::error::EvalError;

/// Timestamp embedded in every run folder name.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y_%H:%M:%S";

const FULL_INFO_MARKER: &str = "_FULL_INFO";

/// Selects run folders of one pathology/model combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFilter {
    pub kind: RunKind,
    pub pathology: String,
    pub agent: String,
    pub model: String,
    pub addendum: String,
}

impl RunFilter {
    pub fn standard(pathology: &str, agent: &str, model: &str, addendum: &str) -> Self {
        Self {
            kind: RunKind::Standard,
            pathology: pathology.to_string(),
            agent: agent.to_string(),
            model: model.to_string(),
            addendum: addendum.to_string(),
        }
    }

    pub fn full_info(pathology: &str, model: &str, addendum: &str) -> Self {
        Self {
            kind: RunKind::FullInfo,
            pathology: pathology.to_string(),
            agent: String::new(),
            model: model.to_string(),
            addendum: addendum.to_string(),
        }
    }

    pub fn prefix(&self) -> String {
        match self.kind {
            RunKind::Standard => format!("{}_{}_{}_", self.pathology, self.agent, self.model),
            RunKind::FullInfo => format!("{}_{}_", self.pathology, self.model),
        }
    }

    pub fn suffix(&self) -> String {
        match self.kind {
            RunKind::Standard => self.addendum.clone(),
            RunKind::FullInfo => format!("{}{}", FULL_INFO_MARKER, self.addendum),
        }
    }

    /// Exact prefix and suffix match. Without a suffix the name must end in a
    /// digit, i.e. directly in its timestamp.
    pub fn matches(&self, name: &str) -> bool {
        if !name.starts_with(&self.prefix()) {
            return false;
        }
        let suffix = self.suffix();
        if suffix.is_empty() {
            name.chars().last().is_some_and(|c| c.is_ascii_digit())
        } else {
            name.ends_with(&suffix)
        }
    }

    /// The timestamp is the pair of underscore segments sitting right before
    /// the segments contributed by the suffix.
    pub fn parse_timestamp(&self, name: &str) -> Result<NaiveDateTime, EvalError> {
        let segments: Vec<&str> = name.split('_').collect();
        let skip = self.suffix().matches('_').count();

        if segments.len() < skip + 2 {
            return Err(EvalError::BadTimestamp {
                folder: name.to_string(),
                raw: String::new(),
                source: None,
            });
        }

        let end = segments.len() - skip;
        let raw = segments[end - 2..end].join("_");
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(|e| {
            EvalError::BadTimestamp {
                folder: name.to_string(),
                raw,
                source: Some(e),
            }
        })
    }
}

/// Matching folder names ordered most recent first. Ties keep the
/// lexicographic order of the names.
pub fn rank_runs<I>(names: I, filter: &RunFilter) -> Result<Vec<(String, NaiveDateTime)>, EvalError>
where
    I: IntoIterator<Item = String>,
{
    let mut names: Vec<String> = names.into_iter().filter(|n| filter.matches(n)).collect();
    names.sort();

    let mut ranked = Vec::with_capacity(names.len());
    for name in names {
        let ts = filter.parse_timestamp(&name)?;
        debug!(folder = %name, timestamp = %ts, "Matched run folder");
        ranked.push((name, ts));
    }

    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(ranked)
}

/// Name of the run folder under `base_dir` at `folder_position` in descending
/// timestamp order (0 = most recent).
pub async fn locate_run(base_dir: &Path, filter: &RunFilter, folder_position: usize) -> Result<String> {
    let mut entries = tokio::fs::read_dir(base_dir)
        .await
        .with_context(|| format!("Failed to list {}", base_dir.display()))?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        match entry.file_name().to_str() {
            Some(name) => names.push(name.to_string()),
            None => warn!(folder = ?entry.file_name(), "Ignoring run folder with non UTF-8 name"),
        }
    }

    let ranked = rank_runs(names, filter)?;
    let found = ranked.len();
    ranked
        .into_iter()
        .nth(folder_position)
        .map(|(name, _)| name)
        .ok_or_else(|| {
            EvalError::NoRunAtPosition {
                prefix: filter.prefix(),
                suffix: filter.suffix(),
                position: folder_position,
                found,
            }
            .into()
        })
}
