use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dataset::PatientId;
use crate::error::EvalError;
use crate::runs::RunKind;

/// Output of an interactive agent run for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryResult {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub intermediate_steps: Vec<Value>,
}

/// Diagnosis with a probability distribution (PROBS / SELFCONSISTENCY runs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilisticResult {
    #[serde(rename = "Diagnosis")]
    pub diagnosis: String,
    #[serde(rename = "Probabilities", default)]
    pub probabilities: Value,
}

/// One patient's stored run output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunResult {
    Trajectory(TrajectoryResult),
    Probabilistic(ProbabilisticResult),
    Diagnosis(String),
}

impl RunResult {
    /// The model's final answer text.
    pub fn answer(&self) -> &str {
        match self {
            RunResult::Trajectory(t) => &t.output,
            RunResult::Probabilistic(p) => &p.diagnosis,
            RunResult::Diagnosis(d) => d,
        }
    }
}

pub type RunResults = BTreeMap<PatientId, RunResult>;

/// File-name pattern of a model's results for one pathology.
pub fn results_pattern(kind: RunKind, pathology: &str, agent: &str, model: &str) -> String {
    match kind {
        RunKind::Standard => format!("{}_{}_{}_*_results.jsonl", pathology, agent, model),
        RunKind::FullInfo => format!("{}_{}_*_FULL_INFO_*results.jsonl", pathology, model),
    }
}

fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", body.join(".*")))
        .with_context(|| format!("Invalid file pattern '{}'", pattern))
}

/// The single file in `dir` whose name matches `pattern` (`*` wildcards).
/// Zero or several matches are errors.
pub async fn resolve_results_file(dir: &Path, pattern: &str) -> Result<PathBuf> {
    let re = wildcard_regex(pattern)?;

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        match entry.file_name().to_str() {
            Some(name) if re.is_match(name) => matches.push(name.to_string()),
            Some(_) => {}
            None => warn!(file = ?entry.file_name(), "Ignoring file with non UTF-8 name"),
        }
    }
    matches.sort();

    match matches.len() {
        0 => Err(EvalError::NoResultsFile {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
        }
        .into()),
        1 => Ok(dir.join(&matches[0])),
        _ => Err(EvalError::AmbiguousResultsFile {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
            matches,
        }
        .into()),
    }
}

/// Read a JSON-lines file of `{patient_id: record}` objects and merge them in
/// file order. A patient appearing twice keeps its last record.
pub async fn load_results(path: &Path) -> Result<RunResults> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read results {}", path.display()))?;
    parse_results(&content).with_context(|| format!("Invalid results {}", path.display()))
}

pub fn parse_results(content: &str) -> Result<RunResults> {
    let mut merged = RunResults::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk: RunResults =
            serde_json::from_str(line).with_context(|| format!("line {}", i + 1))?;
        debug!(line = i + 1, records = chunk.len(), "Merging results chunk");
        merged.extend(chunk);
    }
    Ok(merged)
}
