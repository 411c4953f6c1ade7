use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::runs::RunKind;

const DEFAULT_LOGS_DIR: &str = "logs";
const DEFAULT_SOTA_DIR: &str = "logs/SOTA";
const DEFAULT_DATASET_DIR: &str = "cdm-dataset";
const DEFAULT_AGENT: &str = "ZeroShot";
const DEFAULT_DIFFICULTY: &str = "first_diag";
const DEFAULT_FULL_INFO_ADDENDUM: &str = "_PLI_N";

/// Difficulty levels whose aggregates are written to disk unless overridden.
pub const PERSISTED_DIFFICULTIES: &[&str] = &["first_diag", "dr_eval"];

const DEFAULT_MODELS: &[&str] = &["TheBloke_Llama-2-70B-Chat-GPTQ"];

const DEFAULT_PATHOLOGIES: &[&str] = &[
    "appendicitis",
    "cholecystitis",
    "diverticulitis",
    "pancreatitis",
];

const DEFAULT_FIELDS: &[&str] = &[
    "Diagnosis",
    "Gracious Diagnosis",
    "Physical Examination",
    "Late Physical Examination",
    "Action Parsing",
    "Treatment Parsing",
    "Diagnosis Parsing",
    "Rounds",
    "Invalid Tools",
    "Unnecessary Laboratory Tests",
    "Unnecessary Imaging",
];

const DEFAULT_FULL_INFO_FIELDS: &[&str] = &["Diagnosis", "Gracious Diagnosis"];

const DEFAULT_COUNT_FIELDS: &[&str] = &["Unnecessary Laboratory Tests", "Unnecessary Imaging"];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default)]
    pub kind: RunKind,
}

impl ExperimentConfig {
    pub fn new(name: impl Into<String>, kind: RunKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// PROBS and SELFCONSISTENCY experiments store a diagnosis together with
    /// a probability distribution instead of a bare diagnosis.
    pub fn is_probabilistic(&self) -> bool {
        self.name.contains("PROBS") || self.name.contains("SELFCONSISTENCY")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// argv of the external rubric evaluator; empty disables evaluation.
    pub command: Vec<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub full_info: bool,
    /// Falls back to `_PLI_N` for full-information runs and nothing otherwise.
    pub addendum: Option<String>,
    pub folder_position: usize,
    /// Defaults to `{sota_dir}/FI_PLI` or `{sota_dir}/CDM_VANILLA`.
    pub destination: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            full_info: true,
            addendum: None,
            folder_position: 0,
            destination: None,
        }
    }
}

impl DownloadConfig {
    pub fn kind(&self) -> RunKind {
        if self.full_info {
            RunKind::FullInfo
        } else {
            RunKind::Standard
        }
    }

    pub fn addendum(&self) -> String {
        match (&self.addendum, self.full_info) {
            (Some(a), _) => a.clone(),
            (None, true) => DEFAULT_FULL_INFO_ADDENDUM.to_string(),
            (None, false) => String::new(),
        }
    }

    pub fn destination(&self, sota_dir: &Path) -> PathBuf {
        match &self.destination {
            Some(d) => d.clone(),
            None if self.full_info => sota_dir.join("FI_PLI"),
            None => sota_dir.join("CDM_VANILLA"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logs_dir: PathBuf,
    pub sota_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub models: Vec<String>,
    pub pathologies: Vec<String>,
    pub agent: String,
    pub difficulty: String,
    /// Explicit override of the difficulty-based persistence default.
    pub persist_aggregates: Option<bool>,
    pub experiments: Vec<ExperimentConfig>,
    pub fields: Vec<String>,
    pub full_info_fields: Vec<String>,
    pub count_fields: Vec<String>,
    pub evaluator: EvaluatorConfig,
    pub download: DownloadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
            sota_dir: PathBuf::from(DEFAULT_SOTA_DIR),
            dataset_dir: PathBuf::from(DEFAULT_DATASET_DIR),
            models: strings(DEFAULT_MODELS),
            pathologies: strings(DEFAULT_PATHOLOGIES),
            agent: DEFAULT_AGENT.to_string(),
            difficulty: DEFAULT_DIFFICULTY.to_string(),
            persist_aggregates: None,
            experiments: vec![
                ExperimentConfig::new("CDM_VANILLA", RunKind::Standard),
                ExperimentConfig::new("FI_PLI", RunKind::FullInfo),
            ],
            fields: strings(DEFAULT_FIELDS),
            full_info_fields: strings(DEFAULT_FULL_INFO_FIELDS),
            count_fields: strings(DEFAULT_COUNT_FIELDS),
            evaluator: EvaluatorConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, then the YAML file (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_yaml::from_str(&content)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(dir) = env_path("CDM_EVAL_LOGS_DIR") {
            self.logs_dir = dir;
        }
        if let Some(dir) = env_path("CDM_EVAL_SOTA_DIR") {
            self.sota_dir = dir;
        }
        if let Some(dir) = env_path("CDM_EVAL_DATASET_DIR") {
            self.dataset_dir = dir;
        }
        self.difficulty = env_parse("CDM_EVAL_DIFFICULTY", self.difficulty.clone());
    }

    pub fn persist_aggregates(&self) -> bool {
        self.persist_aggregates
            .unwrap_or_else(|| PERSISTED_DIFFICULTIES.contains(&self.difficulty.as_str()))
    }

    pub fn fields_for(&self, kind: RunKind) -> &[String] {
        match kind {
            RunKind::Standard => &self.fields,
            RunKind::FullInfo => &self.full_info_fields,
        }
    }

    pub fn experiment_dir(&self, experiment: &str) -> PathBuf {
        self.sota_dir.join(experiment)
    }

    pub fn print_banner(&self) {
        tracing::info!("╔══════════════════════════════════════════════════╗");
        tracing::info!("║              cdm-eval v{:<26}║", env!("CARGO_PKG_VERSION"));
        tracing::info!("╠══════════════════════════════════════════════════╣");
        tracing::info!("║  Logs dir:          {:<28}║", self.logs_dir.display());
        tracing::info!("║  SOTA dir:          {:<28}║", self.sota_dir.display());
        tracing::info!("║  Dataset dir:       {:<28}║", self.dataset_dir.display());
        tracing::info!("║  Models:            {:<28}║", self.models.len());
        tracing::info!("║  Pathologies:       {:<28}║", self.pathologies.len());
        tracing::info!("║  Difficulty:        {:<28}║", self.difficulty);
        tracing::info!("║  Persist:           {:<28}║", if self.persist_aggregates() { "enabled" } else { "disabled" });
        tracing::info!("║  Evaluator:         {:<28}║", if self.evaluator.command.is_empty() { "not configured" } else { "external command" });
        tracing::info!("╚══════════════════════════════════════════════════╝");
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
