use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the discovery and scoring stages.
///
/// Everything except a cohort id missing from the results is fatal; callers
/// wrap these in `anyhow` context and let them surface from `main`.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("no run folder at position {position} for '{prefix}*{suffix}' ({found} matching)")]
    NoRunAtPosition {
        prefix: String,
        suffix: String,
        position: usize,
        found: usize,
    },

    #[error("run folder '{folder}' has no parsable timestamp ('{raw}')")]
    BadTimestamp {
        folder: String,
        raw: String,
        #[source]
        source: Option<chrono::ParseError>,
    },

    #[error("no results file matches '{pattern}' in {}", dir.display())]
    NoResultsFile { dir: PathBuf, pattern: String },

    #[error("{} results files match '{pattern}' in {}: {matches:?}", matches.len(), dir.display())]
    AmbiguousResultsFile {
        dir: PathBuf,
        pattern: String,
        matches: Vec<String>,
    },

    #[error("patient {patient} has no ground truth for {pathology}")]
    MissingPatient { pathology: String, patient: String },

    #[error("field '{field}' missing from evaluation of patient {patient}")]
    MissingField { field: String, patient: String },

    #[error("max score for '{field}' is zero for patient {patient}")]
    ZeroMaxScore { field: String, patient: String },

    #[error("no '{difficulty}' cohort for pathology '{pathology}'")]
    UnknownCohort { pathology: String, difficulty: String },

    #[error("evaluator exited with code {code}: {stderr}")]
    EvaluatorFailed { code: i32, stderr: String },

    #[error("evaluator timed out after {0}s")]
    EvaluatorTimeout(u64),
}
