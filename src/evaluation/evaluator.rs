use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ExperimentConfig;
use crate::dataset::Reference;
use crate::error::EvalError;
use crate::results::RunResult;
use crate::runs::RunKind;

const MAX_STDERR: usize = 4096;
const FINAL_DIAGNOSIS_PREFIX: &str = "Final Diagnosis: ";

/// Everything the rubric evaluator sees for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub pathology: String,
    pub prediction: String,
    pub input: String,
    pub reference: Reference,
    pub agent_trajectory: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis_probabilities: Option<Value>,
}

impl EvaluationRequest {
    /// Full-information runs carry no input or trajectory; their prediction is
    /// the bare diagnosis prefixed the way agent runs phrase their answer.
    pub fn build(
        pathology: &str,
        experiment: &ExperimentConfig,
        result: &RunResult,
        reference: Reference,
    ) -> Self {
        if lacks_probabilities(experiment, result) {
            warn!(
                experiment = %experiment.name,
                pathology = %pathology,
                "Probabilistic experiment record has no probabilities"
            );
        }
        let diagnosis_probabilities = match result {
            RunResult::Probabilistic(p) if experiment.is_probabilistic() => {
                Some(p.probabilities.clone())
            }
            _ => None,
        };

        let (prediction, input, agent_trajectory) = match (experiment.kind, result) {
            (RunKind::Standard, RunResult::Trajectory(t)) => {
                (t.output.clone(), t.input.clone(), t.intermediate_steps.clone())
            }
            (RunKind::Standard, other) => (other.answer().to_string(), String::new(), Vec::new()),
            (RunKind::FullInfo, other) => (
                format!("{}{}", FINAL_DIAGNOSIS_PREFIX, other.answer()),
                String::new(),
                Vec::new(),
            ),
        };

        Self {
            pathology: pathology.to_string(),
            prediction,
            input,
            reference,
            agent_trajectory,
            diagnosis_probabilities,
        }
    }
}

fn lacks_probabilities(experiment: &ExperimentConfig, result: &RunResult) -> bool {
    experiment.is_probabilistic() && !matches!(result, RunResult::Probabilistic(_))
}

/// Rubric output for one patient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub max_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub answers: BTreeMap<String, Value>,
}

/// A rubric scorer. Takes `&self`: no state may carry over from one patient
/// to the next.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation>;
}

/// Hands out the evaluator for a pathology.
pub trait EvaluatorFactory: Send + Sync {
    fn for_pathology(&self, pathology: &str) -> Result<Box<dyn Evaluator>>;
}

fn truncate_stderr(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    if s.len() <= MAX_STDERR {
        return s.trim().to_string();
    }
    let mut end = MAX_STDERR;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// Runs an external rubric command once per patient: the request goes in as
/// JSON on stdin, an [`Evaluation`] comes back as JSON on stdout.
pub struct CommandEvaluator {
    argv: Vec<String>,
    pathology: String,
}

impl CommandEvaluator {
    pub fn new(argv: Vec<String>, pathology: impl Into<String>) -> Self {
        Self {
            argv,
            pathology: pathology.into(),
        }
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation> {
        let (program, args) = self.argv.split_first().context("empty evaluator command")?;

        let mut child = Command::new(program)
            .args(args)
            .env("CDM_PATHOLOGY", &self.pathology)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn evaluator '{}'", program))?;

        let payload = serde_json::to_vec(request).context("Failed to serialize request")?;
        let mut stdin = child.stdin.take().context("evaluator stdin unavailable")?;
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .context("Evaluator process error")?;

        if let Ok(Err(e)) = writer.await {
            debug!(pathology = %self.pathology, error = %e, "Evaluator closed stdin early");
        }

        if !output.status.success() {
            return Err(EvalError::EvaluatorFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: truncate_stderr(&output.stderr),
            }
            .into());
        }

        serde_json::from_slice(&output.stdout).context("Invalid evaluator output")
    }
}

pub struct CommandEvaluatorFactory {
    argv: Vec<String>,
}

impl CommandEvaluatorFactory {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl EvaluatorFactory for CommandEvaluatorFactory {
    fn for_pathology(&self, pathology: &str) -> Result<Box<dyn Evaluator>> {
        if self.argv.is_empty() {
            anyhow::bail!("No evaluator command configured (evaluator.command)");
        }
        Ok(Box::new(CommandEvaluator::new(self.argv.clone(), pathology)))
    }
}
