use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::evaluation::{ExperimentEvaluation, ModelEvaluation};

/// Model names become file-name prefixes.
pub fn model_safe_name(model: &str) -> String {
    model.replace(['/', ':'], "-")
}

/// Writes scored outputs into one experiment directory.
pub struct Persistence {
    dir: PathBuf,
}

impl Persistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(name);
        let bytes = serde_json::to_vec_pretty(value)
            .with_context(|| format!("Failed to serialize {}", name))?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// `{model}_evals.json`, `{model}_results.json`, `{model}_scores.json`.
    pub async fn write_model(&self, model: &str, evaluation: &ModelEvaluation) -> Result<Vec<PathBuf>> {
        let prefix = model_safe_name(model);
        let written = vec![
            self.write_json(&format!("{}_evals.json", prefix), &evaluation.evals)
                .await?,
            self.write_json(&format!("{}_results.json", prefix), &evaluation.results)
                .await?,
            self.write_json(&format!("{}_scores.json", prefix), &evaluation.scores)
                .await?,
        ];
        info!(model = %model, dir = %self.dir.display(), "Persisted model outputs");
        Ok(written)
    }

    /// `evals.json`, `results.json`, `scores.json`, each keyed by model.
    pub async fn write_experiment(&self, experiment: &ExperimentEvaluation) -> Result<Vec<PathBuf>> {
        let evals: BTreeMap<&str, _> = experiment
            .models
            .iter()
            .map(|(m, e)| (m.as_str(), &e.evals))
            .collect();
        let results: BTreeMap<&str, _> = experiment
            .models
            .iter()
            .map(|(m, e)| (m.as_str(), &e.results))
            .collect();

        let written = vec![
            self.write_json("evals.json", &evals).await?,
            self.write_json("results.json", &results).await?,
            self.write_json("scores.json", &experiment.scores()).await?,
        ];
        info!(
            experiment = %experiment.experiment,
            models = experiment.models.len(),
            "Persisted experiment outputs"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::PatientId;
    use crate::evaluation::aggregate::FieldAverage;
    use crate::evaluation::evaluator::Evaluation;

    fn model_evaluation() -> ModelEvaluation {
        let mut eval = Evaluation::default();
        eval.scores.insert("Diagnosis".into(), 1.0);
        let mut m = ModelEvaluation::default();
        m.evals
            .entry("appendicitis".into())
            .or_default()
            .insert(PatientId::from(1), eval);
        m.scores.entry("Diagnosis".into()).or_default().insert(
            "appendicitis".into(),
            FieldAverage {
                average: Some(1.0),
                samples: 1,
            },
        );
        m
    }

    #[test]
    fn test_model_safe_name() {
        assert_eq!(
            model_safe_name("ollama-llama3.1:70b-instruct-q4_0"),
            "ollama-llama3.1-70b-instruct-q4_0"
        );
        assert_eq!(model_safe_name("meta/llama"), "meta-llama");
    }

    #[tokio::test]
    async fn test_write_model_and_experiment() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("FI_PLI");
        let persistence = Persistence::new(&dir);

        let evaluation = model_evaluation();
        let written = persistence.write_model("org/m1", &evaluation).await.unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.join("org-m1_scores.json").exists());

        let mut experiment = ExperimentEvaluation {
            experiment: "FI_PLI".into(),
            ..ExperimentEvaluation::default()
        };
        experiment.models.insert("org/m1".into(), evaluation);
        persistence.write_experiment(&experiment).await.unwrap();

        let scores: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(dir.join("scores.json")).await.unwrap(),
        )
        .unwrap();
        assert_eq!(scores["org/m1"]["Diagnosis"]["appendicitis"]["average"], 1.0);
        assert_eq!(scores["org/m1"]["Diagnosis"]["appendicitis"]["samples"], 1);

        let evals: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(dir.join("evals.json")).await.unwrap(),
        )
        .unwrap();
        assert_eq!(evals["org/m1"]["appendicitis"]["1"]["scores"]["Diagnosis"], 1.0);
    }
}
