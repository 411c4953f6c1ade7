use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::aggregate::{build_score_table, PatientEvaluations, ScoreTable};
use super::evaluator::EvaluatorFactory;
use super::orchestrator::Orchestrator;
use crate::config::{Config, ExperimentConfig};
use crate::dataset::{load_ground_truth, Cohort};
use crate::persist::Persistence;
use crate::results::{load_results, resolve_results_file, results_pattern, RunResults};

/// One model's evaluations, raw results and averages, keyed by pathology.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub evals: BTreeMap<String, PatientEvaluations>,
    pub results: BTreeMap<String, RunResults>,
    pub scores: ScoreTable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentEvaluation {
    pub experiment: String,
    pub models: BTreeMap<String, ModelEvaluation>,
}

impl ExperimentEvaluation {
    pub fn scores(&self) -> BTreeMap<&str, &ScoreTable> {
        self.models
            .iter()
            .map(|(m, e)| (m.as_str(), &e.scores))
            .collect()
    }
}

/// Experiment → model → pathology driver. Runs strictly in sequence.
pub struct EvaluationPipeline<'a, F: EvaluatorFactory> {
    config: &'a Config,
    orchestrator: Orchestrator<F>,
    cohort: Cohort,
    persist: bool,
}

impl<'a, F: EvaluatorFactory> EvaluationPipeline<'a, F> {
    pub fn new(config: &'a Config, orchestrator: Orchestrator<F>, cohort: Cohort) -> Self {
        info!(
            difficulty = %config.difficulty,
            models = config.models.len(),
            pathologies = config.pathologies.len(),
            "Creating evaluation pipeline"
        );
        Self {
            config,
            orchestrator,
            cohort,
            persist: false,
        }
    }

    /// Write per-model and per-experiment outputs after scoring.
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub async fn run_model(&self, experiment: &ExperimentConfig, model: &str) -> Result<ModelEvaluation> {
        let cfg = self.config;
        let results_dir = cfg.experiment_dir(&experiment.name);
        let mut out = ModelEvaluation::default();

        for pathology in &cfg.pathologies {
            let ground_truth = load_ground_truth(&cfg.dataset_dir, pathology, experiment.kind).await?;

            let pattern = results_pattern(experiment.kind, pathology, &cfg.agent, model);
            let path = resolve_results_file(&results_dir, &pattern).await?;
            info!(model = %model, pathology = %pathology, file = %path.display(), "Loading results");
            let results = load_results(&path).await?;

            let cohort = self.cohort.ids(pathology, &cfg.difficulty)?;
            let scored = self
                .orchestrator
                .evaluate_pathology(experiment, pathology, cohort, &results, &ground_truth)
                .await?;

            out.evals.insert(pathology.clone(), scored.evals);
            out.results.insert(pathology.clone(), scored.results);
        }

        out.scores = build_score_table(
            &mut out.evals,
            cfg.fields_for(experiment.kind),
            &cfg.count_fields,
        )
        .with_context(|| format!("Failed to aggregate scores of {}", model))?;

        Ok(out)
    }

    pub async fn run_experiment(&self, experiment: &ExperimentConfig) -> Result<ExperimentEvaluation> {
        info!(experiment = %experiment.name, kind = %experiment.kind, "Evaluating experiment");
        let persistence = Persistence::new(self.config.experiment_dir(&experiment.name));

        let mut out = ExperimentEvaluation {
            experiment: experiment.name.clone(),
            models: BTreeMap::new(),
        };

        for model in &self.config.models {
            let evaluation = self
                .run_model(experiment, model)
                .await
                .with_context(|| format!("Experiment {} / model {}", experiment.name, model))?;
            if self.persist {
                persistence.write_model(model, &evaluation).await?;
            }
            out.models.insert(model.clone(), evaluation);
        }

        if self.persist {
            persistence.write_experiment(&out).await?;
        }
        Ok(out)
    }

    pub async fn run(&self, experiments: &[ExperimentConfig]) -> Result<BTreeMap<String, ExperimentEvaluation>> {
        let mut all = BTreeMap::new();
        for experiment in experiments {
            let evaluation = self.run_experiment(experiment).await?;
            all.insert(experiment.name.clone(), evaluation);
        }
        Ok(all)
    }
}
