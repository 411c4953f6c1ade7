use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::aggregate::PatientEvaluations;
use super::evaluator::{Evaluation, EvaluationRequest, Evaluator, EvaluatorFactory};
use crate::config::ExperimentConfig;
use crate::dataset::{GroundTruth, PatientId, Reference};
use crate::error::EvalError;
use crate::results::RunResults;

/// Scored patients of one pathology.
#[derive(Debug, Default)]
pub struct PathologyEvaluation {
    pub evals: PatientEvaluations,
    pub results: RunResults,
    /// Cohort ids with no stored result.
    pub skipped: Vec<PatientId>,
}

/// Drives the rubric evaluator over a cohort, one patient at a time.
pub struct Orchestrator<F: EvaluatorFactory> {
    factory: F,
    timeout_secs: Option<u64>,
}

impl<F: EvaluatorFactory> Orchestrator<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    async fn evaluate_one(
        &self,
        evaluator: &dyn Evaluator,
        request: &EvaluationRequest,
        patient: &PatientId,
    ) -> Result<Evaluation> {
        let start = Instant::now();

        let result = match self.timeout_secs {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), evaluator.evaluate(request)).await {
                    Ok(r) => r,
                    Err(_) => {
                        warn!(
                            pathology = %request.pathology,
                            patient = %patient,
                            timeout_secs = secs,
                            "Evaluation timed out"
                        );
                        return Err(EvalError::EvaluatorTimeout(secs).into());
                    }
                }
            }
            None => evaluator.evaluate(request).await,
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(
                pathology = %request.pathology,
                patient = %patient,
                execution_time_ms = elapsed_ms,
                "Evaluation completed"
            ),
            Err(e) => error!(
                pathology = %request.pathology,
                patient = %patient,
                error = %e,
                execution_time_ms = elapsed_ms,
                "Evaluation failed"
            ),
        }
        result
    }

    /// Score every cohort id that has a stored result. Ids without a result
    /// are skipped and reported; any other failure aborts the pathology.
    pub async fn evaluate_pathology(
        &self,
        experiment: &ExperimentConfig,
        pathology: &str,
        cohort: &[PatientId],
        results: &RunResults,
        ground_truth: &GroundTruth,
    ) -> Result<PathologyEvaluation> {
        let evaluator = self
            .factory
            .for_pathology(pathology)
            .with_context(|| format!("Failed to load evaluator for {}", pathology))?;

        let mut out = PathologyEvaluation::default();
        for patient in cohort {
            let Some(result) = results.get(patient) else {
                warn!(pathology = %pathology, patient = %patient, "Skipping patient without result");
                out.skipped.push(patient.clone());
                continue;
            };

            let record = ground_truth
                .get(patient)
                .ok_or_else(|| EvalError::MissingPatient {
                    pathology: pathology.to_string(),
                    patient: patient.to_string(),
                })?;

            let request =
                EvaluationRequest::build(pathology, experiment, result, Reference::from(record));
            let evaluation = self
                .evaluate_one(evaluator.as_ref(), &request, patient)
                .await
                .with_context(|| format!("Failed to evaluate patient {} ({})", patient, pathology))?;

            out.evals.insert(patient.clone(), evaluation);
            out.results.insert(patient.clone(), result.clone());
        }

        info!(
            experiment = %experiment.name,
            pathology = %pathology,
            evaluated = out.evals.len(),
            skipped = out.skipped.len(),
            "Pathology evaluated"
        );
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dataset::PatientRecord;
    use crate::results::RunResult;
    use crate::runs::RunKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scores 1 when the prediction mentions the reference diagnosis.
    pub(crate) struct MatchEvaluator {
        pub delay_ms: u64,
        pub calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Evaluator for MatchEvaluator {
        async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            let hit = request
                .prediction
                .to_lowercase()
                .contains(&request.reference.discharge_diagnosis.to_lowercase());
            let mut eval = Evaluation::default();
            eval.scores
                .insert("Diagnosis".into(), if hit { 1.0 } else { 0.0 });
            eval.max_scores.insert("Diagnosis".into(), 2.0);
            eval.scores.insert("Gracious Diagnosis".into(), 1.0);
            Ok(eval)
        }
    }

    #[derive(Default)]
    pub(crate) struct MatchFactory {
        pub delay_ms: u64,
        pub calls: Arc<AtomicUsize>,
        pub created: Arc<AtomicUsize>,
    }

    impl EvaluatorFactory for MatchFactory {
        fn for_pathology(&self, _pathology: &str) -> Result<Box<dyn Evaluator>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MatchEvaluator {
                delay_ms: self.delay_ms,
                calls: self.calls.clone(),
            }))
        }
    }

    fn ground_truth(ids: &[u64], diagnosis: &str) -> GroundTruth {
        ids.iter()
            .map(|id| {
                (
                    PatientId::from(*id),
                    PatientRecord {
                        discharge_diagnosis: diagnosis.to_string(),
                        icd_diagnosis: vec![],
                        procedures_icd9: vec![],
                        procedures_icd10: vec![],
                        procedures_discharge: vec![],
                    },
                )
            })
            .collect()
    }

    fn results(entries: &[(u64, &str)]) -> RunResults {
        entries
            .iter()
            .map(|(id, d)| (PatientId::from(*id), RunResult::Diagnosis(d.to_string())))
            .collect()
    }

    fn fi() -> ExperimentConfig {
        ExperimentConfig::new("FI_PLI", RunKind::FullInfo)
    }

    #[tokio::test]
    async fn test_evaluate_pathology_skips_missing() {
        let factory = MatchFactory::default();
        let calls = factory.calls.clone();
        let orch = Orchestrator::new(factory);
        let cohort: Vec<PatientId> = [1u64, 2, 3].into_iter().map(PatientId::from).collect();

        let out = orch
            .evaluate_pathology(
                &fi(),
                "appendicitis",
                &cohort,
                &results(&[(1, "Appendicitis"), (3, "Gastritis"), (9, "Appendicitis")]),
                &ground_truth(&[1, 2, 3, 9], "Appendicitis"),
            )
            .await
            .expect("should evaluate");

        assert_eq!(out.evals.len(), 2);
        assert!(!out.evals.contains_key(&PatientId::from(2)));
        assert!(!out.evals.contains_key(&PatientId::from(9)));
        assert_eq!(out.skipped, vec![PatientId::from(2)]);
        assert_eq!(out.evals[&PatientId::from(1)].scores["Diagnosis"], 1.0);
        assert_eq!(out.evals[&PatientId::from(3)].scores["Diagnosis"], 0.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_evaluate_pathology_missing_ground_truth() {
        let orch = Orchestrator::new(MatchFactory::default());
        let cohort = vec![PatientId::from(1)];

        let err = orch
            .evaluate_pathology(
                &fi(),
                "appendicitis",
                &cohort,
                &results(&[(1, "Appendicitis")]),
                &GroundTruth::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::MissingPatient { .. })
        ));
    }

    #[tokio::test]
    async fn test_evaluate_timeout() {
        let factory = MatchFactory {
            delay_ms: 5000,
            ..MatchFactory::default()
        };
        let orch = Orchestrator::new(factory).with_timeout(Some(1));
        let cohort = vec![PatientId::from(1)];

        let err = orch
            .evaluate_pathology(
                &fi(),
                "appendicitis",
                &cohort,
                &results(&[(1, "Appendicitis")]),
                &ground_truth(&[1], "Appendicitis"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.root_cause().downcast_ref::<EvalError>(),
            Some(EvalError::EvaluatorTimeout(1))
        ));
    }

    #[tokio::test]
    async fn test_one_evaluator_per_pathology() {
        let factory = MatchFactory::default();
        let created = factory.created.clone();
        let orch = Orchestrator::new(factory);
        let cohort: Vec<PatientId> = [1u64, 2].into_iter().map(PatientId::from).collect();
        let res = results(&[(1, "A"), (2, "B")]);
        let gt = ground_truth(&[1, 2], "A");

        for pathology in ["appendicitis", "pancreatitis"] {
            orch.evaluate_pathology(&fi(), pathology, &cohort, &res, &gt)
                .await
                .unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
