use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::evaluator::Evaluation;
use crate::dataset::PatientId;
use crate::error::EvalError;

pub const PERCENTAGE_SUFFIX: &str = " Percentage";

pub type PatientEvaluations = BTreeMap<PatientId, Evaluation>;

/// Average of one field over the evaluated patients of one pathology.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldAverage {
    /// `None` when no patient of the pathology was evaluated.
    pub average: Option<f64>,
    pub samples: usize,
}

/// `field -> pathology -> average`.
pub type ScoreTable = BTreeMap<String, BTreeMap<String, FieldAverage>>;

fn answer_count(answer: Option<&Value>) -> usize {
    match answer {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(items)) => items.len(),
        _ => 0,
    }
}

/// `scores[field]` = number of entries in `answers[field]`.
pub fn count_answers(evals: &mut PatientEvaluations, field: &str) {
    for eval in evals.values_mut() {
        let n = answer_count(eval.answers.get(field));
        eval.scores.insert(field.to_string(), n as f64);
    }
}

/// `scores["X Percentage"]` = `scores["X"] / max_scores["X"]`.
pub fn derive_percentage(evals: &mut PatientEvaluations, field: &str) -> Result<(), EvalError> {
    let base = field.strip_suffix(PERCENTAGE_SUFFIX).unwrap_or(field);
    for (patient, eval) in evals.iter_mut() {
        let missing = || EvalError::MissingField {
            field: base.to_string(),
            patient: patient.to_string(),
        };
        let score = *eval.scores.get(base).ok_or_else(missing)?;
        let max = *eval.max_scores.get(base).ok_or_else(missing)?;
        if max == 0.0 {
            return Err(EvalError::ZeroMaxScore {
                field: base.to_string(),
                patient: patient.to_string(),
            });
        }
        eval.scores.insert(field.to_string(), score / max);
    }
    Ok(())
}

/// Fill in a field the evaluator does not report directly.
pub fn derive_field(
    evals: &mut PatientEvaluations,
    field: &str,
    count_fields: &[String],
) -> Result<(), EvalError> {
    if count_fields.iter().any(|f| f == field) {
        count_answers(evals, field);
    } else if field.ends_with(PERCENTAGE_SUFFIX) {
        derive_percentage(evals, field)?;
    }
    Ok(())
}

/// Unweighted mean of `scores[field]` over the evaluated patients.
pub fn average_field(evals: &PatientEvaluations, field: &str) -> Result<FieldAverage, EvalError> {
    if evals.is_empty() {
        return Ok(FieldAverage {
            average: None,
            samples: 0,
        });
    }

    let mut sum = 0.0;
    for (patient, eval) in evals {
        sum += eval
            .scores
            .get(field)
            .ok_or_else(|| EvalError::MissingField {
                field: field.to_string(),
                patient: patient.to_string(),
            })?;
    }

    Ok(FieldAverage {
        average: Some(sum / evals.len() as f64),
        samples: evals.len(),
    })
}

/// Derive and average every field for every pathology.
pub fn build_score_table(
    evals: &mut BTreeMap<String, PatientEvaluations>,
    fields: &[String],
    count_fields: &[String],
) -> Result<ScoreTable, EvalError> {
    let mut table = ScoreTable::new();
    for field in fields {
        let row = table.entry(field.clone()).or_default();
        for (pathology, patient_evals) in evals.iter_mut() {
            derive_field(patient_evals, field, count_fields)?;
            let avg = average_field(patient_evals, field)?;
            debug!(
                field = %field,
                pathology = %pathology,
                average = ?avg.average,
                samples = avg.samples,
                "Averaged field"
            );
            row.insert(pathology.clone(), avg);
        }
    }
    Ok(table)
}
