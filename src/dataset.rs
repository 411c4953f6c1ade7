use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::EvalError;
use crate::runs::RunKind;

pub const COHORT_FILE: &str = "id_difficulty.json";

/// Hospital admission id of a simulated patient.
///
/// Dataset files write ids either as JSON numbers or strings; both load into
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatientId(pub String);

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatientId {
    fn from(s: &str) -> Self {
        PatientId(s.to_string())
    }
}

impl From<u64> for PatientId {
    fn from(n: u64) -> Self {
        PatientId(n.to_string())
    }
}

impl Serialize for PatientId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

struct PatientIdVisitor;

impl<'de> Visitor<'de> for PatientIdVisitor {
    type Value = PatientId;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a patient id as string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<PatientId, E> {
        Ok(PatientId(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<PatientId, E> {
        Ok(PatientId(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<PatientId, E> {
        Ok(PatientId(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<PatientId, E> {
        Ok(PatientId(v.to_string()))
    }
}

impl<'de> Deserialize<'de> for PatientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PatientIdVisitor)
    }
}

/// `pathology -> difficulty -> ordered patient ids`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cohort(pub BTreeMap<String, BTreeMap<String, Vec<PatientId>>>);

impl Cohort {
    pub fn ids(&self, pathology: &str, difficulty: &str) -> Result<&[PatientId], EvalError> {
        self.0
            .get(pathology)
            .and_then(|levels| levels.get(difficulty))
            .map(|ids| ids.as_slice())
            .ok_or_else(|| EvalError::UnknownCohort {
                pathology: pathology.to_string(),
                difficulty: difficulty.to_string(),
            })
    }
}

pub async fn load_cohort(dataset_dir: &Path) -> Result<Cohort> {
    let path = dataset_dir.join(COHORT_FILE);
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read cohort {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid cohort {}", path.display()))
}

/// Ground truth of one admission. Other keys in the dataset are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    #[serde(rename = "Discharge Diagnosis")]
    pub discharge_diagnosis: String,
    #[serde(rename = "ICD Diagnosis", default)]
    pub icd_diagnosis: Vec<String>,
    #[serde(rename = "Procedures ICD9", default)]
    pub procedures_icd9: Vec<Value>,
    #[serde(rename = "Procedures ICD10", default)]
    pub procedures_icd10: Vec<Value>,
    #[serde(rename = "Procedures Discharge", default)]
    pub procedures_discharge: Vec<Value>,
}

/// The five reference collections handed to the rubric evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub discharge_diagnosis: String,
    pub icd_diagnosis: Vec<String>,
    pub procedures_icd9: Vec<Value>,
    pub procedures_icd10: Vec<Value>,
    pub procedures_discharge: Vec<Value>,
}

impl From<&PatientRecord> for Reference {
    fn from(r: &PatientRecord) -> Self {
        Self {
            discharge_diagnosis: r.discharge_diagnosis.clone(),
            icd_diagnosis: r.icd_diagnosis.clone(),
            procedures_icd9: r.procedures_icd9.clone(),
            procedures_icd10: r.procedures_icd10.clone(),
            procedures_discharge: r.procedures_discharge.clone(),
        }
    }
}

pub type GroundTruth = BTreeMap<PatientId, PatientRecord>;

/// Standard runs are scored against the cleaned admissions, full-information
/// runs against the first-diagnosis export.
pub fn ground_truth_variant(kind: RunKind) -> &'static str {
    match kind {
        RunKind::Standard => "clean",
        RunKind::FullInfo => "first_diag",
    }
}

pub fn ground_truth_path(dataset_dir: &Path, pathology: &str, kind: RunKind) -> PathBuf {
    dataset_dir.join(format!(
        "{}_hadm_info_{}.json",
        pathology,
        ground_truth_variant(kind)
    ))
}

pub async fn load_ground_truth(dataset_dir: &Path, pathology: &str, kind: RunKind) -> Result<GroundTruth> {
    let path = ground_truth_path(dataset_dir, pathology, kind);
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read ground truth {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid ground truth {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patient_id_from_number_and_string() {
        let ids: Vec<PatientId> = serde_json::from_value(json!([20001234, "20005678"])).unwrap();
        assert_eq!(ids, vec![PatientId::from(20001234), PatientId::from("20005678")]);
        assert_eq!(serde_json::to_value(&ids[0]).unwrap(), json!("20001234"));
    }

    #[test]
    fn test_patient_id_as_map_key() {
        let map: BTreeMap<PatientId, u32> = serde_json::from_value(json!({"42": 1})).unwrap();
        assert_eq!(map.get(&PatientId::from(42)), Some(&1));
    }

    #[test]
    fn test_cohort_lookup() {
        let cohort: Cohort = serde_json::from_value(json!({
            "appendicitis": {"first_diag": [3, 1, 2], "dr_eval": [1]}
        }))
        .unwrap();
        let ids = cohort.ids("appendicitis", "first_diag").unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], PatientId::from(3));

        assert!(matches!(
            cohort.ids("appendicitis", "hard"),
            Err(EvalError::UnknownCohort { .. })
        ));
        assert!(cohort.ids("pancreatitis", "first_diag").is_err());
    }

    #[test]
    fn test_patient_record_reference() {
        let record: PatientRecord = serde_json::from_value(json!({
            "Discharge Diagnosis": "Acute appendicitis",
            "ICD Diagnosis": ["K35.80"],
            "Procedures ICD9": [4701],
            "Procedures ICD10": ["0DTJ4ZZ"],
            "Procedures Discharge": ["Laparoscopic appendectomy"],
            "Patient History": "ignored"
        }))
        .unwrap();
        let reference = Reference::from(&record);
        assert_eq!(reference.discharge_diagnosis, "Acute appendicitis");
        assert_eq!(reference.procedures_icd9, vec![json!(4701)]);
    }

    #[test]
    fn test_patient_record_optional_collections() {
        let record: PatientRecord =
            serde_json::from_value(json!({"Discharge Diagnosis": "Pancreatitis"})).unwrap();
        assert!(record.icd_diagnosis.is_empty());
        assert!(record.procedures_discharge.is_empty());
    }

    #[test]
    fn test_ground_truth_path() {
        let p = ground_truth_path(Path::new("ds"), "appendicitis", RunKind::Standard);
        assert_eq!(p, Path::new("ds/appendicitis_hadm_info_clean.json"));
        let p = ground_truth_path(Path::new("ds"), "appendicitis", RunKind::FullInfo);
        assert_eq!(p, Path::new("ds/appendicitis_hadm_info_first_diag.json"));
    }

    #[tokio::test]
    async fn test_load_cohort_and_ground_truth() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::write(
            tmp.path().join(COHORT_FILE),
            json!({"cholecystitis": {"first_diag": [7]}}).to_string(),
        )
        .await
        .unwrap();
        tokio::fs::write(
            ground_truth_path(tmp.path(), "cholecystitis", RunKind::Standard),
            json!({"7": {"Discharge Diagnosis": "Cholecystitis"}}).to_string(),
        )
        .await
        .unwrap();

        let cohort = load_cohort(tmp.path()).await.unwrap();
        assert_eq!(cohort.ids("cholecystitis", "first_diag").unwrap().len(), 1);

        let gt = load_ground_truth(tmp.path(), "cholecystitis", RunKind::Standard)
            .await
            .unwrap();
        assert_eq!(gt[&PatientId::from(7)].discharge_diagnosis, "Cholecystitis");
    }

    #[tokio::test]
    async fn test_load_cohort_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_cohort(tmp.path()).await.is_err());
    }
}
