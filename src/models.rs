use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Concentration observation from the SDTM PC domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcentrationRecord {
    pub usubjid: String,
    pub sampled_at: NaiveDateTime,
    /// `None` for missing or below-quantification samples.
    pub concentration: Option<f64>,
    pub nominal_time: String,
}

/// Dosing event from the SDTM EX domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DosingRecord {
    pub usubjid: String,
    pub dosed_at: NaiveDateTime,
    pub dose: f64,
}

/// Subject-level record from the SDTM DM domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Demographics {
    pub usubjid: String,
    pub age: Option<f64>,
    pub sex: Option<String>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub race: Option<String>,
    pub ethnic: Option<String>,
}

impl Demographics {
    /// NONMEM sex coding: male is 1, any other recorded value is 2.
    pub fn sex_code(&self) -> Option<u8> {
        self.sex
            .as_deref()
            .map(|sex| if sex.trim().eq_ignore_ascii_case("M") { 1 } else { 2 })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Observation,
    Dose,
}

impl EventType {
    pub fn evid(self) -> u8 {
        match self {
            EventType::Observation => 0,
            EventType::Dose => 1,
        }
    }

    pub fn compartment(self) -> u8 {
        match self {
            EventType::Dose => 1,
            EventType::Observation => 2,
        }
    }
}

/// One row of the combined NONMEM event table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonmemRecord {
    pub id: u32,
    pub usubjid: String,
    /// Hours since the subject's first dose.
    pub time: f64,
    pub amt: f64,
    pub dv: Option<f64>,
    pub evid: u8,
    pub cmt: u8,
    pub mdv: u8,
    pub age: Option<f64>,
    pub sex: Option<u8>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub race: Option<String>,
    pub ethnic: Option<String>,
    pub nominal_time: Option<String>,
    pub rec: usize,
}

impl NonmemRecord {
    pub fn is_dose(&self) -> bool {
        self.evid == EventType::Dose.evid()
    }

    pub fn is_observation(&self) -> bool {
        self.evid == EventType::Observation.evid()
    }
}

/// Converted dataset, sorted by (ID, TIME, dose-before-observation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonmemDataset {
    pub study_id: String,
    pub records: Vec<NonmemRecord>,
}

impl NonmemDataset {
    pub fn subject_ids(&self) -> Vec<u32> {
        self.records
            .iter()
            .map(|r| r.id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn n_subjects(&self) -> usize {
        self.subject_ids().len()
    }

    pub fn dose_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_dose()).count()
    }

    pub fn observation_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_observation()).count()
    }

    /// Records grouped by subject ID, each group in dataset order.
    pub fn by_subject(&self) -> BTreeMap<u32, Vec<&NonmemRecord>> {
        let mut groups: BTreeMap<u32, Vec<&NonmemRecord>> = BTreeMap::new();
        for record in &self.records {
            groups.entry(record.id).or_default().push(record);
        }
        groups
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Ordered key/value summary of the dataset.
    pub summary: Vec<(String, String)>,
}

impl ValidationReport {
    pub fn summary_value(&self, key: &str) -> Option<&str> {
        self.summary
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkParameters {
    pub n_points: usize,
    pub cmax: f64,
    pub tmax: f64,
    pub tlast: f64,
    pub clast: f64,
    pub auc_last: f64,
    pub auc_inf: Option<f64>,
    pub auc_percent_extrap: Option<f64>,
    pub lambda_z: Option<f64>,
    pub lambda_z_r_squared: Option<f64>,
    pub half_life: Option<f64>,
    pub dose: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectPkSummary {
    pub id: u32,
    pub n_obs: usize,
    pub cmax: f64,
    pub tmax: f64,
    pub auc_last: f64,
    pub dose: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectParameters {
    pub id: u32,
    pub parameters: PkParameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSubject {
    pub id: u32,
    pub failure_reason: String,
    pub quantifiable_concentrations: usize,
    pub total_observations: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub parameter_stats: BTreeMap<String, ParameterStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterStats {
    pub n: usize,
    pub mean: f64,
    pub std: f64,
    pub cv_percent: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub geometric_mean: Option<f64>,
    pub geometric_cv_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionConfig {
    pub study_id: String,
    pub missing_value: String,
    pub output_path: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            study_id: "STUDY".to_string(),
            missing_value: ".".to_string(),
            output_path: "./nonmem_output".to_string(),
        }
    }
}
