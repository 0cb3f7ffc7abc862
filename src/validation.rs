use crate::{dataset::{Dataset, Value}, models::*};
use itertools::Itertools;
use std::collections::BTreeMap;

/// Variables every NONMEM event dataset must carry.
pub const REQUIRED_VARIABLES: [&str; 7] = ["ID", "TIME", "DV", "AMT", "EVID", "CMT", "MDV"];

const VALID_EVID: [f64; 5] = [0.0, 1.0, 2.0, 3.0, 4.0];

pub struct DatasetValidator;

impl DatasetValidator {
    /// Run the fixed checklist against a dataset. Findings are returned, never raised.
    pub fn validate(dataset: &Dataset) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        Self::check_required_variables(dataset, &mut errors);
        Self::check_id_numeric(dataset, &mut errors);
        Self::check_negative_time(dataset, &mut errors);
        Self::check_evid_values(dataset, &mut errors);
        Self::check_dose_amounts(dataset, &mut errors);
        Self::check_observation_amounts(dataset, &mut warnings);
        Self::check_mdv_consistency(dataset, &mut errors);
        Self::check_time_monotonic(dataset, &mut warnings);
        Self::check_subjects_dosed(dataset, &mut warnings);

        let summary = Self::summarize(dataset);
        let valid = errors.is_empty();

        if valid {
            log::info!(
                "Dataset passed validation ({} records, {} warnings)",
                dataset.n_rows(),
                warnings.len()
            );
        } else {
            for error in &errors {
                log::warn!("Validation error: {}", error);
            }
        }
        for warning in &warnings {
            log::info!("Validation warning: {}", warning);
        }

        ValidationReport {
            valid,
            errors,
            warnings,
            summary,
        }
    }

    pub fn validate_nonmem(dataset: &NonmemDataset) -> ValidationReport {
        Self::validate(&Dataset::from_nonmem(dataset))
    }

    fn check_required_variables(dataset: &Dataset, errors: &mut Vec<String>) {
        let missing: Vec<&str> = REQUIRED_VARIABLES
            .iter()
            .copied()
            .filter(|name| !dataset.has_column(name))
            .collect();

        if !missing.is_empty() {
            errors.push(format!("Missing required variables: {}", missing.join(", ")));
        }
    }

    fn check_id_numeric(dataset: &Dataset, errors: &mut Vec<String>) {
        if let Some(id) = dataset.column("ID") {
            if !id.is_numeric() {
                errors.push("ID must be numeric".to_string());
            }
        }
    }

    fn check_negative_time(dataset: &Dataset, errors: &mut Vec<String>) {
        if let Some(time) = dataset.numeric("TIME") {
            let negative = time.iter().flatten().filter(|t| **t < 0.0).count();
            if negative > 0 {
                errors.push(format!("Negative TIME values found: {} records", negative));
            }
        }
    }

    fn check_evid_values(dataset: &Dataset, errors: &mut Vec<String>) {
        if let Some(evid) = dataset.column("EVID") {
            let invalid = evid
                .values
                .iter()
                .filter(|v| !v.as_f64().is_some_and(|e| VALID_EVID.contains(&e)))
                .map(|v| v.render("."))
                .unique()
                .join(", ");

            if !invalid.is_empty() {
                errors.push(format!(
                    "Invalid EVID values found: {} (allowed: 0, 1, 2, 3, 4)",
                    invalid
                ));
            }
        }
    }

    fn check_dose_amounts(dataset: &Dataset, errors: &mut Vec<String>) {
        if let (Some(evid), Some(amt)) = (dataset.numeric("EVID"), dataset.numeric("AMT")) {
            let bad = evid
                .iter()
                .zip(&amt)
                .filter(|(e, a)| **e == Some(1.0) && !a.is_some_and(|a| a > 0.0))
                .count();

            if bad > 0 {
                errors.push(format!(
                    "Dose records (EVID=1) must have AMT > 0: {} records",
                    bad
                ));
            }
        }
    }

    fn check_observation_amounts(dataset: &Dataset, warnings: &mut Vec<String>) {
        if let (Some(evid), Some(amt)) = (dataset.numeric("EVID"), dataset.numeric("AMT")) {
            let bad = evid
                .iter()
                .zip(&amt)
                .filter(|(e, a)| **e == Some(0.0) && **a != Some(0.0))
                .count();

            if bad > 0 {
                warnings.push(format!(
                    "Observation records (EVID=0) should have AMT = 0: {} records",
                    bad
                ));
            }
        }
    }

    fn check_mdv_consistency(dataset: &Dataset, errors: &mut Vec<String>) {
        if let (Some(dv), Some(mdv)) = (dataset.numeric("DV"), dataset.numeric("MDV")) {
            let bad = dv
                .iter()
                .zip(&mdv)
                .filter(|(d, m)| d.is_none() && **m == Some(0.0))
                .count();

            if bad > 0 {
                errors.push(format!(
                    "Records with missing DV must have MDV = 1: {} records",
                    bad
                ));
            }
        }
    }

    fn check_time_monotonic(dataset: &Dataset, warnings: &mut Vec<String>) {
        let (Some(id), Some(time)) = (dataset.column("ID"), dataset.numeric("TIME")) else {
            return;
        };

        let mut times_by_subject: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for (subject, t) in id.values.iter().zip(&time) {
            if let (false, Some(t)) = (subject.is_missing(), t) {
                times_by_subject.entry(subject.key()).or_default().push(*t);
            }
        }

        let violating = times_by_subject
            .values()
            .filter(|times| times.windows(2).any(|w| w[1] < w[0]))
            .count();

        if violating > 0 {
            warnings.push(format!(
                "TIME is not non-decreasing within {} subjects",
                violating
            ));
        }
    }

    fn check_subjects_dosed(dataset: &Dataset, warnings: &mut Vec<String>) {
        let (Some(id), Some(evid)) = (dataset.column("ID"), dataset.numeric("EVID")) else {
            return;
        };

        let mut dosed: BTreeMap<String, bool> = BTreeMap::new();
        for (subject, e) in id.values.iter().zip(&evid) {
            if subject.is_missing() {
                continue;
            }
            *dosed.entry(subject.key()).or_default() |= *e == Some(1.0);
        }

        let undosed = dosed.values().filter(|has_dose| !**has_dose).count();
        if undosed > 0 {
            warnings.push(format!(
                "{} subjects have no dose records (EVID=1)",
                undosed
            ));
        }
    }

    /// Descriptive counts, limited to the columns that are present.
    fn summarize(dataset: &Dataset) -> Vec<(String, String)> {
        let mut summary = vec![("Total records".to_string(), dataset.n_rows().to_string())];

        if let Some(id) = dataset.column("ID") {
            let subjects = id
                .values
                .iter()
                .filter(|v| !v.is_missing())
                .map(Value::key)
                .unique()
                .count();
            summary.push(("Subjects".to_string(), subjects.to_string()));
        }

        if let Some(evid) = dataset.numeric("EVID") {
            let doses = evid.iter().filter(|e| **e == Some(1.0)).count();
            let observations = evid.iter().filter(|e| **e == Some(0.0)).count();
            summary.push(("Dose records".to_string(), doses.to_string()));
            summary.push(("Observation records".to_string(), observations.to_string()));
        }

        if let Some(dv) = dataset.numeric("DV") {
            let missing = dv.iter().filter(|d| d.is_none()).count();
            summary.push(("Missing DV".to_string(), missing.to_string()));
        }

        if let Some(time) = dataset.numeric("TIME") {
            let present: Vec<f64> = time.into_iter().flatten().collect();
            if let Some((min, max)) = present.iter().copied().minmax().into_option() {
                summary.push(("Time range".to_string(), format!("{} - {}", min, max)));
            }
        }

        summary
    }
}
