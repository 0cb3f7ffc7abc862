use crate::{
    auc::AucCalculator, models::*, nca::PkCalculator, parameters::ParameterCalculator, Result,
};
use rayon::prelude::*;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

pub struct PopulationAnalyzer;

impl PopulationAnalyzer {
    /// Per-subject Cmax, Tmax and AUC-last from a converted dataset.
    ///
    /// Only observation rows with a positive DV are used. Subjects without
    /// such rows are absent from the output; subjects without dose rows get
    /// `dose: None`. Output is ordered by ID.
    pub fn summarize_by_subject(dataset: &NonmemDataset) -> Vec<SubjectPkSummary> {
        let groups: Vec<(u32, Vec<&NonmemRecord>)> = dataset.by_subject().into_iter().collect();

        groups
            .par_iter()
            .filter_map(|(id, records)| {
                let points = Self::observation_points(records);
                let (cmax, tmax) = ParameterCalculator::calculate_cmax_tmax(&points).ok()?;

                Some(SubjectPkSummary {
                    id: *id,
                    n_obs: points.len(),
                    cmax,
                    tmax,
                    auc_last: AucCalculator::linear_trapezoidal(&points),
                    dose: Self::first_dose(records),
                })
            })
            .collect()
    }

    /// Full parameter set for every subject; subjects that cannot be analysed
    /// are reported as failures rather than aborting the batch.
    pub fn compute_subject_parameters(
        dataset: &NonmemDataset,
    ) -> (Vec<SubjectParameters>, Vec<FailedSubject>) {
        let groups: Vec<(u32, Vec<&NonmemRecord>)> = dataset.by_subject().into_iter().collect();
        log::info!("Computing PK parameters for {} subjects", groups.len());

        let outcomes: Vec<std::result::Result<SubjectParameters, FailedSubject>> = groups
            .par_iter()
            .map(|(id, records)| {
                let observations: Vec<&&NonmemRecord> =
                    records.iter().filter(|r| r.is_observation()).collect();
                let times: Vec<Option<f64>> = observations.iter().map(|r| Some(r.time)).collect();
                let concentrations: Vec<Option<f64>> = observations.iter().map(|r| r.dv).collect();

                match PkCalculator::compute_parameters(&times, &concentrations, Self::first_dose(records)) {
                    Ok(parameters) => Ok(SubjectParameters { id: *id, parameters }),
                    Err(e) => {
                        log::warn!("Failed to analyze subject {}: {}", id, e);
                        Err(FailedSubject {
                            id: *id,
                            failure_reason: e.to_string(),
                            quantifiable_concentrations: observations
                                .iter()
                                .filter(|r| r.dv.is_some_and(|dv| dv > 0.0))
                                .count(),
                            total_observations: observations.len(),
                        })
                    }
                }
            })
            .collect();

        let mut analysed = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => analysed.push(result),
                Err(failure) => failed.push(failure),
            }
        }

        log::info!("Successfully analyzed {} subjects", analysed.len());
        if !failed.is_empty() {
            log::warn!("Failed to analyze {} subjects", failed.len());
        }

        (analysed, failed)
    }

    /// Descriptive statistics of Cmax, Tmax and AUC-last across subjects.
    pub fn summary_statistics(summaries: &[SubjectPkSummary]) -> Result<SummaryStatistics> {
        let mut parameter_stats = BTreeMap::new();

        let parameters: Vec<(&str, fn(&SubjectPkSummary) -> f64)> = vec![
            ("auc_last", |s| s.auc_last),
            ("cmax", |s| s.cmax),
            ("tmax", |s| s.tmax),
        ];

        for (param_name, extractor) in parameters {
            let values: Vec<f64> = summaries.iter().map(extractor).collect();
            if !values.is_empty() {
                parameter_stats.insert(param_name.to_string(), Self::calculate_parameter_stats(&values));
            }
        }

        Ok(SummaryStatistics { parameter_stats })
    }

    fn observation_points(records: &[&NonmemRecord]) -> Vec<(f64, f64)> {
        let mut points: Vec<(f64, f64)> = records
            .iter()
            .filter(|r| r.is_observation())
            .filter_map(|r| r.dv.filter(|dv| *dv > 0.0).map(|dv| (r.time, dv)))
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        points
    }

    /// Amount of the earliest dose row.
    fn first_dose(records: &[&NonmemRecord]) -> Option<f64> {
        records
            .iter()
            .filter(|r| r.is_dose())
            .min_by(|a, b| a.time.total_cmp(&b.time))
            .map(|r| r.amt)
    }

    fn calculate_parameter_stats(values: &[f64]) -> ParameterStats {
        let n = values.len();

        let mean = values.mean();
        let std = if n > 1 { values.std_dev() } else { 0.0 };
        let cv_percent = if mean != 0.0 { (std / mean) * 100.0 } else { 0.0 };

        let mut sorted_values = values.to_vec();
        sorted_values.sort_by(|a, b| a.total_cmp(b));

        let median = if n % 2 == 0 {
            (sorted_values[n / 2 - 1] + sorted_values[n / 2]) / 2.0
        } else {
            sorted_values[n / 2]
        };

        // Geometric statistics (for positive values only)
        let (geometric_mean, geometric_cv_percent) = if values.iter().all(|&v| v > 0.0) {
            let ln_values: Vec<f64> = values.iter().map(|v| v.ln()).collect();
            let ln_mean = (&ln_values).mean();
            let ln_std = if n > 1 { (&ln_values).std_dev() } else { 0.0 };
            let geo_cv = ((ln_std.powi(2)).exp() - 1.0).sqrt() * 100.0;
            (Some(ln_mean.exp()), Some(geo_cv))
        } else {
            (None, None)
        };

        ParameterStats {
            n,
            mean,
            std,
            cv_percent,
            median,
            min: sorted_values[0],
            max: sorted_values[n - 1],
            geometric_mean,
            geometric_cv_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(id: u32, time: f64, evid: u8, amt: f64, dv: Option<f64>) -> NonmemRecord {
        NonmemRecord {
            id,
            usubjid: format!("S-{:03}", id),
            time,
            amt,
            dv,
            evid,
            cmt: if evid == 1 { 1 } else { 2 },
            mdv: u8::from(dv.is_none()),
            age: None,
            sex: None,
            weight: None,
            height: None,
            race: None,
            ethnic: None,
            nominal_time: None,
            rec: 0,
        }
    }

    fn dataset() -> NonmemDataset {
        NonmemDataset {
            study_id: "TEST".to_string(),
            records: vec![
                record(1, 0.0, 1, 100.0, None),
                record(1, 0.0, 0, 0.0, Some(0.0)),
                record(1, 1.0, 0, 0.0, Some(10.0)),
                record(1, 2.0, 0, 0.0, Some(10.0)),
                record(1, 4.0, 0, 0.0, Some(4.0)),
                record(1, 24.0, 1, 50.0, None),
                record(2, 0.0, 1, 200.0, None),
                record(2, 1.0, 0, 0.0, None),
                record(3, 0.5, 0, 0.0, Some(2.0)),
                record(3, 1.5, 0, 0.0, Some(6.0)),
            ],
        }
    }

    #[test]
    fn test_summarize_by_subject() {
        let summaries = PopulationAnalyzer::summarize_by_subject(&dataset());
        assert_eq!(summaries.len(), 2);

        let first = &summaries[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.n_obs, 3);
        assert_eq!(first.cmax, 10.0);
        assert_eq!(first.tmax, 1.0);
        assert_relative_eq!(first.auc_last, 10.0 + 14.0);
        assert_eq!(first.dose, Some(100.0));

        let undosed = &summaries[1];
        assert_eq!(undosed.id, 3);
        assert_eq!(undosed.dose, None);
        assert_relative_eq!(undosed.auc_last, 4.0);
    }

    #[test]
    fn test_summary_ignores_order_of_tied_samples() {
        let profile = |tied: [f64; 2]| NonmemDataset {
            study_id: "TEST".to_string(),
            records: vec![
                record(1, 0.0, 1, 100.0, None),
                record(1, 1.0, 0, 0.0, Some(8.0)),
                record(1, 2.0, 0, 0.0, Some(tied[0])),
                record(1, 2.0, 0, 0.0, Some(tied[1])),
                record(1, 4.0, 0, 0.0, Some(2.0)),
            ],
        };

        let a = PopulationAnalyzer::summarize_by_subject(&profile([6.0, 4.0]));
        let b = PopulationAnalyzer::summarize_by_subject(&profile([4.0, 6.0]));
        assert_eq!(a, b);
        assert_relative_eq!(a[0].auc_last, 6.0 + 8.0);
    }

    #[test]
    fn test_compute_subject_parameters_collects_failures() {
        let (analysed, failed) = PopulationAnalyzer::compute_subject_parameters(&dataset());

        assert_eq!(analysed.len(), 1);
        assert_eq!(analysed[0].id, 1);
        assert_eq!(analysed[0].parameters.dose, Some(100.0));

        let failed_ids: Vec<u32> = failed.iter().map(|f| f.id).collect();
        assert_eq!(failed_ids, vec![2, 3]);
        assert_eq!(failed[1].quantifiable_concentrations, 2);
        assert!(failed[0].failure_reason.contains("Insufficient data"));
    }

    #[test]
    fn test_summary_statistics() {
        let summaries = PopulationAnalyzer::summarize_by_subject(&dataset());
        let stats = PopulationAnalyzer::summary_statistics(&summaries).unwrap();

        let cmax = &stats.parameter_stats["cmax"];
        assert_eq!(cmax.n, 2);
        assert_relative_eq!(cmax.mean, 8.0);
        assert_relative_eq!(cmax.median, 8.0);
        assert_eq!(cmax.min, 6.0);
        assert_eq!(cmax.max, 10.0);
        assert_relative_eq!(cmax.geometric_mean.unwrap(), 60.0_f64.sqrt(), epsilon = 1e-12);
    }
}
