use crate::{dataset::Dataset, models::*, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub const DATASET_FILE: &str = "nonmem_dataset.csv";
pub const REPORT_TEXT_FILE: &str = "validation_report.txt";
pub const REPORT_JSON_FILE: &str = "validation_report.json";
pub const SUBJECT_SUMMARY_FILE: &str = "pk_summary.csv";
pub const PARAMETERS_FILE: &str = "pk_parameters.csv";
pub const STATISTICS_FILE: &str = "pk_summary_statistics.csv";
pub const FAILED_SUBJECTS_FILE: &str = "failed_subjects.log";

pub struct OutputManager;

impl OutputManager {
    /// Write the converted dataset and its validation report.
    pub fn save_conversion<P: AsRef<Path>>(
        dataset: &NonmemDataset,
        report: &ValidationReport,
        config: &ConversionConfig,
        output_path: P,
    ) -> Result<()> {
        let output_dir = output_path.as_ref();
        fs::create_dir_all(output_dir)?;

        Dataset::from_nonmem(dataset)
            .write_csv(output_dir.join(DATASET_FILE), &config.missing_value)?;
        Self::save_validation_report(report, &dataset.study_id, output_dir)?;

        log::info!("Conversion outputs saved to: {}", output_dir.display());
        Ok(())
    }

    pub fn save_validation_report(
        report: &ValidationReport,
        study_id: &str,
        output_dir: &Path,
    ) -> Result<()> {
        fs::create_dir_all(output_dir)?;

        let mut file = File::create(output_dir.join(REPORT_TEXT_FILE))?;
        write!(file, "{}", Self::format_validation_report(report, study_id))?;

        let json = serde_json::to_string_pretty(report)?;
        fs::write(output_dir.join(REPORT_JSON_FILE), json)?;

        Ok(())
    }

    pub fn save_pk_results<P: AsRef<Path>>(
        summaries: &[SubjectPkSummary],
        parameters: &[SubjectParameters],
        failed: &[FailedSubject],
        statistics: &SummaryStatistics,
        output_path: P,
    ) -> Result<()> {
        let output_dir = output_path.as_ref();
        fs::create_dir_all(output_dir)?;

        Self::save_subject_summaries(summaries, output_dir)?;
        Self::save_subject_parameters(parameters, output_dir)?;
        Self::save_summary_statistics(statistics, output_dir)?;
        Self::save_failed_subjects_log(failed, output_dir)?;

        log::info!("PK results saved to: {}", output_dir.display());
        Ok(())
    }

    /// Plain-text rendering of a validation report.
    pub fn format_validation_report(report: &ValidationReport, study_id: &str) -> String {
        let mut lines = vec![
            "NONMEM DATASET VALIDATION REPORT".to_string(),
            "================================".to_string(),
            format!("Study: {}", study_id),
            format!("Status: {}", if report.valid { "PASSED" } else { "FAILED" }),
            String::new(),
            "Summary:".to_string(),
        ];
        lines.extend(report.summary.iter().map(|(key, value)| format!("  {}: {}", key, value)));

        for (title, messages) in [("Errors", &report.errors), ("Warnings", &report.warnings)] {
            if !messages.is_empty() {
                lines.push(format!("\n{} ({}):", title, messages.len()));
                lines.extend(messages.iter().map(|m| format!("  - {}", m)));
            }
        }

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }

    fn save_subject_summaries(summaries: &[SubjectPkSummary], output_dir: &Path) -> Result<()> {
        let mut file = File::create(output_dir.join(SUBJECT_SUMMARY_FILE))?;

        writeln!(file, "ID,N_OBS,CMAX,TMAX,AUC_LAST,DOSE")?;
        for s in summaries {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                s.id,
                s.n_obs,
                s.cmax,
                s.tmax,
                s.auc_last,
                Self::optional(s.dose),
            )?;
        }

        Ok(())
    }

    fn save_subject_parameters(parameters: &[SubjectParameters], output_dir: &Path) -> Result<()> {
        let mut file = File::create(output_dir.join(PARAMETERS_FILE))?;

        writeln!(file, "ID,N_POINTS,CMAX,TMAX,TLAST,CLAST,AUC_LAST,AUC_INF,AUC_EXTRAP_PERCENT,LAMBDA_Z,LAMBDA_Z_R2,HALF_LIFE,DOSE")?;
        for result in parameters {
            let p = &result.parameters;
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{},{},{},{}",
                result.id,
                p.n_points,
                p.cmax,
                p.tmax,
                p.tlast,
                p.clast,
                p.auc_last,
                Self::optional(p.auc_inf),
                Self::optional(p.auc_percent_extrap),
                Self::optional(p.lambda_z),
                Self::optional(p.lambda_z_r_squared),
                Self::optional(p.half_life),
                Self::optional(p.dose),
            )?;
        }

        Ok(())
    }

    fn save_summary_statistics(summary: &SummaryStatistics, output_dir: &Path) -> Result<()> {
        let mut file = File::create(output_dir.join(STATISTICS_FILE))?;

        writeln!(file, "PARAMETER,N,MEAN,STD,CV_PERCENT,MEDIAN,MIN,MAX,GEO_MEAN,GEO_CV_PERCENT")?;
        for (param, stats) in &summary.parameter_stats {
            writeln!(
                file,
                "{},{},{:.6},{:.6},{:.2},{:.6},{:.6},{:.6},{},{}",
                param,
                stats.n,
                stats.mean,
                stats.std,
                stats.cv_percent,
                stats.median,
                stats.min,
                stats.max,
                stats.geometric_mean.map_or("NA".to_string(), |v| format!("{:.6}", v)),
                stats.geometric_cv_percent.map_or("NA".to_string(), |v| format!("{:.2}", v)),
            )?;
        }

        Ok(())
    }

    fn save_failed_subjects_log(failed: &[FailedSubject], output_dir: &Path) -> Result<()> {
        if failed.is_empty() {
            return Ok(());
        }

        let mut file = File::create(output_dir.join(FAILED_SUBJECTS_FILE))?;

        writeln!(file, "FAILED SUBJECT ANALYSIS LOG")?;
        writeln!(file, "==========================")?;
        writeln!(file)?;
        writeln!(file, "Total failed subjects: {}", failed.len())?;
        writeln!(file)?;

        for subject in failed {
            writeln!(file, "Subject ID: {}", subject.id)?;
            writeln!(file, "Failure Reason: {}", subject.failure_reason)?;
            writeln!(
                file,
                "Quantifiable concentrations: {} of {} observations",
                subject.quantifiable_concentrations, subject.total_observations
            )?;
            writeln!(file)?;
        }

        Ok(())
    }

    fn optional(value: Option<f64>) -> String {
        value.map_or("NA".to_string(), |v| v.to_string())
    }
}
