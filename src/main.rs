use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use sdtm_nonmem::{
    converter::SdtmConverter,
    dataset::Dataset,
    models::{ConversionConfig, ValidationReport},
    output::OutputManager,
    parser::SdtmParser,
    population::PopulationAnalyzer,
    validation::DatasetValidator,
};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();

    let matches = Command::new("sdtm-nonmem")
        .version("0.1.0")
        .about("Convert SDTM PC/EX/DM domains into a NONMEM PK dataset, validate it and summarise exposure")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("convert")
                .about("Convert SDTM domains to a NONMEM dataset and validate it")
                .arg(file_arg("pc", "SDTM PC (concentration) domain CSV"))
                .arg(file_arg("ex", "SDTM EX (exposure) domain CSV"))
                .arg(file_arg("dm", "SDTM DM (demographics) domain CSV"))
                .arg(
                    Arg::new("study-id")
                        .long("study-id")
                        .value_name("ID")
                        .help("Study identifier recorded with the dataset")
                        .default_value("STUDY"),
                )
                .arg(output_arg())
                .arg(missing_value_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate an existing NONMEM dataset CSV")
                .arg(file_arg("input", "NONMEM dataset CSV"))
                .arg(missing_value_arg()),
        )
        .subcommand(
            Command::new("pk")
                .about("Per-subject PK parameters from a NONMEM dataset CSV")
                .arg(file_arg("input", "NONMEM dataset CSV"))
                .arg(output_arg())
                .arg(missing_value_arg()),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("convert", sub)) => run_convert(sub),
        Some(("validate", sub)) => run_validate(sub),
        Some(("pk", sub)) => run_pk(sub),
        _ => unreachable!("subcommand_required is set"),
    }
}

fn file_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("FILE")
        .help(help)
        .required(true)
}

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("DIR")
        .help("Output directory for results")
        .default_value("./nonmem_output")
}

fn missing_value_arg() -> Arg {
    Arg::new("missing-value")
        .long("missing-value")
        .value_name("TOKEN")
        .help("Missing value sentinel used in NONMEM CSV files")
        .default_value(".")
}

fn create_config(matches: &ArgMatches) -> ConversionConfig {
    let defaults = ConversionConfig::default();
    ConversionConfig {
        study_id: matches
            .try_get_one::<String>("study-id")
            .ok()
            .flatten()
            .cloned()
            .unwrap_or(defaults.study_id),
        missing_value: matches
            .get_one::<String>("missing-value")
            .cloned()
            .unwrap_or(defaults.missing_value),
        output_path: matches
            .try_get_one::<String>("output")
            .ok()
            .flatten()
            .cloned()
            .unwrap_or(defaults.output_path),
    }
}

fn path_arg(matches: &ArgMatches, name: &str) -> anyhow::Result<PathBuf> {
    matches
        .get_one::<String>(name)
        .map(PathBuf::from)
        .with_context(|| format!("--{} is required", name))
}

fn run_convert(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = create_config(matches);

    let pc_path = path_arg(matches, "pc")?;
    let ex_path = path_arg(matches, "ex")?;
    let dm_path = path_arg(matches, "dm")?;

    let pc = SdtmParser::read_domain("PC", &pc_path)
        .with_context(|| format!("reading {}", pc_path.display()))?;
    let ex = SdtmParser::read_domain("EX", &ex_path)
        .with_context(|| format!("reading {}", ex_path.display()))?;
    let dm = SdtmParser::read_domain("DM", &dm_path)
        .with_context(|| format!("reading {}", dm_path.display()))?;

    let dataset = SdtmConverter::convert(&pc, &ex, &dm, &config.study_id)
        .context("converting SDTM domains")?;
    println!(
        "Converted {} records ({} doses, {} observations) for {} subjects",
        dataset.records.len(),
        dataset.dose_count(),
        dataset.observation_count(),
        dataset.n_subjects()
    );

    let report = DatasetValidator::validate_nonmem(&dataset);
    OutputManager::save_conversion(&dataset, &report, &config, &config.output_path)
        .context("saving conversion outputs")?;

    print!("{}", OutputManager::format_validation_report(&report, &config.study_id));
    println!("\nResults saved to {}", config.output_path);

    Ok(exit_code(&report))
}

fn run_validate(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = create_config(matches);
    let input = path_arg(matches, "input")?;

    let dataset = Dataset::read_csv(&input, &config.missing_value)
        .with_context(|| format!("reading {}", input.display()))?;
    let report = DatasetValidator::validate(&dataset);

    print!("{}", OutputManager::format_validation_report(&report, &input.display().to_string()));
    Ok(exit_code(&report))
}

fn run_pk(matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = create_config(matches);
    let input = path_arg(matches, "input")?;

    let table = Dataset::read_csv(&input, &config.missing_value)
        .with_context(|| format!("reading {}", input.display()))?;
    let report = DatasetValidator::validate(&table);
    if !report.valid {
        print!("{}", OutputManager::format_validation_report(&report, &input.display().to_string()));
        anyhow::bail!("dataset failed validation; PK summary not computed");
    }

    let dataset = table
        .to_nonmem(&config.study_id)
        .context("reading NONMEM records")?;
    let summaries = PopulationAnalyzer::summarize_by_subject(&dataset);
    let (parameters, failed) = PopulationAnalyzer::compute_subject_parameters(&dataset);
    let statistics = PopulationAnalyzer::summary_statistics(&summaries)?;

    OutputManager::save_pk_results(&summaries, &parameters, &failed, &statistics, &config.output_path)
        .context("saving PK results")?;

    println!("\n=== PK SUMMARY ===");
    println!("Subjects summarised: {}", summaries.len());
    println!("Subjects with full parameters: {}", parameters.len());
    if !failed.is_empty() {
        println!("Failed subjects: {}", failed.len());
        println!("  (See failed_subjects.log for details)");
    }
    for (param, stats) in &statistics.parameter_stats {
        println!("  {}: mean {:.3} (CV {:.1}%), median {:.3}", param, stats.mean, stats.cv_percent, stats.median);
    }
    println!("\nResults saved to {}", config.output_path);

    Ok(ExitCode::SUCCESS)
}

fn exit_code(report: &ValidationReport) -> ExitCode {
    if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
