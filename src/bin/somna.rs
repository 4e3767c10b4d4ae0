//! Somna CLI - Command-line interface for Somna Learn
//!
//! Commands:
//! - generate: Emit synthetic nights as processed-sample NDJSON
//! - align: Bucket raw readings into processed samples
//! - train: Train and persist a personalized model from processed samples
//! - doctor: Diagnose configuration and model directory health

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use somna_learn::aligner::{SampleAligner, DEFAULT_BUCKET_SECONDS};
use somna_learn::store::{
    to_ndjson, FileModelStore, FileThresholdSink, NdjsonSampleSource,
};
use somna_learn::synthetic::SyntheticSleepGenerator;
use somna_learn::types::TrainingEvent;
use somna_learn::{
    LearnError, LearningConfig, NearestCentroidClassifier, SleepLearningService, PRODUCER_NAME,
    SOMNA_VERSION,
};
use tracing_subscriber::EnvFilter;

/// Somna - On-device personalized sleep-stage training engine
#[derive(Parser)]
#[command(name = "somna")]
#[command(author = "Synheart AI Inc")]
#[command(version = SOMNA_VERSION)]
#[command(about = "Train personalized sleep stage models from wearable samples", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic nights as processed-sample NDJSON
    Generate {
        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Number of nights
        #[arg(long, default_value = "7")]
        nights: usize,

        /// Samples per night
        #[arg(long, default_value = "96")]
        epochs: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Start of the first night (RFC 3339); defaults to `nights` days ago
        #[arg(long)]
        start: Option<DateTime<Utc>>,
    },

    /// Align raw readings into processed samples
    Align {
        /// Input raw-sample NDJSON (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Bucket width in seconds
        #[arg(long, default_value_t = DEFAULT_BUCKET_SECONDS)]
        bucket_seconds: i64,
    },

    /// Train a model from processed samples and persist it
    Train {
        /// Input processed-sample NDJSON
        #[arg(short, long)]
        input: PathBuf,

        /// Learning configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for model and metadata files
        #[arg(long, default_value = "models")]
        model_dir: PathBuf,

        /// File for personalized thresholds
        #[arg(long, default_value = "thresholds.json")]
        thresholds: PathBuf,

        /// Output the training outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and model directory health
    Doctor {
        /// Check a learning configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a model directory
        #[arg(long)]
        model_dir: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), SomnaCliError> {
    match cli.command {
        Commands::Generate {
            output,
            nights,
            epochs,
            seed,
            start,
        } => cmd_generate(&output, nights, epochs, seed, start),

        Commands::Align {
            input,
            output,
            bucket_seconds,
        } => cmd_align(&input, &output, bucket_seconds),

        Commands::Train {
            input,
            config,
            model_dir,
            thresholds,
            json,
        } => cmd_train(&input, config.as_deref(), &model_dir, &thresholds, json),

        Commands::Doctor {
            config,
            model_dir,
            json,
        } => cmd_doctor(config.as_deref(), model_dir.as_deref(), json),
    }
}

fn cmd_generate(
    output: &Path,
    nights: usize,
    epochs: usize,
    seed: u64,
    start: Option<DateTime<Utc>>,
) -> Result<(), SomnaCliError> {
    if nights == 0 || epochs == 0 {
        return Err(SomnaCliError::NoSamples);
    }
    let start = start.unwrap_or_else(|| Utc::now() - Duration::days(nights as i64));
    let samples = SyntheticSleepGenerator::new(seed).generate_nights(start, nights, epochs);
    write_output(output, &to_ndjson(&samples)?)
}

fn cmd_align(input: &Path, output: &Path, bucket_seconds: i64) -> Result<(), SomnaCliError> {
    let raw = SampleAligner::parse_ndjson(&read_input(input)?)?;
    if raw.is_empty() {
        return Err(SomnaCliError::NoSamples);
    }

    let issues = SampleAligner::validate_samples(&raw);
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!(
                "  - Sample {} ({}): {}",
                issue.index,
                issue.kind.as_str(),
                issue.reason
            );
        }
        return Err(SomnaCliError::ValidationFailed(issues.len()));
    }

    let aligner = SampleAligner::new(Duration::seconds(bucket_seconds));
    let processed = aligner.align(&raw)?;
    write_output(output, &to_ndjson(&processed)?)
}

fn cmd_train(
    input: &Path,
    config: Option<&Path>,
    model_dir: &Path,
    thresholds: &Path,
    json: bool,
) -> Result<(), SomnaCliError> {
    let config = match config {
        Some(path) => LearningConfig::load(path)?,
        None => LearningConfig::default(),
    };
    fs::create_dir_all(model_dir)?;

    let service = SleepLearningService::new(
        config,
        Arc::new(NearestCentroidClassifier),
        Arc::new(NdjsonSampleSource::new(input)),
        Arc::new(FileModelStore::new(model_dir)),
        Arc::new(FileThresholdSink::new(thresholds)),
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let outcome = runtime.block_on(async {
        let mut events = service.train_on_historical_data();
        while let Some(event) = events.recv().await {
            match event {
                TrainingEvent::Progress { progress, message } => {
                    if !json {
                        eprintln!("[{:>3.0}%] {}", progress * 100.0, message);
                    }
                }
                TrainingEvent::Completed(outcome) => return Ok(outcome),
                TrainingEvent::Failed { message } => {
                    return Err(SomnaCliError::TrainingFailed(message))
                }
            }
        }
        Err(SomnaCliError::TrainingFailed(
            "training ended without a result".to_string(),
        ))
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("Training Report");
        println!("===============");
        println!("Model version: {}", outcome.model_version);
        println!("Data points:   {}", outcome.data_points);
        println!("Accuracy:      {:.3}", outcome.accuracy);
        println!("\nThresholds:");
        println!("  heart_rate:       {:.1}", outcome.thresholds.heart_rate);
        println!("  hrv:              {:.1}", outcome.thresholds.hrv);
        println!("  respiratory_rate: {:.1}", outcome.thresholds.respiratory_rate);
        println!("  sleep_quality:    {:.2}", outcome.thresholds.sleep_quality);
    }
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    model_dir: Option<&Path>,
    json: bool,
) -> Result<(), SomnaCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "somna_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Somna version {}", SOMNA_VERSION),
    });

    if let Some(config_path) = config {
        let check = match LearningConfig::load(config_path) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Config valid ({} day history, {} folds)",
                    config.history_days, config.folds
                ),
            },
            Err(LearnError::Io(e)) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: format!("Cannot read config file: {}", e),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid config: {}", e),
            },
        };
        checks.push(check);
    }

    if let Some(dir) = model_dir {
        let check = if !dir.is_dir() {
            DoctorCheck {
                name: "model_dir".to_string(),
                status: CheckStatus::Warning,
                message: "Model directory does not exist".to_string(),
            }
        } else {
            match fs::read_dir(dir) {
                Ok(entries) => {
                    let models = entries
                        .filter_map(|entry| entry.ok())
                        .filter(|entry| {
                            let name = entry.file_name().to_string_lossy().into_owned();
                            name.starts_with("sleep_stage_model_v")
                                && !name.ends_with("_metadata.json")
                        })
                        .count();
                    DoctorCheck {
                        name: "model_dir".to_string(),
                        status: CheckStatus::Ok,
                        message: format!("Model directory holds {} model(s)", models),
                    }
                }
                Err(e) => DoctorCheck {
                    name: "model_dir".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read model directory: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (use -i <file> for input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (align -i - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SOMNA_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Somna Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SomnaCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, SomnaCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), SomnaCliError> {
    if output.to_string_lossy() == "-" {
        print!("{}", data);
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

// Error handling

enum SomnaCliError {
    Io(io::Error),
    Learn(LearnError),
    Json(serde_json::Error),
    NoSamples,
    ValidationFailed(usize),
    TrainingFailed(String),
    DoctorFailed,
}

impl From<io::Error> for SomnaCliError {
    fn from(e: io::Error) -> Self {
        SomnaCliError::Io(e)
    }
}

impl From<LearnError> for SomnaCliError {
    fn from(e: LearnError) -> Self {
        match e {
            LearnError::Io(e) => SomnaCliError::Io(e),
            other => SomnaCliError::Learn(other),
        }
    }
}

impl From<serde_json::Error> for SomnaCliError {
    fn from(e: serde_json::Error) -> Self {
        SomnaCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SomnaCliError> for CliError {
    fn from(e: SomnaCliError) -> Self {
        match e {
            SomnaCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SomnaCliError::Learn(e) => {
                let hint = match &e {
                    LearnError::InvalidConfig(_) => "Run 'somna doctor --config <file>' for details",
                    LearnError::ParseError(_) => "Ensure each line is one JSON sample",
                    LearnError::InsufficientData(_) => {
                        "Samples must fall inside the configured history window"
                    }
                    _ => "Re-run with RUST_LOG=debug for details",
                };
                CliError {
                    code: "LEARN_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            SomnaCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SomnaCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples to process".to_string(),
                hint: Some("Ensure input is not empty".to_string()),
            },
            SomnaCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} samples failed validation", count),
                hint: Some("Fix the listed samples and retry".to_string()),
            },
            SomnaCliError::TrainingFailed(message) => CliError {
                code: "TRAINING_FAILED".to_string(),
                message,
                hint: Some("Check that the input spans several labelled nights".to_string()),
            },
            SomnaCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
