//! Parsons Trace CLI
//!
//! Commands:
//! - features: Extract behavioral features from session JSON
//! - validate: Check a session directory and print a dataset report
//! - align: Jointly normalize two feature sets
//! - isnap: Extract features from an iSNAP DataShop export
//! - export: Write a session directory as a ProgSnap2 main table
//! - experiment: Prepare the iSNAP → Parsons transfer dataset

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use parsons_trace::pipeline::{parse_session, parse_sessions, quote_non_finite};
use parsons_trace::types::StoredFeatures;
use parsons_trace::{
    align_features, check_alignment, export_progsnap2, DatasetValidator, FeatureExtractor,
    FeatureVector, IsnapLoader, Session, SessionStore, TraceConfig, TraceError, TransferDataset,
    VERSION,
};

/// Parsons Trace - behavioral analytics for Parsons problem sessions
#[derive(Parser)]
#[command(name = "parsons-trace")]
#[command(version = VERSION)]
#[command(about = "Extract, validate, and align Parsons session features", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract features from session JSON files or directories
    Features {
        /// Session files (single object or array) or session directories; - for stdin
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        format: OutputFormat,
    },

    /// Validate every session in a directory
    Validate {
        /// Session directory
        dir: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Exit non-zero when any session is invalid
        #[arg(long)]
        strict: bool,
    },

    /// Jointly normalize two feature sets and compare their spread
    Align {
        /// JSON array of feature objects (source set)
        a: PathBuf,

        /// JSON array of feature objects (target set)
        b: PathBuf,
    },

    /// Extract features from an iSNAP tab-separated export
    Isnap {
        /// DataShop transaction file (use - for stdin)
        input: PathBuf,
    },

    /// Export a session directory as a ProgSnap2 main table
    Export {
        /// Session directory
        dir: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Only export sessions recorded at this school
        #[arg(long)]
        school: Option<String>,
    },

    /// Prepare the transfer-learning dataset and print its summary
    Experiment {
        /// iSNAP DataShop transaction file
        #[arg(long)]
        isnap: PathBuf,

        /// Parsons session directory
        #[arg(long)]
        sessions: PathBuf,

        /// Write the full prepared dataset as JSON
        #[arg(long)]
        dump: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One JSON object per line
    Ndjson,
    /// A single JSON array
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).without_time())
        .init();

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

fn run(cli: Cli) -> Result<(), TraceCliError> {
    let config = match &cli.config {
        Some(path) => TraceConfig::from_file(path)?,
        None => TraceConfig::default(),
    };

    match cli.command {
        Commands::Features { inputs, format } => cmd_features(&inputs, format),
        Commands::Validate { dir, json, strict } => cmd_validate(&dir, &config, json, strict),
        Commands::Align { a, b } => cmd_align(&a, &b),
        Commands::Isnap { input } => cmd_isnap(&input),
        Commands::Export {
            dir,
            output,
            school,
        } => cmd_export(&dir, &output, school.as_deref()),
        Commands::Experiment {
            isnap,
            sessions,
            dump,
        } => cmd_experiment(&isnap, &sessions, &config, dump.as_deref()),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionFeatures<'a> {
    session_id: &'a str,
    features: FeatureVector,
}

fn cmd_features(inputs: &[PathBuf], format: OutputFormat) -> Result<(), TraceCliError> {
    let mut sessions = Vec::new();
    for input in inputs {
        sessions.extend(read_sessions(input)?);
    }
    if sessions.is_empty() {
        return Err(TraceCliError::NoSessions);
    }

    let rows: Vec<SessionFeatures> = sessions
        .iter()
        .map(|session| SessionFeatures {
            session_id: &session.session_id,
            features: FeatureExtractor::extract(session),
        })
        .collect();

    print_rows(&rows, format)
}

fn cmd_validate(
    dir: &Path,
    config: &TraceConfig,
    json: bool,
    strict: bool,
) -> Result<(), TraceCliError> {
    let sessions = load_dir(dir, None)?;
    let report = DatasetValidator::new(config.validation.clone()).validate_all(&sessions);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total sessions:   {}", report.total);
        println!("Valid sessions:   {}", report.valid);
        println!("Invalid sessions: {}", report.invalid);
        println!("Pass rate:        {:.1}%", report.pass_rate * 100.0);

        if !report.common_issues.is_empty() {
            println!("\nCommon issues:");
            for issue in &report.common_issues {
                println!("  - {} ({})", issue.issue, issue.count);
            }
        }

        let sample = report.invalid_sessions.as_deref().unwrap_or_default();
        if !sample.is_empty() {
            println!("\nInvalid sessions:");
            for summary in sample {
                println!("  - {}: {}", summary.session_id, summary.issues.join("; "));
            }
        }
    }

    if strict && report.invalid > 0 {
        Err(TraceCliError::ValidationFailed(report.invalid))
    } else {
        Ok(())
    }
}

#[derive(Serialize)]
struct AlignOutput {
    a: parsons_trace::FeatureMatrix,
    b: parsons_trace::FeatureMatrix,
    alignment: parsons_trace::AlignmentReport,
}

fn cmd_align(a: &Path, b: &Path) -> Result<(), TraceCliError> {
    let set_a: Vec<StoredFeatures> = serde_json::from_str(&quote_non_finite(&read_input(a)?))?;
    let set_b: Vec<StoredFeatures> = serde_json::from_str(&quote_non_finite(&read_input(b)?))?;

    let (a, b) = align_features(&set_a, &set_b)?;
    let alignment = check_alignment(&a, &b);
    if !alignment.aligned {
        warn!(scale_difference = alignment.scale_difference, "feature sets are not aligned");
    }

    println!("{}", serde_json::to_string_pretty(&AlignOutput { a, b, alignment })?);
    Ok(())
}

fn cmd_isnap(input: &Path) -> Result<(), TraceCliError> {
    let sessions = if is_stdin(input) {
        IsnapLoader::load(io::stdin().lock())?
    } else {
        IsnapLoader::load_path(input)?
    };
    if sessions.is_empty() {
        return Err(TraceCliError::NoSessions);
    }

    let rows: Vec<SessionFeatures> = sessions
        .iter()
        .map(|session| SessionFeatures {
            session_id: &session.session_id,
            features: FeatureExtractor::extract(session),
        })
        .collect();

    print_rows(&rows, OutputFormat::Ndjson)
}

fn cmd_export(dir: &Path, output: &Path, school: Option<&str>) -> Result<(), TraceCliError> {
    let sessions = load_dir(dir, school)?;
    let table = export_progsnap2(&sessions)?;

    if is_stdin(output) {
        io::stdout().write_all(table.as_bytes())?;
    } else {
        fs::write(output, table)?;
        info!(path = %output.display(), sessions = sessions.len(), "ProgSnap2 table written");
    }
    Ok(())
}

fn cmd_experiment(
    isnap: &Path,
    sessions_dir: &Path,
    config: &TraceConfig,
    dump: Option<&Path>,
) -> Result<(), TraceCliError> {
    let isnap_features: Vec<FeatureVector> = IsnapLoader::load_path(isnap)?
        .iter()
        .map(FeatureExtractor::extract)
        .collect();

    // Stored features win over re-extraction
    let parsons_features: Vec<StoredFeatures> = load_dir(sessions_dir, None)?
        .iter()
        .map(|session| {
            session
                .features
                .clone()
                .unwrap_or_else(|| FeatureExtractor::extract(session).to_stored())
        })
        .collect();

    let dataset = TransferDataset::prepare(&isnap_features, &parsons_features, &config.experiment)?;

    if let Some(path) = dump {
        fs::write(path, serde_json::to_string(&dataset)?)?;
    }

    println!("{}", serde_json::to_string_pretty(&dataset.summary())?);
    Ok(())
}

// Input helpers

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn read_input(path: &Path) -> Result<String, TraceCliError> {
    if is_stdin(path) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

/// Read one session, an array of sessions, or a session directory
fn read_sessions(path: &Path) -> Result<Vec<Session>, TraceCliError> {
    if path.is_dir() {
        return load_dir(path, None);
    }

    let data = read_input(path)?;
    if data.trim_start().starts_with('[') {
        Ok(parse_sessions(&data)?)
    } else {
        Ok(vec![parse_session(&data)?])
    }
}

fn load_dir(dir: &Path, school: Option<&str>) -> Result<Vec<Session>, TraceCliError> {
    if !dir.is_dir() {
        return Err(TraceCliError::NotADirectory(dir.to_path_buf()));
    }
    Ok(SessionStore::open(dir)?.load_all(school)?)
}

fn print_rows<T: Serialize>(rows: &[T], format: OutputFormat) -> Result<(), TraceCliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Ndjson => {
            for row in rows {
                writeln!(out, "{}", serde_json::to_string(row)?)?;
            }
        }
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(rows)?)?,
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum TraceCliError {
    Io(io::Error),
    Trace(TraceError),
    Json(serde_json::Error),
    NotADirectory(PathBuf),
    NoSessions,
    ValidationFailed(usize),
}

impl From<io::Error> for TraceCliError {
    fn from(e: io::Error) -> Self {
        TraceCliError::Io(e)
    }
}

impl From<TraceError> for TraceCliError {
    fn from(e: TraceError) -> Self {
        TraceCliError::Trace(e)
    }
}

impl From<serde_json::Error> for TraceCliError {
    fn from(e: serde_json::Error) -> Self {
        TraceCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TraceCliError> for CliError {
    fn from(e: TraceCliError) -> Self {
        match e {
            TraceCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TraceCliError::Trace(e @ TraceError::ConfigError(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the file passed to --config".to_string()),
            },
            TraceCliError::Trace(e @ TraceError::InsufficientData(_)) => CliError {
                code: "INSUFFICIENT_DATA".to_string(),
                message: e.to_string(),
                hint: Some("Provide at least one session in each input".to_string()),
            },
            TraceCliError::Trace(e @ TraceError::InvalidSessionId(_)) => CliError {
                code: "INVALID_SESSION_ID".to_string(),
                message: e.to_string(),
                hint: Some("Session ids are used as file names".to_string()),
            },
            TraceCliError::Trace(e @ TraceError::DimensionMismatch(_)) => CliError {
                code: "DIMENSION_MISMATCH".to_string(),
                message: e.to_string(),
                hint: Some("Both inputs must use the same feature columns".to_string()),
            },
            TraceCliError::Trace(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input matches the session JSON or DataShop TSV layout".to_string()),
            },
            TraceCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TraceCliError::NotADirectory(path) => CliError {
                code: "NOT_A_DIRECTORY".to_string(),
                message: format!("{} is not a directory", path.display()),
                hint: Some("Pass the session store directory".to_string()),
            },
            TraceCliError::NoSessions => CliError {
                code: "NO_SESSIONS".to_string(),
                message: "No sessions found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            TraceCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} sessions failed validation", count),
                hint: Some("Run without --strict to see the full report".to_string()),
            },
        }
    }
}
