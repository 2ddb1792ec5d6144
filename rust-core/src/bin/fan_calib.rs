//! # fan_calib
//!
//! Command-line front end: calibrate a recording batch, build its spectral
//! model, and query a built model by RPM.
//!
//! (Try --help)

use clap::{Args, Parser, Subcommand};
use fan_acoustics::jobs::{CacheKey, FsModelCache, JobStatus, MemoryJobStore, Orchestrator, Target};
use fan_acoustics::model::ModelDocument;
use fan_acoustics::{telemetry, CalibError, CalibrationParams};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "fan_calib", version)]
#[command(about = "Fan acoustic calibration and spectral modeling.", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate environment and RPM anchors of a batch
    Calibrate(JobArgs),
    /// Calibrate, then build the spectral model from the sweep
    Model(JobArgs),
    /// Evaluate a built model at one or more RPMs
    Predict(PredictArgs),
    /// Print the effective parameters and their hash
    Params(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Directory holding named TOML configurations
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Configuration name; `default` falls back to built-in defaults
    #[arg(long, default_value = "default")]
    config: String,
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Batch root holding env/, R<rpm>/ folders and sweep/
    batch: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,

    /// Artifact cache directory
    #[arg(long, default_value = "fan-cache")]
    cache: PathBuf,

    /// Worker threads
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Give up waiting after this many seconds
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Model document written by `fan_calib model`
    model: PathBuf,

    /// RPM to evaluate (repeatable)
    #[arg(long, required = true)]
    rpm: Vec<f64>,

    /// Print per-band levels as well
    #[arg(long, default_value_t = false)]
    bands: bool,
}

fn main() -> ExitCode {
    telemetry::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Calibrate(a) => cmd_job(a, Target::Calibration),
        Command::Model(a) => cmd_job(a, Target::Model),
        Command::Predict(a) => cmd_predict(a),
        Command::Params(a) => cmd_params(a),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fan_calib failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_params(args: &ConfigArgs) -> Result<CalibrationParams, CalibError> {
    CalibrationParams::load_named(&args.config_dir, &args.config)
}

fn cmd_job(args: JobArgs, target: Target) -> Result<(), CalibError> {
    let params = load_params(&args.config)?;
    let cache = Arc::new(FsModelCache::new(&args.cache)?);
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(store, cache.clone(), args.workers);

    let job = orchestrator.request(&args.batch, target, &params)?;
    let job = orchestrator.wait(job.id, Duration::from_secs(args.timeout_secs))?;
    match job.status {
        JobStatus::Success => {
            if let Some(summary) = &job.summary {
                println!("{}", serde_json::to_string_pretty(summary)?);
            }
            let key = CacheKey::for_job(&job.key);
            println!("artifact: {}", cache.path_for(&key).display());
            Ok(())
        }
        JobStatus::Failed => Err(CalibError::Numeric(
            job.error.unwrap_or_else(|| "job failed".to_string()),
        )),
        JobStatus::Pending | JobStatus::Running => Err(CalibError::Numeric(format!(
            "job {} still {:?} after {}s",
            job.id, job.status, args.timeout_secs
        ))),
    }
}

fn cmd_predict(args: PredictArgs) -> Result<(), CalibError> {
    let bytes = fs::read(&args.model)?;
    let doc: ModelDocument = serde_json::from_slice(&bytes)?;
    let centers = doc.model.nominal_centers();
    for &rpm in &args.rpm {
        let p = doc.model.predict(rpm);
        println!("rpm {:>8.1}  LAeq {:>6.2} dB", p.rpm, p.total_laeq);
        if args.bands {
            for (f, level) in centers.iter().zip(&p.band_db) {
                match level {
                    Some(db) => println!("  {f:>8.1} Hz  {db:>6.2} dB"),
                    None => println!("  {f:>8.1} Hz       -"),
                }
            }
        }
    }
    Ok(())
}

fn cmd_params(args: ConfigArgs) -> Result<(), CalibError> {
    let params = load_params(&args)?;
    params.validate()?;
    print!("{}", params.to_toml_string()?);
    println!("# params hash: {}", params.params_hash()?);
    Ok(())
}
