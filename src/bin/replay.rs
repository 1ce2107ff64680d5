use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Parser;
use serde_json::json;

use location_engine_rs::config::EngineConfig;
use location_engine_rs::declination::{DeclinationModel, DipoleDeclination, FixedDeclination};
use location_engine_rs::replay::{self, load_log};
use location_engine_rs::types::DisplayRotation;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded event log (*.json or *.json.gz)
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of logs to batch replay
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Display rotation in degrees (0, 90, 180, 270)
    #[arg(long, default_value = "0")]
    rotation: u32,

    /// Use a constant declination (degrees) instead of the dipole model
    #[arg(long)]
    declination: Option<f64>,

    /// Include every observer callback in the output
    #[arg(long, default_value_t = false)]
    events: bool,
}

fn declination_model(args: &Args) -> Box<dyn DeclinationModel> {
    match args.declination {
        Some(deg) => Box::new(FixedDeclination(deg)),
        None => Box::new(DipoleDeclination::default()),
    }
}

fn run_once(path: &Path, args: &Args, config: &EngineConfig, rotation: DisplayRotation) -> Result<serde_json::Value> {
    let log = load_log(path)?;
    let outcome = replay::run(&log, config.clone(), rotation, declination_model(args))?;

    let mut result = json!({
        "log": path.display().to_string(),
        "summary": outcome.summary,
    });
    if args.events {
        result["events"] = serde_json::to_value(&outcome.events)?;
    }
    Ok(result)
}

fn is_log_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    path.is_file() && (name.ends_with(".json") || name.ends_with(".json.gz"))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let Some(rotation) = DisplayRotation::from_degrees(args.rotation) else {
        bail!("Rotation must be 0, 90, 180 or 270, got {}", args.rotation);
    };
    let config = match args.config.as_ref() {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    let mut results = Vec::new();
    if let Some(dir) = args.log_dir.as_ref() {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if is_log_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            match run_once(&path, &args, &config, rotation) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &args, &config, rotation)?);
    } else {
        bail!("Provide --log or --log-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
