//! Replay a recorded plate capture and print every jump as a JSON line.
//!
//! Usage: forceplate-replay capture.jsonl --mode "Single Jump"
//!        cat capture.jsonl | forceplate-replay - --tare

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use forceplate::config::EngineConfig;
use forceplate::modes::ModeKind;
use forceplate::session::Session;
use forceplate::store::{JumpStore, MemoryStore, StoredJump};
use forceplate::wire::Message;

/// Feed a newline-delimited JSON plate capture through the jump engine.
#[derive(Parser, Debug)]
#[command(name = "forceplate-replay")]
#[command(version)]
#[command(about = "Replay a force plate capture and print detected jumps", long_about = None)]
struct Cli {
    /// Capture file, or `-` for stdin
    #[arg(value_name = "FILE", default_value = "-")]
    input: String,

    /// Engine configuration (JSON; missing keys keep defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exercise: "Single Jump", "Jump Estimation" or "Contact Time"
    #[arg(short, long, default_value = "Single Jump")]
    mode: ModeKind,

    /// Jumper mass in kg (Jump Estimation)
    #[arg(long)]
    mass: Option<f64>,

    /// Velocity at integration start in m/s (Jump Estimation)
    #[arg(long)]
    start_velocity: Option<f64>,

    /// Nominal sampling rate in Hz (overrides the config)
    #[arg(long)]
    frequency: Option<f64>,

    /// Raw counts per kg (overrides the config)
    #[arg(long)]
    raw_per_kg: Option<f64>,

    /// Tare on the first samples of the capture (plate must be empty)
    #[arg(long)]
    tare: bool,

    /// Calibrate against this known mass at the start of the capture
    #[arg(long, value_name = "KG", conflicts_with = "tare")]
    calibrate: Option<f64>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_json_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    if let Some(hz) = cli.frequency {
        config.plate.frequency_hz = hz;
    }
    if let Some(raw_per_kg) = cli.raw_per_kg {
        config.plate.raw_per_kg = raw_per_kg;
    }

    let mut session = Session::open(config, MemoryStore::new())?;
    session.set_mode(cli.mode);
    if let Some(kg) = cli.mass {
        session.set_mass(kg).context("--mass")?;
    }
    if let Some(mps) = cli.start_velocity {
        session.set_start_velocity(mps).context("--start-velocity")?;
    }
    if cli.tare {
        session.start_tare();
    }
    if let Some(kg) = cli.calibrate {
        session.start_calibration(kg).context("--calibrate")?;
    }

    session.set_on_result(|id, result| {
        let record = StoredJump {
            id,
            result: result.clone(),
        };
        match serde_json::to_string(&record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(id, error = %e, "could not serialize jump"),
        }
    });

    let reader: Box<dyn BufRead> = if cli.input == "-" {
        Box::new(BufReader::new(io::stdin().lock()))
    } else {
        let file = File::open(&cli.input).with_context(|| format!("opening {}", cli.input))?;
        Box::new(BufReader::new(file))
    };

    // Captures carry no host time; samples are stamped at the nominal rate.
    let mut received_ms = 0.0;
    let mut samples = 0u64;
    for line in reader.lines() {
        let line = line.context("reading capture")?;
        let message = match Message::decode_line(&line) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "dropped line");
                continue;
            }
        };
        if matches!(message, Message::Sample { .. }) {
            samples += 1;
            received_ms += 1000.0 / session.engine().config().plate.frequency_hz;
        }
        session.handle(message, received_ms)?;
    }

    let jumps = session.store().load_history(usize::MAX)?.len();
    info!(samples, jumps, "replay finished");
    Ok(())
}
