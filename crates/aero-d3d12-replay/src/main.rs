use std::fs;
use std::path::PathBuf;

use aero_d3d12_replay::{replay_software, ReplayOptions, ReplayScript};
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Parser)]
#[command(name = "aero-d3d12-replay", version, about)]
struct Args {
    /// JSON replay script (decoded calls in capture order).
    script: PathBuf,

    /// JSON file with replay options. Options embedded in the script take precedence over
    /// defaults; this file takes precedence over both.
    ///
    /// Environment variable: `AERO_D3D12_REPLAY_OPTIONS`.
    #[arg(long, env = "AERO_D3D12_REPLAY_OPTIONS")]
    options: Option<PathBuf>,

    /// Wait for every queue submission to finish before replaying the next call.
    ///
    /// Environment variable: `AERO_D3D12_REPLAY_SYNC`.
    #[arg(long, env = "AERO_D3D12_REPLAY_SYNC")]
    sync: bool,

    /// Request the driver debug layer.
    ///
    /// Environment variable: `AERO_D3D12_REPLAY_VALIDATE`.
    #[arg(long, env = "AERO_D3D12_REPLAY_VALIDATE")]
    validate: bool,

    /// Bound for CPU-side fence waits, in milliseconds.
    ///
    /// Environment variable: `AERO_D3D12_REPLAY_WAIT_TIMEOUT_MS`.
    #[arg(long, env = "AERO_D3D12_REPLAY_WAIT_TIMEOUT_MS")]
    wait_timeout_ms: Option<u64>,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `AERO_D3D12_REPLAY_LOG_LEVEL`.
    #[arg(long, env = "AERO_D3D12_REPLAY_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn replay_options(&self, script: &ReplayScript) -> anyhow::Result<ReplayOptions> {
        let mut options = match &self.options {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading options {}", path.display()))?;
                ReplayOptions::from_json(&text)
                    .with_context(|| format!("parsing options {}", path.display()))?
            }
            None => script.options.clone().unwrap_or_default(),
        };
        options.sync_queue_submissions |= self.sync;
        options.enable_validation_layer |= self.validate;
        if let Some(timeout) = self.wait_timeout_ms {
            options.wait_timeout_ms = timeout;
        }
        Ok(options)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let text = fs::read_to_string(&args.script)
        .with_context(|| format!("reading script {}", args.script.display()))?;
    let script = ReplayScript::from_json(&text)
        .with_context(|| format!("parsing script {}", args.script.display()))?;
    let options = args.replay_options(&script)?;

    let summary = replay_software(&script, options);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let Some(message) = &summary.fatal_error {
        anyhow::bail!("replay stopped after {} calls: {message}", summary.calls_dispatched);
    }
    Ok(())
}
