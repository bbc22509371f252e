use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use acs_formats::MAX_SPECIAL_ARGS;

#[derive(Parser, Debug)]
#[command(
    about = "Loads a compiled map script image and runs it against a recording host",
    version
)]
pub struct Args {
    /// Path to the compiled script image (BEHAVIOR lump)
    pub image: PathBuf,

    /// Map number the image belongs to
    #[arg(long, default_value_t = 1)]
    pub map: i32,

    /// Number of ticks to simulate
    #[arg(long, default_value_t = 70)]
    pub ticks: u32,

    /// Optional JSON file overriding interpreter limits
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seed for the script random number generator (overrides --config)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Start a script before the first tick, as NUMBER or NUMBER:ARG,ARG,...
    #[arg(long = "start", value_name = "SCRIPT[:ARGS]")]
    pub starts: Vec<String>,

    /// Path to write the recorded host events as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Path to write the final VM snapshot as JSON
    #[arg(long)]
    pub snapshot_json: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub script: i32,
    pub args: [i32; MAX_SPECIAL_ARGS],
}

#[derive(Debug)]
pub struct RunArgs {
    pub image: PathBuf,
    pub map: i32,
    pub ticks: u32,
    pub config: Option<PathBuf>,
    pub seed: Option<u64>,
    pub starts: Vec<StartRequest>,
    pub event_log_json: Option<PathBuf>,
    pub snapshot_json: Option<PathBuf>,
}

pub fn parse() -> Result<RunArgs> {
    Args::parse().into_run_args()
}

impl Args {
    fn into_run_args(self) -> Result<RunArgs> {
        if self.map <= 0 {
            bail!("--map must be a positive map number");
        }
        let starts = self
            .starts
            .iter()
            .map(|raw| parse_start(raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(RunArgs {
            image: self.image,
            map: self.map,
            ticks: self.ticks,
            config: self.config,
            seed: self.seed,
            starts,
            event_log_json: self.event_log_json,
            snapshot_json: self.snapshot_json,
        })
    }
}

fn parse_start(raw: &str) -> Result<StartRequest> {
    let (script, rest) = match raw.split_once(':') {
        Some((script, rest)) => (script, Some(rest)),
        None => (raw, None),
    };
    let script = script
        .trim()
        .parse::<i32>()
        .with_context(|| format!("invalid script number in --start {raw}"))?;

    let mut args = [0; MAX_SPECIAL_ARGS];
    if let Some(rest) = rest.filter(|rest| !rest.trim().is_empty()) {
        let values = rest
            .split(',')
            .map(|value| value.trim().parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid argument list in --start {raw}"))?;
        if values.len() > MAX_SPECIAL_ARGS {
            return Err(anyhow!(
                "--start {raw} passes {} arguments; at most {MAX_SPECIAL_ARGS} are allowed",
                values.len()
            ));
        }
        args[..values.len()].copy_from_slice(&values);
    }
    Ok(StartRequest { script, args })
}
