use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sql_diff_fuzzer::{EngineConfig, EngineSpec, Fuzzer, FuzzerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output: debug logging and every mismatch as it is found
    #[arg(long)]
    debug: bool,

    /// Number of execution workers (default: number of CPU cores)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Number of statements per batch
    #[arg(short = 'b', long, default_value_t = 100)]
    batch_size: usize,

    /// How long to run, e.g. 30s, 10m, 2h. 0 runs until interrupted
    #[arg(short = 'd', long, default_value = "0", value_parser = parse_duration)]
    duration: Duration,

    /// Directory crash reports are written to
    #[arg(short = 'o', long, default_value = "./bugs")]
    output_dir: PathBuf,

    /// Engine under test: a sqlite3 shell binary, or `bundled`
    #[arg(long, default_value = "./sqlite3-3.26.0")]
    old_engine: EngineSpec,

    /// Reference engine: a sqlite3 shell binary, or `bundled`
    #[arg(long, default_value = "sqlite3")]
    new_engine: EngineSpec,

    /// Track coverage of instrumented engines
    #[arg(long)]
    coverage: bool,
}

/// Accepts a bare number of seconds or a number followed by `ms`, `s`, `m`
/// or `h`.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    let scale = |factor: u64| {
        n.checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too long"))
    };
    match unit {
        "" | "s" => Ok(Duration::from_secs(n)),
        "ms" => Ok(Duration::from_millis(n)),
        "m" => scale(60),
        "h" => scale(3600),
        _ => Err(format!("unknown duration unit '{unit}' in '{s}'")),
    }
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();

    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if let Err(e) = fs::create_dir_all(&args.output_dir) {
        error!(path = %args.output_dir.display(), error = %e, "failed to create output directory");
        return Ok(ExitCode::from(1));
    }

    let defaults = FuzzerConfig::default();
    let config = FuzzerConfig {
        debug: args.debug,
        threads: args.threads.unwrap_or(defaults.threads),
        batch_size: args.batch_size,
        output_dir: args.output_dir,
        engines: EngineConfig {
            old: args.old_engine,
            new: args.new_engine,
            ..EngineConfig::default()
        },
        deadline: (!args.duration.is_zero()).then_some(args.duration),
        coverage: args.coverage,
        ..defaults
    };

    let fuzzer = Fuzzer::new(config);
    let cancel = fuzzer.cancel_handle();
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        cancel.store(true, Ordering::Relaxed);
    })?;

    info!("fuzzer running, press Ctrl+C to stop");
    let stats = fuzzer.run()?;
    info!(
        executed = stats.executed,
        mismatches = stats.mismatches,
        reports = stats.reports,
        "done"
    );
    Ok(ExitCode::SUCCESS)
}
