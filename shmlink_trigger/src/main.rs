//! # shmlink Trigger
//!
//! Interactive producer for the pointer channel. Each `x` or `y` line on stdin
//! publishes one locked update of `{x, y, changed: 1}` for the consumer to
//! pick up.
//!
//! # Usage
//!
//! ```bash
//! # Default key 454, System V backend
//! shmlink_trigger
//!
//! # File-backed segment in a custom directory, remove it on exit
//! shmlink_trigger --backend file --shm-dir /tmp --destroy-on-exit
//!
//! # Settings from a file, verbose logging
//! shmlink_trigger --config /etc/shmlink/config.toml -v
//! ```

#![deny(warnings)]

use clap::Parser;
use shmlink::{BackendKind, PointerUpdate, SharedStructChannel, ShmError, ShmlinkConfig};
use shmlink_common::config::{ConfigLoader, default_config_path};
use shmlink_common::consts::TRIGGER_STEP;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Press x [ENTER] for x axis, y [ENTER] for y axis, q [ENTER] to quit";

/// shmlink Trigger - publish pointer updates from the keyboard
#[derive(Parser, Debug)]
#[command(name = "shmlink_trigger")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Interactive producer publishing pointer updates to a shmlink channel")]
#[command(long_about = None)]
struct Args {
    /// Path to configuration file (TOML); defaults to /etc/shmlink/config.toml if present
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Segment key (overrides config)
    #[arg(short, long)]
    key: Option<i32>,

    /// Segment backend: sysv or file (overrides config)
    #[arg(short, long)]
    backend: Option<BackendKind>,

    /// Directory for file-backed segments (overrides config)
    #[arg(long, value_name = "DIR")]
    shm_dir: Option<PathBuf>,

    /// Lock acquisition timeout in milliseconds (overrides config)
    #[arg(long)]
    lock_timeout_ms: Option<u64>,

    /// Destroy the segment when quitting
    #[arg(long)]
    destroy_on_exit: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

/// What one input line asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Publish(PointerUpdate),
    Quit,
    Skip,
    Unknown,
}

impl Command {
    fn parse(line: &str) -> Self {
        match line.trim() {
            "x" => Self::Publish(PointerUpdate::along_x(TRIGGER_STEP)),
            "y" => Self::Publish(PointerUpdate::along_y(TRIGGER_STEP)),
            "q" => Self::Quit,
            "" => Self::Skip,
            _ => Self::Unknown,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    // No subscriber exists until the config is loaded; report on stderr only.
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shmlink_trigger: {e}");
            std::process::exit(2);
        }
    };

    setup_tracing(&args, &config);
    if let Err(e) = run(&args, config) {
        error!("Trigger failed: {}", e);
        eprintln!("shmlink_trigger: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run(args: &Args, config: ShmlinkConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("shmlink Trigger v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut channel = SharedStructChannel::open_or_create_with(config.channel.clone(), config.layout()?)?;
    info!(
        key = channel.key(),
        backend = %config.channel.backend,
        "publishing to channel"
    );

    println!("{USAGE}");
    let stdin = std::io::stdin();
    publish_lines(&channel, stdin.lock(), std::io::stdout())?;

    if args.destroy_on_exit {
        match channel.destroy() {
            Ok(()) => info!("Segment destroyed"),
            Err(ShmError::StillAttached { attached, .. }) => {
                warn!(?attached, "Segment still attached by a consumer; leaving it in place");
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        channel.close()?;
    }

    info!("shmlink Trigger shutdown complete");
    Ok(())
}

/// Publish one update per `x`/`y` line until `q` or end of input.
///
/// Returns the number of updates published.
fn publish_lines(
    channel: &SharedStructChannel,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut published = 0;
    for line in input.lines() {
        match Command::parse(&line?) {
            Command::Publish(update) => {
                channel.write_record(&update)?;
                published += 1;
                info!(x = update.x, y = update.y, "update published");
            }
            Command::Quit => break,
            Command::Skip => {}
            Command::Unknown => {
                writeln!(output, "Unknown Input")?;
                writeln!(output, "{USAGE}")?;
            }
        }
    }
    Ok(published)
}

/// Load the config file (if any) and apply CLI overrides.
fn load_config(args: &Args) -> Result<ShmlinkConfig, Box<dyn std::error::Error>> {
    let mut config = match default_config_path(args.config.as_deref()) {
        Some(path) => ShmlinkConfig::load(&path)?,
        None => ShmlinkConfig::new("shmlink-trigger"),
    };

    if let Some(key) = args.key {
        config.channel.key = key;
    }
    if let Some(backend) = args.backend {
        config.channel.backend = backend;
    }
    if let Some(dir) = &args.shm_dir {
        config.channel.shm_dir = dir.clone();
    }
    if let Some(ms) = args.lock_timeout_ms {
        config.channel.lock_timeout_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

/// Setup tracing subscriber based on CLI arguments and config.
fn setup_tracing(args: &Args, config: &ShmlinkConfig) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        config
            .shared
            .log_level
            .as_directive()
            .parse()
            .unwrap_or(Level::INFO)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
