//! # shmlink Mouse
//!
//! Polling consumer for the pointer channel. Every poll consumes a pending
//! update (resetting `changed`) and emits relative motion, at most 127 per
//! axis per report, carrying larger deltas over to later polls.
//!
//! # Usage
//!
//! ```bash
//! # Attach to key 454 (the producer must have created it)
//! shmlink_mouse
//!
//! # Create the segment if missing, poll every 10 ms
//! shmlink_mouse --create --poll-interval-ms 10
//!
//! # Settings from a file, JSON logs
//! shmlink_mouse --config /etc/shmlink/config.toml --json
//! ```

#![deny(warnings)]

use clap::Parser;
use shmlink::{BackendKind, MouseEvent, MouseSource, SharedStructChannel, ShmlinkConfig};
use shmlink_common::config::{ConfigLoader, default_config_path};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, debug, error, info};
use tracing_subscriber::EnvFilter;

/// shmlink Mouse - relative mouse motion from a shared pointer channel
#[derive(Parser, Debug)]
#[command(name = "shmlink_mouse")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Polling consumer turning a shmlink pointer channel into relative mouse motion")]
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

    /// Delay between polls in milliseconds (overrides config)
    #[arg(short, long)]
    poll_interval_ms: Option<u64>,

    /// Create the segment if it does not exist yet
    #[arg(long)]
    create: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    // No subscriber exists until the config is loaded; report on stderr only.
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shmlink_mouse: {e}");
            std::process::exit(2);
        }
    };

    setup_tracing(&args, &config);
    if let Err(e) = run(&args, config) {
        error!("Mouse consumer failed: {}", e);
        eprintln!("shmlink_mouse: {e}");
        std::process::exit(1);
    }
    Ok(())
}

fn run(args: &Args, config: ShmlinkConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("shmlink Mouse v{} starting...", env!("CARGO_PKG_VERSION"));

    let layout = config.layout()?;
    let channel = if args.create {
        SharedStructChannel::open_or_create_with(config.channel.clone(), layout)?
    } else {
        SharedStructChannel::attach_with(config.channel.clone(), layout)?
    };
    info!(
        key = channel.key(),
        backend = %config.channel.backend,
        "consuming from channel"
    );

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    let interval = config.mouse.poll_interval();
    let mut mouse = MouseSource::new(channel, config.mouse)?;
    let mut reports = 0u64;

    while running.load(Ordering::SeqCst) {
        for event in mouse.poll()? {
            report(&event);
            reports += 1;
        }
        std::thread::sleep(interval);
    }

    let mut channel = mouse.into_channel();
    channel.close()?;
    info!(reports, "shmlink Mouse shutdown complete");
    Ok(())
}

/// Emit one event on stdout, one line per report.
fn report(event: &MouseEvent) {
    match event {
        MouseEvent::Motion(m) => {
            debug!(xrel = m.xrel, yrel = m.yrel, "motion");
            println!("motion xrel={} yrel={}", m.xrel, m.yrel);
        }
        MouseEvent::Buttons(mask) => {
            debug!(mask, "buttons");
            println!("buttons mask={mask:#x}");
        }
    }
}

/// Load the config file (if any) and apply CLI overrides.
fn load_config(args: &Args) -> Result<ShmlinkConfig, Box<dyn std::error::Error>> {
    let mut config = match default_config_path(args.config.as_deref()) {
        Some(path) => ShmlinkConfig::load(&path)?,
        None => ShmlinkConfig::new("shmlink-mouse"),
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
    if let Some(ms) = args.poll_interval_ms {
        config.mouse.poll_interval_ms = ms;
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
