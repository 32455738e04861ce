//! # Rover Launcher
//!
//! Runs a car described by a TOML file for a fixed time.
//!
//! # Usage
//!
//! ```bash
//! # Run for 30 seconds
//! rover run config/car.toml 30
//!
//! # Verbose, JSON logs
//! rover run config/car.toml 30 -v --json
//!
//! # Show available components
//! rover list
//! ```

use clap::{Parser, Subcommand};
use rover::ComponentRegistry;
use rover::process::{ChildSpec, run_child};
use rover::supervisor::Car;
use rover_common::config::LogLevel;
use rover_common::stop::StopSignal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Rover - robot component supervisor
#[derive(Parser, Debug)]
#[command(name = "rover")]
#[command(version)]
#[command(about = "Runs robot components wired together through a message bus")]
#[command(long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the car described by CONFIG for DURATION seconds
    Run {
        /// Car configuration file
        config: PathBuf,
        /// Run time in seconds (Ctrl+C stops earlier)
        #[arg(value_parser = parse_duration)]
        duration: Duration,
    },
    /// List registered component modules and classes
    List,
    /// Process-mode child entry point
    #[command(hide = true)]
    Child {
        /// Serialized child specification
        #[arg(long)]
        spec: String,
    },
}

fn main() {
    let args = Args::parse();
    let result = match &args.command {
        Command::Run { config, duration } => {
            setup_tracing(level(args.verbose), args.json);
            run(config, *duration, &args)
        }
        Command::List => {
            list();
            Ok(())
        }
        Command::Child { spec } => child(spec),
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(
    config: &Path,
    duration: Duration,
    args: &Args,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Rover v{} starting...", env!("CARGO_PKG_VERSION"));

    let stop = StopSignal::with_os_signals()?;
    let child_level = if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let mut car = Car::from_file(config, ComponentRegistry::with_builtins())?
        .with_stop_signal(stop)
        .with_child_logging(child_level, args.json);
    car.set_default_ttl(duration);

    car.start()?;
    if car.wait(duration) {
        info!("Received shutdown signal");
    }
    car.shutdown()?;

    info!("Rover shutdown complete");
    Ok(())
}

fn list() {
    let registry = ComponentRegistry::with_builtins();
    for (module, classes) in registry.modules() {
        println!("{module}: {}", classes.join(", "));
    }
}

fn child(spec: &str) -> Result<(), Box<dyn std::error::Error>> {
    let spec = match ChildSpec::from_json(spec) {
        Ok(spec) => spec,
        Err(e) => {
            setup_tracing(Level::INFO, false);
            return Err(e.into());
        }
    };
    setup_tracing(spec.log_level.into(), spec.json_logs);
    run_child(&ComponentRegistry::with_builtins(), spec)?;
    Ok(())
}

fn level(verbose: bool) -> Level {
    if verbose { Level::DEBUG } else { Level::INFO }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let secs: f64 = text
        .parse()
        .map_err(|_| format!("'{text}' is not a number of seconds"))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("duration must be positive, got {text}"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

/// Setup tracing subscriber.
fn setup_tracing(level: Level, json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
