mod wiring;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use senmux_config::Config;
use senmux_core::{BoundedQueue, EventManager, Filter, IoLists, Registry, Supervisor};
use tracing::{error, info};

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Multiplexes NMEA-0183 sentences between serial, TCP, UDP and file
/// interfaces, applying per-source filtering and failover.
#[derive(Parser, Debug)]
#[command(name = "senmuxd", version, about)]
struct Cli {
    /// Path to the TOML configuration file. Pass `-` to run with no
    /// configured interfaces (useful for `-V`/smoke checks).
    #[arg(short = 'f', long = "config", default_value = "/etc/senmux.conf")]
    config: String,

    /// Increase log verbosity; repeatable (-d, -dd, -ddd).
    #[arg(short = 'd', long = "debug", action = clap::ArgAction::Count)]
    debug: u8,
}

fn verbosity_filter(level: u8) -> &'static str {
    match level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = if cli.config == "-" {
        Config::default()
    } else {
        let text = std::fs::read_to_string(PathBuf::from(&cli.config))?;
        Config::from_toml_str(&text)?
    };

    let names: Vec<String> = config.interface.iter().map(|i| i.name().to_string()).collect();
    let registry = Registry::build(&names)?;

    let ofilter: Option<Filter> = if config.global.failover.is_empty() {
        None
    } else {
        let specs = config
            .global
            .failover
            .iter()
            .map(|spec| senmux_config::parse_failover_spec(spec, &registry))
            .collect::<Result<Vec<_>, _>>()?;
        Some(Filter::failover(specs))
    };

    let lists = Arc::new(IoLists::new());
    let engine_input = Arc::new(BoundedQueue::new(senmux_core::DEFAULT_QUEUE_SIZE));
    let events = Arc::new(EventManager::new());
    let supervisor = Supervisor::new(Arc::clone(&lists));

    wiring::spawn_all(&config.interface, &registry, &lists, &engine_input, &events, &supervisor)?;

    let events_for_thread = Arc::clone(&events);
    let events_thread = std::thread::spawn(move || events_for_thread.run());

    let engine_input_for_thread = Arc::clone(&engine_input);
    let lists_for_engine = Arc::clone(&lists);
    let engine_thread = std::thread::spawn(move || {
        senmux_core::run_engine(engine_input_for_thread, lists_for_engine, ofilter);
    });

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown_requested))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown_requested))?;

    while !shutdown_requested.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown requested, draining interfaces");
    events.stop();
    engine_input.shutdown();

    let grace = config.global.shutdown_grace.unwrap_or(DEFAULT_SHUTDOWN_GRACE);
    let shutdown_result = supervisor.shutdown(grace);
    let _ = engine_thread.join();
    let _ = events_thread.join();

    shutdown_result.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(verbosity_filter(cli.debug))),
        )
        .init();

    match run(&cli) {
        Ok(()) => {
            info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "senmuxd exited with an error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_escalates_with_debug_count() {
        assert_eq!(verbosity_filter(0), "warn");
        assert_eq!(verbosity_filter(1), "info");
        assert_eq!(verbosity_filter(2), "debug");
        assert_eq!(verbosity_filter(9), "trace");
    }
}
