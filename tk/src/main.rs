//! TaskKeeper - bounded-concurrency keeper
//!
//! CLI entry point for the polling keeper and one-off cycles.

use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use taskkeeper::cli::{Cli, Command, OutputFormat};
use taskkeeper::config::Config;
use taskkeeper::events::spawn_event_logger;
use taskkeeper::keeper::{Keeper, SimulatedExecutor};
use taskkeeper::queue::{CycleReport, ExecutionQueue};

/// How long to wait for the event logger to flush after the queue goes away
const LOGGER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let level = match cli_log_level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // stdout is reserved for reports
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize tracing: {}", e))?;

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(n) = cli.max_concurrent {
        debug!(n, "main: max-concurrent overridden on command line");
        config.queue.max_concurrent = Some(n);
    }
    config.validate()?;
    // Pin the resolved ceiling so every consumer sees the same value
    config.queue.max_concurrent = Some(config.queue.resolve_max_concurrent()?);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run => {
            debug!("main: matched Run command");
            cmd_run(&config).await
        }
        Command::Cycle {
            ids,
            fail,
            delay_ms,
            format,
        } => {
            debug!(?ids, ?fail, delay_ms, ?format, "main: matched Cycle command");
            cmd_cycle(&config, ids, fail, delay_ms, format).await
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

/// Run the keeper until SIGINT/SIGTERM
async fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    info!("Starting TaskKeeper");

    let mut keeper = Keeper::from_config(config)?;
    let logger_handle = spawn_event_logger(keeper.queue().event_bus(), config.logging.event_log.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let keeper_handle = tokio::spawn(async move { keeper.run(shutdown_rx).await });

    info!("Keeper running. Press Ctrl+C to stop.");

    debug!("cmd_run: setting up signal handlers");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                debug!("cmd_run: SIGINT received, initiating shutdown");
                warn!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                debug!("cmd_run: SIGTERM received, initiating shutdown");
                warn!("Received SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        debug!("cmd_run: waiting for ctrl_c (non-Unix)");
        tokio::signal::ctrl_c().await?;
        warn!("Received Ctrl+C");
    }

    let _ = shutdown_tx.send(()).await;

    let stats = keeper_handle.await.context("Keeper task failed")??;
    debug!(?stats, "cmd_run: keeper stopped");

    // The keeper owned the queue, so the bus is closed and the logger finishes
    if tokio::time::timeout(LOGGER_FLUSH_TIMEOUT, logger_handle).await.is_err() {
        warn!("Event logger did not finish in time");
    }

    info!("Graceful shutdown complete. Exiting.");
    Ok(())
}

/// Run one cycle with the simulated executor and print its report
async fn cmd_cycle(config: &Config, ids: Vec<String>, fail: Vec<String>, delay_ms: u64, format: OutputFormat) -> Result<()> {
    debug!(count = ids.len(), "cmd_cycle: called");

    let queue = ExecutionQueue::new(&config.queue)?;
    let logger_handle = spawn_event_logger(queue.event_bus(), config.logging.event_log.clone());

    let executor = SimulatedExecutor::new(Duration::from_millis(delay_ms)).failing(fail);
    let report = queue.enqueue(ids, executor).await?;

    drop(queue);
    if tokio::time::timeout(LOGGER_FLUSH_TIMEOUT, logger_handle).await.is_err() {
        warn!("Event logger did not finish in time");
    }

    match format {
        OutputFormat::Json => {
            debug!("cmd_cycle: format is Json");
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            debug!("cmd_cycle: format is Text");
            print_report(&report);
        }
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("Cycle {}", report.cycle);
    println!("--------");
    for task in &report.tasks {
        match &task.error {
            Some(error) => println!("  {:<16} {}: {}", task.task_id, task.state, error),
            None => println!("  {:<16} {}", task.task_id, task.state),
        }
    }
    let stats = &report.stats;
    println!(
        "completed={} failed={} cancelled={} skipped={}",
        stats.completed, stats.failed, stats.cancelled, stats.skipped
    );
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize configuration")?;
    print!("{}", yaml);
    Ok(())
}
