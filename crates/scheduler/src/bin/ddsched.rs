//! ddsched: runs the deadline scheduler against a simulated executor.
//!
//! Starts the coordinator, one producer per configured generator, and the
//! snapshot monitor.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (three periodic generators)
//! ddsched
//!
//! # Custom workload, stop after 20000 ticks
//! ddsched --config ddsched.toml --run-ticks 20000
//!
//! # Via environment variables
//! DDSCHED_CONFIG=ddsched.toml RUST_LOG=debug ddsched
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ddsched_core::{load_dotenv, Executor, SchedulerConfig, SimExecutor};
use ddsched_scheduler::{Generator, Monitor, Scheduler, TaskIds};

/// Deadline-driven scheduler demo.
#[derive(Parser, Debug)]
#[command(name = "ddsched", version, about)]
struct Cli {
    /// Path to the TOML config file. Defaults apply when it does not exist.
    #[arg(long, env = "DDSCHED_CONFIG", default_value = "ddsched.toml")]
    config: PathBuf,

    /// Stop after this many ticks (0 = run until interrupted).
    #[arg(long, env = "DDSCHED_RUN_TICKS", default_value_t = 0)]
    run_ticks: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting ddsched");

    let config = load_config(&cli.config)?;
    config.log_summary();

    let executor: Arc<dyn Executor> =
        Arc::new(SimExecutor::runtime(config.scheduler.tick_period()));
    let mut scheduler = Scheduler::start(&config, executor.clone());

    let ids = TaskIds::default();
    let mut generators = Vec::with_capacity(config.generators.len());
    for generator in &config.generators {
        let handle = scheduler.handle().with_requester(&generator.name);
        let producer = Generator::new(
            generator.clone(),
            config.priorities.generator,
            handle,
            ids.clone(),
            scheduler.subscribe_shutdown(),
        );
        generators.push(producer.spawn());
    }

    let monitor = scheduler.take_reader().map(|reader| {
        let monitor = Monitor::new(
            config.monitor.clone(),
            config.priorities.monitor,
            reader,
            executor.clone(),
            scheduler.subscribe_shutdown(),
        );
        tokio::spawn(monitor.run())
    });

    if cli.run_ticks > 0 {
        tokio::select! {
            _ = shutdown_signal() => tracing::info!("shutdown signal received"),
            _ = tokio::time::sleep(config.ticks(cli.run_ticks)) => {
                tracing::info!(ticks = cli.run_ticks, "run length reached");
            }
        }
    } else {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
    }

    scheduler.shutdown();
    for generator in generators {
        if let Err(e) = generator.await {
            tracing::warn!(error = %e, "generator task failed");
        }
    }
    if let Some(monitor) = monitor {
        match monitor.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "monitor stopped with an error"),
            Err(e) => tracing::warn!(error = %e, "monitor task failed"),
            Ok(Ok(())) => {}
        }
    }
    scheduler.join().await?;

    tracing::info!(now = executor.now(), "ddsched exited cleanly");
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<SchedulerConfig> {
    if path.exists() {
        let config = SchedulerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        return Ok(config);
    }
    tracing::info!(path = %path.display(), "config file not found, using defaults");
    Ok(SchedulerConfig::from_toml("")?)
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
