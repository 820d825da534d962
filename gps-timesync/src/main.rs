mod clock;
mod config;
mod control;
mod events;
mod selector;
mod service;
mod status;
mod watchdog;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use clock::{ClockWriter, DryRunClock, SystemClock};
use config::{Args, ServiceConfig};
use service::TimeSyncService;

/// Distinct from the generic failure code so supervisors can tell a port
/// conflict or missing interface apart from a bad config.
const EXIT_BIND_FAILED: u8 = 3;

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("*** Starting GPS time-sync");

    let config = match ServiceConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!("*** Terminating execution - {e}");
            return ExitCode::FAILURE;
        }
    };

    let socket = match service::bind(&config).await {
        Ok(s) => s,
        Err(e) => {
            error!("*** Terminating execution - socket not opened: {e}");
            return ExitCode::from(EXIT_BIND_FAILED);
        }
    };

    let clock: Arc<dyn ClockWriter> = if args.dry_run {
        info!("Dry run: clock corrections will only be logged");
        Arc::new(DryRunClock)
    } else {
        Arc::new(SystemClock)
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = TimeSyncService::new(socket, &config, clock);
    let loop_task = tokio::spawn(service.run(shutdown_rx));

    match wait_for_shutdown().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!("Signal handling unavailable, running until killed: {e:#}");
            std::future::pending::<()>().await;
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = loop_task.await {
        error!("Service loop ended abnormally: {e}");
        return ExitCode::FAILURE;
    }

    info!("*** Terminating execution");
    ExitCode::SUCCESS
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("waiting for SIGINT")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "gps_timesync=debug" } else { "gps_timesync=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
