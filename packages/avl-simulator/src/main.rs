//! main.rs — AVL terminal simulator entry point
//!
//! Stands in for the RUT955 on the bench: every `interval_ms` it pushes one
//! codec 8 frame at the time-sync service and checks the ack, so the service
//! can be exercised (clock steps, watchdog trips, dropped garbage) without a
//! modem or a GPS antenna. Point the service's `terminal_address` at
//! `link.local` and run it with `--dry-run` unless you want the clock moved.

mod scenarios;
mod terminal;
mod udp_tx;

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tokio::time::interval;
use tracing::{info, warn};

use scenarios::{ScenarioConfig, ScenarioType};
use terminal::{Terminal, TerminalConfig};
use udp_tx::AvlTransmitter;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "avl-sim", about = "Bench emulator for the cellular GPS terminal")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "avl-sim.toml")]
    config: String,
    /// Time-sync service address (overrides link.target)
    #[arg(long)]
    target: Option<SocketAddr>,
    /// Scenario preset (overrides the [scenario] table)
    #[arg(long, value_enum)]
    scenario: Option<ScenarioType>,
    /// Number of frames to send (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    count: u64,
    /// Seconds between frames (overrides link.interval_ms)
    #[arg(long)]
    interval: Option<f64>,
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FullConfig {
    link: LinkConfig,
    terminal: TerminalConfig,
    scenario: ScenarioConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LinkConfig {
    target: SocketAddr,
    local: SocketAddr,
    interval_ms: u64,
    ack_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            target: SocketAddr::from(([127, 0, 0, 1], 17050)),
            local: SocketAddr::from(([127, 0, 0, 1], 17051)),
            interval_ms: 5_000,
            ack_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    sent: u64,
    ok: u64,
    failed: u64,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avl_simulator=info".into()),
        )
        .init();

    let args = Args::parse();

    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../avl-sim.toml").to_string());
    let mut cfg: FullConfig = toml::from_str(&config_str).context("invalid avl-sim config")?;

    if let Some(target) = args.target {
        cfg.link.target = target;
    }
    if let Some(kind) = args.scenario {
        cfg.scenario = scenarios::preset(kind);
    }
    let period = match args.interval {
        Some(secs) if secs > 0.0 => Duration::from_secs_f64(secs),
        _ => Duration::from_millis(cfg.link.interval_ms.max(1)),
    };

    let tx = AvlTransmitter::new(cfg.link.local, cfg.link.target, Duration::from_millis(cfg.link.ack_timeout_ms))
        .await
        .with_context(|| format!("binding {}", cfg.link.local))?;

    info!(
        "AVL simulator {} → {} | scenario {:?} | {} records/frame every {:?}",
        tx.local_addr()?,
        cfg.link.target,
        cfg.scenario.kind,
        cfg.terminal.records_per_frame,
        period
    );

    let mut terminal = Terminal::new(cfg.terminal, cfg.scenario);
    let mut ticker = interval(period);
    let mut tally = Tally::default();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        let out = terminal.next_datagram(now_ms());
        let result = tx.exchange(&out).await;
        tally.sent += 1;
        if result.is_ok() {
            tally.ok += 1;
            info!("frame {} → {:?}", tally.sent, result);
        } else {
            tally.failed += 1;
            warn!("frame {} → {:?}", tally.sent, result);
        }

        if args.count > 0 && tally.sent >= args.count {
            break;
        }
    }

    info!("Done: {} sent, {} as expected, {} unexpected", tally.sent, tally.ok, tally.failed);
    if tally.failed > 0 {
        anyhow::bail!("{} frames did not get the expected response", tally.failed);
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
