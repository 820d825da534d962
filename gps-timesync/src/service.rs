//! # service
//!
//! The receive loop. Owns the UDP socket and all per-process state; every
//! other component is stateless between calls.
//!
//! ## Cycle
//!   1. Read the control file. Waiting → sleep and re-check.
//!   2. Receive one datagram (bounded by `recv_timeout`), ignoring anything
//!      that does not come from the terminal.
//!   3. Decode. Failure → log and drop, no ack (the terminal will resend).
//!   4. Select fix → ack → clock correction → watchdog → status files.
//!
//! Nothing after startup stops the loop except the shutdown channel.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use avl_types::{build_ack, decode, DecodeError};
use chrono::Utc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{ClockCorrector, ClockWriter, CorrectionOutcome};
use crate::config::ServiceConfig;
use crate::control::{ControlGate, ControlMode};
use crate::events::{LinkEvent, LinkEventSink, LinkEventType};
use crate::selector::{select_latest, Fix};
use crate::status::StatusPublisher;
use crate::watchdog::{LinkState, LinkWatchdog, Verdict};

/// Largest UDP payload. A full 255-record frame is about 7.7 KB, so the
/// buffer must never truncate what the decoder would accept.
const MAX_DATAGRAM: usize = 65_536;

/// Any routable address works; nothing is sent, the kernel only picks a route.
const ROUTE_PROBE: &str = "8.8.8.8:53";

// ── Startup ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("could not determine the primary outbound address: {0}")]
    NoPrimaryAddress(io::Error),

    #[error("could not bind UDP {addr}: {source}")]
    SocketBindFailed { addr: SocketAddr, source: io::Error },
}

/// Address of the interface carrying the default route.
pub fn primary_address() -> io::Result<IpAddr> {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0")?;
    probe.connect(ROUTE_PROBE)?;
    Ok(probe.local_addr()?.ip())
}

/// Bind the listening socket on the configured or inferred address.
pub async fn bind(config: &ServiceConfig) -> Result<UdpSocket, ServiceError> {
    let ip = match config.bind_address {
        Some(ip) => ip,
        None => {
            let ip = primary_address().map_err(ServiceError::NoPrimaryAddress)?;
            info!("This station's inferred IP: {ip}");
            ip
        }
    };
    let addr = SocketAddr::new(ip, config.listen_port);
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|source| ServiceError::SocketBindFailed { addr, source })?;
    info!("Socket opened on UDP {} (must match the terminal's AVL server port)", addr);
    Ok(socket)
}

/// Wall-clock seconds since epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Datagrams are accepted from the terminal's IP; the port only when strict.
pub fn sender_matches(expected: SocketAddr, src: SocketAddr, strict_port: bool) -> bool {
    src.ip() == expected.ip() && (!strict_port || src.port() == expected.port())
}

// ── Cycle report ──────────────────────────────────────────────────────────────

/// What one successfully decoded frame led to.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub device_id: String,
    pub record_count: u8,
    pub fix: Fix,
    pub correction: CorrectionOutcome,
    /// `None` when the frame had no records
    pub verdict: Option<Verdict>,
}

enum Received {
    Datagram(usize, SocketAddr),
    TimedOut,
    Failed(io::Error),
    Shutdown { closed: bool },
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct TimeSyncService {
    socket: UdpSocket,
    terminal: SocketAddr,
    strict_sender_port: bool,
    recv_timeout: Duration,
    waiting_poll: Duration,
    gate: ControlGate,
    corrector: ClockCorrector,
    watchdog: LinkWatchdog,
    publisher: StatusPublisher,
    events: LinkEventSink,
    link: LinkState,
    mode: Option<ControlMode>,
}

impl TimeSyncService {
    pub fn new(socket: UdpSocket, config: &ServiceConfig, clock: Arc<dyn ClockWriter>) -> Self {
        Self {
            socket,
            terminal: config.terminal_address,
            strict_sender_port: config.strict_sender_port,
            recv_timeout: config.recv_timeout(),
            waiting_poll: config.waiting_poll(),
            gate: ControlGate::new(config.control_file.clone()),
            corrector: ClockCorrector::new(clock, config.clock_tolerance_secs, config.sync_hardware_clock),
            watchdog: LinkWatchdog::new(config.stale_after_secs, config.stale_cycles_to_block),
            publisher: StatusPublisher::new(config.status_file.clone(), config.position_file.clone()),
            events: LinkEventSink::new(config.link_event_file.clone()),
            link: LinkState::default(),
            mode: None,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    #[cfg(test)]
    pub fn link_state(&self) -> &LinkState {
        &self.link
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    /// Consumes the service so the socket is released on return.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        info!(terminal = %self.terminal, local = ?self.local_addr().ok(), "GPS time-sync loop running");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let mode = self.gate.current_mode().await;
            if self.mode != Some(mode) {
                info!("Control mode: {mode:?}");
                self.mode = Some(mode);
            }

            if mode == ControlMode::Waiting {
                let stop = tokio::select! {
                    _ = tokio::time::sleep(self.waiting_poll) => false,
                    changed = shutdown.changed() => changed.is_err(),
                };
                if stop {
                    break;
                }
                continue;
            }

            let received = tokio::select! {
                res = tokio::time::timeout(self.recv_timeout, self.socket.recv_from(&mut buf)) => match res {
                    Ok(Ok((len, src))) => Received::Datagram(len, src),
                    Ok(Err(e)) => Received::Failed(e),
                    Err(_) => Received::TimedOut,
                },
                changed = shutdown.changed() => Received::Shutdown { closed: changed.is_err() },
            };

            match received {
                Received::Datagram(len, src) => {
                    if !sender_matches(self.terminal, src, self.strict_sender_port) {
                        debug!(%src, len, "Ignoring datagram from unexpected sender");
                        continue;
                    }
                    if let Some(report) = self.handle_datagram(&buf[..len], src, unix_now()).await {
                        debug!(
                            device = %report.device_id,
                            records = report.record_count,
                            fix_time = report.fix.timestamp,
                            correction = ?report.correction,
                            verdict = ?report.verdict,
                            "Cycle complete"
                        );
                    }
                }
                Received::TimedOut => {}
                Received::Failed(e) => warn!(stage = "recv", "UDP receive error: {e}"),
                // Sender dropped: same as an explicit shutdown
                Received::Shutdown { closed: true } => break,
                Received::Shutdown { closed: false } => {}
            }
        }

        info!("GPS time-sync loop stopped");
    }

    /// Process one datagram from the terminal. Returns `None` when it did
    /// not decode (no ack is sent in that case).
    pub async fn handle_datagram(&mut self, data: &[u8], src: SocketAddr, now: f64) -> Option<CycleReport> {
        let frame = match decode(data) {
            Ok(f) => f,
            Err(e) => {
                log_decode_failure(&e, data.len(), src);
                return None;
            }
        };

        let fix = select_latest(&frame.records);
        let record_count = frame.record_count();

        let ack = build_ack(frame.avl_id, record_count);
        if let Err(e) = self.socket.send_to(&ack, src).await {
            warn!(%src, stage = "ack", "Ack send failed: {e}");
        }

        if !fix.is_none() {
            info!("Last GPS fix: {:.6} {:.6} {}", fix.latitude, fix.longitude, fix.altitude);
        }

        let correction = self.corrector.maybe_correct(&fix, now).await;

        let verdict = if fix.is_none() {
            None
        } else {
            Some(self.watchdog.observe(&mut self.link, &fix, now))
        };
        if let Some(Verdict::Blocked { delta, consecutive }) = verdict {
            let event = LinkEvent {
                event: LinkEventType::LinkBlocked,
                timestamp_ms: Utc::now().timestamp_millis(),
                fix_timestamp: fix.timestamp,
                delta_secs: delta,
                stale_cycles: consecutive,
            };
            self.events.publish(&event).await;
        }

        self.publisher.publish(&fix, now - fix.timestamp, correction).await;

        Some(CycleReport { device_id: frame.device_id, record_count, fix, correction, verdict })
    }
}

fn log_decode_failure(e: &DecodeError, len: usize, src: SocketAddr) {
    debug!(%src, len, stage = "decode", "Dropping undecodable datagram: {e}");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
