//! # config
//!
//! Service configuration: CLI flags (clap) plus an optional TOML file.
//! Every key in the file is optional; anything left out keeps the field
//! defaults below, which match the station's historical deployment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gps-timesync", about = "Align the station clock with GPS time from the cellular terminal")]
pub struct Args {
    /// Config file path (missing file = built-in defaults)
    #[arg(short, long, default_value = "/etc/gps-timesync.toml")]
    pub config: PathBuf,
    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
    /// Log clock corrections instead of running `date`/`hwclock`
    #[arg(long)]
    pub dry_run: bool,
}

// ── File config ───────────────────────────────────────────────────────────────

/// The AVL port configured on the terminal side as well.
pub const DEFAULT_PORT: u16 = 17050;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// UDP port to listen on (must match the terminal's AVL server port)
    pub listen_port: u16,
    /// Local address to bind. When unset, the primary outbound-route address is used.
    pub bind_address: Option<IpAddr>,
    /// The only address datagrams are accepted from; acks go back to the sender
    pub terminal_address: SocketAddr,
    /// Also require the sender's port to match `terminal_address`
    pub strict_sender_port: bool,
    /// Upper bound on one blocking receive before the control file is re-read
    pub recv_timeout_ms: u64,
    /// Sleep between control-file polls while in waiting mode
    pub waiting_poll_ms: u64,
    /// Drift (seconds) above which the system clock is stepped
    pub clock_tolerance_secs: f64,
    /// Run `hwclock -w` after stepping the wall clock
    pub sync_hardware_clock: bool,
    /// Fix age (seconds) above which a cycle counts as stale
    pub stale_after_secs: f64,
    /// Consecutive stale cycles that declare the link blocked
    pub stale_cycles_to_block: u32,
    /// Single-line mode directive ("active" or anything else)
    pub control_file: PathBuf,
    /// Human-readable status, overwritten every cycle
    pub status_file: PathBuf,
    /// "lat, lon, altitude" line, overwritten every cycle
    pub position_file: PathBuf,
    /// JSON-lines sink for link-blocked events (remediation hooks tail this)
    pub link_event_file: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_PORT,
            bind_address: None,
            terminal_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), DEFAULT_PORT),
            strict_sender_port: false,
            recv_timeout_ms: 5_000,
            waiting_poll_ms: 5_000,
            clock_tolerance_secs: 10.0,
            sync_hardware_clock: true,
            stale_after_secs: 60.0,
            stale_cycles_to_block: 1,
            control_file: PathBuf::from("/mnt/ramdisk/gps.csv"),
            status_file: PathBuf::from("/mnt/ramdisk/gps_state.txt"),
            position_file: PathBuf::from("/mnt/ramdisk/Position.csv"),
            link_event_file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("cannot parse {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

impl ServiceConfig {
    /// Load from `path`. A missing file yields the defaults; a present but
    /// unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config = Self::from_toml(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;

        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stale_cycles_to_block == 0 {
            return Err(ConfigError::Invalid("stale_cycles_to_block must be at least 1".into()));
        }
        if !(self.clock_tolerance_secs >= 0.0) {
            return Err(ConfigError::Invalid("clock_tolerance_secs must be non-negative".into()));
        }
        if !(self.stale_after_secs >= 0.0) {
            return Err(ConfigError::Invalid("stale_after_secs must be non-negative".into()));
        }
        if self.recv_timeout_ms == 0 {
            return Err(ConfigError::Invalid("recv_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn waiting_poll(&self) -> Duration {
        Duration::from_millis(self.waiting_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = ServiceConfig::from_toml("").unwrap();
        assert_eq!(config.listen_port, 17050);
        assert_eq!(config.terminal_address, "192.168.1.1:17050".parse().unwrap());
        assert_eq!(config.clock_tolerance_secs, 10.0);
        assert_eq!(config.stale_after_secs, 60.0);
        assert_eq!(config.stale_cycles_to_block, 1);
        assert_eq!(config.control_file, PathBuf::from("/mnt/ramdisk/gps.csv"));
        assert!(config.link_event_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            bind_address = "10.0.0.7"
            terminal_address = "10.0.0.1:17050"
            sync_hardware_clock = false
            link_event_file = "/mnt/ramdisk/gps_events.jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_address, Some("10.0.0.7".parse().unwrap()));
        assert_eq!(config.terminal_address.ip(), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert!(!config.sync_hardware_clock);
        assert_eq!(config.link_event_file, Some(PathBuf::from("/mnt/ramdisk/gps_events.jsonl")));
        assert_eq!(config.recv_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn shipped_sample_matches_defaults() {
        let sample = ServiceConfig::from_toml(include_str!("../gps-timesync.toml")).unwrap();
        let defaults = ServiceConfig::default();
        assert_eq!(sample.listen_port, defaults.listen_port);
        assert_eq!(sample.terminal_address, defaults.terminal_address);
        assert_eq!(sample.recv_timeout_ms, defaults.recv_timeout_ms);
        assert_eq!(sample.stale_after_secs, defaults.stale_after_secs);
        assert_eq!(sample.status_file, defaults.status_file);
        assert_eq!(sample.position_file, defaults.position_file);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ServiceConfig::from_toml("listen_prot = 1").is_err());
    }

    #[test]
    fn zero_stale_cycles_is_invalid() {
        let config = ServiceConfig { stale_cycles_to_block: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.listen_port, DEFAULT_PORT);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "listen_port = \"seventeen\"").unwrap();
        assert!(matches!(ServiceConfig::load(&path), Err(ConfigError::Parse { .. })));
    }
}
