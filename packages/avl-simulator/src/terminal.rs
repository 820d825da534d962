//! terminal.rs — Frame factory emulating the RUT955 AVL uplink
//!
//! Produces one datagram per tick: a batch of `records_per_frame` fixes,
//! oldest first, one second apart, ending at the current GPS time. Position
//! wanders around the configured site by up to `jitter_deg`.

use avl_types::{
    degrees_to_e7, encode, Frame, LocationRecord, CODEC_8, HEADER_LEN, PACKET_TYPE_AVL,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::scenarios::{ScenarioConfig, ScenarioType};

/// Codec 8 Extended; valid on other Teltonika links, never on this one.
const FOREIGN_CODEC: u8 = 0x8E;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub imei: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: u16,
    pub records_per_frame: u8,
    pub jitter_deg: f64,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            imei: "356307042441013".to_string(),
            latitude: 45.5,
            longitude: 10.2,
            altitude: 120,
            records_per_frame: 3,
            jitter_deg: 0.00005,
            seed: None,
        }
    }
}

/// One datagram plus the ack the service should answer with.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub bytes: Vec<u8>,
    /// `(avl_id, record_count)`; `None` when no ack is expected
    pub expected_ack: Option<(u8, u8)>,
}

pub struct Terminal {
    cfg: TerminalConfig,
    scenario: ScenarioConfig,
    rng: StdRng,
    packet_id: u16,
    avl_id: u8,
    frame_index: u32,
    frozen_gps_ms: Option<u64>,
}

impl Terminal {
    pub fn new(cfg: TerminalConfig, scenario: ScenarioConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { cfg, scenario, rng, packet_id: 0, avl_id: 0, frame_index: 0, frozen_gps_ms: None }
    }

    /// Build the next datagram at simulator time `now_ms`.
    pub fn next_datagram(&mut self, now_ms: u64) -> Outgoing {
        let gps_ms = self.gps_time_ms(now_ms);
        self.frame_index += 1;
        self.packet_id = self.packet_id.wrapping_add(1);
        self.avl_id = self.avl_id.wrapping_add(1);

        if self.scenario.kind == ScenarioType::Garbage {
            return Outgoing { bytes: self.garbage(), expected_ack: None };
        }

        let records = if self.scenario.kind == ScenarioType::EmptyBatch {
            Vec::new()
        } else {
            let n = self.cfg.records_per_frame.max(1) as u64;
            (0..n)
                .map(|i| self.record(gps_ms.saturating_sub((n - 1 - i) * 1000)))
                .collect()
        };

        let frame = Frame {
            packet_id: self.packet_id,
            packet_type: PACKET_TYPE_AVL,
            avl_id: self.avl_id,
            device_id: self.cfg.imei.clone(),
            codec_id: if self.scenario.kind == ScenarioType::ForeignCodec { FOREIGN_CODEC } else { CODEC_8 },
            records,
        };
        let expected_ack = self
            .scenario
            .expects_ack()
            .then(|| (frame.avl_id, frame.record_count()));

        // Fits by construction: record count is a u8 and the IMEI is short
        let bytes = encode(&frame).unwrap_or_default();
        Outgoing { bytes, expected_ack }
    }

    fn gps_time_ms(&mut self, now_ms: u64) -> u64 {
        let live = now_ms.saturating_add_signed(self.scenario.skew_ms());
        if self.scenario.is_frozen(self.frame_index) {
            *self.frozen_gps_ms.get_or_insert(live)
        } else {
            live
        }
    }

    fn record(&mut self, timestamp_ms: u64) -> LocationRecord {
        let j = self.cfg.jitter_deg;
        let (dlat, dlon) = if j > 0.0 {
            (self.rng.gen_range(-j..=j), self.rng.gen_range(-j..=j))
        } else {
            (0.0, 0.0)
        };
        LocationRecord {
            timestamp_ms,
            priority: 0,
            longitude_e7: degrees_to_e7(self.cfg.longitude + dlon),
            latitude_e7: degrees_to_e7(self.cfg.latitude + dlat),
            altitude: self.cfg.altitude,
            angle: self.rng.gen_range(0..360),
            satellites: self.rng.gen_range(6..=12),
            speed: 0,
            io_header: [0; 6],
        }
    }

    /// Random payload whose identifier length overruns it, so it can never decode.
    fn garbage(&mut self) -> Vec<u8> {
        let len = self.rng.gen_range(HEADER_LEN..64);
        let mut bytes: Vec<u8> = (0..len).map(|_| self.rng.gen()).collect();
        bytes[6] = 0xFF;
        bytes[7] = 0xFF;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use avl_types::{decode, DecodeError};

    use super::*;
    use crate::scenarios::preset;

    const NOW_MS: u64 = 1_700_000_000_000;

    fn terminal(kind: ScenarioType) -> Terminal {
        let cfg = TerminalConfig { seed: Some(7), ..Default::default() };
        Terminal::new(cfg, preset(kind))
    }

    #[test]
    fn nominal_batch_ends_at_current_time() {
        let mut t = terminal(ScenarioType::Nominal);
        let out = t.next_datagram(NOW_MS);
        let frame = decode(&out.bytes).unwrap();

        assert_eq!(frame.records.len(), 3);
        let stamps: Vec<u64> = frame.records.iter().map(|r| r.timestamp_ms).collect();
        assert_eq!(stamps, vec![NOW_MS - 2_000, NOW_MS - 1_000, NOW_MS]);
        assert_eq!(out.expected_ack, Some((frame.avl_id, 3)));
        for r in &frame.records {
            assert!((r.latitude() - 45.5).abs() <= 0.0001);
            assert!((r.longitude() - 10.2).abs() <= 0.0001);
        }
    }

    #[test]
    fn avl_id_advances_per_frame() {
        let mut t = terminal(ScenarioType::Nominal);
        let a = t.next_datagram(NOW_MS).expected_ack.unwrap().0;
        let b = t.next_datagram(NOW_MS).expected_ack.unwrap().0;
        assert_eq!(b, a.wrapping_add(1));
    }

    #[test]
    fn clock_skew_shifts_gps_time() {
        let mut t = terminal(ScenarioType::ClockSkew);
        let frame = decode(&t.next_datagram(NOW_MS).bytes).unwrap();
        assert_eq!(frame.records.last().unwrap().timestamp_ms, NOW_MS + 120_000);
    }

    #[test]
    fn stale_scenario_freezes_fix_time() {
        let mut t = terminal(ScenarioType::Stale);
        let latest: Vec<u64> = (0..6)
            .map(|i| {
                let out = t.next_datagram(NOW_MS + i * 10_000);
                decode(&out.bytes).unwrap().records.last().unwrap().timestamp_ms
            })
            .collect();
        assert_eq!(&latest[..3], &[NOW_MS, NOW_MS + 10_000, NOW_MS + 20_000]);
        assert_eq!(&latest[3..], &[NOW_MS + 30_000; 3]);
    }

    #[test]
    fn empty_batch_expects_zero_count_ack() {
        let mut t = terminal(ScenarioType::EmptyBatch);
        let out = t.next_datagram(NOW_MS);
        assert!(decode(&out.bytes).unwrap().records.is_empty());
        assert_eq!(out.expected_ack.map(|(_, n)| n), Some(0));
    }

    #[test]
    fn garbage_never_decodes() {
        let mut t = terminal(ScenarioType::Garbage);
        for _ in 0..50 {
            let out = t.next_datagram(NOW_MS);
            assert!(matches!(decode(&out.bytes), Err(DecodeError::Truncated { .. })));
            assert!(out.expected_ack.is_none());
        }
    }

    #[test]
    fn foreign_codec_is_rejected_by_decoder() {
        let mut t = terminal(ScenarioType::ForeignCodec);
        let out = t.next_datagram(NOW_MS);
        assert_eq!(decode(&out.bytes), Err(DecodeError::UnsupportedCodec(FOREIGN_CODEC)));
        assert!(out.expected_ack.is_none());
    }
}
