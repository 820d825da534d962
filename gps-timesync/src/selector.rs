use avl_types::LocationRecord;

/// The fix the rest of the cycle acts on, in engineering units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    /// Seconds since epoch (millisecond precision)
    pub timestamp: f64,
    pub priority: i32,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: i32,
    pub angle: i32,
    pub satellites: i32,
    pub speed: i32,
}

impl Fix {
    /// Published when a frame carries no records. Downstream readers of the
    /// status files key on these values, so they must not change.
    pub const NONE: Fix = Fix {
        timestamp: -9999.9,
        priority: -9999,
        longitude: -9999.9,
        latitude: -9999.9,
        altitude: -9999,
        angle: -9999,
        satellites: -9999,
        speed: -9999,
    };

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl From<&LocationRecord> for Fix {
    fn from(r: &LocationRecord) -> Self {
        Self {
            timestamp: r.timestamp(),
            priority: r.priority.into(),
            longitude: r.longitude(),
            latitude: r.latitude(),
            altitude: r.altitude.into(),
            angle: r.angle.into(),
            satellites: r.satellites.into(),
            speed: r.speed.into(),
        }
    }
}

/// Pick the most recent record. Ties keep the earliest one in batch order;
/// an empty batch yields [`Fix::NONE`].
pub fn select_latest(records: &[LocationRecord]) -> Fix {
    let mut latest: Option<&LocationRecord> = None;
    for record in records {
        match latest {
            Some(best) if record.timestamp_ms <= best.timestamp_ms => {}
            _ => latest = Some(record),
        }
    }
    latest.map(Fix::from).unwrap_or(Fix::NONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(timestamp_ms: u64, priority: u8) -> LocationRecord {
        LocationRecord { timestamp_ms, priority, ..Default::default() }
    }

    #[test]
    fn picks_greatest_timestamp_regardless_of_position() {
        let records = [at(2_000, 0), at(5_000, 1), at(3_000, 2)];
        let fix = select_latest(&records);
        assert_eq!(fix.timestamp, 5.0);
        assert_eq!(fix.priority, 1);
    }

    #[test]
    fn ties_keep_first_record() {
        let records = [at(1_000, 0), at(9_000, 1), at(9_000, 2), at(9_000, 3)];
        assert_eq!(select_latest(&records).priority, 1);
    }

    #[test]
    fn single_record_is_selected_even_at_epoch_zero() {
        let fix = select_latest(&[at(0, 4)]);
        assert_eq!(fix.timestamp, 0.0);
        assert_eq!(fix.priority, 4);
        assert!(!fix.is_none());
    }

    #[test]
    fn empty_batch_yields_sentinel() {
        let fix = select_latest(&[]);
        assert!(fix.is_none());
        assert_eq!(fix.timestamp, -9999.9);
        assert_eq!(fix.altitude, -9999);
    }

    #[test]
    fn converts_units() {
        let record = LocationRecord {
            timestamp_ms: 1_700_000_000_250,
            longitude_e7: -1_234_567_890,
            latitude_e7: 455_000_000,
            altitude: 120,
            angle: 270,
            satellites: 11,
            speed: 42,
            ..Default::default()
        };
        let fix = Fix::from(&record);
        assert_eq!(fix.timestamp, 1_700_000_000.25);
        assert!((fix.longitude + 123.456789).abs() < 1e-9);
        assert!((fix.latitude - 45.5).abs() < 1e-9);
        assert_eq!((fix.altitude, fix.angle, fix.satellites, fix.speed), (120, 270, 11, 42));
    }
}
