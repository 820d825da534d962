//! # avl-types
//!
//! Teltonika AVL (codec 8) frame structures for the field-station GPS link.
//!
//! These types are used by:
//! - `gps-timesync`: decoding location batches pushed by the RUT955 terminal over UDP
//! - `avl-simulator`: producing the same frames on the bench, without a modem
//!
//! ## Wire format (all multi-byte fields big-endian)
//!
//! ```text
//! +------+-----------+------+--------+--------+----------+-------+-------+-----------+-------+
//! | size | packet id | type | AVL id | id len | id bytes | codec | count | records…  | count |
//! |  2   |     2     |  1   |   1    |   2    |  id len  |   1   |   1   | 30 × count|   1   |
//! +------+-----------+------+--------+--------+----------+-------+-------+-----------+-------+
//! ```
//!
//! The closing `count` byte is optional on input. Every record is a fixed
//! 30-byte block described by [`layout::RECORD`].
//!
//! ## Invariants
//! - A frame is accepted whole or not at all: any bad sub-record rejects the batch
//! - Decoding never panics on hostile input; every read is bounds-checked

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Protocol constants ────────────────────────────────────────────────────────

/// The only codec this link speaks.
pub const CODEC_8: u8 = 0x08;

/// Fixed header ahead of the device identifier:
/// size (2) + packet id (2) + packet type (1) + AVL id (1) + id length (2).
pub const HEADER_LEN: usize = 8;

/// Size of one location sub-record.
pub const RECORD_LEN: usize = 30;

/// Size of the acknowledgment datagram.
pub const ACK_LEN: usize = 7;

/// Packet type the terminal uses for AVL data that expects an ack.
pub const PACKET_TYPE_AVL: u8 = 0x01;

const ACK_BODY_LEN: u16 = 5;
const ACK_SIGNATURE: [u8; 2] = [0xCA, 0xFE];
const ACK_RESPONSE_CODE: u8 = 0x01;

/// Longitude/latitude are transmitted as degrees × 10^7.
const COORD_SCALE: f64 = 10_000_000.0;

// ── Record layout ─────────────────────────────────────────────────────────────

/// One named field inside a 30-byte location sub-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: usize,
    pub width: usize,
}

impl Field {
    const fn new(name: &'static str, offset: usize, width: usize) -> Self {
        Self { name, offset, width }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Static description of the codec 8 location sub-record.
pub mod layout {
    use super::Field;

    pub const TIMESTAMP: Field = Field::new("timestamp", 0, 8);
    pub const PRIORITY: Field = Field::new("priority", 8, 1);
    pub const LONGITUDE: Field = Field::new("longitude", 9, 4);
    pub const LATITUDE: Field = Field::new("latitude", 13, 4);
    pub const ALTITUDE: Field = Field::new("altitude", 17, 2);
    pub const ANGLE: Field = Field::new("angle", 19, 2);
    pub const SATELLITES: Field = Field::new("satellites", 21, 1);
    pub const SPEED: Field = Field::new("speed", 22, 2);
    /// Event IO id, total IO count, then the 1/2/4/8-byte IO counts.
    /// Always zero on this link (no IO elements are configured on the terminal).
    pub const IO_HEADER: Field = Field::new("io_header", 24, 6);

    /// All fields in wire order. Contiguous and exactly `RECORD_LEN` bytes.
    pub const RECORD: [Field; 9] = [
        TIMESTAMP, PRIORITY, LONGITUDE, LATITUDE, ALTITUDE, ANGLE, SATELLITES, SPEED, IO_HEADER,
    ];
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("device identifier is not valid UTF-8")]
    InvalidIdentifier,

    #[error("unsupported codec id 0x{0:02x}")]
    UnsupportedCodec(u8),

    #[error("declared {declared} records but {available} bytes follow the header")]
    RecordCountMismatch { declared: u8, available: usize },

    #[error("record {index}: field `{field}` out of bounds")]
    MalformedRecord { index: usize, field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{0} records do not fit a single frame (max 255)")]
    TooManyRecords(usize),

    #[error("device identifier is {0} bytes long")]
    IdentifierTooLong(usize),
}

// ── Location record ───────────────────────────────────────────────────────────

/// One GPS fix as reported by the terminal. Fields keep their wire
/// representation; the accessors convert to engineering units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Milliseconds since the Unix epoch (GPS time, UTC)
    pub timestamp_ms: u64,
    /// Device-assigned message priority
    pub priority: u8,
    /// Degrees × 10^7, signed
    pub longitude_e7: i32,
    /// Degrees × 10^7, signed
    pub latitude_e7: i32,
    /// Meters
    pub altitude: u16,
    /// Heading, degrees
    pub angle: u16,
    pub satellites: u8,
    pub speed: u16,
    pub io_header: [u8; 6],
}

impl LocationRecord {
    /// Seconds since epoch with millisecond precision.
    pub fn timestamp(&self) -> f64 {
        self.timestamp_ms as f64 / 1000.0
    }

    pub fn longitude(&self) -> f64 {
        self.longitude_e7 as f64 / COORD_SCALE
    }

    pub fn latitude(&self) -> f64 {
        self.latitude_e7 as f64 / COORD_SCALE
    }

    /// Decode one 30-byte sub-record. `index` only feeds error context.
    pub fn decode(chunk: &[u8], index: usize) -> Result<Self, DecodeError> {
        Ok(Self {
            timestamp_ms: u64::from_be_bytes(read(chunk, layout::TIMESTAMP, index)?),
            priority: u8::from_be_bytes(read(chunk, layout::PRIORITY, index)?),
            longitude_e7: i32::from_be_bytes(read(chunk, layout::LONGITUDE, index)?),
            latitude_e7: i32::from_be_bytes(read(chunk, layout::LATITUDE, index)?),
            altitude: u16::from_be_bytes(read(chunk, layout::ALTITUDE, index)?),
            angle: u16::from_be_bytes(read(chunk, layout::ANGLE, index)?),
            satellites: u8::from_be_bytes(read(chunk, layout::SATELLITES, index)?),
            speed: u16::from_be_bytes(read(chunk, layout::SPEED, index)?),
            io_header: read(chunk, layout::IO_HEADER, index)?,
        })
    }

    pub fn encode_into(&self, out: &mut impl BufMut) {
        out.put_u64(self.timestamp_ms);
        out.put_u8(self.priority);
        out.put_i32(self.longitude_e7);
        out.put_i32(self.latitude_e7);
        out.put_u16(self.altitude);
        out.put_u16(self.angle);
        out.put_u8(self.satellites);
        out.put_u16(self.speed);
        out.put_slice(&self.io_header);
    }
}

/// Convert degrees to the wire's fixed-point representation.
pub fn degrees_to_e7(degrees: f64) -> i32 {
    (degrees * COORD_SCALE).round() as i32
}

/// Bounds-checked read of one layout field into a fixed-size array.
/// Fails closed if the field runs past the chunk or its width is not `N`.
fn read<const N: usize>(chunk: &[u8], field: Field, index: usize) -> Result<[u8; N], DecodeError> {
    chunk
        .get(field.offset..field.end())
        .and_then(|bytes| <[u8; N]>::try_from(bytes).ok())
        .ok_or(DecodeError::MalformedRecord { index, field: field.name })
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One decoded UDP payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub packet_id: u16,
    pub packet_type: u8,
    /// Echoed back in the ack
    pub avl_id: u8,
    /// IMEI of the terminal
    pub device_id: String,
    pub codec_id: u8,
    pub records: Vec<LocationRecord>,
}

impl Frame {
    /// Number of records as carried on the wire. Decoded frames never exceed 255.
    pub fn record_count(&self) -> u8 {
        self.records.len().min(u8::MAX as usize) as u8
    }
}

/// Parse one datagram into a [`Frame`]. Pure function of its input.
pub fn decode(data: &[u8]) -> Result<Frame, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError::Truncated { needed: HEADER_LEN, available: data.len() });
    }

    let mut buf = data;
    // Size prefix is informational only; the datagram length is authoritative.
    let _declared_len = buf.get_u16();
    let packet_id = buf.get_u16();
    let packet_type = buf.get_u8();
    let avl_id = buf.get_u8();
    let id_len = buf.get_u16() as usize;

    // Identifier, codec id and record count must all be present.
    let needed = HEADER_LEN + id_len + 2;
    if data.len() < needed {
        return Err(DecodeError::Truncated { needed, available: data.len() });
    }

    let device_id = std::str::from_utf8(&buf[..id_len])
        .map_err(|_| DecodeError::InvalidIdentifier)?
        .to_string();
    buf.advance(id_len);

    let codec_id = buf.get_u8();
    if codec_id != CODEC_8 {
        return Err(DecodeError::UnsupportedCodec(codec_id));
    }

    let declared = buf.get_u8();
    let body_len = RECORD_LEN * declared as usize;
    let body = match buf.remaining() {
        n if n == body_len => buf,
        // Terminals close the packet with a second copy of the count.
        n if n == body_len + 1 && buf[body_len] == declared => &buf[..body_len],
        n => return Err(DecodeError::RecordCountMismatch { declared, available: n }),
    };

    let records = body
        .chunks_exact(RECORD_LEN)
        .enumerate()
        .map(|(index, chunk)| LocationRecord::decode(chunk, index))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Frame { packet_id, packet_type, avl_id, device_id, codec_id, records })
}

/// Serialize a frame in the form the terminal sends it, closing count included.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    let count = u8::try_from(frame.records.len())
        .map_err(|_| EncodeError::TooManyRecords(frame.records.len()))?;
    let id = frame.device_id.as_bytes();
    let id_len = u16::try_from(id.len()).map_err(|_| EncodeError::IdentifierTooLong(id.len()))?;

    let total = HEADER_LEN + id.len() + 2 + RECORD_LEN * count as usize + 1;
    let size = u16::try_from(total - 2).map_err(|_| EncodeError::IdentifierTooLong(id.len()))?;

    let mut out = Vec::with_capacity(total);
    out.put_u16(size);
    out.put_u16(frame.packet_id);
    out.put_u8(frame.packet_type);
    out.put_u8(frame.avl_id);
    out.put_u16(id_len);
    out.put_slice(id);
    out.put_u8(frame.codec_id);
    out.put_u8(count);
    for record in &frame.records {
        record.encode_into(&mut out);
    }
    out.put_u8(count);
    Ok(out)
}

// ── Acknowledgment ────────────────────────────────────────────────────────────

/// Build the 7-byte ack the terminal waits for before dropping a batch:
/// length (0x0005), signature (0xCAFE), response code, AVL id, record count.
pub fn build_ack(avl_id: u8, record_count: u8) -> [u8; ACK_LEN] {
    let len = ACK_BODY_LEN.to_be_bytes();
    [
        len[0],
        len[1],
        ACK_SIGNATURE[0],
        ACK_SIGNATURE[1],
        ACK_RESPONSE_CODE,
        avl_id,
        record_count,
    ]
}

/// Parse an ack datagram, returning the echoed `(avl_id, record_count)`.
pub fn parse_ack(data: &[u8]) -> Option<(u8, u8)> {
    let ack: [u8; ACK_LEN] = data.try_into().ok()?;
    let expected_head = build_ack(0, 0);
    if ack[..5] != expected_head[..5] {
        return None;
    }
    Some((ack[5], ack[6]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
