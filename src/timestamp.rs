//! Send timestamps embedded in echo request payloads.
//!
//! The first 8 bytes of the payload hold the wall-clock send time as two
//! big-endian 32-bit words: seconds and microseconds since the Unix epoch.
//! The rest of the payload is filled with an incrementing byte pattern
//! starting at `0x08`, so that a default 56-byte payload ends with `0x37`.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Size in bytes of the encoded timestamp.
pub const TIMESTAMP_SIZE: usize = 8;

/// Default echo payload size, timestamp included.
pub const DEFAULT_PAYLOAD_SIZE: usize = 56;

pub fn encode_timestamp(timestamp: SystemTime) -> [u8; TIMESTAMP_SIZE] {
    let since_epoch = timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
    let mut bytes = [0u8; TIMESTAMP_SIZE];
    bytes[..4].copy_from_slice(&(since_epoch.as_secs() as u32).to_be_bytes());
    bytes[4..].copy_from_slice(&since_epoch.subsec_micros().to_be_bytes());
    bytes
}

/// Recover the send time from an echo payload.
/// Returns `None` if the payload is too short to hold a timestamp.
pub fn decode_timestamp(payload: &[u8]) -> Option<SystemTime> {
    let bytes = payload.get(..TIMESTAMP_SIZE)?;
    let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let micros = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Some(UNIX_EPOCH + Duration::from_secs(seconds as u64) + Duration::from_micros(micros as u64))
}

/// Build an echo payload of `size` bytes carrying `timestamp`.
/// Payloads smaller than the timestamp only carry filler.
pub fn echo_payload(timestamp: SystemTime, size: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(size);
    if size >= TIMESTAMP_SIZE {
        payload.extend_from_slice(&encode_timestamp(timestamp));
    }
    let mut filler = 0x08u8;
    while payload.len() < size {
        payload.push(filler);
        filler = filler.wrapping_add(1);
    }
    payload
}

/// Milliseconds with microsecond resolution, as printed in result lines.
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}
