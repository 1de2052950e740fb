//! The `Sample` record and raw payload decoding.
//!
//! A `Sample` is one decoded loadcell reading: wall-clock capture time, the
//! peripheral's monotonic clock counter, the load in newtons and the battery
//! voltage. Samples are produced exactly once per successful decode and never
//! mutated; ownership moves from the acquisition loop through the buffer to
//! the segment writer.
//!
//! The decoding helpers convert the peripheral's little-endian integer
//! payloads into physical units:
//!
//! - load: signed millimeter-kilogram-force reading, scaled by 0.981 to
//!   newtons (`raw / 1000 * 0.981`);
//! - battery: signed ADC reading in millivolt counts, mapped over a 10-bit
//!   ADC with a 5 V reference (`raw / 1000 / 1024 * 5`);
//! - device clock: unsigned counter, passed through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, LogError};

/// Timestamp format used in segment rows and the merged artifact.
/// Microseconds are truncated to milliseconds.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A single decoded sensor reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Wall-clock time the reading was captured on the host.
    pub captured_at: DateTime<Utc>,
    /// Monotonic counter reported by the peripheral.
    pub device_clock: u64,
    /// Load in newtons.
    pub load: f64,
    /// Battery voltage in volts.
    pub battery: f64,
}

impl Sample {
    /// Decode one sample from the three raw characteristic payloads.
    pub fn from_raw(
        captured_at: DateTime<Utc>,
        weight_payload: &[u8],
        battery_payload: &[u8],
        clock_payload: &[u8],
    ) -> AppResult<Self> {
        let load = le_signed(weight_payload, "weight")? as f64 / 1000.0 * 0.981;
        let adc = le_signed(battery_payload, "battery")? as f64 / 1000.0;
        let battery = adc / 1024.0 * 5.0;
        let device_clock = le_unsigned(clock_payload, "clock")?;
        Ok(Self {
            captured_at,
            device_clock,
            load,
            battery,
        })
    }

    /// The capture time formatted the way rows are persisted.
    pub fn timestamp_field(&self) -> String {
        self.captured_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Row fields in the on-disk order: timestamp, load, battery, clock.
    pub fn csv_record(&self) -> [String; 4] {
        [
            self.timestamp_field(),
            self.load.to_string(),
            self.battery.to_string(),
            self.device_clock.to_string(),
        ]
    }
}

/// Little-endian signed integer of 1..=8 bytes, sign-extended to i64.
fn le_signed(payload: &[u8], what: &str) -> AppResult<i64> {
    let mut buf = [0u8; 8];
    let last = check_len(payload, what)?;
    buf[..payload.len()].copy_from_slice(payload);
    if payload[last] & 0x80 != 0 {
        for byte in &mut buf[payload.len()..] {
            *byte = 0xFF;
        }
    }
    Ok(i64::from_le_bytes(buf))
}

/// Little-endian unsigned integer of 1..=8 bytes.
fn le_unsigned(payload: &[u8], what: &str) -> AppResult<u64> {
    let mut buf = [0u8; 8];
    check_len(payload, what)?;
    buf[..payload.len()].copy_from_slice(payload);
    Ok(u64::from_le_bytes(buf))
}

fn check_len(payload: &[u8], what: &str) -> AppResult<usize> {
    if payload.is_empty() {
        return Err(LogError::Decode(format!("empty {what} payload")));
    }
    if payload.len() > 8 {
        return Err(LogError::Decode(format!(
            "{what} payload too long: {} bytes",
            payload.len()
        )));
    }
    Ok(payload.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_positive_load() {
        // 2000 mkgf -> 2 kgf -> 1.962 N
        let sample = Sample::from_raw(Utc::now(), &2000i32.to_le_bytes(), &[0], &[0]).unwrap();
        assert!((sample.load - 1.962).abs() < 1e-9);
    }

    #[test]
    fn decodes_negative_load_with_sign_extension() {
        // Two-byte negative payload must sign-extend, not zero-extend.
        let sample = Sample::from_raw(Utc::now(), &(-1500i16).to_le_bytes(), &[0], &[0]).unwrap();
        assert!((sample.load - (-1.5 * 0.981)).abs() < 1e-9);
    }

    #[test]
    fn decodes_battery_voltage() {
        // 512000 raw -> 512 counts -> half of the 5 V range
        let sample = Sample::from_raw(Utc::now(), &[0], &512_000i32.to_le_bytes(), &[0]).unwrap();
        assert!((sample.battery - 2.5).abs() < 1e-9);
    }

    #[test]
    fn decodes_device_clock_unsigned() {
        let sample = Sample::from_raw(Utc::now(), &[0], &[0], &0xFFFFu16.to_le_bytes()).unwrap();
        assert_eq!(sample.device_clock, 65535);
    }

    #[test]
    fn rejects_empty_payload() {
        let err = Sample::from_raw(Utc::now(), &[], &[0], &[0]).unwrap_err();
        assert!(matches!(err, LogError::Decode(_)));
    }

    #[test]
    fn rejects_oversized_payload() {
        let err = Sample::from_raw(Utc::now(), &[0u8; 9], &[0], &[0]).unwrap_err();
        assert!(matches!(err, LogError::Decode(_)));
    }

    #[test]
    fn timestamp_field_truncates_to_millis() {
        let at = DateTime::parse_from_rfc3339("2024-06-01T12:30:45.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let sample = Sample {
            captured_at: at,
            device_clock: 7,
            load: 1.0,
            battery: 3.3,
        };
        assert_eq!(sample.timestamp_field(), "2024-06-01 12:30:45.123");
    }
}
