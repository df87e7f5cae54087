//! Beacon advertisement decoder.
//!
//! The thermometer beacons broadcast a fixed 20-byte manufacturer-specific
//! block. Multi-byte fields are little-endian; that is the vendor's format and
//! is not configurable.
//!
//! ```text
//! offset  size  field
//!  0       4    company id + vendor header (ignored)
//!  4       6    event counters (ignored)
//! 10       2    battery voltage, millivolts
//! 12       2    temperature, 1/16 degC, wrapped for negatives
//! 14       2    relative humidity, 1/16 percent
//! 16       4    uptime, seconds
//! ```

use crate::address::MacAddress;
use crate::reading::Reading;
use thiserror::Error;

/// Exact length of a beacon's vendor-tagged block.
pub const PAYLOAD_LEN: usize = 20;

/// Decoded temperatures above this are negative values that wrapped around.
const TEMPERATURE_WRAP_THRESHOLD: f64 = 4000.0;
const TEMPERATURE_WRAP: f64 = 4096.0;

const VOLTAGE_OFFSET: usize = 10;
const TEMPERATURE_OFFSET: usize = 12;
const HUMIDITY_OFFSET: usize = 14;
const UPTIME_OFFSET: usize = 16;

/// Error types for decoding beacon advertisements.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The vendor-tagged block is not exactly [`PAYLOAD_LEN`] bytes.
    #[error("Invalid payload length: expected {PAYLOAD_LEN} bytes, got {0}")]
    InvalidLength(usize),
    /// The discovery frame carried no vendor-tagged block at all.
    #[error("No manufacturer data from {0}")]
    MissingVendorData(MacAddress),
}

fn u16_at(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Convert a raw temperature field to degrees Celsius.
///
/// Negative temperatures are sent as `(t + 4096) * 16`, so anything that
/// decodes above 4000 degC is shifted back down.
pub fn temperature_celsius(raw: u16) -> f64 {
    let celsius = f64::from(raw) / 16.0;
    if celsius > TEMPERATURE_WRAP_THRESHOLD {
        celsius - TEMPERATURE_WRAP
    } else {
        celsius
    }
}

/// Decode a vendor-tagged block into a [`Reading`].
///
/// Any block that is not exactly 20 bytes long is rejected; no partial
/// readings are produced.
///
/// # Example
/// ```
/// use ble_mqtt_gateway::decoder::decode_advertisement;
///
/// let mut block = [0u8; 20];
/// block[12..14].copy_from_slice(&640u16.to_le_bytes());
/// let reading = decode_advertisement(&block).unwrap();
/// assert_eq!(reading.temperature, 40.0);
/// ```
pub fn decode_advertisement(data: &[u8]) -> Result<Reading, DecodeError> {
    if data.len() != PAYLOAD_LEN {
        return Err(DecodeError::InvalidLength(data.len()));
    }

    Ok(Reading {
        temperature: temperature_celsius(u16_at(data, TEMPERATURE_OFFSET)),
        humidity: Some(f64::from(u16_at(data, HUMIDITY_OFFSET)) / 16.0),
        voltage: Some(f64::from(u16_at(data, VOLTAGE_OFFSET)) / 1000.0),
        uptime: Some(u32_at(data, UPTIME_OFFSET)),
    })
}

/// Render an uptime in seconds as a days/hours/minutes/seconds breakdown.
pub fn format_uptime(seconds: u32) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    let secs = seconds % 60;
    format!("{days} Days {hours} Hours {minutes} Minutes {secs} Seconds")
}
