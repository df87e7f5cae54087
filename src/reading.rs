//! Decoded sensor reading.

/// One reading, produced per scan match and never stored.
///
/// Units:
/// - Temperature in Celsius
/// - Humidity in percent (0-100)
/// - Battery voltage in Volts
/// - Uptime in seconds since the beacon last booted
///
/// Beacon readings carry every field; the on-board gateway reading only has a
/// temperature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub voltage: Option<f64>,
    pub uptime: Option<u32>,
}

impl Reading {
    /// A temperature-only reading, as taken from the gateway itself.
    pub fn local(temperature: f64) -> Self {
        Self {
            temperature,
            humidity: None,
            voltage: None,
            uptime: None,
        }
    }
}
