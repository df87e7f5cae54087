//! Sensor addressing.
//!
//! Beacons are identified by their 6-byte Bluetooth address. The gateway's own
//! on-board thermometer has no radio address and is configured with a sentinel
//! instead.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Config token that stands for the gateway's own on-board sensor.
pub const LOCAL_SENTINEL: &str = "rpi";

/// A Bluetooth device address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Errors returned when parsing an address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseAddressError {
    #[error("invalid address '{0}': expected 6 colon-separated octets")]
    WrongOctetCount(String),
    #[error("invalid address: octet '{0}' is not two hex digits")]
    BadOctet(String),
}

impl FromStr for MacAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut octets = s.trim().split(':');

        for slot in bytes.iter_mut() {
            let octet = octets
                .next()
                .ok_or_else(|| ParseAddressError::WrongOctetCount(s.to_string()))?;
            if octet.len() != 2 || !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseAddressError::BadOctet(octet.to_string()));
            }
            *slot = u8::from_str_radix(octet, 16)
                .map_err(|_| ParseAddressError::BadOctet(octet.to_string()))?;
        }

        if octets.next().is_some() {
            return Err(ParseAddressError::WrongOctetCount(s.to_string()));
        }

        Ok(MacAddress(bytes))
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// Where a configured sensor's readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorAddress {
    /// A broadcasting beacon.
    Beacon(MacAddress),
    /// The gateway's on-board thermometer.
    Local,
}

impl SensorAddress {
    /// Whether a frame observed from `addr` belongs to this sensor.
    ///
    /// Matching is exact on all six octets. `Local` never matches a frame.
    pub fn matches(&self, addr: &MacAddress) -> bool {
        matches!(self, SensorAddress::Beacon(own) if own == addr)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, SensorAddress::Local)
    }
}

impl fmt::Display for SensorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorAddress::Beacon(mac) => mac.fmt(f),
            SensorAddress::Local => f.write_str(LOCAL_SENTINEL),
        }
    }
}

impl FromStr for SensorAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case(LOCAL_SENTINEL) {
            Ok(SensorAddress::Local)
        } else {
            s.parse().map(SensorAddress::Beacon)
        }
    }
}
