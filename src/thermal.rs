//! On-board temperature of the gateway itself.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Linux exposes the SoC temperature here, in millidegrees Celsius.
pub const DEFAULT_THERMAL_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

#[derive(Error, Debug)]
pub enum ThermalError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("unexpected thermal value '{0}'")]
    Parse(String),
}

/// Source of the gateway's own temperature.
pub trait Thermometer: Send + Sync {
    fn read_celsius(&self) -> Result<f64, ThermalError>;
}

/// A sysfs thermal zone file.
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ThermalZone {
    fn default() -> Self {
        Self::new(DEFAULT_THERMAL_PATH)
    }
}

impl Thermometer for ThermalZone {
    fn read_celsius(&self) -> Result<f64, ThermalError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ThermalError::Read {
            path: self.path.display().to_string(),
            source,
        })?;
        parse_millidegrees(&raw)
    }
}

/// Parse a newline-terminated integer millidegree value.
pub fn parse_millidegrees(raw: &str) -> Result<f64, ThermalError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<i64>()
        .map(|milli| milli as f64 / 1000.0)
        .map_err(|_| ThermalError::Parse(trimmed.to_string()))
}
