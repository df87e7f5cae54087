//! BLE discovery scanning.
//!
//! A [`Scanner`] listens for a fixed window and returns every advertisement it
//! saw, one [`DiscoveryFrame`] per address. Two backends can be compiled in:
//! BlueZ over D-Bus and raw HCI sockets.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::address::MacAddress;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// One beacon observed during a scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFrame {
    pub address: MacAddress,
    /// The manufacturer-specific AD payload, company id included.
    pub manufacturer_data: Option<Vec<u8>>,
}

impl DiscoveryFrame {
    pub fn new(address: MacAddress, manufacturer_data: Option<Vec<u8>>) -> Self {
        Self {
            address,
            manufacturer_data,
        }
    }
}

/// Collects frames during a window, keeping the latest data per address.
#[derive(Debug, Default)]
pub struct FrameCollector {
    frames: BTreeMap<MacAddress, Option<Vec<u8>>>,
}

impl FrameCollector {
    /// Record an observation. Data from a later advertisement replaces earlier
    /// data, but an advertisement without manufacturer data never erases it.
    pub fn observe(&mut self, address: MacAddress, manufacturer_data: Option<Vec<u8>>) {
        let slot = self.frames.entry(address).or_default();
        if manufacturer_data.is_some() {
            *slot = manufacturer_data;
        }
    }

    pub fn into_frames(self) -> Vec<DiscoveryFrame> {
        self.frames
            .into_iter()
            .map(|(address, data)| DiscoveryFrame::new(address, data))
            .collect()
    }
}

/// Rebuild the full vendor-tagged block from a company id and the bytes that
/// follow it on air.
pub fn vendor_block(company_id: u16, data: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(2 + data.len());
    block.extend_from_slice(&company_id.to_le_bytes());
    block.extend_from_slice(data);
    block
}

/// Future returned by [`Scanner::scan`].
pub type ScanFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<DiscoveryFrame>, ScanError>> + Send + 'a>>;

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    /// Listen for `window` and return what was seen.
    fn scan(&self, window: Duration) -> ScanFuture<'_>;
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

/// Open the scanner for `backend`.
pub async fn open(backend: Backend) -> Result<Box<dyn Scanner>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Ok(Box::new(bluer::BluerScanner::new().await?)),
        #[cfg(feature = "hci")]
        Backend::Hci => Ok(Box::new(hci::HciScanner::new(0))),
    }
}
