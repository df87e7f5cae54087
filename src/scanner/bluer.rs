//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ strips the company id from manufacturer data, so it is put back in
//! front of the bytes before they reach the decoder. Devices only count when
//! they advertise during the window; BlueZ's cached copies are skipped.

use super::{DiscoveryFrame, FrameCollector, ScanError, ScanFuture, Scanner, vendor_block};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::{debug, info};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Scanner bound to the default BlueZ adapter.
pub struct BluerScanner {
    // keeps the D-Bus connection alive for the adapter handle
    _session: Session,
    adapter: Adapter,
}

impl BluerScanner {
    /// Power on the default adapter and restrict discovery to LE.
    pub async fn new() -> Result<Self, ScanError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            })
            .await?;

        info!(adapter = adapter.name(), "Using BlueZ adapter");

        Ok(Self {
            _session: session,
            adapter,
        })
    }

    async fn scan_window(&self, window: Duration) -> Result<Vec<DiscoveryFrame>, ScanError> {
        let mut live = LiveFilter::new(self.adapter.device_addresses().await?);
        let mut seen = BTreeSet::new();

        {
            // discovery stops when the stream is dropped
            let mut events = Box::pin(self.adapter.discover_devices_with_changes().await?);
            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(address)) if live.is_live(address) => {
                            seen.insert(address);
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        }

        let mut collector = FrameCollector::default();
        for address in seen {
            match self.manufacturer_block(address).await {
                Ok(data) => collector.observe(address.into(), data),
                Err(e) => debug!(address = %address, error = %e, "Device vanished before read"),
            }
        }

        Ok(collector.into_frames())
    }

    /// The first manufacturer block (lowest company id) the device advertises.
    async fn manufacturer_block(&self, address: Address) -> Result<Option<Vec<u8>>, ScanError> {
        let device = self.adapter.device(address)?;
        let block = device.manufacturer_data().await?.and_then(|data| {
            data.into_iter()
                .min_by_key(|(company_id, _)| *company_id)
                .map(|(company_id, bytes)| vendor_block(company_id, &bytes))
        });
        Ok(block)
    }
}

/// Separates fresh advertisements from BlueZ's replay of its device cache.
///
/// The discovery stream first reports every device BlueZ already knows,
/// whether or not it is still advertising. Those only count once a property
/// change shows they were heard during the window.
#[derive(Debug)]
struct LiveFilter {
    replay: HashSet<Address>,
}

impl LiveFilter {
    fn new(cached: impl IntoIterator<Item = Address>) -> Self {
        Self {
            replay: cached.into_iter().collect(),
        }
    }

    fn is_live(&mut self, address: Address) -> bool {
        !self.replay.remove(&address)
    }
}

impl Scanner for BluerScanner {
    fn scan(&self, window: Duration) -> ScanFuture<'_> {
        Box::pin(self.scan_window(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MacAddress;

    #[test]
    fn test_address_to_mac_address() {
        let addr = Address([0x19, 0xC4, 0x00, 0x00, 0x20, 0xC5]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac, MacAddress([0x19, 0xC4, 0x00, 0x00, 0x20, 0xC5]));
        assert_eq!(mac.to_string(), addr.to_string().to_lowercase());
    }

    #[test]
    fn test_bluer_error_maps_to_scan_error() {
        let err: ScanError = bluer::Error {
            kind: bluer::ErrorKind::NotReady,
            message: "adapter off".to_string(),
        }
        .into();
        assert!(matches!(err, ScanError::Bluetooth(_)));
    }

    #[test]
    fn test_cached_devices_need_a_fresh_advertisement() {
        let cached = Address([0x19, 0xC4, 0x00, 0x00, 0x20, 0xC5]);
        let fresh = Address([0xDC, 0x12, 0x00, 0x00, 0x12, 0x62]);
        let mut live = LiveFilter::new([cached]);

        // replayed from the cache when discovery starts
        assert!(!live.is_live(cached));
        assert!(live.is_live(fresh));
        // property change while scanning
        assert!(live.is_live(cached));
        assert!(live.is_live(fresh));
    }
}
