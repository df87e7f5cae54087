//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to run a passive LE scan without
//! the BlueZ daemon. It requires CAP_NET_RAW and CAP_NET_ADMIN capabilities or
//! root privileges. Scanning is switched on for the requested window only.

use super::{DiscoveryFrame, FrameCollector, ScanError, ScanFuture, Scanner};
use crate::address::MacAddress;
use libc::{
    AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t,
};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Largest HCI event: 3 byte header + 255 byte payload.
const HCI_MAX_EVENT_SIZE: usize = 258;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Let only LE meta events through.
    fn le_meta_events() -> Self {
        let mut filter = Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        };
        filter.type_mask |= 1 << u32::from(HCI_EVENT_PKT);
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

fn os_check(ret: isize, what: &str) -> Result<(), ScanError> {
    if ret < 0 {
        let err = io::Error::last_os_error();
        Err(ScanError::Bluetooth(format!("{what}: {err}")))
    } else {
        Ok(())
    }
}

fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// LE Set Scan Parameters: passive, 10 ms interval and window.
fn scan_parameters_packet() -> Vec<u8> {
    let interval: u16 = 0x0010; // 0.625 ms units
    let window: u16 = 0x0010;
    let mut params = vec![LE_SCAN_PASSIVE];
    params.extend_from_slice(&interval.to_le_bytes());
    params.extend_from_slice(&window.to_le_bytes());
    params.push(LE_PUBLIC_ADDRESS);
    params.push(FILTER_POLICY_ACCEPT_ALL);
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params)
}

/// LE Set Scan Enable, never filtering duplicates.
fn scan_enable_packet(enable: bool) -> Vec<u8> {
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[u8::from(enable), 0x00])
}

fn open_hci_socket(dev_id: u16) -> Result<OwnedFd, ScanError> {
    // nix has no BTPROTO_HCI, so this goes through libc directly.
    // SOCK_NONBLOCK is required for AsyncFd.
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };
    os_check(fd as isize, "Failed to create HCI socket")?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };
    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };
    os_check(ret as isize, "Failed to bind HCI socket")?;

    Ok(fd)
}

fn set_le_meta_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let filter = HciFilter::le_meta_events();
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };
    os_check(ret as isize, "Failed to set HCI filter")
}

fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };
    os_check(ret, "Failed to send HCI command")
}

fn read_packet(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Find the manufacturer-specific AD structure, company id included.
fn manufacturer_data(ad_data: &[u8]) -> Option<Vec<u8>> {
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = usize::from(ad_data[offset]);
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }
        if ad_data[offset + 1] == AD_TYPE_MANUFACTURER_DATA && len >= 3 {
            return Some(ad_data[offset + 2..offset + 1 + len].to_vec());
        }
        offset += 1 + len;
    }
    None
}

/// Parse every report in an LE advertising report event.
///
/// `event` starts at the HCI packet type byte. Each report is
/// `event_type, addr_type, addr[6], data_len, data, rssi`.
fn parse_advertising_reports(event: &[u8]) -> Vec<(MacAddress, Option<Vec<u8>>)> {
    let mut reports = Vec::new();
    if event.len() < 5
        || event[0] != HCI_EVENT_PKT
        || event[1] != EVT_LE_META_EVENT
        || event[3] != EVT_LE_ADVERTISING_REPORT
    {
        return reports;
    }

    let count = usize::from(event[4]);
    let mut rest = &event[5..];

    for _ in 0..count {
        if rest.len() < 9 {
            break;
        }
        let mut addr = [0u8; 6];
        addr.copy_from_slice(&rest[2..8]);
        addr.reverse(); // HCI sends addresses little-endian

        let data_len = usize::from(rest[8]);
        // data plus trailing RSSI byte
        if rest.len() < 9 + data_len + 1 {
            break;
        }
        let ad_data = &rest[9..9 + data_len];
        reports.push((MacAddress(addr), manufacturer_data(ad_data)));
        rest = &rest[9 + data_len + 1..];
    }

    reports
}

/// Passive scanner on a local HCI device (0 for `hci0`).
#[derive(Debug, Clone, Copy)]
pub struct HciScanner {
    dev_id: u16,
}

impl HciScanner {
    pub fn new(dev_id: u16) -> Self {
        Self { dev_id }
    }

    async fn scan_window(&self, window: Duration) -> Result<Vec<DiscoveryFrame>, ScanError> {
        let events = open_hci_socket(self.dev_id)?;
        set_le_meta_filter(&events)?;
        let events = AsyncFd::new(events)
            .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {e}")))?;

        let commands = open_hci_socket(self.dev_id)?;
        send_hci_command(&commands, &scan_parameters_packet())?;
        send_hci_command(&commands, &scan_enable_packet(true))?;

        let collector = collect_until(&events, Instant::now() + window).await;

        if let Err(e) = send_hci_command(&commands, &scan_enable_packet(false)) {
            warn!(error = %e, "Failed to stop LE scan");
        }

        Ok(collector.into_frames())
    }
}

/// How a drain pass over the socket ended.
#[derive(Debug, PartialEq, Eq)]
enum Drained {
    /// Nothing left to read; wait for readiness again.
    WouldBlock,
    /// The socket reported end of file.
    Closed,
}

/// Read packets until `read` reports it would block.
///
/// `read` returns `None` once the socket has no more data queued.
fn drain(
    collector: &mut FrameCollector,
    buf: &mut [u8],
    mut read: impl FnMut(&mut [u8]) -> Option<io::Result<usize>>,
) -> io::Result<Drained> {
    loop {
        match read(buf) {
            None => return Ok(Drained::WouldBlock),
            Some(Ok(0)) => return Ok(Drained::Closed),
            Some(Ok(n)) => {
                for (address, data) in parse_advertising_reports(&buf[..n]) {
                    collector.observe(address, data);
                }
            }
            Some(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {}
            Some(Err(e)) => return Err(e),
        }
    }
}

async fn collect_until(fd: &AsyncFd<OwnedFd>, deadline: Instant) -> FrameCollector {
    let mut collector = FrameCollector::default();
    let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

    loop {
        let mut guard = match timeout_at(deadline, fd.readable()).await {
            Ok(Ok(guard)) => guard,
            Ok(Err(e)) => {
                debug!(error = %e, "HCI socket not readable");
                break;
            }
            Err(_elapsed) => break,
        };

        // try_io clears readiness only on WouldBlock
        let drained = drain(&mut collector, &mut buf, |buf| {
            guard
                .try_io(|inner| read_packet(inner.get_ref(), buf))
                .ok()
        });
        match drained {
            Ok(Drained::WouldBlock) => {}
            Ok(Drained::Closed) => {
                warn!("HCI socket closed during scan");
                break;
            }
            Err(e) => {
                warn!(error = %e, "HCI read failed, ending scan window early");
                break;
            }
        }
    }

    collector
}

impl Scanner for HciScanner {
    fn scan(&self, window: Duration) -> ScanFuture<'_> {
        Box::pin(self.scan_window(window))
    }
}
