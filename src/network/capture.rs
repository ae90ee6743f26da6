//! Frame injection and capture.
//!
//! Provides a trait-based abstraction over the link layer to enable:
//! - Testing the sender and listener without real network interfaces
//! - Injecting through pnet while capturing through libpcap

use std::net::IpAddr;
use std::time::Duration;

use pcap_file::DataLink;
use pnet::datalink::{self, Channel, DataLinkSender, NetworkInterface};
use pnet::util::MacAddr;

use crate::error::{NetworkError, Result};

/// Snapshot length of the response capture and of the response archive.
pub const SNAPSHOT_LEN: u32 = 1600;

/// Read timeout of the live capture, so the capture thread can notice
/// shutdown while the link is quiet.
const CAPTURE_READ_TIMEOUT_MS: i32 = 100;

/// A frame read from a capture, with its capture metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedFrame {
    /// Capture time since the Unix epoch.
    pub timestamp: Duration,
    /// Length of the frame on the wire.
    pub orig_len: u32,
    /// Captured bytes (at most the snapshot length).
    pub data: Vec<u8>,
}

/// Trait for packet capture implementations.
pub trait PacketCapture: Send {
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` when the read timed out without traffic and an
    /// error when the capture can no longer deliver frames.
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;

    /// Link type of the captured frames.
    fn link_type(&self) -> DataLink;
}

/// Trait for frame injection implementations.
pub trait PacketSender: Send {
    /// Send a complete link-layer frame.
    fn send(&mut self, frame: &[u8]) -> Result<()>;
}

/// Find a suitable network interface.
///
/// Returns the named interface, or the first interface that is:
/// - Up (active)
/// - Not a loopback interface
/// - Has at least one IP address
pub fn find_interface(name: Option<&str>) -> Result<NetworkInterface> {
    let interfaces = datalink::interfaces();

    if let Some(name) = name {
        interfaces
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| NetworkError::NoInterface.into())
    } else {
        interfaces
            .into_iter()
            .find(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
            .ok_or_else(|| NetworkError::NoInterface.into())
    }
}

/// Our hardware address and source IP on `interface`.
///
/// An explicit `source_ip` wins; otherwise the first non-loopback IPv4
/// address bound to the interface is used.
pub fn interface_addresses(
    interface: &NetworkInterface,
    source_ip: Option<IpAddr>,
) -> Result<(IpAddr, MacAddr)> {
    let mac = interface
        .mac
        .filter(|mac| *mac != MacAddr::zero())
        .ok_or_else(|| NetworkError::NoHardwareAddress(interface.name.clone()))?;

    if let Some(ip) = source_ip {
        return Ok((ip, mac));
    }

    let ip = interface
        .ips
        .iter()
        .map(|network| network.ip())
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
        .ok_or_else(|| NetworkError::NoSourceAddress(interface.name.clone()))?;

    Ok((ip, mac))
}

/// Capture filter accepting only traffic addressed to `source`.
pub fn response_filter(source: IpAddr) -> String {
    format!("dst host {source}")
}

/// Production frame injection using pnet.
pub struct PnetSender {
    tx: Box<dyn DataLinkSender>,
}

impl PnetSender {
    /// Open an injection channel on the given interface.
    pub fn open(interface: &NetworkInterface) -> Result<Self> {
        let tx = match datalink::channel(interface, datalink::Config::default()) {
            Ok(Channel::Ethernet(tx, _)) => tx,
            Ok(_) => return Err(NetworkError::UnsupportedChannel.into()),
            Err(e) => return Err(NetworkError::ChannelOpen(e.to_string()).into()),
        };

        Ok(Self { tx })
    }
}

impl PacketSender for PnetSender {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.tx
            .send_to(frame, None)
            .ok_or_else(|| NetworkError::SendFailed("send returned None".into()))?
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Production response capture using libpcap, with a kernel-side filter.
pub struct PcapCapture {
    capture: pcap::Capture<pcap::Active>,
    link_type: DataLink,
}

impl PcapCapture {
    /// Open a promiscuous capture on `interface` restricted by `filter`.
    pub fn open(interface: &str, filter: &str) -> Result<Self> {
        let mut capture = pcap::Capture::from_device(interface)
            .map_err(|e| NetworkError::CaptureOpen(e.to_string()))?
            .promisc(true)
            .snaplen(i32::try_from(SNAPSHOT_LEN).unwrap_or(i32::MAX))
            .timeout(CAPTURE_READ_TIMEOUT_MS)
            .open()
            .map_err(|e| NetworkError::CaptureOpen(e.to_string()))?;

        capture
            .filter(filter, true)
            .map_err(|e| NetworkError::Filter {
                filter: filter.to_owned(),
                reason: e.to_string(),
            })?;

        let link_type = DataLink::from(u32::try_from(capture.get_datalink().0).unwrap_or_default());
        Ok(Self { capture, link_type })
    }
}

impl PacketCapture for PcapCapture {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp = Duration::from_secs(u64::try_from(ts.tv_sec).unwrap_or_default())
                    + Duration::from_micros(u64::try_from(ts.tv_usec).unwrap_or_default());
                Ok(Some(CapturedFrame {
                    timestamp,
                    orig_len: packet.header.len,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(NetworkError::CaptureOpen(e.to_string()).into()),
        }
    }

    fn link_type(&self) -> DataLink {
        self.link_type
    }
}
