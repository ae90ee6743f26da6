//! Packet templates loaded from a pcap or pcapng archive.
//!
//! A template keeps the header bytes of a recorded packet's network and
//! transport layers plus its payload. The frame builder rewrites copies of
//! them per target, the template itself never changes.

use std::path::Path;
use std::time::Duration;

use pcap_file::DataLink;
use tracing::{debug, info, warn};

use crate::error::ArchiveError;
use crate::network::ArchiveReader;
use crate::network::layers::{self, Layers, NetworkKind, TransportKind};

/// Network-layer header of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHeader {
    pub kind: NetworkKind,
    pub bytes: Vec<u8>,
}

/// Transport-layer header of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub kind: TransportKind,
    pub bytes: Vec<u8>,
}

/// A recorded packet used as the pattern for generated probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketTemplate {
    network: Option<NetworkHeader>,
    transport: Option<TransportHeader>,
    payload: Vec<u8>,
    timestamp: Duration,
}

impl PacketTemplate {
    /// Build a template from already separated layers.
    pub fn from_parts(
        network: Option<NetworkHeader>,
        transport: Option<TransportHeader>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            network,
            transport,
            payload,
            timestamp: Duration::ZERO,
        }
    }

    /// Build a template from a captured frame.
    ///
    /// Returns None when the frame has neither an IPv4 nor an IPv6 layer.
    pub fn from_frame(frame: &[u8], link_type: DataLink, timestamp: Duration) -> Option<Self> {
        layers::decode(frame, link_type).map(|decoded| Self::from_layers(&decoded, timestamp))
    }

    fn from_layers(decoded: &Layers<'_>, timestamp: Duration) -> Self {
        Self {
            network: Some(NetworkHeader {
                kind: decoded.network.kind,
                bytes: decoded.network.header.to_vec(),
            }),
            transport: decoded.transport.map(|transport| TransportHeader {
                kind: transport.kind,
                bytes: transport.header.to_vec(),
            }),
            payload: decoded.payload.to_vec(),
            timestamp,
        }
    }

    pub const fn network(&self) -> Option<&NetworkHeader> {
        self.network.as_ref()
    }

    pub const fn transport(&self) -> Option<&TransportHeader> {
        self.transport.as_ref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Capture timestamp of the recorded packet.
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }
}

/// Load every IPv4/IPv6 record of a pcap or pcapng archive, in file order.
///
/// Records without a network layer are skipped. An archive without any usable
/// record yields an empty list; rejecting it is up to the caller.
pub fn load(path: impl AsRef<Path>) -> Result<Vec<PacketTemplate>, ArchiveError> {
    let path = path.as_ref();
    let mut reader = ArchiveReader::open(path)?;

    let mut templates = Vec::new();
    let mut skipped = 0usize;
    while let Some(record) = reader.next_record() {
        let record = record?;
        match PacketTemplate::from_frame(&record.data, record.link_type, record.timestamp) {
            Some(template) => templates.push(template),
            None => {
                skipped += 1;
                debug!(
                    "Skipping non-IP record at {:?} (link type {:?})",
                    record.timestamp, record.link_type
                );
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {skipped} non-IP records in {}", path.display());
    }
    info!("Loaded {} templates from {}", templates.len(), path.display());

    Ok(templates)
}
