//! Flow tracking shared by the sender and the listener.
//!
//! The sender records the key of every probe before it goes out; the listener
//! checks each inbound frame's mirrored key against the same set.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use parking_lot::Mutex;
use pcap_file::DataLink;
use pnet::packet::ip::IpNextHeaderProtocol;

use crate::network::layers::{self, Layers};

/// Directional 5-tuple identifying a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub source: IpAddr,
    pub destination: IpAddr,
    pub source_port: u16,
    pub destination_port: u16,
    pub protocol: IpNextHeaderProtocol,
}

impl SessionKey {
    /// Build a key, folding IPv4-mapped IPv6 addresses into IPv4.
    pub fn new(
        source: IpAddr,
        destination: IpAddr,
        source_port: u16,
        destination_port: u16,
        protocol: IpNextHeaderProtocol,
    ) -> Self {
        Self {
            source: source.to_canonical(),
            destination: destination.to_canonical(),
            source_port,
            destination_port,
            protocol,
        }
    }

    /// Key of decoded layers. Ports are zero without a TCP/UDP header.
    pub fn from_layers(layers: &Layers<'_>) -> Self {
        let (source_port, destination_port) = layers
            .transport
            .map_or((0, 0), |t| (t.source_port, t.destination_port));
        Self::new(
            layers.network.source,
            layers.network.destination,
            source_port,
            destination_port,
            layers.network.protocol,
        )
    }

    /// Key of a raw frame, or None when it carries no IP layer.
    pub fn from_frame(frame: &[u8], link_type: DataLink) -> Option<Self> {
        layers::decode(frame, link_type).map(|decoded| Self::from_layers(&decoded))
    }

    /// The key a reply to this flow would carry.
    #[must_use]
    pub const fn mirrored(&self) -> Self {
        Self {
            source: self.destination,
            destination: self.source,
            source_port: self.destination_port,
            destination_port: self.source_port,
            protocol: self.protocol,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto {}",
            self.source,
            self.source_port,
            self.destination,
            self.destination_port,
            self.protocol.0
        )
    }
}

/// Set of flows sent during the run.
///
/// Every operation takes the lock once around a single set operation.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: Mutex<HashSet<SessionKey>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a flow. Recording the same flow twice is a no-op.
    pub fn record(&self, key: SessionKey) {
        self.sessions.lock().insert(key);
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.lock().contains(key)
    }

    /// Remove a flow, returning whether it was present.
    pub fn forget(&self, key: &SessionKey) -> bool {
        self.sessions.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::Arc;
    use std::thread;

    use pnet::packet::ip::IpNextHeaderProtocols;

    fn key(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> SessionKey {
        SessionKey::new(
            IpAddr::from(src),
            IpAddr::from(dst),
            sport,
            dport,
            IpNextHeaderProtocols::Tcp,
        )
    }

    #[test]
    fn should_match_mirrored_reply() {
        let tracker = SessionTracker::new();
        let sent = key([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443);
        tracker.record(sent);

        let reply = key([10, 0, 0, 2], [10, 0, 0, 1], 443, 40000);
        assert!(tracker.contains(&reply.mirrored()));
        assert_eq!(sent.mirrored().mirrored(), sent);
    }

    #[test]
    fn should_not_match_unrelated_flows() {
        let tracker = SessionTracker::new();
        tracker.record(key([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443));

        let other_port = key([10, 0, 0, 2], [10, 0, 0, 1], 443, 40001);
        let other_host = key([10, 0, 0, 3], [10, 0, 0, 1], 443, 40000);
        let mut other_proto = key([10, 0, 0, 2], [10, 0, 0, 1], 443, 40000);
        other_proto.protocol = IpNextHeaderProtocols::Udp;

        assert!(!tracker.contains(&other_port.mirrored()));
        assert!(!tracker.contains(&other_host.mirrored()));
        assert!(!tracker.contains(&other_proto.mirrored()));
    }

    #[test]
    fn should_treat_same_direction_as_non_match() {
        let tracker = SessionTracker::new();
        let sent = key([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443);
        tracker.record(sent);
        assert!(!tracker.contains(&sent.mirrored()));
    }

    #[test]
    fn should_canonicalize_mapped_addresses() {
        let mapped = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped());
        let key = SessionKey::new(
            mapped,
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            1,
            2,
            IpNextHeaderProtocols::Udp,
        );
        assert_eq!(key.source, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(key.destination, IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn should_record_idempotently_and_forget() {
        let tracker = SessionTracker::new();
        assert!(tracker.is_empty());

        let sent = key([10, 0, 0, 1], [10, 0, 0, 2], 1, 2);
        tracker.record(sent);
        tracker.record(sent);
        assert_eq!(tracker.len(), 1);

        assert!(tracker.forget(&sent));
        assert!(!tracker.forget(&sent));
        assert!(tracker.is_empty());
    }

    #[test]
    fn should_format_key() {
        let sent = key([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443);
        assert_eq!(sent.to_string(), "10.0.0.1:40000 -> 10.0.0.2:443 proto 6");
    }

    #[test]
    fn should_survive_concurrent_record_and_lookup() {
        const WRITERS: u16 = 4;
        const PER_WRITER: u16 = 2500;

        let tracker = Arc::new(SessionTracker::new());

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for port in 0..PER_WRITER {
                        tracker.record(key([10, 0, 0, 1], [10, 0, 1, 1], w, port));
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    let mut seen = 0usize;
                    for port in 0..PER_WRITER {
                        let reply = key([10, 0, 1, 1], [10, 0, 0, 1], port, w);
                        if tracker.contains(&reply.mirrored()) {
                            seen += 1;
                        }
                    }
                    seen
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        for reader in readers {
            assert!(reader.join().unwrap() <= usize::from(PER_WRITER));
        }

        assert_eq!(tracker.len(), usize::from(WRITERS) * usize::from(PER_WRITER));
        for w in 0..WRITERS {
            for port in 0..PER_WRITER {
                let reply = key([10, 0, 1, 1], [10, 0, 0, 1], port, w);
                assert!(tracker.contains(&reply.mirrored()));
            }
        }
    }
}
