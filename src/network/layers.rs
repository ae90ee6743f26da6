//! Layer decoding for captured frames.
//!
//! Templates, the flow keys the sender records and the frames the listener
//! inspects all go through [`decode`], so both halves agree on what a
//! packet's network and transport layers are.

use std::net::IpAddr;

use pcap_file::DataLink;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;

/// Ethernet header size in bytes.
pub const ETHERNET_HEADER_SIZE: usize = 14;
/// IPv4 header size in bytes (without options).
pub const IPV4_HEADER_SIZE: usize = 20;
/// IPv6 header size in bytes.
pub const IPV6_HEADER_SIZE: usize = 40;
/// TCP header size in bytes (without options).
pub const TCP_HEADER_SIZE: usize = 20;
/// UDP header size in bytes.
pub const UDP_HEADER_SIZE: usize = 8;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
/// Linux cooked capture header size.
const LINUX_SLL_HEADER_SIZE: usize = 16;

/// Network-layer variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Ipv4,
    Ipv6,
}

/// Transport-layer variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
}

/// Decoded network layer.
#[derive(Debug, Clone, Copy)]
pub struct NetworkLayer<'a> {
    pub kind: NetworkKind,
    /// Header bytes, options included.
    pub header: &'a [u8],
    pub source: IpAddr,
    pub destination: IpAddr,
    /// IPv4 protocol or IPv6 next header.
    pub protocol: IpNextHeaderProtocol,
}

/// Decoded transport layer.
#[derive(Debug, Clone, Copy)]
pub struct TransportLayer<'a> {
    pub kind: TransportKind,
    /// Header bytes, options included.
    pub header: &'a [u8],
    pub source_port: u16,
    pub destination_port: u16,
}

/// A frame split into its layers.
#[derive(Debug, Clone, Copy)]
pub struct Layers<'a> {
    pub network: NetworkLayer<'a>,
    pub transport: Option<TransportLayer<'a>>,
    /// Everything after the last decoded header, bounded by the IP length.
    pub payload: &'a [u8],
}

/// Decode a frame captured with the given link type.
///
/// Returns None when the frame carries neither IPv4 nor IPv6.
pub fn decode(frame: &[u8], link_type: DataLink) -> Option<Layers<'_>> {
    let (kind, packet) = network_slice(frame, link_type)?;
    match kind {
        NetworkKind::Ipv4 => decode_ipv4(packet),
        NetworkKind::Ipv6 => decode_ipv6(packet),
    }
}

/// Locate the start of the network layer.
fn network_slice(frame: &[u8], link_type: DataLink) -> Option<(NetworkKind, &[u8])> {
    match link_type {
        DataLink::ETHERNET => {
            let mut offset = 12;
            loop {
                let ethertype = read_u16(frame, offset)?;
                offset += 2;
                match ethertype {
                    ETHERTYPE_VLAN | ETHERTYPE_QINQ => offset += 2,
                    _ => return Some((ethertype_kind(ethertype)?, frame.get(offset..)?)),
                }
            }
        }
        DataLink::LINUX_SLL => {
            let protocol = read_u16(frame, 14)?;
            Some((
                ethertype_kind(protocol)?,
                frame.get(LINUX_SLL_HEADER_SIZE..)?,
            ))
        }
        DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => {
            let kind = match frame.first()? >> 4 {
                4 => NetworkKind::Ipv4,
                6 => NetworkKind::Ipv6,
                _ => return None,
            };
            Some((kind, frame))
        }
        _ => None,
    }
}

const fn ethertype_kind(ethertype: u16) -> Option<NetworkKind> {
    match ethertype {
        ETHERTYPE_IPV4 => Some(NetworkKind::Ipv4),
        ETHERTYPE_IPV6 => Some(NetworkKind::Ipv6),
        _ => None,
    }
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn decode_ipv4(packet: &[u8]) -> Option<Layers<'_>> {
    let ipv4 = Ipv4Packet::new(packet)?;
    if ipv4.get_version() != 4 {
        return None;
    }

    let header_len = usize::from(ipv4.get_header_length()) * 4;
    if header_len < IPV4_HEADER_SIZE || header_len > packet.len() {
        return None;
    }

    // Captures taken before segmentation offload can carry a zero length.
    let total_len = usize::from(ipv4.get_total_length());
    let end = if (header_len..=packet.len()).contains(&total_len) {
        total_len
    } else {
        packet.len()
    };

    let network = NetworkLayer {
        kind: NetworkKind::Ipv4,
        header: &packet[..header_len],
        source: IpAddr::V4(ipv4.get_source()),
        destination: IpAddr::V4(ipv4.get_destination()),
        protocol: ipv4.get_next_level_protocol(),
    };

    // Non-first fragments carry no transport header.
    let body = &packet[header_len..end];
    if ipv4.get_fragment_offset() != 0 {
        return Some(Layers {
            network,
            transport: None,
            payload: body,
        });
    }

    Some(with_transport(network, body))
}

fn decode_ipv6(packet: &[u8]) -> Option<Layers<'_>> {
    let ipv6 = Ipv6Packet::new(packet)?;
    if ipv6.get_version() != 6 {
        return None;
    }

    let end = (IPV6_HEADER_SIZE + usize::from(ipv6.get_payload_length())).min(packet.len());

    let network = NetworkLayer {
        kind: NetworkKind::Ipv6,
        header: &packet[..IPV6_HEADER_SIZE],
        source: IpAddr::V6(ipv6.get_source()),
        destination: IpAddr::V6(ipv6.get_destination()),
        protocol: ipv6.get_next_header(),
    };

    Some(with_transport(network, &packet[IPV6_HEADER_SIZE..end]))
}

fn with_transport<'a>(network: NetworkLayer<'a>, body: &'a [u8]) -> Layers<'a> {
    let transport = match network.protocol {
        IpNextHeaderProtocols::Tcp => decode_tcp(body),
        IpNextHeaderProtocols::Udp => decode_udp(body),
        _ => None,
    };

    match transport {
        Some((transport, payload)) => Layers {
            network,
            transport: Some(transport),
            payload,
        },
        None => Layers {
            network,
            transport: None,
            payload: body,
        },
    }
}

fn decode_tcp(segment: &[u8]) -> Option<(TransportLayer<'_>, &[u8])> {
    let tcp = TcpPacket::new(segment)?;
    let header_len = usize::from(tcp.get_data_offset()) * 4;
    if header_len < TCP_HEADER_SIZE || header_len > segment.len() {
        return None;
    }

    let transport = TransportLayer {
        kind: TransportKind::Tcp,
        header: &segment[..header_len],
        source_port: tcp.get_source(),
        destination_port: tcp.get_destination(),
    };
    Some((transport, &segment[header_len..]))
}

fn decode_udp(datagram: &[u8]) -> Option<(TransportLayer<'_>, &[u8])> {
    let udp = UdpPacket::new(datagram)?;
    let length = usize::from(udp.get_length());
    let end = if (UDP_HEADER_SIZE..=datagram.len()).contains(&length) {
        length
    } else {
        datagram.len()
    };

    let transport = TransportLayer {
        kind: TransportKind::Udp,
        header: &datagram[..UDP_HEADER_SIZE],
        source_port: udp.get_source(),
        destination_port: udp.get_destination(),
    };
    Some((transport, &datagram[UDP_HEADER_SIZE..end]))
}
