//! Frame construction from packet templates.
//!
//! Rewrites a template's addresses for one target and serializes it into a
//! complete Ethernet frame with every length and checksum recomputed.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::icmpv6::{self, Icmpv6Packet, MutableIcmpv6Packet};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};
use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};
use pnet::util::MacAddr;

use super::buffer::{BufferPool, PooledBuffer};
use super::layers::{ETHERNET_HEADER_SIZE, IPV6_HEADER_SIZE, NetworkKind, TransportKind};
use crate::error::FrameError;
use crate::template::PacketTemplate;

/// Smallest ICMPv6 message carrying a checksum.
const ICMPV6_MIN_SIZE: usize = 4;

/// Address pair of a validated build, by family.
#[derive(Clone, Copy)]
enum Endpoints {
    V4(Ipv4Addr, Ipv4Addr),
    V6(Ipv6Addr, Ipv6Addr),
}

/// Builder for probe frames.
///
/// Uses a buffer pool to minimize allocations.
#[derive(Clone, Default)]
pub struct FrameBuilder {
    buffer_pool: BufferPool,
}

impl FrameBuilder {
    /// Create a new frame builder with the given buffer pool.
    pub const fn new(buffer_pool: BufferPool) -> Self {
        Self { buffer_pool }
    }

    /// Build the frame `template` becomes when sent from `source` to
    /// `destination`.
    ///
    /// Header fields other than addresses, lengths and checksums are copied
    /// from the template, options included. The payload is copied verbatim.
    pub fn build(
        &self,
        template: &PacketTemplate,
        source: IpAddr,
        destination: IpAddr,
        source_mac: MacAddr,
        destination_mac: MacAddr,
    ) -> Result<PooledBuffer, FrameError> {
        let network = template.network().ok_or(FrameError::NoNetworkLayer)?;
        let endpoints = match (network.kind, source, destination) {
            (NetworkKind::Ipv4, IpAddr::V4(src), IpAddr::V4(dst)) => Endpoints::V4(src, dst),
            (NetworkKind::Ipv6, IpAddr::V6(src), IpAddr::V6(dst)) => Endpoints::V6(src, dst),
            _ => {
                return Err(FrameError::AddressFamilyMismatch {
                    source_addr: source,
                    destination,
                });
            }
        };

        let transport = template.transport();
        let payload = template.payload();
        let transport_len = transport.map_or(0, |t| t.bytes.len());
        let packet_len = network.bytes.len() + transport_len + payload.len();

        let length_field = match endpoints {
            Endpoints::V4(..) => fit_u16("IPv4 total length", packet_len)?,
            Endpoints::V6(..) => {
                if network.bytes.len() != IPV6_HEADER_SIZE {
                    return Err(FrameError::Malformed("IPv6"));
                }
                fit_u16("IPv6 payload length", packet_len - IPV6_HEADER_SIZE)?
            }
        };

        let l3 = ETHERNET_HEADER_SIZE;
        let l4 = l3 + network.bytes.len();
        let data = l4 + transport_len;

        let mut buffer = self.buffer_pool.get_zeroed(l3 + packet_len);
        let frame = buffer.as_mut_slice();
        frame[l3..l4].copy_from_slice(&network.bytes);
        if let Some(transport) = transport {
            frame[l4..data].copy_from_slice(&transport.bytes);
        }
        frame[data..].copy_from_slice(payload);

        {
            let mut ethernet =
                MutableEthernetPacket::new(frame).ok_or(FrameError::Malformed("Ethernet"))?;
            ethernet.set_destination(destination_mac);
            ethernet.set_source(source_mac);
            ethernet.set_ethertype(match endpoints {
                Endpoints::V4(..) => EtherTypes::Ipv4,
                Endpoints::V6(..) => EtherTypes::Ipv6,
            });
        }

        match endpoints {
            Endpoints::V4(src, dst) => {
                let mut ipv4 =
                    MutableIpv4Packet::new(&mut frame[l3..]).ok_or(FrameError::Malformed("IPv4"))?;
                ipv4.set_source(src);
                ipv4.set_destination(dst);
                ipv4.set_total_length(length_field);
                ipv4.set_checksum(0);
                let checksum = ipv4::checksum(&ipv4.to_immutable());
                ipv4.set_checksum(checksum);
            }
            Endpoints::V6(src, dst) => {
                let mut ipv6 =
                    MutableIpv6Packet::new(&mut frame[l3..]).ok_or(FrameError::Malformed("IPv6"))?;
                ipv6.set_source(src);
                ipv6.set_destination(dst);
                ipv6.set_payload_length(length_field);
            }
        }

        match transport.map(|t| t.kind) {
            Some(TransportKind::Tcp) => fix_tcp(&mut frame[l4..], endpoints)?,
            Some(TransportKind::Udp) => fix_udp(&mut frame[l4..], endpoints)?,
            None => {
                if let Endpoints::V6(src, dst) = endpoints
                    && frame[l3 + 6] == IpNextHeaderProtocols::Icmpv6.0
                {
                    fix_icmpv6(&mut frame[l4..], src, dst);
                }
            }
        }

        Ok(buffer)
    }
}

fn fit_u16(field: &'static str, len: usize) -> Result<u16, FrameError> {
    u16::try_from(len).map_err(|_| FrameError::TooLarge { field, len })
}

fn fix_tcp(segment: &mut [u8], endpoints: Endpoints) -> Result<(), FrameError> {
    {
        let mut tcp = MutableTcpPacket::new(segment).ok_or(FrameError::Malformed("TCP"))?;
        tcp.set_checksum(0);
    }
    let packet = TcpPacket::new(segment).ok_or(FrameError::Malformed("TCP"))?;
    let checksum = match endpoints {
        Endpoints::V4(src, dst) => tcp::ipv4_checksum(&packet, &src, &dst),
        Endpoints::V6(src, dst) => tcp::ipv6_checksum(&packet, &src, &dst),
    };

    let mut tcp = MutableTcpPacket::new(segment).ok_or(FrameError::Malformed("TCP"))?;
    tcp.set_checksum(checksum);
    Ok(())
}

fn fix_udp(datagram: &mut [u8], endpoints: Endpoints) -> Result<(), FrameError> {
    let length = fit_u16("UDP length", datagram.len())?;
    {
        let mut udp = MutableUdpPacket::new(datagram).ok_or(FrameError::Malformed("UDP"))?;
        udp.set_length(length);
        udp.set_checksum(0);
    }
    let packet = UdpPacket::new(datagram).ok_or(FrameError::Malformed("UDP"))?;
    let checksum = match endpoints {
        Endpoints::V4(src, dst) => udp::ipv4_checksum(&packet, &src, &dst),
        Endpoints::V6(src, dst) => udp::ipv6_checksum(&packet, &src, &dst),
    };

    // A zero UDP checksum means "no checksum" on the wire.
    let mut udp = MutableUdpPacket::new(datagram).ok_or(FrameError::Malformed("UDP"))?;
    udp.set_checksum(if checksum == 0 { 0xffff } else { checksum });
    Ok(())
}

fn fix_icmpv6(message: &mut [u8], src: Ipv6Addr, dst: Ipv6Addr) {
    if message.len() < ICMPV6_MIN_SIZE {
        return;
    }
    if let Some(mut icmp) = MutableIcmpv6Packet::new(message) {
        icmp.set_checksum(0);
    }
    let Some(checksum) = Icmpv6Packet::new(message).map(|icmp| icmpv6::checksum(&icmp, &src, &dst))
    else {
        return;
    };
    if let Some(mut icmp) = MutableIcmpv6Packet::new(message) {
        icmp.set_checksum(checksum);
    }
}
