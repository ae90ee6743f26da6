//! Next-hop selection from the host IPv4 route table.
//!
//! The table is the `/proc/net/route` text format: a header line, then one
//! whitespace-separated route per line with addresses as 8-digit hex in host
//! byte order.

use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

use crate::error::ResolveError;

/// Route flag: the route is usable.
pub const RTF_UP: u16 = 0x0001;

/// One usable line of the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub interface: String,
    pub destination: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub flags: u16,
    pub mask: Ipv4Addr,
}

impl Route {
    pub const fn is_up(&self) -> bool {
        self.flags & RTF_UP != 0
    }

    /// Whether `address` falls inside this route's destination block.
    pub fn covers(&self, address: Ipv4Addr) -> bool {
        address.to_bits() & self.mask.to_bits() == self.destination.to_bits()
    }
}

/// Parse route table text, skipping the header and malformed lines.
pub fn parse_route_table(table: &str) -> Vec<Route> {
    table.lines().skip(1).filter_map(parse_route_line).collect()
}

fn parse_route_line(line: &str) -> Option<Route> {
    // Iface Destination Gateway Flags RefCnt Use Metric Mask ...
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return None;
    }

    Some(Route {
        interface: fields[0].to_owned(),
        destination: parse_hex_address(fields[1])?,
        gateway: parse_hex_address(fields[2])?,
        flags: u16::from_str_radix(fields[3], 16).ok()?,
        mask: parse_hex_address(fields[7])?,
    })
}

/// Decode an 8-digit hex address written in little-endian byte order.
fn parse_hex_address(field: &str) -> Option<Ipv4Addr> {
    if field.len() != 8 {
        return None;
    }
    let raw = u32::from_str_radix(field, 16).ok()?;
    Some(Ipv4Addr::from(raw.swap_bytes()))
}

/// Pick the next hop towards `destination`.
///
/// Loopback destinations are their own next hop. Otherwise the up route with
/// the longest mask that covers the destination wins; on equal masks the
/// earlier line wins. When `interface` is set only its routes are considered.
pub fn next_hop(
    routes: &[Route],
    interface: Option<&str>,
    destination: IpAddr,
) -> Result<IpAddr, ResolveError> {
    if destination.is_loopback() {
        return Ok(destination);
    }

    let IpAddr::V4(address) = destination.to_canonical() else {
        return Err(ResolveError::RouteNotFound(destination));
    };

    if let Some(name) = interface
        && !routes.iter().any(|route| route.interface == name)
    {
        return Err(ResolveError::InterfaceNotFound(name.to_owned()));
    }

    let mut best: Option<&Route> = None;
    for route in routes {
        if interface.is_some_and(|name| route.interface != name) {
            continue;
        }
        if !route.is_up() || !route.covers(address) {
            continue;
        }
        if best.is_none_or(|b| route.mask.to_bits() > b.mask.to_bits()) {
            best = Some(route);
        }
    }

    let route = best.ok_or(ResolveError::RouteNotFound(destination))?;
    debug!(
        "Route to {destination} via {} ({}/{})",
        route.interface, route.destination, route.mask
    );

    if route.gateway.is_unspecified() {
        Ok(IpAddr::V4(address))
    } else {
        Ok(IpAddr::V4(route.gateway))
    }
}
