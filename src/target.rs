//! Target specification parsing.
//!
//! A specification is a CIDR block (`10.0.0.0/24`), an inclusive dashed
//! range (`10.0.0.1-10.0.0.100`) or a single address. Several
//! specifications can be joined with `;`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

use crate::error::TargetError;

/// Expand every `;`-separated specification and concatenate the results.
///
/// Blank segments (such as a trailing `;`) are ignored.
pub fn expand_all(specs: &str) -> Result<Vec<IpAddr>, TargetError> {
    let mut targets = Vec::new();
    for spec in specs.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        targets.extend(expand(spec)?);
    }
    Ok(targets)
}

/// Expand a single specification into its addresses, in ascending order.
///
/// CIDR blocks include their network and broadcast addresses. A range whose
/// start is above its end yields no addresses.
pub fn expand(spec: &str) -> Result<Vec<IpAddr>, TargetError> {
    let invalid = |reason| TargetError::InvalidSpec {
        spec: spec.to_owned(),
        reason,
    };

    if spec.contains('/') {
        let net: IpNet = spec.parse().map_err(|_| invalid("malformed CIDR block"))?;
        return Ok(inclusive_range(net.network(), net.broadcast()));
    }

    if spec.contains('-') {
        let mut parts = spec.split('-');
        let (Some(start), Some(end), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("a range needs exactly one '-'"));
        };
        let start: IpAddr = start
            .trim()
            .parse()
            .map_err(|_| invalid("malformed range start"))?;
        let end: IpAddr = end
            .trim()
            .parse()
            .map_err(|_| invalid("malformed range end"))?;
        if start.is_ipv4() != end.is_ipv4() {
            return Err(invalid("range bounds belong to different address families"));
        }
        return Ok(inclusive_range(start, end));
    }

    let addr: IpAddr = spec.parse().map_err(|_| invalid("malformed address"))?;
    Ok(vec![addr])
}

/// Every address from `start` to `end` inclusive. Both must share a family.
fn inclusive_range(start: IpAddr, end: IpAddr) -> Vec<IpAddr> {
    match (start, end) {
        (IpAddr::V4(start), IpAddr::V4(end)) => {
            walk(u32::from(start), u32::from(end), u32::checked_add)
                .map(|n| IpAddr::V4(Ipv4Addr::from(n)))
                .collect()
        }
        (IpAddr::V6(start), IpAddr::V6(end)) => {
            walk(u128::from(start), u128::from(end), u128::checked_add)
                .map(|n| IpAddr::V6(Ipv6Addr::from(n)))
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Big-endian integer walk from `start` to `end`; stops at the top of the
/// address space instead of wrapping.
fn walk<T>(start: T, end: T, add: fn(T, T) -> Option<T>) -> impl Iterator<Item = T>
where
    T: Copy + PartialOrd + From<u8>,
{
    let first = (start <= end).then_some(start);
    std::iter::successors(first, move |&current| {
        if current >= end {
            return None;
        }
        add(current, T::from(1))
    })
}
