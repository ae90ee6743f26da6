//! Host neighbor cache lookup.
//!
//! Reads the `/proc/net/arp` text format:
//!
//! ```text
//! IP address       HW type     Flags       HW address            Mask     Device
//! 192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:ff     *        eth0
//! ```
//!
//! Only the existing cache is consulted; nothing is ever sent on the wire to
//! learn a missing entry.

use std::net::IpAddr;

use pnet::util::MacAddr;

/// A neighbor cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub ip: IpAddr,
    pub mac: MacAddr,
    pub device: Option<String>,
}

/// Snapshot of the host neighbor cache, in table order.
#[derive(Debug, Clone, Default)]
pub struct ArpTable {
    entries: Vec<HostInfo>,
}

impl ArpTable {
    /// Parse neighbor table text, skipping the header and malformed lines.
    pub fn parse(table: &str) -> Self {
        let entries = table.lines().skip(1).filter_map(parse_arp_line).collect();
        Self { entries }
    }

    /// Hardware address of the first complete entry for `ip`.
    ///
    /// Incomplete entries (all-zero address) are skipped.
    pub fn get(&self, ip: IpAddr) -> Option<MacAddr> {
        self.entries
            .iter()
            .find(|entry| entry.ip == ip && entry.mac != MacAddr::zero())
            .map(|entry| entry.mac)
    }

    pub fn all(&self) -> &[HostInfo] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_arp_line(line: &str) -> Option<HostInfo> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }

    Some(HostInfo {
        ip: fields[0].parse().ok()?,
        mac: fields[3].parse().ok()?,
        device: fields.get(5).map(|device| (*device).to_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:01     *        eth0
192.168.1.50     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:02     *        wlan0
not-an-ip        0x1         0x2         aa:bb:cc:dd:ee:03     *        eth0
192.168.1.7      0x1         0x2         garbage               *        eth0
";

    #[test]
    fn should_parse_valid_lines() {
        let table = ArpTable::parse(TABLE);
        assert_eq!(table.len(), 3);
        assert_eq!(table.all()[0].device.as_deref(), Some("eth0"));
    }

    #[test]
    fn should_return_first_matching_entry() {
        let table = ArpTable::parse(TABLE);
        assert_eq!(
            table.get("192.168.1.1".parse().unwrap()),
            Some(MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01))
        );
    }

    #[test]
    fn should_treat_incomplete_entries_as_missing() {
        let table = ArpTable::parse(TABLE);
        assert_eq!(table.get("192.168.1.50".parse().unwrap()), None);
        assert_eq!(table.get("192.168.1.99".parse().unwrap()), None);
    }

    #[test]
    fn should_handle_header_only_table() {
        let table = ArpTable::parse(TABLE.lines().next().unwrap());
        assert!(table.is_empty());
    }
}
