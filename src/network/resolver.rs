//! Destination to hardware address resolution.
//!
//! Provides a trait-based abstraction over the host tables to enable:
//! - Testing the sender with fixed tables or mock resolvers
//! - An optional TTL cache in front of the table reads

use std::fs;
use std::net::IpAddr;
use std::time::Duration;

use moka::sync::Cache;
use pnet::util::MacAddr;
use tracing::debug;

use super::arp::ArpTable;
use super::route;
use crate::error::ResolveError;

const ROUTE_TABLE_PATH: &str = "/proc/net/route";
const NEIGHBOR_TABLE_PATH: &str = "/proc/net/arp";

/// Trait for link-layer address resolution.
pub trait LinkResolver: Send + Sync {
    /// Hardware address frames for `destination` must be sent to.
    fn resolve(&self, destination: IpAddr) -> Result<MacAddr, ResolveError>;
}

/// Source of the host route and neighbor tables, as text.
pub trait HostTables: Send + Sync {
    fn route_table(&self) -> Result<String, ResolveError>;
    fn neighbor_table(&self) -> Result<String, ResolveError>;
}

/// The Linux tables under `/proc/net`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcTables;

impl ProcTables {
    fn read(path: &str) -> Result<String, ResolveError> {
        fs::read_to_string(path).map_err(|e| ResolveError::TableUnavailable {
            path: path.to_owned(),
            reason: e.to_string(),
        })
    }
}

impl HostTables for ProcTables {
    fn route_table(&self) -> Result<String, ResolveError> {
        Self::read(ROUTE_TABLE_PATH)
    }

    fn neighbor_table(&self) -> Result<String, ResolveError> {
        Self::read(NEIGHBOR_TABLE_PATH)
    }
}

/// Resolver reading the host tables on each lookup.
///
/// Tables are read fresh for every destination unless a cache TTL is set, in
/// which case successful resolutions are reused until they expire.
pub struct TableResolver<T> {
    tables: T,
    interface: Option<String>,
    cache: Option<Cache<IpAddr, MacAddr>>,
}

impl<T: HostTables> TableResolver<T> {
    /// Create a resolver that only follows routes through `interface`.
    pub const fn new(tables: T, interface: Option<String>) -> Self {
        Self {
            tables,
            interface,
            cache: None,
        }
    }

    /// Cache successful resolutions for `ttl`.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = Some(Cache::builder().time_to_live(ttl).build());
        self
    }

    /// Next hop towards `destination`.
    pub fn next_hop(&self, destination: IpAddr) -> Result<IpAddr, ResolveError> {
        if destination.is_loopback() {
            return Ok(destination);
        }
        let routes = route::parse_route_table(&self.tables.route_table()?);
        route::next_hop(&routes, self.interface.as_deref(), destination)
    }

    fn lookup(&self, destination: IpAddr) -> Result<MacAddr, ResolveError> {
        let next_hop = self.next_hop(destination)?;
        let neighbors = ArpTable::parse(&self.tables.neighbor_table()?);
        let mac = neighbors
            .get(next_hop)
            .ok_or(ResolveError::NeighborNotFound {
                destination,
                next_hop,
            })?;

        debug!("Resolved {destination} via {next_hop} to {mac}");
        Ok(mac)
    }
}

impl<T: HostTables> LinkResolver for TableResolver<T> {
    fn resolve(&self, destination: IpAddr) -> Result<MacAddr, ResolveError> {
        let Some(cache) = &self.cache else {
            return self.lookup(destination);
        };

        if let Some(mac) = cache.get(&destination) {
            return Ok(mac);
        }
        let mac = self.lookup(destination)?;
        cache.insert(destination, mac);
        Ok(mac)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ROUTES: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000
eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF
";

    const NEIGHBORS: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         aa:bb:cc:dd:ee:01     *        eth0
192.168.1.20     0x1         0x2         aa:bb:cc:dd:ee:14     *        eth0
";

    /// Fixed in-memory tables that count route table reads.
    pub struct StaticTables {
        pub routes: String,
        pub neighbors: String,
        pub reads: AtomicUsize,
    }

    impl StaticTables {
        pub fn new(routes: &str, neighbors: &str) -> Self {
            Self {
                routes: routes.to_owned(),
                neighbors: neighbors.to_owned(),
                reads: AtomicUsize::new(0),
            }
        }
    }

    impl HostTables for StaticTables {
        fn route_table(&self) -> Result<String, ResolveError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.routes.clone())
        }

        fn neighbor_table(&self) -> Result<String, ResolveError> {
            Ok(self.neighbors.clone())
        }
    }

    /// Mock resolver with a fixed address map.
    #[derive(Default)]
    pub struct MockResolver {
        pub entries: HashMap<IpAddr, MacAddr>,
    }

    impl MockResolver {
        pub fn new(entries: impl IntoIterator<Item = (IpAddr, MacAddr)>) -> Self {
            Self {
                entries: entries.into_iter().collect(),
            }
        }
    }

    impl LinkResolver for MockResolver {
        fn resolve(&self, destination: IpAddr) -> Result<MacAddr, ResolveError> {
            self.entries
                .get(&destination)
                .copied()
                .ok_or(ResolveError::RouteNotFound(destination))
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn should_resolve_directly_connected_destination() {
        let resolver = TableResolver::new(StaticTables::new(ROUTES, NEIGHBORS), None);
        assert_eq!(
            resolver.resolve(ip("192.168.1.20")).unwrap(),
            MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x14)
        );
    }

    #[test]
    fn should_resolve_remote_destination_through_gateway() {
        let resolver = TableResolver::new(StaticTables::new(ROUTES, NEIGHBORS), None);
        assert_eq!(resolver.next_hop(ip("8.8.8.8")).unwrap(), ip("192.168.1.1"));
        assert_eq!(
            resolver.resolve(ip("8.8.8.8")).unwrap(),
            MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01)
        );
    }

    #[test]
    fn should_report_missing_neighbor() {
        let resolver = TableResolver::new(StaticTables::new(ROUTES, NEIGHBORS), None);
        assert_eq!(
            resolver.resolve(ip("192.168.1.99")),
            Err(ResolveError::NeighborNotFound {
                destination: ip("192.168.1.99"),
                next_hop: ip("192.168.1.99"),
            })
        );
    }

    #[test]
    fn should_report_unknown_interface() {
        let resolver = TableResolver::new(
            StaticTables::new(ROUTES, NEIGHBORS),
            Some("wlan0".to_owned()),
        );
        assert_eq!(
            resolver.resolve(ip("8.8.8.8")),
            Err(ResolveError::InterfaceNotFound("wlan0".into()))
        );
    }

    #[test]
    fn should_not_read_route_table_for_loopback() {
        let resolver = TableResolver::new(StaticTables::new(ROUTES, NEIGHBORS), None);
        assert_eq!(resolver.next_hop(ip("127.0.0.1")).unwrap(), ip("127.0.0.1"));
        assert_eq!(resolver.tables.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn should_reread_tables_without_cache() {
        let resolver = TableResolver::new(StaticTables::new(ROUTES, NEIGHBORS), None);
        resolver.resolve(ip("8.8.8.8")).unwrap();
        resolver.resolve(ip("8.8.8.8")).unwrap();
        assert_eq!(resolver.tables.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn should_cache_only_successful_resolutions() {
        let resolver = TableResolver::new(StaticTables::new(ROUTES, NEIGHBORS), None)
            .with_cache_ttl(Duration::from_secs(60));

        resolver.resolve(ip("8.8.8.8")).unwrap();
        resolver.resolve(ip("8.8.8.8")).unwrap();
        assert_eq!(resolver.tables.reads.load(Ordering::SeqCst), 1);

        assert!(resolver.resolve(ip("192.168.1.99")).is_err());
        assert!(resolver.resolve(ip("192.168.1.99")).is_err());
        assert_eq!(resolver.tables.reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn should_report_unreadable_tables() {
        struct Missing;
        impl HostTables for Missing {
            fn route_table(&self) -> Result<String, ResolveError> {
                Err(ResolveError::TableUnavailable {
                    path: ROUTE_TABLE_PATH.into(),
                    reason: "missing".into(),
                })
            }
            fn neighbor_table(&self) -> Result<String, ResolveError> {
                unreachable!()
            }
        }

        let resolver = TableResolver::new(Missing, None);
        assert!(matches!(
            resolver.resolve(ip("8.8.8.8")),
            Err(ResolveError::TableUnavailable { .. })
        ));
    }
}
