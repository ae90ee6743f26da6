//! Error types for the packet scanner.

use std::io;
use std::net::IpAddr;

use thiserror::Error;

/// Main error type for scanner operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Network-related errors raised while setting up the workers.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no suitable network interface found")]
    NoInterface,

    #[error("interface {0} has no hardware address")]
    NoHardwareAddress(String),

    #[error("interface {0} has no usable IPv4 address")]
    NoSourceAddress(String),

    #[error("failed to open datalink channel: {0}")]
    ChannelOpen(String),

    #[error("unsupported channel type")]
    UnsupportedChannel,

    #[error("failed to open capture: {0}")]
    CaptureOpen(String),

    #[error("failed to compile capture filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("failed to send frame: {0}")]
    SendFailed(String),
}

/// Target specification errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid target specification {spec:?}: {reason}")]
    InvalidSpec { spec: String, reason: &'static str },
}

/// Next-hop and hardware address resolution failures.
///
/// None of these are fatal: the sender skips the affected target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("interface {0} does not appear in the route table")]
    InterfaceNotFound(String),

    #[error("no route to {0}")]
    RouteNotFound(IpAddr),

    #[error("no neighbor entry for next hop {next_hop} (destination {destination})")]
    NeighborNotFound { destination: IpAddr, next_hop: IpAddr },

    #[error("failed to read {path}: {reason}")]
    TableUnavailable { path: String, reason: String },
}

/// Frame construction failures, scoped to a single (target, template) pair.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("template has neither an IPv4 nor an IPv6 layer")]
    NoNetworkLayer,

    #[error("address family of {source_addr} -> {destination} does not match the template")]
    AddressFamilyMismatch {
        source_addr: IpAddr,
        destination: IpAddr,
    },

    #[error("{field} of {len} bytes does not fit in its header field")]
    TooLarge { field: &'static str, len: usize },

    #[error("malformed {0} header")]
    Malformed(&'static str),
}

/// Packet archive errors.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open archive {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create archive {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid pcap archive: {0}")]
    Format(#[from] pcap_file::PcapError),

    #[error("packet references undeclared interface {0}")]
    UnknownInterface(u32),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
