//! pcap-scanner - Replay recorded packets against target ranges.
//!
//! pcap-scanner reads reference packets from a pcap archive, rewrites their
//! addresses for every target, injects the resulting frames on a local
//! interface and records which targets answered.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`target`]: Target specification expansion (CIDR, ranges, addresses)
//! - [`template`]: Packet templates loaded from a pcap archive
//! - [`network`]: Frame construction, address resolution, injection and capture
//! - [`session`]: Flows shared between the sender and the listener
//! - [`sender`]: Probe sending with optional rate limiting
//! - [`listener`]: Response matching with a drain window
//! - [`error`]: Error types
//!
//! # Testing
//!
//! Injection, capture, resolution and archive output sit behind traits so
//! every component can be exercised without network access:
//!
//! ```rust
//! use pcap_scanner::session::{SessionKey, SessionTracker};
//! use pnet::packet::ip::IpNextHeaderProtocols;
//!
//! let sessions = SessionTracker::new();
//! let sent = SessionKey::new(
//!     "10.0.0.1".parse().unwrap(),
//!     "10.0.0.2".parse().unwrap(),
//!     40000,
//!     53,
//!     IpNextHeaderProtocols::Udp,
//! );
//! sessions.record(sent);
//!
//! let reply = SessionKey::new(
//!     "10.0.0.2".parse().unwrap(),
//!     "10.0.0.1".parse().unwrap(),
//!     53,
//!     40000,
//!     IpNextHeaderProtocols::Udp,
//! );
//! assert!(sessions.contains(&reply.mirrored()));
//! ```

pub mod config;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod network;
pub mod sender;
pub mod session;
pub mod target;
pub mod template;

pub use config::Config;
pub use error::{Error, Result};
