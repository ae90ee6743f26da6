//! Network-related modules for frame injection, capture and construction.

pub mod archive;
mod arp;
mod buffer;
mod capture;
pub mod layers;
mod packet;
mod resolver;
pub mod route;

pub use archive::{ArchiveReader, ArchiveRecord, FrameSink, PcapFileSink};
pub use arp::{ArpTable, HostInfo};
pub use buffer::{BufferPool, PooledBuffer};
pub use capture::{
    CapturedFrame, PacketCapture, PacketSender, PcapCapture, PnetSender, SNAPSHOT_LEN,
    find_interface, interface_addresses, response_filter,
};
pub use packet::FrameBuilder;
pub use resolver::{HostTables, LinkResolver, ProcTables, TableResolver};

#[cfg(test)]
pub use capture::tests::{MockCapture, MockSender};
#[cfg(test)]
pub use resolver::tests::{MockResolver, StaticTables};
