//! Reading and writing pcap archives.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use pcap_file::DataLink;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use pcap_file::pcapng::{Block, PcapNgReader};

use super::capture::{CapturedFrame, SNAPSHOT_LEN};
use crate::error::ArchiveError;

/// Leading bytes of a pcapng Section Header Block, identical in both byte orders.
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// One packet read back from an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRecord {
    pub data: Vec<u8>,
    pub timestamp: Duration,
    pub link_type: DataLink,
}

/// Reader over a classic pcap or a pcapng archive.
///
/// Classic archives carry one link type in the file header. In pcapng each
/// packet takes the link type of the interface it was captured on.
pub enum ArchiveReader {
    Pcap {
        reader: PcapReader<BufReader<File>>,
        link_type: DataLink,
    },
    PcapNg {
        reader: PcapNgReader<BufReader<File>>,
        interfaces: Vec<DataLink>,
    },
}

impl ArchiveReader {
    /// Open an archive, picking the format from its magic number.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(|source| ArchiveError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let mut input = BufReader::new(file);
        let is_pcapng = input
            .fill_buf()
            .map_err(|source| ArchiveError::Open {
                path: path.display().to_string(),
                source,
            })?
            .starts_with(&PCAPNG_MAGIC);

        if is_pcapng {
            Ok(Self::PcapNg {
                reader: PcapNgReader::new(input)?,
                interfaces: Vec::new(),
            })
        } else {
            let reader = PcapReader::new(input)?;
            let link_type = reader.header().datalink;
            Ok(Self::Pcap { reader, link_type })
        }
    }

    /// Next packet record, skipping pcapng blocks that carry no packet.
    pub fn next_record(&mut self) -> Option<Result<ArchiveRecord, ArchiveError>> {
        match self {
            Self::Pcap { reader, link_type } => {
                let link_type = *link_type;
                reader.next_packet().map(|packet| {
                    let packet = packet?;
                    Ok(ArchiveRecord {
                        data: packet.data.into_owned(),
                        timestamp: packet.timestamp,
                        link_type,
                    })
                })
            }
            Self::PcapNg { reader, interfaces } => loop {
                let block = match reader.next_block()? {
                    Ok(block) => block,
                    Err(e) => return Some(Err(e.into())),
                };
                let (interface_id, timestamp, data) = match block {
                    Block::SectionHeader(_) => {
                        interfaces.clear();
                        continue;
                    }
                    Block::InterfaceDescription(interface) => {
                        interfaces.push(interface.linktype);
                        continue;
                    }
                    Block::EnhancedPacket(packet) => {
                        (packet.interface_id, packet.timestamp, packet.data)
                    }
                    Block::SimplePacket(packet) => (0, Duration::ZERO, packet.data),
                    _ => continue,
                };

                let index = usize::try_from(interface_id).unwrap_or(usize::MAX);
                return Some(match interfaces.get(index) {
                    Some(&link_type) => Ok(ArchiveRecord {
                        data: data.into_owned(),
                        timestamp,
                        link_type,
                    }),
                    None => Err(ArchiveError::UnknownInterface(interface_id)),
                });
            },
        }
    }
}

/// Name of the response archive for a run started at `started_at`.
pub fn output_file_name(started_at: DateTime<Local>) -> String {
    format!("capture_{}.pcap", started_at.format("%Y-%m-%d_%H-%M-%S"))
}

/// Destination for matched response frames.
pub trait FrameSink: Send {
    /// Append a frame, keeping its capture timestamp.
    fn write(&mut self, frame: &CapturedFrame) -> Result<(), ArchiveError>;
}

/// Response archive on disk.
///
/// Writes go straight to the file so that matches already recorded survive
/// an interrupted run.
pub struct PcapFileSink {
    writer: PcapWriter<File>,
    path: PathBuf,
}

impl PcapFileSink {
    /// Create the archive `dir/capture_<timestamp>.pcap`.
    ///
    /// The header advertises the capture snapshot length and `link_type`.
    pub fn create(
        dir: &Path,
        started_at: DateTime<Local>,
        link_type: DataLink,
    ) -> Result<Self, ArchiveError> {
        let path = dir.join(output_file_name(started_at));
        let file = File::create(&path).map_err(|source| ArchiveError::Create {
            path: path.display().to_string(),
            source,
        })?;

        let header = PcapHeader {
            snaplen: SNAPSHOT_LEN,
            datalink: link_type,
            ..PcapHeader::default()
        };
        let writer = PcapWriter::with_header(file, header)?;

        Ok(Self { writer, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for PcapFileSink {
    fn write(&mut self, frame: &CapturedFrame) -> Result<(), ArchiveError> {
        let packet = PcapPacket::new(frame.timestamp, frame.orig_len, &frame.data);
        self.writer.write_packet(&packet)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    use chrono::TimeZone;
    use pcap_file::pcapng::PcapNgWriter;
    use pcap_file::pcapng::blocks::enhanced_packet::EnhancedPacketBlock;
    use pcap_file::pcapng::blocks::interface_description::InterfaceDescriptionBlock;
    use pcap_file::pcapng::blocks::simple_packet::SimplePacketBlock;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn should_name_output_after_start_time() {
        let started_at = Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            output_file_name(started_at),
            "capture_2025-03-09_14-05-07.pcap"
        );
    }

    #[test]
    fn should_write_frames_readable_by_reader() {
        let dir = TempDir::new().unwrap();
        let mut sink = PcapFileSink::create(dir.path(), Local::now(), DataLink::ETHERNET).unwrap();
        assert!(sink.path().starts_with(dir.path()));

        let frame = CapturedFrame {
            timestamp: Duration::new(1_700_000_000, 250_000_000),
            orig_len: 60,
            data: vec![0xab; 60],
        };
        sink.write(&frame).unwrap();
        let path = sink.path().to_path_buf();
        drop(sink);

        let mut reader = PcapReader::new(File::open(&path).unwrap()).unwrap();
        assert_eq!(reader.header().snaplen, SNAPSHOT_LEN);
        assert_eq!(reader.header().datalink, DataLink::ETHERNET);
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.orig_len, 60);

        let mut archive = ArchiveReader::open(&path).unwrap();
        assert!(matches!(archive, ArchiveReader::Pcap { .. }));
        let record = archive.next_record().unwrap().unwrap();
        assert_eq!(
            record,
            ArchiveRecord {
                data: frame.data.clone(),
                timestamp: frame.timestamp,
                link_type: DataLink::ETHERNET,
            }
        );
        assert!(archive.next_record().is_none());
    }

    #[test]
    fn should_take_pcapng_link_type_from_packet_interface() {
        let file = NamedTempFile::new().unwrap();
        let mut writer = PcapNgWriter::new(File::create(file.path()).unwrap()).unwrap();
        for linktype in [DataLink::ETHERNET, DataLink::RAW] {
            writer
                .write_pcapng_block(InterfaceDescriptionBlock {
                    linktype,
                    snaplen: SNAPSHOT_LEN,
                    options: vec![],
                })
                .unwrap();
        }
        writer
            .write_pcapng_block(EnhancedPacketBlock {
                interface_id: 1,
                timestamp: Duration::from_secs(3),
                original_len: 4,
                data: Cow::Borrowed(&[1u8, 2, 3, 4][..]),
                options: vec![],
            })
            .unwrap();
        writer
            .write_pcapng_block(SimplePacketBlock {
                original_len: 2,
                data: Cow::Borrowed(&[5u8, 6][..]),
            })
            .unwrap();
        writer
            .write_pcapng_block(EnhancedPacketBlock {
                interface_id: 7,
                timestamp: Duration::ZERO,
                original_len: 1,
                data: Cow::Borrowed(&[0u8][..]),
                options: vec![],
            })
            .unwrap();
        drop(writer);

        let mut archive = ArchiveReader::open(file.path()).unwrap();
        assert!(matches!(archive, ArchiveReader::PcapNg { .. }));

        let first = archive.next_record().unwrap().unwrap();
        assert_eq!(first.data, vec![1, 2, 3, 4]);
        assert_eq!(first.link_type, DataLink::RAW);
        assert_eq!(first.timestamp, Duration::from_secs(3));

        let second = archive.next_record().unwrap().unwrap();
        assert_eq!(second.data, vec![5, 6]);
        assert_eq!(second.link_type, DataLink::ETHERNET);

        assert!(matches!(
            archive.next_record(),
            Some(Err(ArchiveError::UnknownInterface(7)))
        ));
        assert!(archive.next_record().is_none());
    }

    #[test]
    fn should_reject_unknown_format() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"neither pcap nor pcapng").unwrap();
        assert!(matches!(
            ArchiveReader::open(file.path()),
            Err(ArchiveError::Format(_))
        ));
    }

    #[test]
    fn should_fail_when_directory_is_missing() {
        let result = PcapFileSink::create(
            Path::new("/nonexistent/output"),
            Local::now(),
            DataLink::ETHERNET,
        );
        assert!(matches!(result, Err(ArchiveError::Create { .. })));
    }
}
