//! # ASF (Advanced Systems Format)
//!
//! Muxing of audio and video buffers into ASF files or streams, and parsing
//! of ASF headers and data packets.
//!
//! ## Muxing
//!
//! ```rust
//! use asfio::av::{CodecParams, CodecType, Packet};
//! use asfio::config::MuxerSettings;
//! use asfio::format::asf::{AsfMuxer, MemorySink};
//! use asfio::format::Muxer;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut muxer = AsfMuxer::new(MemorySink::new(), MuxerSettings::default())?;
//! muxer.write_header(&[CodecParams::audio(CodecType::Wma { version: 2 }, 2, 44100)])?;
//!
//! let packet = Packet::new(vec![0u8; 512])
//!     .with_pts(Duration::ZERO)
//!     .with_duration(Duration::from_millis(20))
//!     .with_key_flag(true);
//! muxer.write_packet(&packet)?;
//! muxer.write_trailer()?;
//!
//! assert_eq!(muxer.total_data_packets(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Parsing
//!
//! [`AsfParse`] reads a whole stream; [`parse_headers`] and [`parse_packet`]
//! work on single buffers.

pub mod demuxer;
pub mod header;
pub mod muxer;
pub mod parser;
pub mod payload;
pub mod sink;
pub mod stream;
pub mod tags;
pub mod types;

pub use self::demuxer::{AsfParse, ParsedUnit};
pub use self::muxer::{AsfMuxer, MuxState};
pub use self::parser::{parse_headers, parse_packet, parse_payloads, AsfFileInfo, PacketInfo, PayloadRecord};
pub use self::sink::{MemorySink, MuxSink, OutputBuffer, WriterSink};
pub use self::stream::{StreamDescriptor, StreamKind};
pub use self::tags::{TagList, TagMergeMode, TagValue};
pub use self::types::{AsfObject, FieldType, Guid};
