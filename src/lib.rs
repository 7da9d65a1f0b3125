#![doc(html_root_url = "https://docs.rs/asfio/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # asfio - Advanced Systems Format toolkit
//!
//! `asfio` writes and reads ASF (the container behind `.wma` and `.wmv`
//! files) and carries ASF data packets over RTP.
//!
//! ## Features
//!
//! - ASF muxer for WMA, MP3, WMV and FOURCC described video streams, to a
//!   seekable file (with simple index and finalized header) or as a live
//!   stream
//! - Stream and global metadata tags
//! - Header and data packet parsers, and a stream splitter ([`format::asf::AsfParse`])
//! - ASF RTP payloader and depayloader
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! asfio = "0.1.0"
//! ```
//!
//! ### Writing a file
//!
//! ```rust,no_run
//! use asfio::av::{CodecParams, CodecType, Packet};
//! use asfio::config::MuxerSettings;
//! use asfio::format::asf::{AsfMuxer, WriterSink};
//! use asfio::format::Muxer;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = std::fs::File::create("out.wmv")?;
//!     let mut muxer = AsfMuxer::new(WriterSink::new(file), MuxerSettings::default())?;
//!     muxer.write_header(&[CodecParams::video(CodecType::Wmv { version: Some(2) }, 320, 240)])?;
//!
//!     for i in 0..25u64 {
//!         let frame = Packet::new(vec![0u8; 2000])
//!             .with_pts(Duration::from_millis(i * 40))
//!             .with_duration(Duration::from_millis(40))
//!             .with_key_flag(i == 0);
//!         muxer.write_packet(&frame)?;
//!     }
//!     muxer.write_trailer()?;
//!     Ok(())
//! }
//! ```
//!
//! ### Streaming over RTP
//!
//! ```rust,no_run
//! use asfio::config::MuxerSettings;
//! use asfio::format::asf::AsfMuxer;
//! use asfio::format::rtp::asf::AsfRtpPayloader;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let payloader = AsfRtpPayloader::with_default_settings()?;
//!     let mut muxer = AsfMuxer::new(payloader, MuxerSettings::default())?;
//!     // ... add streams and push packets ...
//!     for packet in muxer.sink_mut().take_packets() {
//!         let _datagram = packet.to_bytes();
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: codec parameters and media packets handed to the muxer
//! - `format`: the ASF muxer and parsers, RTP packets and the ASF RTP mapping
//! - `config`: muxer and RTP settings, from defaults, environment or file
//! - `error`: [`AsfError`] and the [`Result`] alias
//! - `utils`: byte and bit readers

/// Audio/Video base types
pub mod av;

/// Error types and utilities
pub mod error;

/// Container and transport implementations (ASF, RTP)
pub mod format;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{AsfError, Result};
