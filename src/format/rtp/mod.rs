//! # Real-time Transport Protocol (RTP)
//!
//! RTP packet handling used to carry ASF streams:
//!
//! - RTP packet parsing and serialization
//! - Jitter buffer for handling out-of-order packets
//! - ASF payloading and depayloading (see [`asf`])
//!
//! ## Example: Creating and Parsing RTP Packets
//!
//! ```rust
//! use asfio::format::rtp::RTPPacket;
//! use bytes::Bytes;
//!
//! let payload = Bytes::from(vec![1, 2, 3, 4]);
//! let packet = RTPPacket::new(
//!     96,            // Payload type
//!     1000,          // Sequence number
//!     5000,          // Timestamp
//!     0x12345678,    // SSRC
//!     true,          // Marker bit
//!     payload,
//! );
//!
//! let raw = packet.to_bytes();
//! let parsed = RTPPacket::parse(&raw).unwrap();
//! assert_eq!(parsed.sequence_number, 1000);
//! assert_eq!(parsed.payload, packet.payload);
//! ```
//!
//! ## Example: Using Jitter Buffer
//!
//! ```rust
//! use asfio::format::rtp::{JitterBuffer, RTPPacket};
//! use bytes::Bytes;
//!
//! // Create jitter buffer with size 32 packets
//! let mut jitter = JitterBuffer::new(32);
//!
//! // Add packets (potentially out of order)
//! let packet = RTPPacket::new(96, 1000, 5000, 0x12345678, false, Bytes::from(vec![1, 2, 3]));
//! jitter.push(packet).unwrap();
//!
//! // Get packets in sequence
//! while let Some(packet) = jitter.pop() {
//!     println!("Processing packet {}", packet.sequence_number);
//! }
//! ```

/// ASF over RTP
pub mod asf;

use crate::error::AsfError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use thiserror::Error;

pub const RTP_VERSION: u8 = 2;
const RTP_FIXED_HEADER_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum RTPError {
    /// The packet data is malformed or incomplete
    #[error("Invalid RTP packet")]
    InvalidPacket,

    /// The jitter buffer is full
    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Sequence number wrapped")]
    SequenceWrapped,
}

pub type Result<T> = std::result::Result<T, RTPError>;

impl From<RTPError> for AsfError {
    fn from(err: RTPError) -> Self {
        AsfError::InvalidData(format!("rtp: {}", err))
    }
}

/// One RTP packet. ASF fragments travel in `payload`.
#[derive(Debug, Clone)]
pub struct RTPPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    /// Media timestamp, milliseconds for ASF
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    /// Header extension as (profile, data)
    pub extension_data: Option<(u16, Bytes)>,
    pub payload: Bytes,
}

impl RTPPacket {
    pub fn new(
        payload_type: u8,
        sequence_number: u16,
        timestamp: u32,
        ssrc: u32,
        marker: bool,
        payload: Bytes,
    ) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension_data: None,
            payload,
        }
    }

    /// Parses a datagram. Trailing padding is removed from the payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_FIXED_HEADER_SIZE {
            return Err(RTPError::InvalidPacket);
        }
        let mut buf = data;
        let first = buf.get_u8();
        let second = buf.get_u8();
        if first >> 6 != RTP_VERSION {
            return Err(RTPError::InvalidPacket);
        }
        let padding = first & 0x20 != 0;
        let extension = first & 0x10 != 0;
        let csrc_count = first & 0x0F;
        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < 4 * csrc_count as usize {
            return Err(RTPError::InvalidPacket);
        }
        let csrc = (0..csrc_count).map(|_| buf.get_u32()).collect();

        let extension_data = if extension {
            if buf.remaining() < 4 {
                return Err(RTPError::InvalidPacket);
            }
            let profile = buf.get_u16();
            let len = buf.get_u16() as usize * 4;
            if buf.remaining() < len {
                return Err(RTPError::InvalidPacket);
            }
            let ext = Bytes::copy_from_slice(&buf[..len]);
            buf.advance(len);
            Some((profile, ext))
        } else {
            None
        };

        let payload_len = if padding {
            let padding_len = buf.last().copied().unwrap_or(0) as usize;
            if padding_len == 0 || padding_len > buf.len() {
                return Err(RTPError::InvalidPacket);
            }
            buf.len() - padding_len
        } else {
            buf.len()
        };

        Ok(Self {
            version: RTP_VERSION,
            padding,
            extension,
            csrc_count,
            marker: second & 0x80 != 0,
            payload_type: second & 0x7F,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_data,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }

    /// Serializes the packet. Padding is not reproduced; the payload is
    /// written as is and the padding bit is left unset.
    pub fn to_bytes(&self) -> Bytes {
        let ext_len = self.extension_data.as_ref().map_or(0, |(_, data)| 4 + data.len());
        let mut buf = BytesMut::with_capacity(
            RTP_FIXED_HEADER_SIZE + 4 * self.csrc.len() + ext_len + self.payload.len(),
        );

        let extension = self.extension_data.is_some();
        buf.put_u8((self.version << 6) | ((extension as u8) << 4) | (self.csrc.len() as u8 & 0x0f));
        buf.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in self.csrc.iter().take(15) {
            buf.put_u32(*csrc);
        }
        if let Some((profile, data)) = &self.extension_data {
            buf.put_u16(*profile);
            buf.put_u16((data.len() / 4) as u16);
            buf.put_slice(&data[..data.len() / 4 * 4]);
        }
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Reorders RTP packets by sequence number.
///
/// `pop` only hands out the packet following the last one popped; `drain`
/// gives up on gaps.
#[derive(Debug)]
pub struct JitterBuffer {
    packets: BTreeMap<u16, RTPPacket>,
    min_seq: u16,
    max_seq: u16,
    buffer_size: usize,
    /// Sequence number following the last popped packet
    next_seq: Option<u16>,
}

impl JitterBuffer {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            packets: BTreeMap::new(),
            min_seq: 0,
            max_seq: 0,
            buffer_size,
            next_seq: None,
        }
    }

    /// Queues a packet. Fails when the buffer is full, or when the sequence
    /// numbers wrap while packets are queued.
    pub fn push(&mut self, packet: RTPPacket) -> Result<()> {
        let seq = packet.sequence_number;

        if self.packets.is_empty() {
            // keep waiting for the expected packet unless this one is older
            self.min_seq = match self.next_seq {
                Some(next) if seq.wrapping_sub(next) < 0x8000 => next,
                _ => seq,
            };
            self.max_seq = seq;
            self.packets.insert(seq, packet);
            return Ok(());
        }

        if (seq < 0x4000 && self.max_seq > 0xC000) || (seq > 0xC000 && self.min_seq < 0x4000) {
            return Err(RTPError::SequenceWrapped);
        }
        if self.packets.len() >= self.buffer_size {
            return Err(RTPError::BufferOverflow);
        }

        self.min_seq = self.min_seq.min(seq);
        self.max_seq = self.max_seq.max(seq);
        self.packets.insert(seq, packet);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<RTPPacket> {
        let (&seq, _) = self.packets.first_key_value()?;
        if seq != self.min_seq {
            return None;
        }
        let packet = self.packets.remove(&seq)?;
        self.min_seq = self.min_seq.wrapping_add(1);
        self.next_seq = Some(self.min_seq);
        Some(packet)
    }

    /// Removes every buffered packet in sequence order, gaps included
    pub fn drain(&mut self) -> Vec<RTPPacket> {
        let packets = std::mem::take(&mut self.packets);
        self.min_seq = 0;
        self.max_seq = 0;
        self.next_seq = None;
        packets.into_values().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests;
