//! ASF over RTP.
//!
//! The payloader takes the muxer output (one header buffer, then fixed size
//! data packets) and slices every data packet into RTP packets, each one
//! starting with an 8 byte payload header:
//!
//! ```text
//!  0                   1                   2                   3
//! |S|L|R|D|I|res  |        length or offset (24 bits)             |
//! |               relative timestamp (32 bits, R set)             |
//! ```
//!
//! With `L` set the 24-bit field is the length of the ASF packet data that
//! follows, otherwise it is the offset of this fragment in the ASF packet.
//! Padding is stripped before sending and restored by the depayloader.

use super::{JitterBuffer, RTPError, RTPPacket};
use crate::config::{default_rtp_settings, RtpSettings};
use crate::error::{AsfError, FlowError, Result};
use crate::format::asf::parser::{parse_headers, parse_packet, AsfFileInfo};
use crate::format::asf::sink::{MuxSink, OutputBuffer};
use crate::format::asf::types::{write_var_size_field, AsfObject, FieldType, ASF_DATA_OBJECT_SIZE};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::time::Duration;

pub const RTP_HEADER_SIZE: usize = 12;
pub const ASF_RTP_HEADER_SIZE: usize = 8;
/// Timestamps are ASF send times in milliseconds
pub const ASF_RTP_CLOCK_RATE: u32 = 1000;

const FLAG_KEYFRAME: u8 = 0x80;
const FLAG_LENGTH: u8 = 0x40;
const FLAG_RELATIVE_TIMESTAMP: u8 = 0x20;
const FLAG_DURATION: u8 = 0x10;
const FLAG_LOCATION_ID: u8 = 0x08;

const JITTER_BUFFER_SIZE: usize = 256;

/// Values for the SDP `a=fmtp` line of an ASF session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsfRtpConfig {
    /// Size of the ASF data packets
    pub maxps: u32,
    /// Base64 of the header object and the data object header
    pub config: String,
}

impl AsfRtpConfig {
    pub fn to_fmtp(&self, payload_type: u8) -> String {
        format!("a=fmtp:{} maxps={};config={}", payload_type, self.maxps, self.config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayState {
    Headers,
    Data,
    End,
}

/// Turns ASF headers and data packets into RTP packets.
pub struct AsfRtpPayloader {
    settings: RtpSettings,
    ssrc: u32,
    sequence_number: u16,
    state: PayState,
    file_info: AsfFileInfo,
    headers: Option<Bytes>,
    first_send_time: Option<u32>,
    packets_count: u64,
    pending: VecDeque<RTPPacket>,
}

impl AsfRtpPayloader {
    pub fn new(settings: RtpSettings) -> Result<Self> {
        if settings.mtu <= RTP_HEADER_SIZE + ASF_RTP_HEADER_SIZE {
            return Err(AsfError::Config(format!("mtu {} is too small", settings.mtu)));
        }
        Ok(Self {
            ssrc: settings.ssrc.unwrap_or_else(rand::random),
            sequence_number: rand::random(),
            settings,
            state: PayState::Headers,
            file_info: AsfFileInfo::default(),
            headers: None,
            first_send_time: None,
            packets_count: 0,
            pending: VecDeque::new(),
        })
    }

    pub fn with_default_settings() -> Result<Self> {
        Self::new(default_rtp_settings())
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number of the next RTP packet
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn set_sequence_number(&mut self, sequence_number: u16) {
        self.sequence_number = sequence_number;
    }

    pub fn file_info(&self) -> Option<&AsfFileInfo> {
        self.headers.as_ref().map(|_| &self.file_info)
    }

    /// Session description values, available once the headers were seen
    pub fn caps_config(&self) -> Option<AsfRtpConfig> {
        self.headers.as_ref().map(|headers| AsfRtpConfig {
            maxps: self.file_info.packet_size,
            config: BASE64.encode(headers),
        })
    }

    /// Handles one buffer of the ASF stream. The first buffer must hold the
    /// header object and the data object header together.
    pub fn handle_buffer(&mut self, buffer: &OutputBuffer) -> Result<Vec<RTPPacket>> {
        match self.state {
            PayState::Headers => {
                self.handle_headers(&buffer.data)?;
                Ok(Vec::new())
            }
            PayState::Data => self.handle_packet(buffer),
            PayState::End => {
                debug!("Dropping buffer, all packets were sent");
                Err(AsfError::Flow(FlowError::Eos))
            }
        }
    }

    fn handle_headers(&mut self, data: &Bytes) -> Result<()> {
        let info = parse_headers(data)?;
        let header_size = usize::try_from(info.header_size)
            .ok()
            .filter(|size| size.checked_add(ASF_DATA_OBJECT_SIZE).is_some())
            .ok_or_else(|| AsfError::InvalidData(format!("header size {}", info.header_size)))?;
        let headers_end = header_size + ASF_DATA_OBJECT_SIZE;
        if data.len() < headers_end || !AsfObject::Data.guid().matches(&data[header_size..]) {
            return Err(AsfError::InvalidData(
                "headers and data object must arrive in one buffer".into(),
            ));
        }
        debug!(
            "Headers parsed: packet size {}, {} packets, broadcast {}",
            info.packet_size, info.packets_count, info.broadcast
        );
        self.file_info = info;
        self.headers = Some(data.slice(..headers_end));
        self.state = if !info.broadcast && info.packets_count == 0 {
            PayState::End
        } else {
            PayState::Data
        };
        Ok(())
    }

    fn handle_packet(&mut self, buffer: &OutputBuffer) -> Result<Vec<RTPPacket>> {
        let keyframe = !buffer.delta_unit;
        let mut data = buffer.data.to_vec();
        let file_packet_size = self.file_info.packet_size;
        let info = parse_packet(&data, Some(keyframe), file_packet_size)?;

        // padding is not sent
        let offset = info.padding_field_offset();
        write_field(&mut data, offset, info.padding_field_type, 0)?;
        let info_after = parse_packet(&data, Some(keyframe), 0)?;
        trace!("packet after clearing padding: {:?}", info_after);

        let packet_size = if file_packet_size == 0 {
            data.len() as u32
        } else {
            file_packet_size
        };
        let useful = if info.padding == 0 {
            data.len()
        } else if info.packet_size == packet_size {
            packet_size.saturating_sub(info.padding) as usize
        } else {
            info.packet_size as usize
        };
        if useful > data.len() {
            return Err(AsfError::InvalidData(format!(
                "packet declares {} bytes but has {}",
                useful,
                data.len()
            )));
        }

        let first_send_time = *self.first_send_time.get_or_insert(info.send_time);
        let relative_ts = info.send_time.wrapping_sub(first_send_time);
        let capacity = self.settings.mtu - RTP_HEADER_SIZE - ASF_RTP_HEADER_SIZE;

        let mut packets = Vec::with_capacity(useful / capacity + 1);
        let mut offset = 0;
        while offset < useful {
            let len = capacity.min(useful - offset);
            let mut flags = FLAG_RELATIVE_TIMESTAMP;
            if info.has_keyframe {
                flags |= FLAG_KEYFRAME;
            }
            let field = if len == useful {
                flags |= FLAG_LENGTH;
                useful
            } else {
                offset
            };

            let mut payload = BytesMut::with_capacity(ASF_RTP_HEADER_SIZE + len);
            payload.put_u8(flags);
            payload.put_uint(field as u64, 3);
            payload.put_u32(relative_ts);
            payload.put_slice(&data[offset..offset + len]);
            offset += len;

            packets.push(RTPPacket::new(
                self.settings.payload_type,
                self.sequence_number,
                info.send_time,
                self.ssrc,
                offset == useful,
                payload.freeze(),
            ));
            self.sequence_number = self.sequence_number.wrapping_add(1);
        }
        trace!(
            "ASF packet of {} bytes sent in {} RTP packets",
            useful,
            packets.len()
        );

        self.packets_count += 1;
        if !self.file_info.broadcast && self.packets_count >= self.file_info.packets_count {
            debug!("Last packet ({}) sent", self.packets_count);
            self.state = PayState::End;
        }
        Ok(packets)
    }

    /// RTP packets produced while used as a [`MuxSink`]
    pub fn take_packets(&mut self) -> Vec<RTPPacket> {
        self.pending.drain(..).collect()
    }
}

/// Lets a muxer write straight into the payloader. The output is not
/// seekable, so the muxer switches to streamable mode.
impl MuxSink for AsfRtpPayloader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn push(&mut self, buffer: OutputBuffer) -> Result<()> {
        let packets = self.handle_buffer(&buffer)?;
        self.pending.extend(packets);
        Ok(())
    }

    fn seek(&mut self, _position: u64) -> Result<()> {
        Err(AsfError::Seek("RTP output is not seekable".into()))
    }

    fn end_of_stream(&mut self) -> Result<()> {
        debug!("End of stream after {} packets", self.packets_count);
        Ok(())
    }
}

fn write_field(data: &mut [u8], offset: usize, field_type: FieldType, value: u32) -> Result<()> {
    let mut field = BytesMut::with_capacity(4);
    write_var_size_field(&mut field, field_type, value);
    let end = offset + field.len();
    if end > data.len() {
        return Err(AsfError::InvalidData("padding field out of the packet".into()));
    }
    data[offset..end].copy_from_slice(&field);
    Ok(())
}

/// Fragment being reassembled
#[derive(Debug)]
struct Fragment {
    data: BytesMut,
    keyframe: bool,
    timestamp: u32,
}

/// Rebuilds ASF data packets from RTP packets.
pub struct AsfRtpDepayloader {
    maxps: u32,
    headers: Bytes,
    jitter: JitterBuffer,
    fragment: Option<Fragment>,
    discont: bool,
}

impl AsfRtpDepayloader {
    /// Builds a depayloader from the base64 `config` of the session
    pub fn from_config(config: &str) -> Result<Self> {
        let headers = BASE64
            .decode(config.trim())
            .map_err(|e| AsfError::Config(format!("invalid config: {}", e)))?;
        let info = parse_headers(&headers)?;
        if info.packet_size == 0 {
            return Err(AsfError::Config("config does not declare a packet size".into()));
        }
        debug!("Depayloading ASF packets of {} bytes", info.packet_size);
        Ok(Self {
            maxps: info.packet_size,
            headers: Bytes::from(headers),
            jitter: JitterBuffer::new(JITTER_BUFFER_SIZE),
            fragment: None,
            discont: false,
        })
    }

    pub fn maxps(&self) -> u32 {
        self.maxps
    }

    /// Header object and data object header decoded from the config
    pub fn headers(&self) -> &Bytes {
        &self.headers
    }

    /// Takes one RTP packet, returns the ASF packets completed in order.
    pub fn push(&mut self, packet: RTPPacket) -> Result<Vec<OutputBuffer>> {
        let mut out = Vec::new();
        match self.jitter.push(packet.clone()) {
            Ok(()) => {}
            Err(RTPError::SequenceWrapped) => {
                for queued in self.jitter.drain() {
                    self.process(queued, &mut out)?;
                }
                self.jitter.push(packet)?;
            }
            Err(e) => return Err(e.into()),
        }
        while let Some(next) = self.jitter.pop() {
            self.process(next, &mut out)?;
        }
        Ok(out)
    }

    /// Processes whatever is still buffered, skipping over lost packets.
    pub fn flush(&mut self) -> Result<Vec<OutputBuffer>> {
        let mut out = Vec::new();
        for queued in self.jitter.drain() {
            self.process(queued, &mut out)?;
        }
        Ok(out)
    }

    fn process(&mut self, packet: RTPPacket, out: &mut Vec<OutputBuffer>) -> Result<()> {
        let mut payload = packet.payload.clone();
        while payload.has_remaining() {
            if payload.remaining() < 4 {
                return Err(AsfError::InvalidData("truncated ASF payload header".into()));
            }
            let flags = payload.get_u8();
            let field = payload.get_uint(3) as usize;
            let mut optional = 0;
            for flag in [FLAG_RELATIVE_TIMESTAMP, FLAG_DURATION, FLAG_LOCATION_ID] {
                if flags & flag != 0 {
                    optional += 4;
                }
            }
            if payload.remaining() < optional {
                return Err(AsfError::InvalidData("truncated ASF payload header".into()));
            }
            payload.advance(optional);
            let keyframe = flags & FLAG_KEYFRAME != 0;

            if flags & FLAG_LENGTH != 0 {
                if payload.remaining() < field {
                    return Err(AsfError::InvalidData(format!(
                        "ASF payload declares {} bytes, {} left",
                        field,
                        payload.remaining()
                    )));
                }
                if self.fragment.take().is_some() {
                    warn!("Dropping incomplete ASF packet");
                }
                let data = payload.split_to(field);
                out.push(self.finish(&data, keyframe, packet.timestamp)?);
                continue;
            }

            // fragment: the rest of the payload belongs to one ASF packet
            let data = payload.split_to(payload.remaining());
            if field == 0 {
                if self.fragment.is_some() {
                    warn!("Dropping incomplete ASF packet");
                }
                self.fragment = Some(Fragment {
                    data: BytesMut::new(),
                    keyframe,
                    timestamp: packet.timestamp,
                });
            }
            match self.fragment.as_mut() {
                Some(fragment) if fragment.data.len() == field => {
                    fragment.data.put_slice(&data);
                }
                _ => {
                    debug!("Discontinuity at offset {}, dropping fragment", field);
                    self.fragment = None;
                    self.discont = true;
                    continue;
                }
            }
            if packet.marker {
                if let Some(fragment) = self.fragment.take() {
                    out.push(self.finish(&fragment.data, fragment.keyframe, fragment.timestamp)?);
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self, data: &[u8], keyframe: bool, timestamp: u32) -> Result<OutputBuffer> {
        let maxps = self.maxps as usize;
        if data.len() > maxps {
            return Err(AsfError::InvalidData(format!(
                "ASF packet of {} bytes exceeds maxps {}",
                data.len(),
                maxps
            )));
        }
        let mut packet = data.to_vec();
        packet.resize(maxps, 0);

        let padding = maxps - data.len();
        if padding > 0 {
            let info = parse_packet(&packet, Some(keyframe), 0)?;
            if info.padding_field_type.is_none() {
                warn!("Packet has no padding field, cannot store {} padding bytes", padding);
            } else {
                write_field(
                    &mut packet,
                    info.padding_field_offset(),
                    info.padding_field_type,
                    padding as u32,
                )?;
            }
        }

        if self.discont {
            debug!("Resuming after a discontinuity");
            self.discont = false;
        }
        let timestamp = Duration::from_millis(timestamp as u64 * 1000 / ASF_RTP_CLOCK_RATE as u64);
        Ok(OutputBuffer::new(packet)
            .with_timestamp(Some(timestamp))
            .with_delta_flag(!keyframe))
    }
}
