//! Parsing of ASF header objects and data packets.
//!
//! The functions here work on complete buffers: a header buffer that starts
//! with the header object, or exactly one data packet.

use super::types::*;
use crate::error::{AsfError, Result};
use crate::utils::{BitReader, ByteReader};
use bytes::Bytes;
use log::{debug, trace, warn};

/// What the header tells about the data packets that follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AsfFileInfo {
    pub packet_size: u32,
    pub packets_count: u64,
    pub broadcast: bool,
    /// Size of the header object
    pub header_size: u64,
}

/// Payload parsing information of one data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// Declared packet length, or the buffer length when the packet does not carry one
    pub packet_size: u32,
    pub padding: u32,
    /// Milliseconds
    pub send_time: u32,
    pub duration: u16,
    pub has_keyframe: bool,
    pub multiple_payloads: bool,
    pub packet_field_type: FieldType,
    pub padding_field_type: FieldType,
    pub sequence_field_type: FieldType,
    /// Widths of the per-payload fields
    pub prop_flags: u8,
    pub error_correction: bool,
    pub err_cor_len: u8,
    /// Where the payload data (or the payload count byte) starts
    pub payload_offset: usize,
}

impl PacketInfo {
    /// Offset of the padding length field inside the packet
    pub fn padding_field_offset(&self) -> usize {
        let ec = if self.error_correction {
            1 + self.err_cor_len as usize
        } else {
            0
        };
        ec + 2 + self.packet_field_type.len() + self.sequence_field_type.len()
    }

    pub fn replicated_data_length_type(&self) -> FieldType {
        FieldType::from_bits(self.prop_flags as u32)
    }

    pub fn offset_into_media_object_type(&self) -> FieldType {
        FieldType::from_bits((self.prop_flags >> 2) as u32)
    }

    pub fn media_object_number_type(&self) -> FieldType {
        FieldType::from_bits((self.prop_flags >> 4) as u32)
    }

    pub fn stream_number_type(&self) -> FieldType {
        FieldType::from_bits((self.prop_flags >> 6) as u32)
    }
}

/// Parses the payload parsing information of a data packet.
///
/// `keyframe_hint` is trusted when given; otherwise the payloads are walked
/// to find a keyframe. A non-zero `packet_size` must match the buffer length.
pub fn parse_packet(data: &[u8], keyframe_hint: Option<bool>, packet_size: u32) -> Result<PacketInfo> {
    if packet_size != 0 && data.len() != packet_size as usize {
        return Err(AsfError::InvalidData(format!(
            "packet of {} bytes, expected {}",
            data.len(),
            packet_size
        )));
    }

    let mut reader = ByteReader::new(data);
    let mut flags = reader.read_u8()?;
    let mut error_correction = false;
    let mut err_cor_len = 0u8;
    if flags & 0x80 != 0 {
        // length type bits must be unset
        if flags & 0x60 != 0 {
            return Err(AsfError::InvalidData(format!(
                "invalid error correction flags 0x{:02x}",
                flags
            )));
        }
        error_correction = true;
        err_cor_len = flags & 0x0F;
        reader.skip(err_cor_len as usize)?;
        flags = reader.read_u8()?;
    }

    let mut bits = BitReader::new(std::slice::from_ref(&flags));
    bits.skip_bits(1)?;
    let packet_field_type = FieldType::from_bits(bits.read_bits(2)?);
    let padding_field_type = FieldType::from_bits(bits.read_bits(2)?);
    let sequence_field_type = FieldType::from_bits(bits.read_bits(2)?);
    let multiple_payloads = bits.read_bit()?;

    let prop_flags = reader.read_u8()?;
    let packet_len = read_var_size_field(&mut reader, packet_field_type)?;
    read_var_size_field(&mut reader, sequence_field_type)?;
    let padding = read_var_size_field(&mut reader, padding_field_type)?;

    if packet_size != 0
        && !packet_field_type.is_none()
        && packet_len as u64 + padding as u64 != packet_size as u64
    {
        if packet_len == packet_size {
            warn!(
                "Packet length ({}) equals the packet size, accepting it despite padding {}",
                packet_len, padding
            );
        } else {
            return Err(AsfError::InvalidData(format!(
                "packet length {} + padding {} does not match packet size {}",
                packet_len, padding, packet_size
            )));
        }
    }

    let send_time = reader.read_u32_le()?;
    let duration = reader.read_u16_le()?;

    let mut info = PacketInfo {
        packet_size: if packet_field_type.is_none() {
            data.len() as u32
        } else {
            packet_len
        },
        padding,
        send_time,
        duration,
        has_keyframe: false,
        multiple_payloads,
        packet_field_type,
        padding_field_type,
        sequence_field_type,
        prop_flags,
        error_correction,
        err_cor_len,
        payload_offset: reader.position(),
    };

    info.has_keyframe = match keyframe_hint {
        Some(hint) => hint,
        None => find_keyframe(&mut reader, &info)?,
    };
    trace!("parsed packet {:?}", info);
    Ok(info)
}

fn find_keyframe(reader: &mut ByteReader<'_>, info: &PacketInfo) -> Result<bool> {
    if !info.multiple_payloads {
        return Ok(reader.read_u8()? & 0x80 != 0);
    }

    let count_byte = reader.read_u8()?;
    let count = count_byte & 0x3F;
    let length_type = FieldType::from_bits((count_byte >> 6) as u32);
    for _ in 0..count {
        if reader.read_u8()? & 0x80 != 0 {
            return Ok(true);
        }
        read_var_size_field(reader, info.media_object_number_type())?;
        read_var_size_field(reader, info.offset_into_media_object_type())?;
        let replicated = read_var_size_field(reader, info.replicated_data_length_type())?;
        // compressed payloads carry a 1 byte presentation time delta
        reader.skip(if replicated == 1 { 1 } else { replicated as usize })?;
        let payload_len = read_var_size_field(reader, length_type)?;
        reader.skip(payload_len as usize)?;
    }
    Ok(false)
}

/// Reads the header object at the start of `data`.
pub fn parse_headers(data: &[u8]) -> Result<AsfFileInfo> {
    let mut reader = ByteReader::new(data);
    let header_size = expect_object(&mut reader, AsfObject::Header)?;
    let children = reader.read_u32_le()?;
    reader.skip(2)?;

    let mut info = AsfFileInfo {
        header_size,
        ..AsfFileInfo::default()
    };
    for _ in 0..children {
        let guid = Guid::read_from(&mut reader)?;
        let size = reader.read_u64_le()?;
        if size < ASF_GUID_OBJSIZE_SIZE as u64 {
            return Err(AsfError::InvalidData(format!(
                "object {} declares size {}",
                guid, size
            )));
        }
        let body = (size - ASF_GUID_OBJSIZE_SIZE as u64) as usize;

        if guid == AsfObject::FileProperties.guid() {
            let start = reader.position();
            // file id, file size, creation time
            reader.skip(32)?;
            info.packets_count = reader.read_u64_le()?;
            // play duration, send duration, preroll
            reader.skip(24)?;
            let flags = reader.read_u32_le()?;
            info.broadcast = flags & ASF_FILE_FLAG_BROADCAST != 0;
            let min_packet_size = reader.read_u32_le()?;
            let max_packet_size = reader.read_u32_le()?;
            if min_packet_size != max_packet_size {
                warn!(
                    "Min and max packet size differ ({} and {}), using {}",
                    min_packet_size, max_packet_size, min_packet_size
                );
            }
            info.packet_size = min_packet_size;
            let consumed = reader.position() - start;
            reader.skip(body.checked_sub(consumed).ok_or_else(|| {
                AsfError::InvalidData("file properties object too small".into())
            })?)?;
        } else {
            trace!(
                "skipping {} object of {} bytes",
                AsfObject::from_guid(&guid).map_or("unknown", |o| o.info().name),
                size
            );
            reader.skip(body)?;
        }
    }

    debug!("Parsed headers: {:?}", info);
    Ok(info)
}

/// One payload read back from a data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadRecord {
    pub stream_number: u8,
    pub keyframe: bool,
    pub media_object_number: u32,
    pub offset_in_media_object: u32,
    pub replicated_data: Bytes,
    pub data: Bytes,
}

impl PayloadRecord {
    /// Size of the whole media object, from the replicated data
    pub fn media_object_size(&self) -> Option<u32> {
        self.replicated_u32(0)
    }

    /// Presentation time in milliseconds, from the replicated data
    pub fn presentation_time(&self) -> Option<u32> {
        self.replicated_u32(4)
    }

    fn replicated_u32(&self, at: usize) -> Option<u32> {
        let raw = self.replicated_data.get(at..at + 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

/// Splits a data packet into its payloads.
pub fn parse_payloads(packet: &Bytes, info: &PacketInfo) -> Result<Vec<PayloadRecord>> {
    let mut reader = ByteReader::new(packet);
    reader.skip(info.payload_offset)?;

    let (count, length_type) = if info.multiple_payloads {
        let count_byte = reader.read_u8()?;
        (
            (count_byte & 0x3F) as usize,
            Some(FieldType::from_bits((count_byte >> 6) as u32)),
        )
    } else {
        (1, None)
    };

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        let stream_byte = reader.read_u8()?;
        let media_object_number = read_var_size_field(&mut reader, info.media_object_number_type())?;
        let offset = read_var_size_field(&mut reader, info.offset_into_media_object_type())?;
        let replicated_len = read_var_size_field(&mut reader, info.replicated_data_length_type())?;

        let compressed = replicated_len == 1;
        let replicated_start = reader.position();
        reader.skip(replicated_len as usize)?;
        let replicated_data = packet.slice(replicated_start..reader.position());

        let payload_len = match length_type {
            Some(length_type) => read_var_size_field(&mut reader, length_type)? as usize,
            None => {
                let end = packet
                    .len()
                    .checked_sub(info.padding as usize)
                    .filter(|end| *end >= reader.position())
                    .ok_or_else(|| AsfError::InvalidData("padding larger than packet".into()))?;
                end - reader.position()
            }
        };
        let start = reader.position();
        reader.skip(payload_len)?;
        let data = packet.slice(start..start + payload_len);

        let stream_number = stream_byte & 0x7F;
        let keyframe = stream_byte & 0x80 != 0;
        if compressed {
            // offset holds the presentation time, replicated data the delta
            let delta = replicated_data.first().copied().unwrap_or(0) as u32;
            let mut sub = ByteReader::new(&data);
            let mut n = 0u32;
            while sub.remaining() > 0 {
                let len = sub.read_u8()? as usize;
                let sub_start = sub.position();
                sub.skip(len)?;
                let mut replicated = Vec::with_capacity(8);
                replicated.extend_from_slice(&(len as u32).to_le_bytes());
                replicated.extend_from_slice(&offset.wrapping_add(n.wrapping_mul(delta)).to_le_bytes());
                records.push(PayloadRecord {
                    stream_number,
                    keyframe,
                    media_object_number: media_object_number.wrapping_add(n),
                    offset_in_media_object: 0,
                    replicated_data: Bytes::from(replicated),
                    data: data.slice(sub_start..sub_start + len),
                });
                n += 1;
            }
        } else {
            records.push(PayloadRecord {
                stream_number,
                keyframe,
                media_object_number,
                offset_in_media_object: offset,
                replicated_data,
                data,
            });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use pretty_assertions::assert_eq;

    /// Multiple payload packet the way the muxer lays it out
    fn packet(payloads: &[(u8, &[u8])], size: usize) -> Vec<u8> {
        let mut body = BytesMut::new();
        for (i, (stream_byte, data)) in payloads.iter().enumerate() {
            body.put_u8(*stream_byte);
            body.put_u8(i as u8);
            body.put_u32_le(0);
            body.put_u8(8);
            body.put_u32_le(data.len() as u32);
            body.put_u32_le(1000 + i as u32);
            body.put_u16_le(data.len() as u16);
            body.put_slice(data);
        }
        let used = 13 + body.len();
        let mut buf = BytesMut::new();
        buf.put_u8(0x51);
        buf.put_u8(0x5D);
        buf.put_u16_le(used as u16);
        buf.put_u16_le((size - used) as u16);
        buf.put_u32_le(1234);
        buf.put_u16_le(0);
        buf.put_u8(0x80 | payloads.len() as u8);
        buf.put_slice(&body);
        buf.resize(size, 0);
        buf.to_vec()
    }

    #[test]
    fn test_parse_multiple_payload_packet() {
        let data = packet(&[(0x01, b"abc"), (0x82, b"defg")], 200);
        let info = parse_packet(&data, None, 200).unwrap();
        assert!(info.multiple_payloads);
        assert!(info.has_keyframe);
        assert_eq!(info.packet_field_type, FieldType::Word);
        assert_eq!(info.padding_field_type, FieldType::Word);
        assert_eq!(info.sequence_field_type, FieldType::None);
        assert_eq!(info.packet_size, 13 + 20 + 21);
        assert_eq!(info.padding, 200 - 54);
        assert_eq!(info.send_time, 1234);
        assert_eq!(info.payload_offset, 12);
        assert_eq!(info.padding_field_offset(), 4);

        let hinted = parse_packet(&data, Some(false), 0).unwrap();
        assert!(!hinted.has_keyframe);
    }

    #[test]
    fn test_walk_without_keyframe() {
        let data = packet(&[(0x01, b"abc"), (0x02, b"de")], 100);
        assert!(!parse_packet(&data, None, 100).unwrap().has_keyframe);
    }

    #[test]
    fn test_packet_size_mismatch() {
        let data = packet(&[(0x81, b"abc")], 100);
        assert!(matches!(
            parse_packet(&data, Some(true), 99),
            Err(AsfError::InvalidData(_))
        ));
    }

    #[test]
    fn test_packet_length_equal_to_packet_size_is_tolerated() {
        let mut data = packet(&[(0x81, b"abc")], 100);
        data[2..4].copy_from_slice(&100u16.to_le_bytes());
        let info = parse_packet(&data, None, 100).unwrap();
        assert_eq!(info.packet_size, 100);

        data[2..4].copy_from_slice(&50u16.to_le_bytes());
        assert!(parse_packet(&data, None, 100).is_err());
    }

    #[test]
    fn test_error_correction_prefix() {
        let inner = packet(&[(0x81, b"x")], 60);
        let mut data = vec![0x82, 0x00, 0x00];
        data.extend_from_slice(&inner[..57]);
        // packet length and padding are relative to the whole packet
        data[5..7].copy_from_slice(&(3 + 31u16).to_le_bytes());
        data[7..9].copy_from_slice(&(60 - 34u16).to_le_bytes());

        let info = parse_packet(&data, None, 60).unwrap();
        assert!(info.error_correction);
        assert_eq!(info.err_cor_len, 2);
        assert_eq!(info.payload_offset, 15);
        assert_eq!(info.padding_field_offset(), 7);
        assert_eq!(&data[7..9], &26u16.to_le_bytes());
        assert!(info.has_keyframe);

        // the opaque bit is ignored, length type bits are not
        data[0] = 0x92;
        assert!(parse_packet(&data, None, 60).unwrap().error_correction);
        data[0] = 0xA2;
        assert!(matches!(
            parse_packet(&data, None, 60),
            Err(AsfError::InvalidData(_))
        ));
    }

    #[test]
    fn test_dword_length_and_padding_out_of_range() {
        // DWORD packet length and padding, single payload
        let mut data = vec![0x78, 0x5D];
        data.extend_from_slice(&[0xFF; 8]);
        data.resize(100, 0);
        assert!(matches!(
            parse_packet(&data, Some(true), 100),
            Err(AsfError::InvalidData(_))
        ));

        // sum wraps to the packet size in 32 bits
        data[6..10].copy_from_slice(&101u32.to_le_bytes());
        assert!(matches!(
            parse_packet(&data, Some(true), 100),
            Err(AsfError::InvalidData(_))
        ));

        // unchecked size still parses
        let info = parse_packet(&data, Some(true), 0).unwrap();
        assert_eq!(info.packet_size, u32::MAX);
        assert_eq!(info.padding, 101);
    }

    #[test]
    fn test_truncated_packet() {
        let data = [0x51, 0x5D, 0x10];
        assert!(parse_packet(&data, None, 0).is_err());
    }

    #[test]
    fn test_parse_payloads() {
        let data = Bytes::from(packet(&[(0x01, b"abc"), (0x82, b"defg")], 200));
        let info = parse_packet(&data, None, 200).unwrap();
        let records = parse_payloads(&data, &info).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].stream_number, 1);
        assert!(!records[0].keyframe);
        assert_eq!(records[0].data, Bytes::from_static(b"abc"));
        assert_eq!(records[0].media_object_size(), Some(3));
        assert_eq!(records[0].presentation_time(), Some(1000));
        assert_eq!(records[1].stream_number, 2);
        assert!(records[1].keyframe);
        assert_eq!(records[1].media_object_number, 1);
        assert_eq!(records[1].data, Bytes::from_static(b"defg"));
    }

    #[test]
    fn test_single_and_compressed_payloads() {
        // single payload, compressed: two sub-payloads 10 ms apart
        let mut buf = BytesMut::new();
        buf.put_u8(0x10); // padding length as word, single payload
        buf.put_u8(0x5D);
        buf.put_u16_le(4); // padding
        buf.put_u32_le(0);
        buf.put_u16_le(0);
        buf.put_u8(0x83);
        buf.put_u8(5);
        buf.put_u32_le(2000); // presentation time
        buf.put_u8(1);
        buf.put_u8(10); // delta
        buf.put_u8(2);
        buf.put_slice(b"hi");
        buf.put_u8(3);
        buf.put_slice(b"you");
        buf.put_bytes(0, 4);
        let data = buf.freeze();

        let info = parse_packet(&data, None, 0).unwrap();
        assert!(!info.multiple_payloads);
        assert!(info.has_keyframe);
        assert_eq!(info.packet_size, data.len() as u32);
        assert_eq!(info.padding_field_offset(), 2);

        let records = parse_payloads(&data, &info).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, Bytes::from_static(b"hi"));
        assert_eq!(records[0].presentation_time(), Some(2000));
        assert_eq!(records[1].data, Bytes::from_static(b"you"));
        assert_eq!(records[1].media_object_number, 6);
        assert_eq!(records[1].presentation_time(), Some(2010));

        // presentation times wrap instead of overflowing
        let mut raw = data.to_vec();
        raw[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        let raw = Bytes::from(raw);
        let records = parse_payloads(&raw, &info).unwrap();
        assert_eq!(records[1].presentation_time(), Some(9));
    }

    fn header_with_sizes(min: u32, max: u32, flags: u32, packets: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_object_header(&mut buf, AsfObject::Header, 30 + 104 + 24);
        buf.put_u32_le(2);
        buf.put_u8(1);
        buf.put_u8(2);
        write_object_header(&mut buf, AsfObject::Padding, 24);
        write_object_header(&mut buf, AsfObject::FileProperties, 104);
        buf.put_bytes(0, 32);
        buf.put_u64_le(packets);
        buf.put_bytes(0, 24);
        buf.put_u32_le(flags);
        buf.put_u32_le(min);
        buf.put_u32_le(max);
        buf.put_u32_le(0);
        buf.to_vec()
    }

    #[test]
    fn test_parse_headers() {
        let data = header_with_sizes(3200, 3200, ASF_FILE_FLAG_SEEKABLE, 42);
        let info = parse_headers(&data).unwrap();
        assert_eq!(
            info,
            AsfFileInfo {
                packet_size: 3200,
                packets_count: 42,
                broadcast: false,
                header_size: 158,
            }
        );
    }

    #[test]
    fn test_parse_headers_uses_min_packet_size() {
        let data = header_with_sizes(1000, 2000, ASF_FILE_FLAG_BROADCAST, 0);
        let info = parse_headers(&data).unwrap();
        assert_eq!(info.packet_size, 1000);
        assert!(info.broadcast);
    }

    #[test]
    fn test_parse_headers_rejects_bad_input() {
        let data = header_with_sizes(1000, 1000, 0, 0);
        assert!(parse_headers(&data[..100]).is_err());
        assert!(parse_headers(&data[24..]).is_err());
    }
}
