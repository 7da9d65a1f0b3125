use super::parser::{parse_headers, parse_packet, AsfFileInfo, PacketInfo};
use super::types::*;
use crate::error::{AsfError, Result};
use crate::utils::ByteReader;
use bytes::Bytes;
use log::{debug, trace};
use std::io::{ErrorKind, Read};
use std::time::Duration;

/// Largest object accepted from a stream
const MAX_OBJECT_SIZE: u64 = u32::MAX as u64;

/// A unit produced by [`AsfParse`].
#[derive(Debug, Clone)]
pub enum ParsedUnit {
    /// Header object followed by the 50 byte data object header
    Headers { data: Bytes, info: AsfFileInfo },
    /// One data packet, timestamped with its send time
    Packet {
        data: Bytes,
        info: PacketInfo,
        timestamp: Duration,
    },
    /// Any top level object after the data object, such as an index
    Object {
        kind: Option<AsfObject>,
        guid: Guid,
        data: Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Headers,
    Data,
    Trailing,
    Done,
}

/// Splits an ASF byte stream into headers, data packets and trailing objects.
pub struct AsfParse<R: Read> {
    reader: R,
    state: ParseState,
    file_info: Option<AsfFileInfo>,
    parsed_packets: u64,
}

impl<R: Read> AsfParse<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: ParseState::Headers,
            file_info: None,
            parsed_packets: 0,
        }
    }

    /// Header information, once the headers were read
    pub fn file_info(&self) -> Option<&AsfFileInfo> {
        self.file_info.as_ref()
    }

    pub fn parsed_packets(&self) -> u64 {
        self.parsed_packets
    }

    /// Reads the next unit. Returns `None` once the stream ended cleanly.
    pub fn next_unit(&mut self) -> Result<Option<ParsedUnit>> {
        loop {
            match self.state {
                ParseState::Headers => return self.read_headers().map(Some),
                ParseState::Data => {
                    let info = self
                        .file_info
                        .ok_or_else(|| AsfError::State("no headers parsed".into()))?;
                    if !info.broadcast && self.parsed_packets >= info.packets_count {
                        debug!("All {} packets read", info.packets_count);
                        self.state = ParseState::Trailing;
                        continue;
                    }
                    match self.read_packet(info.packet_size)? {
                        Some(unit) => return Ok(Some(unit)),
                        None => {
                            self.state = ParseState::Done;
                            return Ok(None);
                        }
                    }
                }
                ParseState::Trailing => {
                    let unit = self.read_object()?;
                    if unit.is_none() {
                        self.state = ParseState::Done;
                    }
                    return Ok(unit);
                }
                ParseState::Done => return Ok(None),
            }
        }
    }

    fn read_headers(&mut self) -> Result<ParsedUnit> {
        let mut prefix = [0u8; ASF_HEADER_OBJECT_SIZE];
        if !self.read_full(&mut prefix)? {
            return Err(AsfError::InvalidData("empty stream".into()));
        }
        let header_size = expect_object(&mut ByteReader::new(&prefix), AsfObject::Header)?;
        if header_size < ASF_HEADER_OBJECT_SIZE as u64 || header_size > MAX_OBJECT_SIZE {
            return Err(AsfError::InvalidData(format!(
                "header object declares size {}",
                header_size
            )));
        }

        let total = header_size + ASF_DATA_OBJECT_SIZE as u64;
        let buf = self.read_object_body(&prefix, total)?;
        let info = parse_headers(&buf)?;
        let mut data_object = ByteReader::new(&buf[header_size as usize..]);
        expect_object(&mut data_object, AsfObject::Data)?;
        if info.packet_size == 0 {
            return Err(AsfError::InvalidData("packet size is 0".into()));
        }

        debug!(
            "Headers: packet size {}, {} packets, broadcast {}",
            info.packet_size, info.packets_count, info.broadcast
        );
        self.file_info = Some(info);
        self.state = ParseState::Data;
        Ok(ParsedUnit::Headers {
            data: Bytes::from(buf),
            info,
        })
    }

    fn read_packet(&mut self, packet_size: u32) -> Result<Option<ParsedUnit>> {
        let mut buf = Vec::new();
        self.read_chunk(&mut buf, packet_size as u64)?;
        if buf.is_empty() {
            return Ok(None);
        }
        if buf.len() < packet_size as usize {
            return Err(AsfError::InvalidData(format!(
                "truncated: {} of {} bytes",
                buf.len(),
                packet_size
            )));
        }
        let info = parse_packet(&buf, None, packet_size)?;
        self.parsed_packets += 1;
        trace!("packet {}: {:?}", self.parsed_packets, info);
        Ok(Some(ParsedUnit::Packet {
            data: Bytes::from(buf),
            info,
            timestamp: Duration::from_millis(info.send_time as u64),
        }))
    }

    fn read_object(&mut self) -> Result<Option<ParsedUnit>> {
        let mut prefix = [0u8; ASF_GUID_OBJSIZE_SIZE];
        if !self.read_full(&mut prefix)? {
            return Ok(None);
        }
        let mut reader = ByteReader::new(&prefix);
        let guid = Guid::read_from(&mut reader)?;
        let size = reader.read_u64_le()?;
        if size < ASF_GUID_OBJSIZE_SIZE as u64 || size > MAX_OBJECT_SIZE {
            return Err(AsfError::InvalidData(format!(
                "object {} declares size {}",
                guid, size
            )));
        }

        let buf = self.read_object_body(&prefix, size)?;
        let kind = AsfObject::from_guid(&guid);
        debug!(
            "Trailing {} object of {} bytes",
            kind.map_or("unknown", |k| k.info().name),
            size
        );
        Ok(Some(ParsedUnit::Object {
            kind,
            guid,
            data: Bytes::from(buf),
        }))
    }

    /// Reads an object of `size` bytes whose first bytes are `prefix`.
    fn read_object_body(&mut self, prefix: &[u8], size: u64) -> Result<Vec<u8>> {
        let mut buf = prefix.to_vec();
        self.read_chunk(&mut buf, size - prefix.len() as u64)?;
        if (buf.len() as u64) < size {
            return Err(AsfError::InvalidData(format!(
                "unexpected end of stream: {} of {} bytes",
                buf.len(),
                size
            )));
        }
        Ok(buf)
    }

    /// Appends at most `len` bytes to `buf`. The buffer only grows as bytes
    /// actually arrive, whatever size the stream declares.
    fn read_chunk(&mut self, buf: &mut Vec<u8>, len: u64) -> Result<()> {
        Read::take(&mut self.reader, len).read_to_end(buf)?;
        Ok(())
    }

    /// Fills `buf`. Returns false when the stream ended before the first byte.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 && !buf.is_empty() {
            return Ok(false);
        }
        if filled < buf.len() {
            return Err(AsfError::InvalidData(format!(
                "truncated: {} of {} bytes",
                filled,
                buf.len()
            )));
        }
        Ok(true)
    }
}

impl<R: Read> Iterator for AsfParse<R> {
    type Item = Result<ParsedUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        let unit = self.next_unit();
        if unit.is_err() {
            self.state = ParseState::Done;
        }
        unit.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{CodecParams, CodecType, Packet};
    use crate::config::MuxerSettings;
    use crate::format::asf::{AsfMuxer, MemorySink};
    use bytes::{BufMut, BytesMut};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn muxed_file(settings: MuxerSettings) -> Vec<u8> {
        let mut muxer = AsfMuxer::new(MemorySink::new(), settings).unwrap();
        let video = muxer.add_video_stream().unwrap();
        muxer
            .set_caps(video, &CodecParams::video(CodecType::Wmv { version: Some(3) }, 64, 48))
            .unwrap();
        for i in 0..20u64 {
            let packet = Packet::new(vec![i as u8; 700])
                .with_pts(Duration::from_millis(i * 100))
                .with_duration(Duration::from_millis(100))
                .with_key_flag(i % 5 == 0);
            muxer.push_packet(video, packet).unwrap();
        }
        muxer.end_stream(video).unwrap();
        muxer.into_sink().into_data()
    }

    #[test]
    fn test_parse_muxed_file() {
        let data = muxed_file(MuxerSettings::default().with_packet_size(2000));
        let units: Vec<ParsedUnit> = AsfParse::new(Cursor::new(data))
            .collect::<Result<_>>()
            .unwrap();

        let info = match &units[0] {
            ParsedUnit::Headers { info, data } => {
                assert_eq!(data.len() as u64, info.header_size + 50);
                *info
            }
            other => panic!("expected headers, got {:?}", other),
        };
        assert_eq!(info.packet_size, 2000);
        assert!(!info.broadcast);

        let packets: Vec<&PacketInfo> = units
            .iter()
            .filter_map(|u| match u {
                ParsedUnit::Packet { info, .. } => Some(info),
                _ => None,
            })
            .collect();
        assert_eq!(packets.len() as u64, info.packets_count);
        assert!(packets[0].has_keyframe);

        match units.last() {
            Some(ParsedUnit::Object { kind, .. }) => assert_eq!(*kind, Some(AsfObject::SimpleIndex)),
            other => panic!("expected the index, got {:?}", other),
        }
        assert_eq!(units.len(), 1 + packets.len() + 1);
    }

    #[test]
    fn test_parse_streamable_file_until_eof() {
        let data = muxed_file(MuxerSettings::default().with_streamable(true));
        let mut parse = AsfParse::new(Cursor::new(data));
        let mut packets = 0;
        while let Some(unit) = parse.next_unit().unwrap() {
            if let ParsedUnit::Packet { timestamp, info, .. } = unit {
                assert_eq!(timestamp, Duration::from_millis(info.send_time as u64));
                packets += 1;
            }
        }
        assert!(parse.file_info().unwrap().broadcast);
        assert_eq!(parse.parsed_packets(), packets);
        assert!(packets > 0);
    }

    #[test]
    fn test_truncated_stream_fails() {
        let mut data = muxed_file(MuxerSettings::default().with_streamable(true));
        data.truncate(data.len() - 10);
        let results: Vec<Result<ParsedUnit>> = AsfParse::new(Cursor::new(data)).collect();
        assert!(results.last().unwrap().is_err());
    }

    fn header_prefix(size: u64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_object_header(&mut buf, AsfObject::Header, size);
        buf.put_u32_le(5);
        buf.put_u16(0x0102);
        buf.to_vec()
    }

    #[test]
    fn test_oversized_header_object() {
        for size in [u64::MAX, u64::MAX - 40, MAX_OBJECT_SIZE + 1] {
            let mut parse = AsfParse::new(Cursor::new(header_prefix(size)));
            assert!(matches!(parse.next_unit(), Err(AsfError::InvalidData(_))));
        }

        // plausible size, but the bytes never arrive
        let mut parse = AsfParse::new(Cursor::new(header_prefix(1 << 31)));
        assert!(matches!(parse.next_unit(), Err(AsfError::InvalidData(_))));
    }

    #[test]
    fn test_oversized_trailing_object() {
        for size in [u64::MAX, 1 << 40, 1 << 31] {
            let mut data = muxed_file(MuxerSettings::default());
            let mut trailing = BytesMut::new();
            write_object_header(&mut trailing, AsfObject::Padding, size);
            data.extend_from_slice(&trailing);

            let results: Vec<Result<ParsedUnit>> = AsfParse::new(Cursor::new(data)).collect();
            assert!(matches!(results.last(), Some(Err(AsfError::InvalidData(_)))));
            // everything before it is intact
            assert!(results[..results.len() - 1].iter().all(|r| r.is_ok()));
        }
    }

    #[test]
    fn test_not_an_asf_stream() {
        let mut parse = AsfParse::new(Cursor::new(vec![0u8; 100]));
        assert!(parse.next().unwrap().is_err());
        assert!(parse.next().is_none());
    }
}
