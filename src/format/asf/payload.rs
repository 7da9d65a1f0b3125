use super::types::*;
use bytes::{BufMut, Bytes, BytesMut};
use log::trace;
use std::time::Duration;

/// Replicated data carried by every payload: media object size + presentation time
pub const ASF_PAYLOAD_REPLICATED_DATA_LENGTH: u8 = 8;

/// One media buffer waiting to be written into data packets.
#[derive(Debug, Clone)]
pub struct AsfPayload {
    /// Stream number with the keyframe flag in the top bit
    pub stream_number: u8,
    pub media_obj_num: u8,
    pub offset_in_media_obj: u32,
    pub replicated_data_length: u8,
    pub media_object_size: u32,
    /// Milliseconds, preroll included
    pub presentation_time: u32,
    /// Bytes not yet written to a packet
    pub data: Bytes,
    /// Timestamp of the source buffer
    pub timestamp: Option<Duration>,
    /// Index of the owning stream in the muxer
    pub stream_index: usize,
    /// Data packet this payload was first written into
    pub packet_number: Option<u32>,
    /// Number of packets that carry a piece of this payload
    pub packet_count: u16,
}

impl AsfPayload {
    pub fn new(
        stream_index: usize,
        stream_number: u8,
        keyframe: bool,
        media_obj_num: u8,
        presentation_time: u32,
        timestamp: Option<Duration>,
        data: Bytes,
    ) -> Self {
        let keyframe_bit = if keyframe { 0x80 } else { 0 };
        Self {
            stream_number: keyframe_bit | (stream_number & 0x7F),
            media_obj_num,
            offset_in_media_obj: 0,
            replicated_data_length: ASF_PAYLOAD_REPLICATED_DATA_LENGTH,
            media_object_size: data.len() as u32,
            presentation_time,
            data,
            timestamp,
            stream_index,
            packet_number: None,
            packet_count: 0,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.stream_number & 0x80 != 0
    }

    /// Size of the whole payload record, header included
    pub fn size(&self) -> usize {
        ASF_MULTIPLE_PAYLOAD_HEADER_SIZE + self.data.len()
    }

    fn put_header(&self, buf: &mut BytesMut, payload_len: u16) {
        buf.put_u8(self.stream_number);
        buf.put_u8(self.media_obj_num);
        buf.put_u32_le(self.offset_in_media_obj);
        buf.put_u8(self.replicated_data_length);
        buf.put_u32_le(self.media_object_size);
        buf.put_u32_le(self.presentation_time);
        buf.put_u16_le(payload_len);
    }

    /// Writes the complete remaining payload.
    pub fn put_payload(&mut self, buf: &mut BytesMut) {
        self.put_header(buf, self.data.len() as u16);
        buf.put_slice(&self.data);
        self.packet_count += 1;
    }

    /// Writes as much of the payload as fits in `size` bytes and keeps the
    /// rest for the next packet. Returns the number of media bytes written.
    pub fn put_subpayload(&mut self, buf: &mut BytesMut, size: usize) -> usize {
        let room = size.saturating_sub(ASF_MULTIPLE_PAYLOAD_HEADER_SIZE);
        let written = room.min(self.data.len()).min(u16::MAX as usize);
        self.put_header(buf, written as u16);
        buf.put_slice(&self.data[..written]);

        trace!(
            "sub-payload of stream {}: {} bytes at offset {}",
            self.stream_number & 0x7F,
            written,
            self.offset_in_media_obj
        );
        self.offset_in_media_obj += written as u32;
        self.data = self.data.slice(written..);
        self.packet_count += 1;
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ByteReader;
    use pretty_assertions::assert_eq;

    fn payload(len: usize) -> AsfPayload {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        AsfPayload::new(0, 2, true, 7, 5040, Some(Duration::from_millis(40)), Bytes::from(data))
    }

    #[test]
    fn test_payload_record_layout() {
        let mut p = payload(5);
        assert_eq!(p.size(), 22);
        assert!(p.is_keyframe());

        let mut buf = BytesMut::new();
        p.put_payload(&mut buf);
        assert_eq!(buf.len(), 22);
        assert_eq!(p.packet_count, 1);

        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_u8().unwrap(), 0x82);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u32_le().unwrap(), 0);
        assert_eq!(reader.read_u8().unwrap(), 8);
        assert_eq!(reader.read_u32_le().unwrap(), 5);
        assert_eq!(reader.read_u32_le().unwrap(), 5040);
        assert_eq!(reader.read_u16_le().unwrap(), 5);
        assert_eq!(reader.read_bytes(5).unwrap(), &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_subpayload_splits_and_advances() {
        let mut p = payload(100);
        let mut buf = BytesMut::new();
        let written = p.put_subpayload(&mut buf, 17 + 60);
        assert_eq!(written, 60);
        assert_eq!(buf.len(), 77);
        assert_eq!(p.offset_in_media_obj, 60);
        assert_eq!(p.data.len(), 40);
        assert_eq!(p.data[0], 60);
        assert_eq!(p.media_object_size, 100);

        // the remainder fits entirely
        let mut buf = BytesMut::new();
        let written = p.put_subpayload(&mut buf, 500);
        assert_eq!(written, 40);
        assert_eq!(&buf[2..6], &60u32.to_le_bytes());
        assert!(p.data.is_empty());
        assert_eq!(p.packet_count, 2);
    }

    #[test]
    fn test_delta_payload_flag() {
        let p = AsfPayload::new(1, 3, false, 0, 0, None, Bytes::from_static(b"x"));
        assert!(!p.is_keyframe());
        assert_eq!(p.stream_number, 3);
    }
}
