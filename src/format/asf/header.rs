//! Header object construction and the fix-ups written when a file is finalized.

use super::stream::{StreamDescriptor, StreamKind, VideoIndex};
use super::tags::{self, AsfTags, TagList};
use super::types::*;
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use log::debug;
use std::time::Duration;

/// Converts a wall-clock time to 100ns units since 1601-01-01.
pub fn asf_time(time: DateTime<Utc>) -> u64 {
    let secs = time.timestamp().max(0) as u64;
    let sub = time.timestamp_subsec_nanos() as u64 / 100;
    ASF_EPOCH_OFFSET + secs * 10_000_000 + sub
}

pub fn asf_time_now() -> u64 {
    asf_time(Utc::now())
}

/// The serialized header plus the offsets patched at finalize time.
#[derive(Debug, Clone)]
pub struct AsfHeader {
    /// Header object followed by the data object header
    pub data: Bytes,
    pub file_properties_position: usize,
    pub data_object_position: usize,
}

/// Everything needed to write the header of one session.
pub struct HeaderBuilder<'a> {
    pub file_id: Guid,
    pub preroll: u64,
    pub packet_size: u32,
    pub padding: u64,
    pub streamable: bool,
    pub streams: &'a [StreamDescriptor],
    pub tags: &'a TagList,
}

impl<'a> HeaderBuilder<'a> {
    /// Padding object size actually written (0 when below the object minimum)
    fn padding_size(&self) -> usize {
        if self.padding < ASF_PADDING_OBJECT_SIZE as u64 {
            0
        } else {
            self.padding as usize
        }
    }

    /// Fixed objects and the per-stream objects, without tags, padding or data object
    pub fn headers_size(&self) -> usize {
        let mut size = ASF_HEADER_OBJECT_SIZE
            + ASF_FILE_PROPERTIES_OBJECT_SIZE
            + ASF_HEADER_EXTENSION_OBJECT_SIZE;
        for stream in self.streams {
            size += ASF_STREAM_PROPERTIES_OBJECT_SIZE
                + stream.media_specific_data_size()
                + stream.codec_data_len()
                + ASF_EXTENDED_STREAM_PROPERTIES_OBJECT_SIZE;
        }
        size
    }

    pub fn build(&self) -> AsfHeader {
        let asf_tags = AsfTags::from_tags(self.tags);
        let metadata_size: usize = self
            .streams
            .iter()
            .map(|s| tags::metadata_object_size(&s.tags))
            .sum();
        let padding = self.padding_size();
        let total = self.headers_size()
            + asf_tags.cont_desc_size
            + asf_tags.ext_cont_desc_size
            + metadata_size
            + padding
            + ASF_DATA_OBJECT_SIZE;

        let mut buf = BytesMut::with_capacity(total);

        // header object
        write_object_header(&mut buf, AsfObject::Header, (total - ASF_DATA_OBJECT_SIZE) as u64);
        buf.put_u32_le(2 + self.streams.len() as u32);
        buf.put_u8(0x01);
        buf.put_u8(0x02);

        let file_properties_position = buf.len();
        self.write_file_properties(&mut buf);

        for stream in self.streams {
            write_stream_properties(&mut buf, stream);
        }

        if asf_tags.cont_desc_size > 0 {
            tags::write_content_description(&mut buf, &asf_tags.tags);
        }
        if asf_tags.ext_cont_desc_size > 0 {
            tags::write_ext_content_description(&mut buf, &asf_tags.tags);
        }

        let extension_size =
            self.streams.len() * ASF_EXTENDED_STREAM_PROPERTIES_OBJECT_SIZE + metadata_size;
        write_header_extension(&mut buf, extension_size as u32);
        for stream in self.streams {
            write_extended_stream_properties(&mut buf, stream, self.streamable);
        }
        for stream in self.streams {
            tags::write_metadata_object(&mut buf, &stream.tags, stream.stream_number);
        }

        if padding > 0 {
            debug!("Writing padding object of size {}", padding);
            write_object_header(&mut buf, AsfObject::Padding, padding as u64);
            buf.put_bytes(0, padding - ASF_PADDING_OBJECT_SIZE);
        }

        let data_object_position = buf.len();
        write_data_object(&mut buf, &self.file_id);

        debug_assert_eq!(buf.len(), total);
        AsfHeader {
            data: buf.freeze(),
            file_properties_position,
            data_object_position,
        }
    }

    fn write_file_properties(&self, buf: &mut BytesMut) {
        write_object_header(buf, AsfObject::FileProperties, ASF_FILE_PROPERTIES_OBJECT_SIZE as u64);
        self.file_id.write_to(buf);
        buf.put_u64_le(0); // file size
        buf.put_u64_le(asf_time_now());
        buf.put_u64_le(0); // data packets
        buf.put_u64_le(0); // play duration
        buf.put_u64_le(0); // send duration
        buf.put_u64_le(self.preroll);
        buf.put_u32_le(ASF_FILE_FLAG_BROADCAST);
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(0); // max bitrate
    }
}

pub fn write_stream_properties(buf: &mut BytesMut, stream: &StreamDescriptor) {
    let codec_data_length = stream.codec_data_len();
    let media_specific_data_length = stream.media_specific_data_size();
    debug!(
        "Stream {} codec data length: {}, media specific data length: {}",
        stream.stream_number, codec_data_length, media_specific_data_length
    );

    write_object_header(
        buf,
        AsfObject::StreamProperties,
        (ASF_STREAM_PROPERTIES_OBJECT_SIZE + codec_data_length + media_specific_data_length) as u64,
    );
    let stream_type = if stream.is_audio() {
        AsfObject::AudioMedia
    } else {
        AsfObject::VideoMedia
    };
    stream_type.guid().write_to(buf);
    AsfObject::NoErrorCorrection.guid().write_to(buf);
    buf.put_u64_le(0); // time offset
    buf.put_u32_le((codec_data_length + media_specific_data_length) as u32);
    buf.put_u32_le(0); // error correction data length
    buf.put_u16_le((stream.stream_number & 0x7F) as u16);
    buf.put_u32_le(0);

    match &stream.kind {
        StreamKind::Audio(audio) => {
            buf.put_u16_le(audio.format);
            buf.put_u16_le(audio.channels);
            buf.put_u32_le(audio.rate);
            buf.put_u32_le(audio.av_bps);
            buf.put_u16_le(audio.block_align);
            buf.put_u16_le(audio.bits_per_sample);
            buf.put_u16_le(codec_data_length as u16);
            debug!(
                "wave formatex values: codec_id={}, channels={}, rate={}, bytes_per_sec={}, block_alignment={}, bits_per_sample={}, codec_data_length={}",
                audio.format,
                audio.channels,
                audio.rate,
                audio.av_bps,
                audio.block_align,
                audio.bits_per_sample,
                codec_data_length
            );
        }
        StreamKind::Video { info, .. } => {
            // BITMAPINFOHEADER size + codec data
            let format_size = (ASF_VIDEO_SPECIFIC_DATA_SIZE + codec_data_length - 11) as u32;
            buf.put_u32_le(info.width as u32);
            buf.put_u32_le(info.height as u32);
            buf.put_u8(2);
            buf.put_u16_le(format_size as u16);
            buf.put_u32_le(format_size);
            buf.put_i32_le(info.width);
            buf.put_i32_le(info.height);
            buf.put_u16_le(info.planes);
            buf.put_u16_le(info.bit_cnt);
            buf.put_u32_le(info.compression);
            buf.put_u32_le(info.image_size());
            buf.put_u32_le(info.xpels_meter);
            buf.put_u32_le(info.ypels_meter);
            buf.put_u32_le(info.num_colors);
            buf.put_u32_le(info.imp_colors);
        }
    }

    if let Some(codec_data) = &stream.codec_data {
        buf.put_slice(codec_data);
    }
}

pub fn write_header_extension(buf: &mut BytesMut, extension_size: u32) {
    write_object_header(
        buf,
        AsfObject::HeaderExtension,
        ASF_HEADER_EXTENSION_OBJECT_SIZE as u64 + extension_size as u64,
    );
    AsfObject::Reserved1.guid().write_to(buf);
    buf.put_u16_le(6);
    buf.put_u32_le(extension_size);
}

pub fn write_extended_stream_properties(buf: &mut BytesMut, stream: &StreamDescriptor, streamable: bool) {
    write_object_header(
        buf,
        AsfObject::ExtendedStreamProperties,
        ASF_EXTENDED_STREAM_PROPERTIES_OBJECT_SIZE as u64,
    );
    buf.put_u64_le(0); // start time
    buf.put_u64_le(0); // end time
    buf.put_u32_le(stream.bitrate);
    buf.put_u32_le(0); // buffer size
    buf.put_u32_le(0); // initial buffer fullness
    buf.put_u32_le(stream.bitrate); // alternate bitrate
    buf.put_u32_le(0);
    buf.put_u32_le(0);
    buf.put_u32_le(0); // maximum object size

    // video carries an index, so it is seekable unless streaming
    let flags = if stream.is_audio() || streamable { 0x0 } else { 0x2 };
    buf.put_u32_le(flags);

    buf.put_u16_le(stream.stream_number as u16);
    buf.put_u16_le(0); // language index
    buf.put_u64_le(0); // average time per frame
    buf.put_u16_le(0); // stream name count
    buf.put_u16_le(0); // payload extension system count
}

pub fn write_data_object(buf: &mut BytesMut, file_id: &Guid) {
    // 0 would be allowed for live streams, but players reject it
    write_object_header(buf, AsfObject::Data, ASF_DATA_OBJECT_SIZE as u64);
    file_id.write_to(buf);
    buf.put_u64_le(0); // total data packets
    buf.put_u16_le(0x0101);
}

pub fn simple_index_object(file_id: &Guid, index: &VideoIndex) -> Bytes {
    let entries = index.entries.len();
    let object_size = ASF_SIMPLE_INDEX_OBJECT_SIZE + entries * ASF_SIMPLE_INDEX_ENTRY_SIZE;
    let mut buf = BytesMut::with_capacity(object_size);

    write_object_header(&mut buf, AsfObject::SimpleIndex, object_size as u64);
    file_id.write_to(&mut buf);
    buf.put_u64_le(index.time_interval);
    buf.put_u32_le(index.max_keyframe_packet_count as u32);
    buf.put_u32_le(entries as u32);
    debug!(
        "Simple index object values - size:{}, time interval:{}, max packet count:{}, entries:{}",
        object_size, index.time_interval, index.max_keyframe_packet_count, entries
    );

    for entry in &index.entries {
        buf.put_u32_le(entry.packet_number);
        buf.put_u16_le(entry.packet_count);
    }
    buf.freeze()
}

/// Final values of the file properties object
#[derive(Debug, Clone)]
pub struct FilePropertiesPatch {
    pub file_size: u64,
    pub creation_time: u64,
    pub data_packets: u64,
    pub play_duration: Duration,
    pub preroll: u64,
    pub packet_size: u32,
    pub max_bitrate: u32,
}

impl FilePropertiesPatch {
    /// Bytes replacing the file properties object from offset 40 to its end
    pub fn to_bytes(&self) -> Bytes {
        let duration_100ns = (self.play_duration.as_nanos() / 100) as u64;
        let mut buf = BytesMut::with_capacity(ASF_FILE_PROPERTIES_PATCH_SIZE);
        buf.put_u64_le(self.file_size);
        buf.put_u64_le(self.creation_time);
        buf.put_u64_le(self.data_packets);
        buf.put_u64_le(duration_100ns + ms_to_100ns(self.preroll));
        // send duration is not tracked separately
        buf.put_u64_le(duration_100ns);
        buf.put_u64_le(self.preroll);
        buf.put_u32_le(ASF_FILE_FLAG_SEEKABLE);
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.packet_size);
        buf.put_u32_le(self.max_bitrate);
        buf.freeze()
    }
}

/// Bytes replacing the data object from offset 16: size, file id, packet count
pub fn data_object_patch(data_object_size: u64, file_id: &Guid, data_packets: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ASF_DATA_OBJECT_PATCH_SIZE);
    buf.put_u64_le(data_object_size + ASF_DATA_OBJECT_SIZE as u64);
    file_id.write_to(&mut buf);
    buf.put_u64_le(data_packets);
    buf.freeze()
}
