use super::header::{self, FilePropertiesPatch, HeaderBuilder};
use super::payload::AsfPayload;
use super::sink::{MuxSink, OutputBuffer};
use super::stream::StreamDescriptor;
use super::tags::{TagList, TagMergeMode};
use super::types::*;
use crate::av::{CodecParams, Packet};
use crate::config::{default_muxer_settings, MuxerSettings};
use crate::error::{AsfError, FlowError, Result};
use crate::format::Muxer;
use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::time::Duration;

/// Stream numbers are 7 bits wide
const MAX_STREAMS: usize = 127;

/// Multiple payloads flag; the length type bits are or-ed in per packet
const PACKET_FLAG_MULTIPLE_PAYLOADS: u8 = 0x01;
/// Stream number, media object number and replicated data length as bytes,
/// offset into media object as dword
const PAYLOAD_PROPERTY_FLAGS: u8 = 0x5D;
/// Payload length type WORD in the payload count byte
const PAYLOAD_LENGTH_TYPE_WORD: u8 = 0x80;

/// Session state of the muxer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    /// Nothing written yet; streams, caps and tags may still change
    None,
    /// Header object is being produced
    Headers,
    /// Data packets are flowing
    Data,
    /// Everything was written and end of stream signalled
    Eos,
}

/// ASF muxer writing to a [`MuxSink`].
///
/// Buffers are queued per stream. Whenever every stream that has not ended
/// holds a buffer, the one with the earliest timestamp is turned into a
/// payload and payloads are packed into fixed size data packets. The header
/// is written on the first round; indexes and header fix-ups are written at
/// the end unless the output is streamable.
pub struct AsfMuxer<S: MuxSink> {
    settings: MuxerSettings,
    sink: S,
    streams: Vec<StreamDescriptor>,
    state: MuxState,
    /// File level tags
    tags: TagList,
    tag_merge_mode: TagMergeMode,
    payloads: VecDeque<AsfPayload>,
    /// Queued bytes, payload headers included
    payload_data_size: usize,
    payload_parsing_info_size: usize,
    streamable: bool,
    file_id: Guid,
    file_size: u64,
    total_data_packets: u64,
    data_object_size: u64,
    file_properties_position: u64,
    data_object_position: u64,
    first_ts: Option<Duration>,
    stream_header: Option<Bytes>,
}

impl<S: MuxSink> AsfMuxer<S> {
    pub fn new(sink: S, settings: MuxerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            payload_parsing_info_size: settings.payload_parsing_info_size(),
            streamable: settings.streamable,
            settings,
            sink,
            streams: Vec::new(),
            state: MuxState::None,
            tags: TagList::new(),
            tag_merge_mode: TagMergeMode::Keep,
            payloads: VecDeque::new(),
            payload_data_size: 0,
            file_id: Guid::new(0, 0, 0, 0),
            file_size: 0,
            total_data_packets: 0,
            data_object_size: 0,
            file_properties_position: 0,
            data_object_position: 0,
            first_ts: None,
            stream_header: None,
        })
    }

    /// Muxer using the process-wide configuration
    pub fn with_default_settings(sink: S) -> Result<Self> {
        Self::new(sink, default_muxer_settings())
    }

    pub fn settings(&self) -> &MuxerSettings {
        &self.settings
    }

    pub fn state(&self) -> MuxState {
        self.state
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> Option<&StreamDescriptor> {
        self.streams.get(index)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn file_id(&self) -> Guid {
        self.file_id
    }

    /// Bytes pushed so far, patches excluded
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_data_packets(&self) -> u64 {
        self.total_data_packets
    }

    pub fn data_object_size(&self) -> u64 {
        self.data_object_size
    }

    /// Whether the session skips indexes and fix-ups. May be forced on when
    /// the sink cannot seek.
    pub fn is_streamable(&self) -> bool {
        self.streamable
    }

    /// Header buffer kept for late joiners in streamable mode
    pub fn stream_header(&self) -> Option<&Bytes> {
        self.stream_header.as_ref()
    }

    pub fn tags(&self) -> &TagList {
        &self.tags
    }

    pub fn add_audio_stream(&mut self) -> Result<usize> {
        self.add_stream(true)
    }

    pub fn add_video_stream(&mut self) -> Result<usize> {
        self.add_stream(false)
    }

    fn add_stream(&mut self, audio: bool) -> Result<usize> {
        if self.state != MuxState::None {
            return Err(AsfError::State(
                "streams can only be added before data starts".into(),
            ));
        }
        if self.streams.len() >= MAX_STREAMS {
            return Err(AsfError::State(format!("no more than {} streams", MAX_STREAMS)));
        }
        let stream_number = (self.streams.len() + 1) as u8;
        let stream = if audio {
            StreamDescriptor::new_audio(stream_number)
        } else {
            StreamDescriptor::new_video(stream_number)
        };
        debug!(
            "Added {} stream {}",
            if audio { "audio" } else { "video" },
            stream_number
        );
        self.streams.push(stream);
        Ok(self.streams.len() - 1)
    }

    pub fn set_caps(&mut self, index: usize, params: &CodecParams) -> Result<()> {
        self.stream_mut(index)?.set_caps(params)
    }

    /// Sets how tags given to [`AsfMuxer::set_tags`] and merged stream tags
    /// combine with tags already present.
    pub fn set_tag_merge_mode(&mut self, mode: TagMergeMode) {
        self.tag_merge_mode = mode;
    }

    /// Adds file level tags.
    pub fn set_tags(&mut self, tags: &TagList) {
        self.tags.merge(tags, self.tag_merge_mode);
    }

    /// Tag event on a stream. Only honoured before the header is written.
    pub fn push_tags(&mut self, index: usize, tags: &TagList) -> Result<()> {
        if index >= self.streams.len() {
            return Err(AsfError::State(format!("no stream at index {}", index)));
        }
        if self.state != MuxState::None {
            debug!("Ignoring tags received after the header was written");
            return Ok(());
        }
        if self.settings.merge_stream_tags {
            trace!("merging {} tags of stream {}", tags.len(), index);
            self.tags.merge(tags, self.tag_merge_mode);
        } else {
            self.streams[index].tags.merge(tags, TagMergeMode::Replace);
        }
        Ok(())
    }

    fn stream_mut(&mut self, index: usize) -> Result<&mut StreamDescriptor> {
        self.streams
            .get_mut(index)
            .ok_or_else(|| AsfError::State(format!("no stream at index {}", index)))
    }

    /// Queues a buffer on a stream and muxes whatever became ready.
    pub fn push_packet(&mut self, index: usize, packet: Packet) -> Result<()> {
        if self.state == MuxState::Eos {
            return Err(AsfError::Flow(FlowError::Eos));
        }
        let stream = self.stream_mut(index)?;
        if stream.eos {
            return Err(AsfError::Flow(FlowError::Eos));
        }
        stream.queue.push_back(packet);
        self.collect()
    }

    /// Marks a stream as finished. Once every stream ended, the remaining
    /// payloads are flushed and the file is finalized.
    pub fn end_stream(&mut self, index: usize) -> Result<()> {
        self.stream_mut(index)?.eos = true;
        self.collect()
    }

    /// Runs collect rounds while every live stream has a buffer.
    fn collect(&mut self) -> Result<()> {
        while self.state != MuxState::Eos && self.is_ready() {
            self.collect_round()?;
        }
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.streams.is_empty() && self.streams.iter().all(|s| s.eos || !s.queue.is_empty())
    }

    fn collect_round(&mut self) -> Result<()> {
        if self.state == MuxState::None {
            self.start_file()?;
            self.state = MuxState::Data;
        }
        if self.state == MuxState::Eos {
            return Err(AsfError::Flow(FlowError::Eos));
        }

        let mut best: Option<(usize, Option<Duration>)> = None;
        for (i, stream) in self.streams.iter_mut().enumerate() {
            let pts = match stream.queue.front() {
                Some(packet) => packet.pts,
                None => continue,
            };
            if let Some(ts) = pts {
                if stream.first_ts.is_none() {
                    stream.first_ts = Some(ts);
                }
                self.first_ts = Some(self.first_ts.map_or(ts, |first| first.min(ts)));
            }
            let better = match best {
                None => true,
                Some((_, best_ts)) => match (pts, best_ts) {
                    (None, _) => true,
                    (Some(ts), Some(best_ts)) => ts < best_ts,
                    (Some(_), None) => false,
                },
            };
            if better {
                best = Some((i, pts));
            }
        }

        match best {
            Some((index, _)) => {
                let packet = match self.streams[index].queue.pop_front() {
                    Some(packet) => packet,
                    None => return Ok(()),
                };
                self.process_buffer(index, packet)
            }
            None => {
                debug!("All streams ended, finishing the file");
                while !self.payloads.is_empty() {
                    self.flush_payloads()?;
                }
                if !self.streamable {
                    self.stop_file()?;
                }
                self.sink.end_of_stream()?;
                self.state = MuxState::Eos;
                info!(
                    "ASF session done: {} data packets, {} bytes",
                    self.total_data_packets, self.file_size
                );
                Ok(())
            }
        }
    }

    fn start_file(&mut self) -> Result<()> {
        if let Some(stream) = self.streams.iter().find(|s| !s.has_caps()) {
            return Err(AsfError::State(format!(
                "stream {} has no caps",
                stream.stream_number
            )));
        }
        if !self.streamable && !self.sink.is_seekable() {
            warn!("Downstream is not seekable, forcing streamable mode");
            self.streamable = true;
        }

        self.file_id = Guid::random();
        self.payload_parsing_info_size = self.settings.payload_parsing_info_size();
        debug!(
            "Starting file {} with payload parsing info size {}",
            self.file_id, self.payload_parsing_info_size
        );

        self.state = MuxState::Headers;
        let header = HeaderBuilder {
            file_id: self.file_id,
            preroll: self.settings.preroll,
            packet_size: self.settings.packet_size,
            padding: self.settings.padding,
            streamable: self.streamable,
            streams: &self.streams,
            tags: &self.tags,
        }
        .build();

        self.file_properties_position = self.file_size + header.file_properties_position as u64;
        self.data_object_position = self.file_size + header.data_object_position as u64;

        let mut buffer = OutputBuffer::new(header.data.clone());
        if self.streamable {
            buffer = buffer.with_header_flag(true);
            self.stream_header = Some(header.data);
        }
        self.push(buffer)
    }

    fn push(&mut self, buffer: OutputBuffer) -> Result<()> {
        let len = buffer.len() as u64;
        self.sink.push(buffer)?;
        self.file_size += len;
        Ok(())
    }

    fn process_buffer(&mut self, index: usize, packet: Packet) -> Result<()> {
        let preroll = self.settings.preroll;
        let first_ts = self.first_ts;
        let stream = &mut self.streams[index];

        let pts = packet
            .pts
            .ok_or(AsfError::MissingTimestamp(stream.stream_number))?;
        let relative = pts.saturating_sub(first_ts.unwrap_or(pts));
        let presentation_time = (preroll + relative.as_millis() as u64) as u32;

        let media_obj_num = stream.media_object_number;
        stream.media_object_number = stream.media_object_number.wrapping_add(1);

        match packet.duration {
            Some(duration) => stream.play_duration += duration,
            None => warn!(
                "Received buffer without duration on stream {}, it will not be accounted in the total file time",
                stream.stream_number
            ),
        }

        let payload = AsfPayload::new(
            index,
            stream.stream_number,
            packet.is_key,
            media_obj_num,
            presentation_time,
            packet.pts,
            packet.data,
        );
        trace!(
            "stream {}: payload {} of {} bytes at {} ms",
            stream.stream_number,
            media_obj_num,
            payload.data.len(),
            presentation_time
        );
        self.payload_data_size += payload.size();
        self.payloads.push_back(payload);

        let packet_size = self.settings.packet_size as usize;
        while self.payload_data_size + self.payload_parsing_info_size >= packet_size {
            self.flush_payloads()?;
        }
        Ok(())
    }

    /// Writes one data packet from the head of the payload queue.
    fn flush_payloads(&mut self) -> Result<()> {
        if self.payloads.is_empty() {
            return Ok(());
        }

        let packet_size = self.settings.packet_size as usize;
        let mut body = BytesMut::with_capacity(packet_size);
        let mut size_left = packet_size - self.payload_parsing_info_size - 1;
        let mut has_keyframe = false;
        let mut send_ts: Option<Duration> = None;
        let mut payload_count = 0usize;

        // whole payloads
        while payload_count < MAX_PAYLOADS_IN_A_PACKET {
            let fits = match self.payloads.front() {
                Some(p) => p.size() <= size_left && p.data.len() <= u16::MAX as usize,
                None => false,
            };
            if !fits {
                break;
            }
            let mut payload = match self.payloads.pop_front() {
                Some(payload) => payload,
                None => break,
            };
            if send_ts.is_none() {
                send_ts = payload.timestamp;
            }

            let stream = &mut self.streams[payload.stream_index];
            if payload.timestamp.is_some() {
                if let Some(index) = stream.video_index_mut() {
                    index.advance_to(ms_to_100ns(payload.presentation_time as u64));
                }
            }

            payload.put_payload(&mut body);
            let packet_number = *payload
                .packet_number
                .get_or_insert(self.total_data_packets as u32);

            if payload.is_keyframe() {
                has_keyframe = true;
                if let Some(index) = stream.video_index_mut() {
                    index.record_keyframe(packet_number, payload.packet_count);
                }
            }

            size_left -= payload.size();
            self.payload_data_size -= payload.size();
            payload_count += 1;
        }

        // then a piece of the next one
        if payload_count < MAX_PAYLOADS_IN_A_PACKET && size_left > ASF_MULTIPLE_PAYLOAD_HEADER_SIZE {
            let total_data_packets = self.total_data_packets as u32;
            if let Some(payload) = self.payloads.front_mut() {
                if payload.is_keyframe() {
                    has_keyframe = true;
                }
                if send_ts.is_none() {
                    send_ts = payload.timestamp;
                }
                payload.packet_number.get_or_insert(total_data_packets);

                let written = payload.put_subpayload(&mut body, size_left);
                self.payload_data_size -= written;
                size_left -= written + ASF_MULTIPLE_PAYLOAD_HEADER_SIZE;
                payload_count += 1;

                if payload.data.is_empty() {
                    self.payloads.pop_front();
                    self.payload_data_size -= ASF_MULTIPLE_PAYLOAD_HEADER_SIZE;
                }
            }
        }

        if payload_count == 0 {
            warn!("Sending packet without any payload");
        }

        let packet = self.build_packet(body, size_left, send_ts, payload_count);
        debug!(
            "Pushing packet {} with {} payloads, padding {}",
            self.total_data_packets, payload_count, size_left
        );
        let buffer = OutputBuffer::new(packet)
            .with_timestamp(send_ts)
            .with_delta_flag(!has_keyframe);
        self.push(buffer)?;
        self.data_object_size += packet_size as u64;
        self.total_data_packets += 1;
        Ok(())
    }

    /// Prefixes `body` with the payload parsing information and zero fills
    /// the packet to its full size.
    fn build_packet(
        &self,
        body: BytesMut,
        padding: usize,
        send_ts: Option<Duration>,
        payload_count: usize,
    ) -> Bytes {
        let packet_size = self.settings.packet_size as usize;
        let packet_length_type = if packet_size > 0xFFFF {
            FieldType::Dword
        } else {
            FieldType::Word
        };
        let padding_length_type = if self.settings.padding > 0xFFFF {
            FieldType::Dword
        } else {
            FieldType::Word
        };

        let mut packet = BytesMut::with_capacity(packet_size);
        packet.put_u8(
            PACKET_FLAG_MULTIPLE_PAYLOADS
                | (packet_length_type.bits() << 5)
                | (padding_length_type.bits() << 3),
        );
        packet.put_u8(PAYLOAD_PROPERTY_FLAGS);
        write_var_size_field(&mut packet, packet_length_type, (packet_size - padding) as u32);
        write_var_size_field(&mut packet, padding_length_type, padding as u32);
        packet.put_u32_le(send_ts.map_or(0, |ts| ts.as_millis() as u32));
        packet.put_u16_le(0);
        packet.put_u8(PAYLOAD_LENGTH_TYPE_WORD | payload_count as u8);
        packet.put_slice(&body);
        packet.resize(packet_size, 0);
        packet.freeze()
    }

    /// Writes the indexes, then fixes up the header fields only known now.
    fn stop_file(&mut self) -> Result<()> {
        // indexes go out in descending stream number order
        let indexes: Vec<Bytes> = self
            .streams
            .iter()
            .rev()
            .filter_map(|s| s.video_index())
            .map(|index| header::simple_index_object(&self.file_id, index))
            .collect();
        for index in indexes {
            self.push(OutputBuffer::new(index))?;
        }

        let play_duration = self
            .streams
            .iter()
            .map(|s| s.play_duration)
            .max()
            .unwrap_or(Duration::ZERO);
        let bitrate = self
            .streams
            .iter()
            .fold(0u32, |sum, s| sum.saturating_add(s.bitrate));

        if (play_duration.as_millis() as u64) < self.settings.preroll {
            warn!(
                "Preroll ({} ms) is bigger than the play duration ({} ms), the file may not play correctly",
                self.settings.preroll,
                play_duration.as_millis()
            );
        }

        let file_properties = FilePropertiesPatch {
            file_size: self.file_size,
            creation_time: header::asf_time_now(),
            data_packets: self.total_data_packets,
            play_duration,
            preroll: self.settings.preroll,
            packet_size: self.settings.packet_size,
            max_bitrate: bitrate,
        };
        debug!("Patching file properties: {:?}", file_properties);
        self.overwrite(self.file_properties_position + 40, file_properties.to_bytes())?;

        let data_object =
            header::data_object_patch(self.data_object_size, &self.file_id, self.total_data_packets);
        self.overwrite(self.data_object_position + 16, data_object)?;

        // back to the end for anything downstream appends
        self.sink.seek(self.file_size)
    }

    fn overwrite(&mut self, position: u64, data: Bytes) -> Result<()> {
        trace!("overwriting {} bytes at {}", data.len(), position);
        self.sink.seek(position)?;
        self.sink.push(OutputBuffer::new(data))
    }

    /// Drops everything the current session accumulated so a new file can be
    /// written. Streams keep their number, caps and tags.
    pub fn reset(&mut self) {
        debug!("Resetting muxer session");
        self.state = MuxState::None;
        self.payloads.clear();
        self.payload_data_size = 0;
        self.payload_parsing_info_size = self.settings.payload_parsing_info_size();
        self.streamable = self.settings.streamable;
        self.file_id = Guid::new(0, 0, 0, 0);
        self.file_size = 0;
        self.total_data_packets = 0;
        self.data_object_size = 0;
        self.file_properties_position = 0;
        self.data_object_position = 0;
        self.first_ts = None;
        self.stream_header = None;
        self.tags = TagList::new();
        for stream in &mut self.streams {
            stream.reset_session();
        }
    }
}

impl<S: MuxSink> Muxer for AsfMuxer<S> {
    fn write_header(&mut self, streams: &[CodecParams]) -> Result<()> {
        for params in streams {
            let index = if params.codec.is_audio() {
                self.add_audio_stream()?
            } else {
                self.add_video_stream()?
            };
            self.set_caps(index, params)?;
        }
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.push_packet(packet.stream_index, packet.clone())
    }

    fn write_trailer(&mut self) -> Result<()> {
        for stream in &mut self.streams {
            stream.eos = true;
        }
        self.collect()
    }
}
