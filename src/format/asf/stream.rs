use super::tags::TagList;
use super::types::*;
use crate::av::{CodecParams, CodecType, Packet};
use crate::error::{AsfError, Result};
use bytes::Bytes;
use log::{debug, warn};
use std::collections::VecDeque;
use std::time::Duration;

/// WAVEFORMATEX-like audio description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioInfo {
    pub format: u16,
    pub channels: u16,
    pub rate: u32,
    pub av_bps: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

/// BITMAPINFOHEADER-like video description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bit_cnt: u16,
    pub compression: u32,
    pub xpels_meter: u32,
    pub ypels_meter: u32,
    pub num_colors: u32,
    pub imp_colors: u32,
}

impl Default for VideoInfo {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            planes: 1,
            bit_cnt: 0,
            compression: 0,
            xpels_meter: 0,
            ypels_meter: 0,
            num_colors: 0,
            imp_colors: 0,
        }
    }
}

impl VideoInfo {
    pub fn image_size(&self) -> u32 {
        (self.width as u32)
            .wrapping_mul(self.height as u32)
            .wrapping_mul(self.bit_cnt as u32)
    }
}

/// One simple index entry: where the last keyframe before a point in time starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleIndexEntry {
    pub packet_number: u32,
    pub packet_count: u16,
}

/// Keyframe bookkeeping of a video stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoIndex {
    pub entries: Vec<SimpleIndexEntry>,
    pub last_keyframe_packet: u32,
    pub last_keyframe_packet_count: u16,
    pub max_keyframe_packet_count: u16,
    pub has_keyframe: bool,
    /// Next index time in 100ns units
    pub next_index_time: u64,
    /// Distance between entries in 100ns units
    pub time_interval: u64,
}

impl Default for VideoIndex {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            last_keyframe_packet: 0,
            last_keyframe_packet_count: 0,
            max_keyframe_packet_count: 0,
            has_keyframe: false,
            next_index_time: 0,
            time_interval: DEFAULT_SIMPLE_INDEX_TIME_INTERVAL,
        }
    }
}

impl VideoIndex {
    /// Appends an entry pointing at the last keyframe seen. The caller decides
    /// whether enough time has passed since the previous entry.
    pub fn add_entry(&mut self) {
        debug!(
            "Adding new simple index entry packet number: {}, packet count: {}",
            self.last_keyframe_packet, self.last_keyframe_packet_count
        );
        let entry = SimpleIndexEntry {
            packet_number: self.last_keyframe_packet,
            packet_count: self.last_keyframe_packet_count,
        };
        if entry.packet_count > self.max_keyframe_packet_count {
            self.max_keyframe_packet_count = entry.packet_count;
        }
        self.entries.push(entry);
    }

    /// Emits one entry per interval step up to `presentation_time_100ns`.
    pub fn advance_to(&mut self, presentation_time_100ns: u64) {
        if !self.has_keyframe || self.time_interval == 0 {
            return;
        }
        while self.next_index_time <= presentation_time_100ns {
            self.add_entry();
            self.next_index_time += self.time_interval;
        }
    }

    pub fn record_keyframe(&mut self, packet_number: u32, packet_count: u16) {
        self.last_keyframe_packet = packet_number;
        self.last_keyframe_packet_count = packet_count;
        self.has_keyframe = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    Audio(AudioInfo),
    Video { info: VideoInfo, index: VideoIndex },
}

/// One registered input stream of the muxer.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// 1-based ASF stream number
    pub stream_number: u8,
    pub kind: StreamKind,
    pub codec_data: Option<Bytes>,
    pub bitrate: u32,
    pub media_object_number: u8,
    pub play_duration: Duration,
    pub first_ts: Option<Duration>,
    pub tags: TagList,
    pub(crate) queue: VecDeque<Packet>,
    pub(crate) eos: bool,
    caps_set: bool,
}

impl StreamDescriptor {
    pub fn new_audio(stream_number: u8) -> Self {
        Self::new(stream_number, StreamKind::Audio(AudioInfo::default()))
    }

    pub fn new_video(stream_number: u8) -> Self {
        Self::new(
            stream_number,
            StreamKind::Video {
                info: VideoInfo::default(),
                index: VideoIndex::default(),
            },
        )
    }

    fn new(stream_number: u8, kind: StreamKind) -> Self {
        Self {
            stream_number,
            kind,
            codec_data: None,
            bitrate: 0,
            media_object_number: 0,
            play_duration: Duration::ZERO,
            first_ts: None,
            tags: TagList::new(),
            queue: VecDeque::new(),
            eos: false,
            caps_set: false,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Audio(_))
    }

    pub fn has_caps(&self) -> bool {
        self.caps_set
    }

    pub fn codec_data_len(&self) -> usize {
        self.codec_data.as_ref().map_or(0, |c| c.len())
    }

    /// Size of the audio or video block that follows the stream properties object
    pub fn media_specific_data_size(&self) -> usize {
        match self.kind {
            StreamKind::Audio(_) => ASF_AUDIO_SPECIFIC_DATA_SIZE,
            StreamKind::Video { .. } => ASF_VIDEO_SPECIFIC_DATA_SIZE,
        }
    }

    pub fn video_index(&self) -> Option<&VideoIndex> {
        match &self.kind {
            StreamKind::Video { index, .. } => Some(index),
            StreamKind::Audio(_) => None,
        }
    }

    pub fn video_index_mut(&mut self) -> Option<&mut VideoIndex> {
        match &mut self.kind {
            StreamKind::Video { index, .. } => Some(index),
            StreamKind::Audio(_) => None,
        }
    }

    /// Number of buffers waiting to be collected
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Applies negotiated caps. Refused caps leave the stream untouched.
    pub fn set_caps(&mut self, params: &CodecParams) -> Result<()> {
        debug!("stream {}: caps {:?}", self.stream_number, params);
        let stream_number = self.stream_number;
        let refuse = |reason: &str| {
            warn!("stream {} refused caps {:?}: {}", stream_number, params.codec, reason);
            AsfError::Codec(format!("stream {}: {}", stream_number, reason))
        };

        match &mut self.kind {
            StreamKind::Audio(audio) => {
                let (channels, rate) = match (params.channels, params.rate) {
                    (Some(c), Some(r)) => (c, r),
                    _ => return Err(refuse("audio caps need channels and rate")),
                };
                let mut info = AudioInfo {
                    channels: channels as u16,
                    rate,
                    ..AudioInfo::default()
                };
                let mut bitrate = 0;
                match params.codec {
                    CodecType::Wma { version } => {
                        info.format = match version {
                            1 => WAVE_FORMAT_WMAV1,
                            2 => WAVE_FORMAT_WMAV2,
                            3 => WAVE_FORMAT_WMAV3,
                            _ => return Err(refuse("unsupported WMA version")),
                        };
                        if let Some(block_align) = params.block_align {
                            info.block_align = block_align as u16;
                        }
                        if let Some(rate) = params.bitrate {
                            bitrate = rate;
                            info.av_bps = rate / 8;
                        }
                    }
                    CodecType::Mpeg { version: 1, layer: 3 } => {
                        info.format = WAVE_FORMAT_MPEGL3;
                    }
                    CodecType::Mpeg { .. } => return Err(refuse("only MPEG-1 layer 3 is supported")),
                    _ => return Err(refuse("not an audio codec")),
                }
                *audio = info;
                self.bitrate = bitrate;
            }
            StreamKind::Video { info, .. } => {
                let (width, height) = match (params.width, params.height) {
                    (Some(w), Some(h)) => (w, h),
                    _ => return Err(refuse("video caps need width and height")),
                };
                let fourcc = params
                    .format
                    .as_deref()
                    .filter(|f| f.len() == 4)
                    .map(fourcc_from_str);
                let compression = match (params.codec, fourcc) {
                    (CodecType::Wmv { .. }, Some(fourcc)) | (CodecType::Fourcc, Some(fourcc)) => fourcc,
                    (CodecType::Wmv { version: Some(v @ 1..=3) }, None) => {
                        fourcc_from_str(&format!("WMV{}", v))
                    }
                    (CodecType::Wmv { .. }, None) => return Err(refuse("unsupported WMV version")),
                    (CodecType::Fourcc, None) => return Err(refuse("missing 4-character format")),
                    _ => return Err(refuse("not a video codec")),
                };
                *info = VideoInfo {
                    width: width as i32,
                    height: height as i32,
                    bit_cnt: 24,
                    compression,
                    ..VideoInfo::default()
                };
            }
        }

        if let Some(codec_data) = &params.codec_data {
            self.codec_data = Some(codec_data.clone());
        }
        self.caps_set = true;
        Ok(())
    }

    /// Clears everything a muxing session accumulated. Stream number, caps
    /// and tags survive so the stream can take part in the next session.
    pub fn reset_session(&mut self) {
        self.media_object_number = 0;
        self.play_duration = Duration::ZERO;
        self.first_ts = None;
        self.queue.clear();
        self.eos = false;
        if let StreamKind::Video { index, .. } = &mut self.kind {
            *index = VideoIndex::default();
        }
    }
}

/// Packs a 4-character code the way RIFF stores it (first char in the low byte)
pub fn fourcc_from_str(code: &str) -> u32 {
    let b = code.as_bytes();
    let at = |i: usize| b.get(i).copied().unwrap_or(b' ') as u32;
    at(0) | (at(1) << 8) | (at(2) << 16) | (at(3) << 24)
}
