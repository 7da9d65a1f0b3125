use bytes::Bytes;

/// Codec families a stream can be negotiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecType {
    /// Windows Media Audio, `version` 1..=3
    Wma { version: u32 },
    /// MPEG audio
    Mpeg { version: u32, layer: u32 },
    /// Windows Media Video, version may be omitted when a FOURCC is given
    Wmv { version: Option<u32> },
    /// Raw video described only by its 4-character code
    Fourcc,
}

impl CodecType {
    pub fn is_audio(&self) -> bool {
        matches!(self, CodecType::Wma { .. } | CodecType::Mpeg { .. })
    }
}

/// Negotiated stream parameters, the equivalent of a caps structure.
#[derive(Debug, Clone)]
pub struct CodecParams {
    pub codec: CodecType,
    pub channels: Option<u32>,
    pub rate: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub block_align: Option<u32>,
    pub bitrate: Option<u32>,
    /// Explicit 4-character code, e.g. "WVC1"
    pub format: Option<String>,
    pub codec_data: Option<Bytes>,
}

impl CodecParams {
    pub fn new(codec: CodecType) -> Self {
        Self {
            codec,
            channels: None,
            rate: None,
            width: None,
            height: None,
            block_align: None,
            bitrate: None,
            format: None,
            codec_data: None,
        }
    }

    /// Audio parameters with the mandatory channel count and sample rate
    pub fn audio(codec: CodecType, channels: u32, rate: u32) -> Self {
        let mut params = Self::new(codec);
        params.channels = Some(channels);
        params.rate = Some(rate);
        params
    }

    /// Video parameters with the mandatory frame size
    pub fn video(codec: CodecType, width: u32, height: u32) -> Self {
        let mut params = Self::new(codec);
        params.width = Some(width);
        params.height = Some(height);
        params
    }

    pub fn with_block_align(mut self, block_align: u32) -> Self {
        self.block_align = Some(block_align);
        self
    }

    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_codec_data(mut self, codec_data: impl Into<Bytes>) -> Self {
        self.codec_data = Some(codec_data.into());
        self
    }
}

mod packet;
pub use packet::*;
