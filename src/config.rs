use crate::error::{AsfError, Result};
use crate::format::asf::types::ASF_MULTIPLE_PAYLOAD_HEADER_SIZE;
use lazy_static::lazy_static;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;

pub const DEFAULT_PACKET_SIZE: u32 = 4800;
pub const DEFAULT_PREROLL: u64 = 5000;
pub const DEFAULT_MERGE_STREAM_TAGS: bool = true;
pub const DEFAULT_PADDING: u64 = 0;
pub const DEFAULT_STREAMABLE: bool = false;
pub const DEFAULT_RTP_MTU: usize = 1400;
pub const DEFAULT_RTP_PAYLOAD_TYPE: u8 = 96;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::new());
}

/// Options honoured by the ASF muxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxerSettings {
    /// Size of every data packet in bytes
    pub packet_size: u32,
    /// Preroll in milliseconds
    pub preroll: u64,
    /// Merge stream tags into the file content description
    pub merge_stream_tags: bool,
    /// Size of the padding object; below 24 bytes no padding object is written
    pub padding: u64,
    /// Skip indexes and header fix-ups so the output can be streamed
    pub streamable: bool,
}

impl Default for MuxerSettings {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            preroll: DEFAULT_PREROLL,
            merge_stream_tags: DEFAULT_MERGE_STREAM_TAGS,
            padding: DEFAULT_PADDING,
            streamable: DEFAULT_STREAMABLE,
        }
    }
}

impl MuxerSettings {
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    pub fn with_preroll(mut self, preroll: u64) -> Self {
        self.preroll = preroll;
        self
    }

    pub fn with_merge_stream_tags(mut self, merge: bool) -> Self {
        self.merge_stream_tags = merge;
        self
    }

    pub fn with_padding(mut self, padding: u64) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_streamable(mut self, streamable: bool) -> Self {
        self.streamable = streamable;
        self
    }

    /// Size of the payload parsing information written at the start of each packet.
    pub fn payload_parsing_info_size(&self) -> usize {
        let mut size = 8;
        size += if self.packet_size > 65535 { 4 } else { 2 };
        size += if self.padding > 65535 { 4 } else { 2 };
        size
    }

    /// Smallest packet size that still fits the parsing info, the payload
    /// count byte, one payload header and a byte of media data.
    pub fn min_packet_size(&self) -> u32 {
        (self.payload_parsing_info_size() + 1 + ASF_MULTIPLE_PAYLOAD_HEADER_SIZE + 1) as u32
    }

    pub fn validate(&self) -> Result<()> {
        let min = self.min_packet_size();
        if self.packet_size < min {
            return Err(AsfError::Config(format!(
                "packet size {} is smaller than the minimum {}",
                self.packet_size, min
            )));
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key {
            "packet_size" => self.packet_size = value.parse()?,
            "preroll" => self.preroll = value.parse()?,
            "padding" => self.padding = value.parse()?,
            "merge_stream_tags" => self.merge_stream_tags = parse_bool(value)?,
            "streamable" => self.streamable = parse_bool(value)?,
            _ => {}
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AsfError::Config(format!("invalid boolean '{}'", other))),
    }
}

/// Options of the RTP payloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpSettings {
    /// Largest RTP packet, RTP header included
    pub mtu: usize,
    pub payload_type: u8,
    /// Random when unset
    pub ssrc: Option<u32>,
}

impl Default for RtpSettings {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_RTP_MTU,
            payload_type: DEFAULT_RTP_PAYLOAD_TYPE,
            ssrc: None,
        }
    }
}

impl RtpSettings {
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type;
        self
    }

    pub fn with_ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = Some(ssrc);
        self
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key {
            "mtu" => self.mtu = value.parse()?,
            "payload_type" => self.payload_type = value.parse()?,
            "ssrc" => self.ssrc = Some(value.parse()?),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub muxer: MuxerSettings,
    pub rtp: RtpSettings,
}

impl Config {
    fn new() -> Self {
        let mut config = Config {
            muxer: MuxerSettings::default(),
            rtp: RtpSettings::default(),
        };

        // Environment variables first
        let env_keys = [
            ("ASFIO_PACKET_SIZE", "packet_size"),
            ("ASFIO_PREROLL", "preroll"),
            ("ASFIO_MERGE_STREAM_TAGS", "merge_stream_tags"),
            ("ASFIO_PADDING", "padding"),
            ("ASFIO_STREAMABLE", "streamable"),
            ("ASFIO_RTP_MTU", "rtp_mtu"),
            ("ASFIO_RTP_PAYLOAD_TYPE", "rtp_payload_type"),
            ("ASFIO_RTP_SSRC", "rtp_ssrc"),
        ];
        for (var, key) in &env_keys {
            if let Ok(value) = env::var(var) {
                if let Err(e) = config.apply(key, &value) {
                    log::warn!("Ignoring {}: {}", var, e);
                }
            }
        }

        // Then the config file
        let config_paths = ["./config.toml", "./asfio_config.toml"];
        for path in &config_paths {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    config.load_str(&content);
                }
            }
        }

        config
    }

    fn load_str(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                if let Err(e) = self.apply(key.trim(), value) {
                    log::warn!("Ignoring config line '{}': {}", line, e);
                }
            }
        }
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key.strip_prefix("rtp_") {
            Some(rtp_key) => self.rtp.apply(rtp_key, value),
            None => self.muxer.apply(key, value),
        }
    }

    pub fn reload() {
        let new_config = Config::new();
        if let Ok(mut config) = CONFIG.write() {
            *config = new_config;
        }
    }
}

/// Returns the muxer settings from configuration
pub fn default_muxer_settings() -> MuxerSettings {
    match CONFIG.read() {
        Ok(config) => config.muxer.clone(),
        Err(_) => MuxerSettings::default(),
    }
}

/// Returns the RTP payloader settings from configuration
pub fn default_rtp_settings() -> RtpSettings {
    match CONFIG.read() {
        Ok(config) => config.rtp.clone(),
        Err(_) => RtpSettings::default(),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# ASFIO Configuration
# This is a template. Replace the values with your actual configuration.

# Size of each ASF data packet in bytes
packet_size = 4800
# Preroll in milliseconds
preroll = 5000
merge_stream_tags = true
# Padding object size in bytes (ignored below 24)
padding = 0
streamable = false

# RTP payloader
rtp_mtu = 1400
rtp_payload_type = 96
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parsing_info_size() {
        let settings = MuxerSettings::default();
        assert_eq!(settings.payload_parsing_info_size(), 12);
        let settings = settings.with_packet_size(70000);
        assert_eq!(settings.payload_parsing_info_size(), 14);
        let settings = settings.with_padding(70000);
        assert_eq!(settings.payload_parsing_info_size(), 16);
    }

    #[test]
    fn test_validate() {
        assert!(MuxerSettings::default().validate().is_ok());
        assert!(MuxerSettings::default().with_packet_size(12).validate().is_err());
        assert!(MuxerSettings::default().with_packet_size(30).validate().is_err());
        assert!(MuxerSettings::default().with_packet_size(31).validate().is_ok());
    }

    #[test]
    fn test_load_str() {
        let mut config = Config {
            muxer: MuxerSettings::default(),
            rtp: RtpSettings::default(),
        };
        config.load_str("# comment\npacket_size = 9000\nstreamable = \"true\"\npreroll=0\nbogus = 1\n");
        assert_eq!(config.muxer.packet_size, 9000);
        assert!(config.muxer.streamable);
        assert_eq!(config.muxer.preroll, 0);
        assert!(config.muxer.merge_stream_tags);
    }

    #[test]
    fn test_bad_value_is_skipped() {
        let mut config = Config {
            muxer: MuxerSettings::default(),
            rtp: RtpSettings::default(),
        };
        config.load_str("packet_size = lots\nstreamable = maybe\n");
        assert_eq!(config.muxer, MuxerSettings::default());
    }

    #[test]
    fn test_rtp_keys() {
        let mut config = Config {
            muxer: MuxerSettings::default(),
            rtp: RtpSettings::default(),
        };
        config.load_str("rtp_mtu = 576\nrtp_ssrc = 1234\npreroll = 100\n");
        assert_eq!(
            config.rtp,
            RtpSettings::default().with_mtu(576).with_ssrc(1234)
        );
        assert_eq!(config.muxer.preroll, 100);
    }
}
