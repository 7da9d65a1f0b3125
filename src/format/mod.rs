use crate::av::{CodecParams, Packet};
use crate::Result;

pub mod asf;
pub mod rtp;

/// Common trait for format muxers
pub trait Muxer {
    /// Registers one stream per entry of `streams`, in order
    fn write_header(&mut self, streams: &[CodecParams]) -> Result<()>;

    /// Write a packet to the stream selected by `packet.stream_index`
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Ends every stream and finishes the output
    fn write_trailer(&mut self) -> Result<()>;
}

pub use self::asf::{AsfMuxer, AsfParse};
pub use self::rtp::asf::{AsfRtpDepayloader, AsfRtpPayloader};
pub use self::rtp::{JitterBuffer, RTPPacket};
