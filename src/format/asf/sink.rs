//! Downstream targets for the muxer output.
//!
//! A sink is owned by exactly one muxer for the whole session. The muxer
//! appends buffers in order and, when finalizing a seekable file, seeks back
//! to overwrite a few header fields and then seeks forward to the end again.

use crate::error::{AsfError, FlowError, Result};
use bytes::Bytes;
use log::trace;
use std::io::{Seek, SeekFrom, Write};
use std::time::Duration;

/// A buffer produced by the muxer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    pub data: Bytes,
    pub timestamp: Option<Duration>,
    /// Part of the stream header (streamable mode)
    pub header: bool,
    /// Data packet without any keyframe
    pub delta_unit: bool,
}

impl OutputBuffer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            timestamp: None,
            header: false,
            delta_unit: false,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<Duration>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_header_flag(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn with_delta_flag(mut self, delta_unit: bool) -> Self {
        self.delta_unit = delta_unit;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Output of the muxer.
pub trait MuxSink {
    /// Whether `seek` is supported
    fn is_seekable(&self) -> bool;

    /// Writes a buffer at the current position. A non-success flow result
    /// is returned as `AsfError::Flow`.
    fn push(&mut self, buffer: OutputBuffer) -> Result<()>;

    /// Moves the write position to an absolute byte offset
    fn seek(&mut self, position: u64) -> Result<()>;

    /// Signals that nothing else will be pushed
    fn end_of_stream(&mut self) -> Result<()>;
}

/// Sink that keeps everything in memory.
///
/// Every pushed buffer is recorded, and the bytes are also applied to a
/// file image so overwrites after a seek land where a real file would put
/// them.
#[derive(Debug, Default)]
pub struct MemorySink {
    buffers: Vec<OutputBuffer>,
    seeks: Vec<u64>,
    image: Vec<u8>,
    position: usize,
    seekable: bool,
    eos: bool,
    fail_after: Option<(usize, FlowError)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            seekable: true,
            ..Self::default()
        }
    }

    /// A sink that answers the seeking query with "no"
    pub fn non_seekable() -> Self {
        Self {
            seekable: false,
            ..Self::default()
        }
    }

    /// Accepts `count` buffers, then returns `flow` for every further push
    pub fn with_flow_error_after(mut self, count: usize, flow: FlowError) -> Self {
        self.fail_after = Some((count, flow));
        self
    }

    pub fn buffers(&self) -> &[OutputBuffer] {
        &self.buffers
    }

    pub fn seeks(&self) -> &[u64] {
        &self.seeks
    }

    /// The file as it would be on disk
    pub fn data(&self) -> &[u8] {
        &self.image
    }

    pub fn is_eos(&self) -> bool {
        self.eos
    }

    pub fn into_data(self) -> Vec<u8> {
        self.image
    }
}

impl MuxSink for MemorySink {
    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn push(&mut self, buffer: OutputBuffer) -> Result<()> {
        if let Some((count, flow)) = self.fail_after {
            if self.buffers.len() >= count {
                return Err(AsfError::Flow(flow));
            }
        }
        let end = self.position + buffer.len();
        if end > self.image.len() {
            self.image.resize(end, 0);
        }
        self.image[self.position..end].copy_from_slice(&buffer.data);
        self.position = end;
        self.buffers.push(buffer);
        Ok(())
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        if !self.seekable {
            return Err(AsfError::Seek("sink is not seekable".into()));
        }
        trace!("memory sink seek to {}", position);
        self.seeks.push(position);
        self.position = position as usize;
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.eos = true;
        Ok(())
    }
}

/// Sink writing to any seekable writer, such as a `File` or a `Cursor`.
pub struct WriterSink<W: Write + Seek> {
    writer: W,
}

impl<W: Write + Seek> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Seek> MuxSink for WriterSink<W> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn push(&mut self, buffer: OutputBuffer) -> Result<()> {
        self.writer.write_all(&buffer.data)?;
        Ok(())
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.writer
            .seek(SeekFrom::Start(position))
            .map_err(|e| AsfError::Seek(format!("seek to {} failed: {}", position, e)))?;
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn test_memory_sink_overwrite() {
        let mut sink = MemorySink::new();
        sink.push(OutputBuffer::new(vec![1u8, 2, 3, 4])).unwrap();
        sink.push(OutputBuffer::new(vec![5u8, 6])).unwrap();
        sink.seek(1).unwrap();
        sink.push(OutputBuffer::new(vec![9u8, 9])).unwrap();
        sink.seek(6).unwrap();
        sink.end_of_stream().unwrap();

        assert_eq!(sink.data(), &[1, 9, 9, 4, 5, 6]);
        assert_eq!(sink.buffers().len(), 3);
        assert_eq!(sink.seeks(), &[1, 6]);
        assert!(sink.is_eos());
    }

    #[test]
    fn test_memory_sink_flow_error() {
        let mut sink = MemorySink::new().with_flow_error_after(1, FlowError::NotLinked);
        sink.push(OutputBuffer::new(vec![0u8])).unwrap();
        let err = sink.push(OutputBuffer::new(vec![0u8])).unwrap_err();
        assert!(matches!(err, AsfError::Flow(FlowError::NotLinked)));
    }

    #[test]
    fn test_non_seekable_sink_refuses_seek() {
        let mut sink = MemorySink::non_seekable();
        assert!(!sink.is_seekable());
        assert!(matches!(sink.seek(0), Err(AsfError::Seek(_))));
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink::new(Cursor::new(Vec::new()));
        sink.push(OutputBuffer::new(vec![1u8, 2, 3])).unwrap();
        sink.seek(0).unwrap();
        sink.push(OutputBuffer::new(vec![7u8])).unwrap();
        sink.seek(3).unwrap();
        sink.push(OutputBuffer::new(vec![4u8])).unwrap();
        sink.end_of_stream().unwrap();
        assert_eq!(sink.into_inner().into_inner(), vec![7, 2, 3, 4]);
    }
}
