#[cfg(test)]
mod tests {
    use asfio::av::{CodecParams, CodecType, Packet};
    use asfio::config::{MuxerSettings, RtpSettings};
    use asfio::format::asf::{
        parse_payloads, AsfMuxer, AsfParse, MemorySink, MuxSink, ParsedUnit, WriterSink,
    };
    use asfio::format::rtp::asf::{AsfRtpDepayloader, AsfRtpPayloader};
    use asfio::format::rtp::RTPPacket;
    use asfio::format::Muxer;
    use bytes::{Bytes, BytesMut};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::time::Duration;

    const PREROLL: u64 = 1000;
    const FRAMES: u64 = 12;

    #[derive(Debug, Default, PartialEq)]
    struct Frame {
        keyframe: bool,
        presentation_time: u32,
        data: BytesMut,
    }

    fn streams() -> Vec<CodecParams> {
        vec![
            CodecParams::video(CodecType::Wmv { version: Some(3) }, 640, 360),
            CodecParams::audio(CodecType::Wma { version: 2 }, 2, 44100)
                .with_bitrate(128000)
                .with_block_align(2973),
        ]
    }

    fn source_packets() -> Vec<Packet> {
        let mut packets = Vec::new();
        for i in 0..FRAMES {
            let video_len = 3000 + i as usize * 250;
            packets.push(
                Packet::new((0..video_len).map(|b| (b + i as usize) as u8).collect::<Vec<u8>>())
                    .with_stream_index(0)
                    .with_pts(Duration::from_millis(i * 40))
                    .with_duration(Duration::from_millis(40))
                    .with_key_flag(i % 4 == 0),
            );
            packets.push(
                Packet::new(vec![0xA0 | i as u8; 400])
                    .with_stream_index(1)
                    .with_pts(Duration::from_millis(i * 40 + 10))
                    .with_duration(Duration::from_millis(40))
                    .with_key_flag(true),
            );
        }
        packets
    }

    fn mux<S: MuxSink>(sink: S, settings: MuxerSettings) -> AsfMuxer<S> {
        let mut muxer = AsfMuxer::new(sink, settings).unwrap();
        muxer.write_header(&streams()).unwrap();
        for packet in source_packets() {
            muxer.write_packet(&packet).unwrap();
        }
        muxer.write_trailer().unwrap();
        muxer
    }

    /// Splits a file back into media objects keyed by stream number and
    /// media object number.
    fn demux(file: Vec<u8>) -> BTreeMap<(u8, u32), Frame> {
        let mut frames: BTreeMap<(u8, u32), Frame> = BTreeMap::new();
        for unit in AsfParse::new(Cursor::new(file)) {
            let (data, info) = match unit.unwrap() {
                ParsedUnit::Packet { data, info, .. } => (data, info),
                _ => continue,
            };
            for record in parse_payloads(&data, &info).unwrap() {
                let frame = frames
                    .entry((record.stream_number, record.media_object_number))
                    .or_default();
                assert_eq!(record.offset_in_media_object as usize, frame.data.len());
                frame.keyframe |= record.keyframe;
                frame.presentation_time = record.presentation_time().unwrap();
                frame.data.extend_from_slice(&record.data);
            }
        }
        frames
    }

    fn check_frames(frames: &BTreeMap<(u8, u32), Frame>) {
        assert_eq!(frames.len() as u64, FRAMES * 2);
        let mut media_objects = [0u32; 2];
        for packet in source_packets() {
            let stream_number = packet.stream_index as u8 + 1;
            let number = media_objects[packet.stream_index];
            media_objects[packet.stream_index] += 1;

            let frame = &frames[&(stream_number, number)];
            let pts = packet.pts.unwrap().as_millis() as u64;
            assert_eq!(frame.presentation_time as u64, PREROLL + pts);
            assert_eq!(frame.keyframe, packet.is_key);
            assert_eq!(Bytes::copy_from_slice(&frame.data), packet.data);
        }
    }

    #[test]
    fn test_mux_and_parse_file() {
        let settings = MuxerSettings::default()
            .with_preroll(PREROLL)
            .with_packet_size(3200);
        let muxer = mux(MemorySink::new(), settings);
        let packets = muxer.total_data_packets();
        let file_size = muxer.file_size();
        let file = muxer.into_sink().into_data();
        assert_eq!(file.len() as u64, file_size);

        let mut parse = AsfParse::new(Cursor::new(file.clone()));
        let mut index_objects = 0;
        while let Some(unit) = parse.next_unit().unwrap() {
            if let ParsedUnit::Object { .. } = unit {
                index_objects += 1;
            }
        }
        let info = parse.file_info().copied().unwrap();
        assert_eq!(info.packet_size, 3200);
        assert_eq!(info.packets_count, packets);
        assert_eq!(parse.parsed_packets(), packets);
        // one simple index for the video stream
        assert_eq!(index_objects, 1);

        check_frames(&demux(file));
    }

    #[test]
    fn test_mux_to_writer() {
        let muxer = mux(WriterSink::new(Cursor::new(Vec::new())), MuxerSettings::default().with_preroll(PREROLL));
        let file_size = muxer.file_size();
        let file = muxer.into_sink().into_inner().into_inner();
        assert_eq!(file.len() as u64, file_size);
        check_frames(&demux(file));
    }

    #[test]
    fn test_stream_over_rtp() {
        let payloader = AsfRtpPayloader::new(RtpSettings::default().with_mtu(1200)).unwrap();
        let mut muxer = mux(payloader, MuxerSettings::default().with_preroll(PREROLL));
        assert!(muxer.is_streamable());

        let config = muxer.sink().caps_config().unwrap();
        let rtp: Vec<RTPPacket> = muxer.sink_mut().take_packets();
        assert!(rtp.iter().all(|p| p.to_bytes().len() <= 1200));

        // through the wire format and back
        let mut depay = AsfRtpDepayloader::from_config(&config.config).unwrap();
        let mut stream = depay.headers().to_vec();
        let mut restored = 0;
        for packet in rtp {
            let packet = RTPPacket::parse(&packet.to_bytes()).unwrap();
            for buffer in depay.push(packet).unwrap() {
                assert_eq!(buffer.len() as u32, config.maxps);
                stream.extend_from_slice(&buffer.data);
                restored += 1;
            }
        }
        for buffer in depay.flush().unwrap() {
            stream.extend_from_slice(&buffer.data);
            restored += 1;
        }
        assert_eq!(restored, muxer.total_data_packets());

        check_frames(&demux(stream));
    }
}
