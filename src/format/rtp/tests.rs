use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_rtp_packet_creation() {
    let payload = Bytes::from(vec![1, 2, 3, 4]);
    let packet = RTPPacket::new(
        96, // payload type
        1000, // sequence number
        90000, // timestamp
        0x12345678, // ssrc
        true, // marker
        payload.clone(),
    );

    assert_eq!(packet.version, 2);
    assert_eq!(packet.payload_type, 96);
    assert_eq!(packet.sequence_number, 1000);
    assert_eq!(packet.timestamp, 90000);
    assert_eq!(packet.ssrc, 0x12345678);
    assert!(packet.marker);
    assert_eq!(packet.payload, payload);
}

#[test]
fn test_rtp_packet_parse() {
    let data = vec![
        0x80, 0xe0, 0x03, 0xe8, // V=2, P=0, X=0, CC=0, M=1, PT=96, seq=1000
        0x00, 0x01, 0x5f, 0x90, // timestamp=90000
        0x12, 0x34, 0x56, 0x78, // SSRC=0x12345678
        0x01, 0x02, 0x03, 0x04, // payload
    ];

    let packet = RTPPacket::parse(&data).unwrap();
    
    assert_eq!(packet.version, 2);
    assert!(!packet.padding);
    assert!(!packet.extension);
    assert_eq!(packet.csrc_count, 0);
    assert_eq!(packet.marker, true);
    assert_eq!(packet.payload_type, 96);
    assert_eq!(packet.sequence_number, 1000);
    assert_eq!(packet.timestamp, 90000);
    assert_eq!(packet.ssrc, 0x12345678);
    assert_eq!(&packet.payload[..], &[1, 2, 3, 4]);
}

#[test]
fn test_rtp_packet_parse_with_extension() {
    let data = vec![
        0x90, 0xe0, 0x03, 0xe8, // V=2, P=0, X=1, CC=0, M=1, PT=96, seq=1000
        0x00, 0x01, 0x5f, 0x90, // timestamp=90000
        0x12, 0x34, 0x56, 0x78, // SSRC=0x12345678
        0xbe, 0xde, 0x00, 0x01, // Extension header (0xbede, length=1)
        0x00, 0x00, 0x00, 0x00, // Extension data (4 bytes)
        0x01, 0x02, 0x03, 0x04, // payload
    ];

    let packet = RTPPacket::parse(&data).unwrap();
    
    assert_eq!(packet.version, 2);
    assert!(packet.extension);
    assert!(packet.extension_data.is_some());
    let (ext_header, ext_data) = packet.extension_data.unwrap();
    assert_eq!(ext_header, 0xbede);
    assert_eq!(ext_data.len(), 4);
}

#[test]
fn test_jitter_buffer() {
    let mut jb = JitterBuffer::new(16);

    // Add packets out of order
    let packets = vec![
        (1000, vec![1]),
        (1002, vec![3]),
        (1001, vec![2]),
        (1003, vec![4]),
    ];

    for (seq, payload) in packets {
        let packet = RTPPacket::new(
            96,
            seq,
            90000,
            0x12345678,
            false,
            Bytes::from(payload),
        );
        jb.push(packet).unwrap();
    }

    // Verify packets come out in order
    for i in 0..4 {
        let packet = jb.pop().unwrap();
        assert_eq!(packet.sequence_number, 1000 + i as u16);
        assert_eq!(packet.payload[0], (i + 1) as u8);
    }

    assert!(jb.pop().is_none());
}

#[test]
fn test_jitter_buffer_overflow() {
    let mut jb = JitterBuffer::new(2);

    // Try to add more packets than buffer size
    for seq in 0..4 {
        let packet = RTPPacket::new(
            96,
            seq,
            90000,
            0x12345678,
            false,
            Bytes::from(vec![1]),
        );

        if seq < 2 {
            assert!(jb.push(packet).is_ok());
        } else {
            assert!(matches!(jb.push(packet), Err(RTPError::BufferOverflow)));
        }
    }
}

#[test]
fn test_jitter_buffer_sequence_wrap() {
    let mut jb = JitterBuffer::new(16);

    // Add packet near sequence number wrap point
    let packet1 = RTPPacket::new(
        96,
        65535, // max u16
        90000,
        0x12345678,
        false,
        Bytes::from(vec![1]),
    );
    jb.push(packet1).unwrap();

    // Add packet after wrap
    let packet2 = RTPPacket::new(
        96,
        0,
        90000,
        0x12345678,
        false,
        Bytes::from(vec![2]),
    );
    assert!(matches!(jb.push(packet2), Err(RTPError::SequenceWrapped)));
}
#[test]
fn test_rtp_packet_to_bytes() {
    let packet = RTPPacket::new(96, 1000, 90000, 0x12345678, true, Bytes::from(vec![1, 2, 3, 4]));
    let raw = packet.to_bytes();
    assert_eq!(
        &raw[..],
        &[
            0x80, 0xe0, 0x03, 0xe8, 0x00, 0x01, 0x5f, 0x90, 0x12, 0x34, 0x56, 0x78, 0x01, 0x02,
            0x03, 0x04
        ]
    );

    let mut with_ext = RTPPacket::new(97, 7, 1, 2, false, Bytes::from_static(b"asf"));
    with_ext.extension = true;
    with_ext.extension_data = Some((0xbede, Bytes::from(vec![9u8; 4])));
    with_ext.csrc = vec![0xAABBCCDD];
    with_ext.csrc_count = 1;
    let parsed = RTPPacket::parse(&with_ext.to_bytes()).unwrap();
    assert_eq!(parsed.csrc, vec![0xAABBCCDD]);
    assert_eq!(parsed.extension_data, with_ext.extension_data);
    assert_eq!(parsed.payload, Bytes::from_static(b"asf"));
    assert!(!parsed.marker);
}

#[test]
fn test_jitter_buffer_drain() {
    let mut jb = JitterBuffer::new(16);
    for seq in [10u16, 13, 11] {
        jb.push(RTPPacket::new(96, seq, 0, 1, false, Bytes::new())).unwrap();
    }
    let drained: Vec<u16> = jb.drain().iter().map(|p| p.sequence_number).collect();
    assert_eq!(drained, vec![10, 11, 13]);
    assert!(jb.is_empty());
    jb.push(RTPPacket::new(96, 500, 0, 1, false, Bytes::new())).unwrap();
    assert_eq!(jb.pop().map(|p| p.sequence_number), Some(500));
}

#[test]
fn test_rtp_error_conversion() {
    let err: crate::error::AsfError = RTPError::InvalidPacket.into();
    assert!(matches!(err, crate::error::AsfError::InvalidData(_)));
}

#[test]
fn test_jitter_buffer_waits_for_expected_packet() {
    let mut jb = JitterBuffer::new(16);
    jb.push(RTPPacket::new(96, 20, 0, 1, false, Bytes::new())).unwrap();
    assert_eq!(jb.pop().map(|p| p.sequence_number), Some(20));

    // 22 arrives before 21
    jb.push(RTPPacket::new(96, 22, 0, 1, false, Bytes::new())).unwrap();
    assert!(jb.pop().is_none());
    jb.push(RTPPacket::new(96, 21, 0, 1, false, Bytes::new())).unwrap();
    assert_eq!(jb.pop().map(|p| p.sequence_number), Some(21));
    assert_eq!(jb.pop().map(|p| p.sequence_number), Some(22));
    assert!(jb.is_empty());
}

#[test]
fn test_rtp_packet_parse_malformed() {
    let good = RTPPacket::new(96, 1, 2, 3, false, Bytes::from_static(b"asf")).to_bytes();

    // declares two CSRCs that are not there
    let mut raw = good.to_vec();
    raw[0] |= 0x02;
    assert!(matches!(RTPPacket::parse(&raw[..12]), Err(RTPError::InvalidPacket)));

    // padding longer than the payload
    let mut raw = good.to_vec();
    raw[0] |= 0x20;
    raw.push(200);
    assert!(matches!(RTPPacket::parse(&raw), Err(RTPError::InvalidPacket)));

    // version 1
    let mut raw = good.to_vec();
    raw[0] = 0x40;
    assert!(RTPPacket::parse(&raw).is_err());
}
