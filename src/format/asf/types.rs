use crate::error::{AsfError, Result};
use crate::utils::ByteReader;
use bytes::{BufMut, BytesMut};
use std::fmt;

// Fixed object sizes
pub const ASF_GUID_SIZE: usize = 16;
pub const ASF_GUID_OBJSIZE_SIZE: usize = 24;
pub const ASF_HEADER_OBJECT_SIZE: usize = 30;
pub const ASF_FILE_PROPERTIES_OBJECT_SIZE: usize = 104;
pub const ASF_STREAM_PROPERTIES_OBJECT_SIZE: usize = 78;
pub const ASF_HEADER_EXTENSION_OBJECT_SIZE: usize = 46;
pub const ASF_AUDIO_SPECIFIC_DATA_SIZE: usize = 18;
pub const ASF_VIDEO_SPECIFIC_DATA_SIZE: usize = 51;
pub const ASF_DATA_OBJECT_SIZE: usize = 50;
pub const ASF_SINGLE_PAYLOAD_HEADER_SIZE: usize = 15;
pub const ASF_MULTIPLE_PAYLOAD_HEADER_SIZE: usize = 17;
pub const ASF_EXTENDED_STREAM_PROPERTIES_OBJECT_SIZE: usize = 88;
pub const ASF_CONTENT_DESCRIPTION_OBJECT_SIZE: usize = 34;
pub const ASF_EXT_CONTENT_DESCRIPTION_OBJECT_SIZE: usize = 26;
pub const ASF_SIMPLE_INDEX_OBJECT_SIZE: usize = 56;
pub const ASF_SIMPLE_INDEX_ENTRY_SIZE: usize = 6;
pub const ASF_METADATA_OBJECT_SIZE: usize = 26;
pub const ASF_PADDING_OBJECT_SIZE: usize = 24;

/// Bytes overwritten in the file properties object when finalizing (offset 40 to the end)
pub const ASF_FILE_PROPERTIES_PATCH_SIZE: usize = ASF_FILE_PROPERTIES_OBJECT_SIZE - 40;
/// Bytes overwritten in the data object when finalizing: size + file id + packet count
pub const ASF_DATA_OBJECT_PATCH_SIZE: usize = 8 + ASF_GUID_SIZE + 8;

pub const MAX_PAYLOADS_IN_A_PACKET: usize = 63;
pub const DEFAULT_SIMPLE_INDEX_TIME_INTERVAL: u64 = 10_000_000;

// File properties flags
pub const ASF_FILE_FLAG_BROADCAST: u32 = 0x1;
pub const ASF_FILE_FLAG_SEEKABLE: u32 = 0x2;

// RIFF audio format tags
pub const WAVE_FORMAT_MPEGL3: u16 = 0x0055;
pub const WAVE_FORMAT_WMAV1: u16 = 0x0160;
pub const WAVE_FORMAT_WMAV2: u16 = 0x0161;
pub const WAVE_FORMAT_WMAV3: u16 = 0x0162;

/// Offset between the ASF epoch (1601-01-01) and the Unix epoch, in 100ns units
pub const ASF_EPOCH_OFFSET: u64 = 116_444_736_000_000_000;

/// Converts milliseconds to the 100ns units ASF uses for durations.
pub fn ms_to_100ns(ms: u64) -> u64 {
    ms * 10_000
}

/// A 16-byte ASF identifier.
///
/// The first three fields are stored little-endian; the last 8 bytes are
/// stored as a big-endian 64-bit integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub v1: u32,
    pub v2: u16,
    pub v3: u16,
    pub v4: u64,
}

impl Guid {
    pub const fn new(v1: u32, v2: u16, v3: u16, v4: u64) -> Self {
        Self { v1, v2, v3, v4 }
    }

    /// Builds a GUID from 16 random bytes, as used for file ids.
    pub fn random() -> Self {
        let raw: [u8; 16] = rand::random();
        Self::from_bytes(&raw)
    }

    pub fn from_bytes(raw: &[u8; 16]) -> Self {
        let mut v4 = [0u8; 8];
        v4.copy_from_slice(&raw[8..]);
        Self {
            v1: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            v2: u16::from_le_bytes([raw[4], raw[5]]),
            v3: u16::from_le_bytes([raw[6], raw[7]]),
            v4: u64::from_be_bytes(v4),
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut raw = [0u8; 16];
        raw[0..4].copy_from_slice(&self.v1.to_le_bytes());
        raw[4..6].copy_from_slice(&self.v2.to_le_bytes());
        raw[6..8].copy_from_slice(&self.v3.to_le_bytes());
        raw[8..16].copy_from_slice(&self.v4.to_be_bytes());
        raw
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.v1);
        buf.put_u16_le(self.v2);
        buf.put_u16_le(self.v3);
        buf.put_u64(self.v4);
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let v1 = reader.read_u32_le()?;
        let v2 = reader.read_u16_le()?;
        let v3 = reader.read_u16_le()?;
        let v4 = reader.read_u64_be()?;
        Ok(Self { v1, v2, v3, v4 })
    }

    /// Returns true when `data` starts with this GUID
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= ASF_GUID_SIZE && data[..ASF_GUID_SIZE] == self.to_bytes()
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            self.v1,
            self.v2,
            self.v3,
            self.v4 >> 48,
            self.v4 & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Every GUID this crate emits or recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsfObject {
    Header,
    FileProperties,
    StreamProperties,
    AudioMedia,
    NoErrorCorrection,
    AudioSpread,
    HeaderExtension,
    Reserved1,
    Data,
    ExtendedStreamProperties,
    VideoMedia,
    SimpleIndex,
    ContentDescription,
    ExtContentDescription,
    Metadata,
    Padding,
}

/// Catalog entry: name, GUID and fixed size (0 for stream-type constants).
#[derive(Debug, Clone, Copy)]
pub struct AsfObjectInfo {
    pub kind: AsfObject,
    pub name: &'static str,
    pub guid: Guid,
    pub size: usize,
}

pub static ASF_OBJECTS: [AsfObjectInfo; 16] = [
    AsfObjectInfo {
        kind: AsfObject::Header,
        name: "header",
        guid: Guid::new(0x75B22630, 0x668E, 0x11CF, 0xA6D900AA0062CE6C),
        size: ASF_HEADER_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::FileProperties,
        name: "file properties",
        guid: Guid::new(0x8CABDCA1, 0xA947, 0x11CF, 0x8EE400C00C205365),
        size: ASF_FILE_PROPERTIES_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::StreamProperties,
        name: "stream properties",
        guid: Guid::new(0xB7DC0791, 0xA9B7, 0x11CF, 0x8EE600C00C205365),
        size: ASF_STREAM_PROPERTIES_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::AudioMedia,
        name: "audio media",
        guid: Guid::new(0xF8699E40, 0x5B4D, 0x11CF, 0xA8FD00805F5C442B),
        size: 0,
    },
    AsfObjectInfo {
        kind: AsfObject::NoErrorCorrection,
        name: "no error correction",
        guid: Guid::new(0x20FB5700, 0x5B55, 0x11CF, 0xA8FD00805F5C442B),
        size: 0,
    },
    AsfObjectInfo {
        kind: AsfObject::AudioSpread,
        name: "audio spread",
        guid: Guid::new(0xBFC3CD50, 0x618F, 0x11CF, 0x8BB200AA00B4E220),
        size: 0,
    },
    AsfObjectInfo {
        kind: AsfObject::HeaderExtension,
        name: "header extension",
        guid: Guid::new(0x5FBF03B5, 0xA92E, 0x11CF, 0x8EE300C00C205365),
        size: ASF_HEADER_EXTENSION_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::Reserved1,
        name: "reserved 1",
        guid: Guid::new(0xABD3D211, 0xA9BA, 0x11CF, 0x8EE600C00C205365),
        size: 0,
    },
    AsfObjectInfo {
        kind: AsfObject::Data,
        name: "data",
        guid: Guid::new(0x75B22636, 0x668E, 0x11CF, 0xA6D900AA0062CE6C),
        size: ASF_DATA_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::ExtendedStreamProperties,
        name: "extended stream properties",
        guid: Guid::new(0x14E6A5CB, 0xC672, 0x4332, 0x8399A96952065B5A),
        size: ASF_EXTENDED_STREAM_PROPERTIES_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::VideoMedia,
        name: "video media",
        guid: Guid::new(0xBC19EFC0, 0x5B4D, 0x11CF, 0xA8FD00805F5C442B),
        size: 0,
    },
    AsfObjectInfo {
        kind: AsfObject::SimpleIndex,
        name: "simple index",
        guid: Guid::new(0x33000890, 0xE5B1, 0x11CF, 0x89F400A0C90349CB),
        size: ASF_SIMPLE_INDEX_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::ContentDescription,
        name: "content description",
        guid: Guid::new(0x75B22633, 0x668E, 0x11CF, 0xA6D900AA0062CE6C),
        size: ASF_CONTENT_DESCRIPTION_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::ExtContentDescription,
        name: "extended content description",
        guid: Guid::new(0xD2D0A440, 0xE307, 0x11D2, 0x97F000A0C95EA850),
        size: ASF_EXT_CONTENT_DESCRIPTION_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::Metadata,
        name: "metadata",
        guid: Guid::new(0xC5F8CBEA, 0x5BAF, 0x4877, 0x8467AA8C44FA4CCA),
        size: ASF_METADATA_OBJECT_SIZE,
    },
    AsfObjectInfo {
        kind: AsfObject::Padding,
        name: "padding",
        guid: Guid::new(0x1806D474, 0xCADF, 0x4509, 0xA4BA9AABCB96AAE8),
        size: ASF_PADDING_OBJECT_SIZE,
    },
];

impl AsfObject {
    pub fn info(self) -> &'static AsfObjectInfo {
        // The catalog is declared in enum order
        &ASF_OBJECTS[self as usize]
    }

    pub fn guid(self) -> Guid {
        self.info().guid
    }

    pub fn size(self) -> usize {
        self.info().size
    }

    /// Looks a GUID up in the catalog
    pub fn from_guid(guid: &Guid) -> Option<AsfObject> {
        ASF_OBJECTS.iter().find(|o| o.guid == *guid).map(|o| o.kind)
    }
}

/// Writes the common object prefix: GUID + 64-bit total size.
pub fn write_object_header(buf: &mut BytesMut, object: AsfObject, size: u64) {
    object.guid().write_to(buf);
    buf.put_u64_le(size);
}

/// Reads `GUID + size` at the reader position and checks it against `object`.
/// Returns the declared object size.
pub fn expect_object(reader: &mut ByteReader<'_>, object: AsfObject) -> Result<u64> {
    let guid = Guid::read_from(reader)?;
    if guid != object.guid() {
        return Err(AsfError::InvalidData(format!(
            "expected {} object, found {}",
            object.info().name,
            guid
        )));
    }
    reader.read_u64_le()
}

/// Width code of a variable-size field, carried as 2 bits in a flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    None = 0,
    Byte = 1,
    Word = 2,
    Dword = 3,
}

impl FieldType {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => FieldType::None,
            1 => FieldType::Byte,
            2 => FieldType::Word,
            _ => FieldType::Dword,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// On-wire width in bytes
    pub fn len(self) -> usize {
        match self {
            FieldType::None => 0,
            FieldType::Byte => 1,
            FieldType::Word => 2,
            FieldType::Dword => 4,
        }
    }

    pub fn is_none(self) -> bool {
        self == FieldType::None
    }

    /// Narrowest type able to hold `value`
    pub fn for_value(value: u32) -> Self {
        if value > 0xFFFF {
            FieldType::Dword
        } else if value > 0xFF {
            FieldType::Word
        } else {
            FieldType::Byte
        }
    }
}

pub fn read_var_size_field(reader: &mut ByteReader<'_>, field_type: FieldType) -> Result<u32> {
    match field_type {
        FieldType::None => Ok(0),
        FieldType::Byte => Ok(reader.read_u8()? as u32),
        FieldType::Word => Ok(reader.read_u16_le()? as u32),
        FieldType::Dword => reader.read_u32_le(),
    }
}

/// Writes `value` with the width selected by `field_type`, truncating to that width.
pub fn write_var_size_field(buf: &mut BytesMut, field_type: FieldType, value: u32) {
    match field_type {
        FieldType::None => {}
        FieldType::Byte => buf.put_u8(value as u8),
        FieldType::Word => buf.put_u16_le(value as u16),
        FieldType::Dword => buf.put_u32_le(value),
    }
}

/// Size in bytes of `s` as NUL-terminated UTF-16LE.
pub fn utf16_size(s: &str) -> usize {
    (s.encode_utf16().count() + 1) * 2
}

/// Writes `s` as NUL-terminated UTF-16LE without any length prefix.
pub fn put_utf16(buf: &mut BytesMut, s: &str) {
    for unit in s.encode_utf16() {
        buf.put_u16_le(unit);
    }
    buf.put_u16_le(0);
}

/// Writes a 16-bit (or 32-bit when `use32`) byte length followed by the
/// UTF-16LE string. Returns the string size in bytes, terminator included.
pub fn put_sized_utf16(buf: &mut BytesMut, s: &str, use32: bool) -> usize {
    let size = utf16_size(s);
    if use32 {
        buf.put_u32_le(size as u32);
    } else {
        buf.put_u16_le(size as u16);
    }
    put_utf16(buf, s);
    size
}

/// Reads `size` bytes of UTF-16LE, dropping the trailing NUL if present.
pub fn read_utf16(reader: &mut ByteReader<'_>, size: usize) -> Result<String> {
    let raw = reader.read_bytes(size)?;
    let mut units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    while units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units).map_err(|e| AsfError::InvalidData(format!("bad UTF-16 string: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_header_guid_layout() {
        let mut buf = BytesMut::new();
        AsfObject::Header.guid().write_to(&mut buf);
        assert_eq!(
            &buf[..],
            &[
                0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62,
                0xCE, 0x6C
            ]
        );
        assert_eq!(
            AsfObject::Header.guid().to_string(),
            "75B22630-668E-11CF-A6D9-00AA0062CE6C"
        );
    }

    #[test]
    fn test_catalog_round_trip() {
        for (i, info) in ASF_OBJECTS.iter().enumerate() {
            assert_eq!(info.kind as usize, i, "catalog out of order at {}", info.name);
            let mut buf = BytesMut::new();
            info.guid.write_to(&mut buf);
            let mut reader = ByteReader::new(&buf);
            let decoded = Guid::read_from(&mut reader).unwrap();
            assert_eq!(decoded, info.guid);
            assert_eq!(AsfObject::from_guid(&decoded), Some(info.kind));
            assert!(info.guid.matches(&buf));
        }
    }

    #[test]
    fn test_expect_object_mismatch() {
        let mut buf = BytesMut::new();
        write_object_header(&mut buf, AsfObject::Data, 50);
        let mut reader = ByteReader::new(&buf);
        assert!(expect_object(&mut reader, AsfObject::Header).is_err());
        let mut reader = ByteReader::new(&buf);
        assert_eq!(expect_object(&mut reader, AsfObject::Data).unwrap(), 50);
    }

    #[test]
    fn test_var_size_field_boundaries() {
        let cases = [
            (FieldType::Byte, 0u32),
            (FieldType::Byte, 255),
            (FieldType::Word, 0),
            (FieldType::Word, 255),
            (FieldType::Word, 65535),
            (FieldType::Dword, 0),
            (FieldType::Dword, 255),
            (FieldType::Dword, 65535),
            (FieldType::Dword, 65536),
        ];
        for (field_type, value) in cases {
            let mut buf = BytesMut::new();
            write_var_size_field(&mut buf, field_type, value);
            assert_eq!(buf.len(), field_type.len());
            let mut reader = ByteReader::new(&buf);
            assert_eq!(read_var_size_field(&mut reader, field_type).unwrap(), value);
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn test_none_field_consumes_nothing() {
        let data = [0xAA, 0xBB];
        let mut reader = ByteReader::new(&data);
        assert_eq!(read_var_size_field(&mut reader, FieldType::None).unwrap(), 0);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_short_var_field_fails() {
        let data = [0x01, 0x02];
        let mut reader = ByteReader::new(&data);
        assert!(read_var_size_field(&mut reader, FieldType::Dword).is_err());
    }

    #[test]
    fn test_sized_utf16() {
        let mut buf = BytesMut::new();
        let size = put_sized_utf16(&mut buf, "Title", false);
        assert_eq!(size, 12);
        assert_eq!(&buf[..4], &[12, 0, b'T', 0]);
        assert_eq!(&buf[12..], &[0, 0]);

        let mut reader = ByteReader::new(&buf);
        let len = reader.read_u16_le().unwrap() as usize;
        assert_eq!(read_utf16(&mut reader, len).unwrap(), "Title");

        let mut buf = BytesMut::new();
        assert_eq!(put_sized_utf16(&mut buf, "", true), 2);
        assert_eq!(&buf[..], &[2, 0, 0, 0, 0, 0]);
    }

    #[quickcheck]
    fn prop_guid_round_trip(raw: Vec<u8>) -> bool {
        if raw.len() < 16 {
            return true;
        }
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&raw[..16]);
        let guid = Guid::from_bytes(&bytes);
        let mut buf = BytesMut::new();
        guid.write_to(&mut buf);
        buf[..] == bytes[..] && Guid::read_from(&mut ByteReader::new(&buf)).ok() == Some(guid)
    }

    #[quickcheck]
    fn prop_var_size_field_round_trip(value: u32) -> bool {
        let field_type = FieldType::for_value(value);
        let mut buf = BytesMut::new();
        write_var_size_field(&mut buf, field_type, value);
        read_var_size_field(&mut ByteReader::new(&buf), field_type).ok() == Some(value)
    }
}
