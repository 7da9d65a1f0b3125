//! Tag lists and their ASF serialization.
//!
//! Generic tag names (`title`, `artist`, ...) are mapped to ASF attribute
//! names and written to the content description, extended content
//! description and per-stream metadata objects.

use super::types::*;
use bytes::{BufMut, BytesMut};
use log::{debug, trace};

pub const TAG_TITLE: &str = "title";
pub const TAG_TITLE_SORTNAME: &str = "title-sortname";
pub const TAG_ARTIST: &str = "artist";
pub const TAG_ARTIST_SORTNAME: &str = "artist-sortname";
pub const TAG_ALBUM: &str = "album";
pub const TAG_ALBUM_SORTNAME: &str = "album-sortname";
pub const TAG_GENRE: &str = "genre";
pub const TAG_COMMENT: &str = "comment";
pub const TAG_TRACK_NUMBER: &str = "track-number";
pub const TAG_COPYRIGHT: &str = "copyright";
pub const TAG_COMPOSER: &str = "composer";
pub const TAG_DESCRIPTION: &str = "description";

static TAG_MAP: [(&str, &str); 11] = [
    (TAG_TITLE, "Title"),
    (TAG_TITLE_SORTNAME, "TitleSortOrder"),
    (TAG_ARTIST, "WM/AlbumArtist"),
    (TAG_ARTIST_SORTNAME, "AlbumArtistSortOrder"),
    (TAG_ALBUM, "WM/AlbumTitle"),
    (TAG_ALBUM_SORTNAME, "AlbumTitleSortOrder"),
    (TAG_GENRE, "WM/Genre"),
    (TAG_COMMENT, "Comment"),
    (TAG_TRACK_NUMBER, "WM/TrackNumber"),
    (TAG_COPYRIGHT, "Copyright"),
    (TAG_COMPOSER, "WM/Composer"),
];

/// Tags that also have a slot in the content description object, in write order.
static CONTENT_DESCRIPTION_TAGS: [&str; 4] = [TAG_TITLE, TAG_ARTIST, TAG_COPYRIGHT, TAG_DESCRIPTION];

/// Returns the ASF attribute name for a generic tag, if it has one
pub fn asf_tag_name(tag: &str) -> Option<&'static str> {
    TAG_MAP.iter().find(|(name, _)| *name == tag).map(|(_, asf)| *asf)
}

pub fn is_content_description_tag(tag: &str) -> bool {
    CONTENT_DESCRIPTION_TAGS.contains(&tag)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Str(String),
    UInt(u32),
}

impl TagValue {
    pub fn field_type(&self) -> AsfTagType {
        match self {
            TagValue::Str(_) => AsfTagType::UnicodeStr,
            TagValue::UInt(_) => AsfTagType::Dword,
        }
    }

    /// Serialized size of the value
    pub fn content_size(&self) -> usize {
        match self {
            TagValue::Str(s) => utf16_size(s),
            TagValue::UInt(_) => 4,
        }
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Str(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Str(s)
    }
}

impl From<u32> for TagValue {
    fn from(v: u32) -> Self {
        TagValue::UInt(v)
    }
}

/// ASF attribute data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsfTagType {
    UnicodeStr = 0,
    Dword = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMergeMode {
    /// New values overwrite existing ones
    Replace,
    /// Existing values win
    Keep,
}

/// An ordered list of tags, at most one value per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagList {
    entries: Vec<(String, TagValue)>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mode: TagMergeMode, name: &str, value: impl Into<TagValue>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => {
                if mode == TagMergeMode::Replace {
                    entry.1 = value;
                }
            }
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<TagValue>) -> Self {
        self.add(TagMergeMode::Replace, name, value);
        self
    }

    pub fn merge(&mut self, other: &TagList, mode: TagMergeMode) {
        for (name, value) in &other.entries {
            self.add(mode, name, value.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(TagValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Entries that have an ASF name, with that name
    pub fn asf_entries(&self) -> impl Iterator<Item = (&'static str, &TagValue)> {
        self.entries
            .iter()
            .filter_map(|(n, v)| asf_tag_name(n).map(|asf| (asf, v)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File-level tags prepared for the header, with the object sizes they need.
///
/// Sizes are computed once so the header buffer can be allocated exactly.
#[derive(Debug, Clone, Default)]
pub struct AsfTags {
    pub tags: TagList,
    pub cont_desc_size: usize,
    pub ext_cont_desc_size: usize,
}

impl AsfTags {
    pub fn from_tags(tags: &TagList) -> Self {
        let mut asf_tags = AsfTags::default();
        if tags.is_empty() {
            debug!("No tags received");
            return asf_tags;
        }

        debug!("Processing {} tags", tags.len());
        for (name, value) in tags.iter() {
            let asf_name = match asf_tag_name(name) {
                Some(asf_name) => asf_name,
                None => continue,
            };
            let content_size = value.content_size();
            if let TagValue::Str(_) = value {
                if is_content_description_tag(name) {
                    asf_tags.cont_desc_size += content_size;
                }
            }
            // name length, type and value length words
            asf_tags.ext_cont_desc_size += utf16_size(asf_name) + content_size + 6;
            asf_tags.tags.add(TagMergeMode::Replace, name, value.clone());
        }

        if asf_tags.cont_desc_size > 0 {
            asf_tags.cont_desc_size += ASF_CONTENT_DESCRIPTION_OBJECT_SIZE;
        }
        if asf_tags.ext_cont_desc_size > 0 {
            asf_tags.ext_cont_desc_size += ASF_EXT_CONTENT_DESCRIPTION_OBJECT_SIZE;
        }
        asf_tags
    }
}

/// Size of the metadata object for a stream's tags, 0 when nothing would be written
pub fn metadata_object_size(tags: &TagList) -> usize {
    if tags.is_empty() {
        return 0;
    }
    let mut size = ASF_METADATA_OBJECT_SIZE;
    for (asf_name, value) in tags.asf_entries() {
        // reserved, stream number, name length, type, data length
        size += 4 + value.content_size() + utf16_size(asf_name) + 4 + 4;
    }
    size
}

pub fn write_content_description(buf: &mut BytesMut, tags: &TagList) {
    debug!("Writing content description object");
    let start = buf.len();

    let fields: Vec<Option<&str>> = CONTENT_DESCRIPTION_TAGS
        .iter()
        .map(|tag| tags.get_str(tag))
        .collect();
    let values_size: usize = fields.iter().flatten().map(|s| utf16_size(s)).sum();

    write_object_header(
        buf,
        AsfObject::ContentDescription,
        (ASF_CONTENT_DESCRIPTION_OBJECT_SIZE + values_size) as u64,
    );
    for field in &fields {
        buf.put_u16_le(field.map_or(0, |s| utf16_size(s) as u16));
    }
    // rating
    buf.put_u16_le(0);
    for text in fields.iter().flatten() {
        put_utf16(buf, text);
    }
    trace!("content description object is {} bytes", buf.len() - start);
}

pub fn write_ext_content_description(buf: &mut BytesMut, tags: &TagList) {
    debug!("Writing extended content description object");
    let start = buf.len();
    write_object_header(buf, AsfObject::ExtContentDescription, 0);
    buf.put_u16_le(0);

    let mut count = 0u16;
    for (asf_name, value) in tags.asf_entries() {
        put_sized_utf16(buf, asf_name, false);
        match value {
            TagValue::Str(text) => {
                debug!("Writing extended content description tag: {} ({})", asf_name, text);
                buf.put_u16_le(AsfTagType::UnicodeStr as u16);
                put_sized_utf16(buf, text, false);
            }
            TagValue::UInt(num) => {
                debug!("Writing extended content description tag: {} ({})", asf_name, num);
                buf.put_u16_le(AsfTagType::Dword as u16);
                buf.put_u16_le(4);
                buf.put_u32_le(*num);
            }
        }
        count += 1;
    }

    let size = (buf.len() - start) as u64;
    patch_object_size(buf, start, size);
    buf[start + 24..start + 26].copy_from_slice(&count.to_le_bytes());
}

/// Writes the metadata object for one stream. Nothing is written for an empty list.
pub fn write_metadata_object(buf: &mut BytesMut, tags: &TagList, stream_number: u8) {
    if tags.is_empty() {
        return;
    }
    debug!("Writing metadata object for stream {}", stream_number);
    let start = buf.len();
    write_object_header(buf, AsfObject::Metadata, 0);
    buf.put_u16_le(0);

    let mut count = 0u16;
    for (asf_name, value) in tags.asf_entries() {
        buf.put_u16_le(0);
        buf.put_u16_le(stream_number as u16);
        buf.put_u16_le(utf16_size(asf_name) as u16);
        buf.put_u16_le(value.field_type() as u16);
        buf.put_u32_le(value.content_size() as u32);
        put_utf16(buf, asf_name);
        match value {
            TagValue::Str(text) => put_utf16(buf, text),
            TagValue::UInt(num) => buf.put_u32_le(*num),
        }
        count += 1;
    }

    let size = (buf.len() - start) as u64;
    patch_object_size(buf, start, size);
    buf[start + 24..start + 26].copy_from_slice(&count.to_le_bytes());
}

fn patch_object_size(buf: &mut BytesMut, object_start: usize, size: u64) {
    buf[object_start + 16..object_start + 24].copy_from_slice(&size.to_le_bytes());
}
