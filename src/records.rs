//! Wire types for the built-in control records: [`StreamHeader`], [`StreamFooter`],
//! [`StartCompressedSection`], [`EndCompressedSection`], and [`Proto`].
//!
//! These are ordinary `prost::Message` types; the only thing distinguishing them from a
//! caller's own schema is that their class IDs are reserved (see [`class`]) and their
//! decoders are built into every [`crate::schema_pool::SchemaPool`] rather than announced
//! in-band.

/// Byte length of [`START_MAGIC`] and [`END_MAGIC`].
pub const MAGIC_LEN: usize = 8;

/// Opens every sub-stream.
pub const START_MAGIC: [u8; MAGIC_LEN] = *b"A4STREAM";

/// Closes every sub-stream.
pub const END_MAGIC: [u8; MAGIC_LEN] = *b"KTHXBYE4";

/// Set on a frame's size word to mark it as a long (typed) frame.
pub const HIGH_BIT: u32 = 0x8000_0000;

/// Every class ID at or above this boundary belongs to a caller-defined schema.
/// Class IDs below it are reserved for the built-in control records in [`class`].
pub const FIRST_CUSTOM_MESSAGE_CLASS: u32 = 1000;

/// The only `a4_version` this implementation understands.
pub const A4_VERSION: u32 = 1;

/// Reserved class IDs for the built-in control records.
pub mod class {
    pub const STREAM_HEADER: u32 = 1;
    pub const STREAM_FOOTER: u32 = 2;
    pub const START_COMPRESSED_SECTION: u32 = 3;
    pub const END_COMPRESSED_SECTION: u32 = 4;
    pub const PROTO: u32 = 5;
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamHeader {
    #[prost(uint32, tag = "1")]
    pub a4_version: u32,
    #[prost(string, optional, tag = "2")]
    pub description: Option<String>,
    #[prost(uint32, optional, tag = "3")]
    pub content_class_id: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub metadata_class_id: Option<u32>,
    #[prost(bool, tag = "5")]
    pub metadata_refers_forward: bool,
    #[prost(message, repeated, tag = "6")]
    pub file_descriptors: Vec<prost_types::FileDescriptorProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StreamFooter {
    /// Byte distance from `START_MAGIC` through the last record written before this footer.
    /// Excludes the footer record's own framed bytes, the 4-byte trailer, and `END_MAGIC`.
    #[prost(uint64, tag = "1")]
    pub size: u64,
    #[prost(uint64, repeated, tag = "2")]
    pub metadata_offsets: Vec<u64>,
    #[prost(bool, tag = "3")]
    pub metadata_refers_forward: bool,
    #[prost(uint64, optional, tag = "4")]
    pub content_count: Option<u64>,
}

#[derive(Clone, Copy, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum Compression {
    Zlib = 0,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StartCompressedSection {
    #[prost(enumeration = "Compression", tag = "1")]
    pub compression: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EndCompressedSection {}

/// A schema announcement: carries one file descriptor into the reader's schema pool.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Proto {
    #[prost(message, optional, tag = "1")]
    pub file_descriptor: Option<prost_types::FileDescriptorProto>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn header_round_trips() {
        let header = StreamHeader {
            a4_version: A4_VERSION,
            description: Some("test".into()),
            content_class_id: Some(1000),
            metadata_class_id: Some(1001),
            metadata_refers_forward: true,
            file_descriptors: Vec::new(),
        };
        let buf = header.encode_to_vec();
        let decoded = StreamHeader::decode(&buf[..]).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn footer_round_trips() {
        let footer = StreamFooter {
            size: 4096,
            metadata_offsets: vec![16, 512, 2048],
            metadata_refers_forward: false,
            content_count: Some(1000),
        };
        let buf = footer.encode_to_vec();
        let decoded = StreamFooter::decode(&buf[..]).unwrap();
        assert_eq!(footer, decoded);
    }

    #[test]
    fn class_ids_leave_headroom_below_custom_boundary() {
        assert!(class::PROTO < FIRST_CUSTOM_MESSAGE_CLASS);
    }
}
