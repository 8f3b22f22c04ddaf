#![doc = include_str!("../README.md")]

pub mod compression;
pub mod error;
pub mod framing;
pub mod read;
pub mod read_indexed;
pub mod records;
pub mod schema;
pub mod write;

pub use error::{A4Error, A4Result};
pub use read::{ContentRecord, GroupContent, Groups, MetadataRecord, Reader};
pub use read_indexed::{FooterEntry, HeaderEntry, StreamIndex};
pub use records::{FIRST_CUSTOM_MESSAGE_CLASS, START_MAGIC, END_MAGIC};
pub use schema::ClassMessage;
pub use write::{Writer, WriterOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use prost_types::{FileDescriptorProto, FileDescriptorSet};
    use std::io::Cursor;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Event {
        #[prost(uint32, tag = "1")]
        event_number: u32,
    }

    impl ClassMessage for Event {
        const CLASS_ID: u32 = FIRST_CUSTOM_MESSAGE_CLASS;

        fn file_descriptor() -> FileDescriptorProto {
            FileDescriptorProto {
                name: Some("event.proto".into()),
                syntax: Some("proto3".into()),
                ..Default::default()
            }
        }

        fn file_descriptor_set() -> FileDescriptorSet {
            FileDescriptorSet {
                file: vec![Self::file_descriptor()],
            }
        }
    }

    /// A minimal end-to-end smoke test exercising the crate's top-level re-exports the way a
    /// downstream caller would; the exhaustive scenario coverage lives under `tests/`.
    #[test]
    fn write_then_read_round_trips_through_the_public_api() {
        let mut writer = WriterOptions::new()
            .content_schema::<Event>()
            .create(Cursor::new(Vec::new()))
            .unwrap();
        for n in 0..10u32 {
            writer.write(&Event { event_number: n }).unwrap();
        }
        let data = writer.into_inner().unwrap().into_inner();

        let reader: Reader<_> = Reader::new(Cursor::new(data)).unwrap();
        let numbers: Vec<u32> = reader
            .map(|r| Event::decode(&r.unwrap().payload[..]).unwrap().event_number)
            .collect();
        assert_eq!(numbers, (0..10).collect::<Vec<_>>());
    }
}
