use a4stream::{ClassMessage, WriterOptions};
use anyhow::Result;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::io::Cursor;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Event {
    #[prost(uint32, tag = "1")]
    pub event_number: u32,
}

impl ClassMessage for Event {
    const CLASS_ID: u32 = a4stream::FIRST_CUSTOM_MESSAGE_CLASS;

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

#[derive(Clone, PartialEq, prost::Message)]
pub struct Meta {
    #[prost(uint32, tag = "1")]
    pub meta_data: u32,
}

impl ClassMessage for Meta {
    const CLASS_ID: u32 = a4stream::FIRST_CUSTOM_MESSAGE_CLASS + 1;

    fn file_descriptor() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("meta.proto".into()),
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

/// Builds a two-group fixture: `m.meta_data=1`, 500 events in `[1000,1499]`,
/// `m.meta_data=2`, 500 events in `[2000,2499]`; forward-bracketed if
/// `metadata_refers_forward`, backward-bracketed otherwise.
pub fn build_fixture(metadata_refers_forward: bool, compression: bool) -> Result<Vec<u8>> {
    let mut writer = WriterOptions::new()
        .content_schema::<Event>()
        .metadata_schema::<Meta>()
        .metadata_refers_forward(metadata_refers_forward)
        .compression(compression)
        .create(Cursor::new(Vec::new()))?;

    let mut write_group = |meta_data: u32, range: std::ops::Range<u32>| -> Result<()> {
        if metadata_refers_forward {
            writer.write(&Meta { meta_data })?;
        }
        for n in range {
            writer.write(&Event { event_number: n })?;
        }
        if !metadata_refers_forward {
            writer.write(&Meta { meta_data })?;
        }
        Ok(())
    };

    write_group(1, 1000..1500)?;
    write_group(2, 2000..2500)?;

    Ok(writer.into_inner()?.into_inner())
}
