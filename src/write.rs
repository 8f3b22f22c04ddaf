//! Writes an A4 stream.

use std::collections::HashSet;
use std::io::{self, Seek, Write};

use prost::Message;
use prost_types::FileDescriptorProto;

use crate::compression::SectionWriter;
use crate::error::{A4Error as Error, A4Result as Result};
use crate::framing;
use crate::records::{
    self, Compression, EndCompressedSection, Proto, StartCompressedSection, StreamFooter,
    StreamHeader, A4_VERSION, FIRST_CUSTOM_MESSAGE_CLASS,
};
use crate::schema::ClassMessage;

enum Sink<W: Write + Seek> {
    Raw(W),
    Compressed { section: SectionWriter<W>, snapshot: u64 },
}

/// Forwards plain byte writes to whichever sink is currently active, so the framing codec can
/// stay ignorant of compression.
struct SinkWriter<'a, W: Write + Seek>(&'a mut Sink<W>);

impl<'a, W: Write + Seek> Write for SinkWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0 {
            Sink::Raw(w) => w.write(buf),
            Sink::Compressed { section, .. } => {
                section.write_all(buf).map_err(crate::error::to_io_error)?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.0 {
            Sink::Raw(w) => w.flush(),
            Sink::Compressed { .. } => Ok(()),
        }
    }
}

/// Chainable-setter builder for a [`Writer`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    description: Option<String>,
    compression: bool,
    metadata_refers_forward: bool,
    content_class_id: Option<u32>,
    metadata_class_id: Option<u32>,
    file_descriptors: Vec<FileDescriptorProto>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            description: None,
            compression: false,
            metadata_refers_forward: true,
            content_class_id: None,
            metadata_class_id: None,
            file_descriptors: Vec::new(),
        }
    }
}

impl WriterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the free-text description written into the stream header.
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Enables zlib compression of content sections.
    pub fn compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Whether a metadata record describes the content that follows it (`true`, the default)
    /// or the content that preceded it (`false`).
    pub fn metadata_refers_forward(mut self, metadata_refers_forward: bool) -> Self {
        self.metadata_refers_forward = metadata_refers_forward;
        self
    }

    /// Declares `C` as this sub-stream's content schema: messages of this type are written
    /// (and read back) with the compact short frame.
    pub fn content_schema<C: ClassMessage>(mut self) -> Self {
        self.content_class_id = Some(C::CLASS_ID);
        self.file_descriptors.extend(C::descriptor_closure());
        self
    }

    /// Declares `M` as this sub-stream's metadata schema: messages of this type bracket
    /// groups of content and are indexed in the footer.
    pub fn metadata_schema<M: ClassMessage>(mut self) -> Self {
        self.metadata_class_id = Some(M::CLASS_ID);
        self.file_descriptors.extend(M::descriptor_closure());
        self
    }

    /// Creates a [`Writer`] which writes to `w` using the given options.
    pub fn create<W: Write + Seek>(self, w: W) -> Result<Writer<W>> {
        Writer::with_options(w, self)
    }
}

/// Writes one A4 sub-stream to the given [writer](Write).
///
/// Call [`finish()`](Self::finish) to flush and close the stream; otherwise it is finished
/// automatically on drop.
pub struct Writer<W: Write + Seek> {
    sink: Option<Sink<W>>,
    content_class_id: Option<u32>,
    metadata_class_id: Option<u32>,
    metadata_refers_forward: bool,
    compression_enabled: bool,
    announced_files: HashSet<String>,
    metadata_offsets: Vec<u64>,
    content_count: u64,
    bytes_written: u64,
    finished: bool,
}

impl<W: Write + Seek> Writer<W> {
    pub fn new(w: W) -> Result<Self> {
        WriterOptions::default().create(w)
    }

    fn with_options(mut w: W, opts: WriterOptions) -> Result<Self> {
        w.write_all(&records::START_MAGIC)?;

        let header = StreamHeader {
            a4_version: A4_VERSION,
            description: opts.description,
            content_class_id: opts.content_class_id,
            metadata_class_id: opts.metadata_class_id,
            metadata_refers_forward: opts.metadata_refers_forward,
            file_descriptors: opts.file_descriptors,
        };
        let payload = header.encode_to_vec();
        let n = framing::write_long_frame(&mut w, records::class::STREAM_HEADER, &payload)?;

        let mut writer = Self {
            sink: Some(Sink::Raw(w)),
            content_class_id: opts.content_class_id,
            metadata_class_id: opts.metadata_class_id,
            metadata_refers_forward: opts.metadata_refers_forward,
            compression_enabled: opts.compression,
            announced_files: HashSet::new(),
            metadata_offsets: Vec::new(),
            content_count: 0,
            bytes_written: n,
            finished: false,
        };

        if opts.compression {
            writer.start_compressed_section()?;
        }

        Ok(writer)
    }

    fn take_sink(&mut self) -> Result<Sink<W>> {
        self.sink
            .take()
            .ok_or_else(|| Error::UsageError("writer has no sink (this is a bug)".into()))
    }

    fn is_compressed(&self) -> bool {
        matches!(self.sink, Some(Sink::Compressed { .. }))
    }

    fn emit_long_frame(&mut self, class_id: u32, payload: &[u8]) -> Result<()> {
        let raw = !self.is_compressed();
        let mut sink = self.take_sink()?;
        let n = {
            let mut w = SinkWriter(&mut sink);
            framing::write_long_frame(&mut w, class_id, payload)?
        };
        self.sink = Some(sink);
        if raw {
            self.bytes_written += n;
        }
        Ok(())
    }

    fn emit_short_frame(&mut self, payload: &[u8]) -> Result<()> {
        let raw = !self.is_compressed();
        let mut sink = self.take_sink()?;
        let n = {
            let mut w = SinkWriter(&mut sink);
            framing::write_short_frame(&mut w, payload)?
        };
        self.sink = Some(sink);
        if raw {
            self.bytes_written += n;
        }
        Ok(())
    }

    fn start_compressed_section(&mut self) -> Result<()> {
        let start = StartCompressedSection {
            compression: Compression::Zlib as i32,
        };
        self.emit_long_frame(
            records::class::START_COMPRESSED_SECTION,
            &start.encode_to_vec(),
        )?;
        let snapshot = self.bytes_written;
        let Sink::Raw(w) = self.take_sink()? else {
            unreachable!("start_compressed_section called while already compressing")
        };
        self.sink = Some(Sink::Compressed {
            section: SectionWriter::new(w),
            snapshot,
        });
        Ok(())
    }

    fn end_compressed_section(&mut self) -> Result<()> {
        if !self.is_compressed() {
            return Err(Error::UsageError(
                "end_compressed_section called with no section open".into(),
            ));
        }

        // EndCompressedSection is the last record *inside* the deflate stream it closes, not a
        // raw record after it: the reader only knows to stop decompressing once it has read this
        // frame, and it can only read it through the active decompressor. Writing it here, before
        // `section.finish()`, puts it on the compressing sink.
        let end = EndCompressedSection {};
        self.emit_long_frame(records::class::END_COMPRESSED_SECTION, &end.encode_to_vec())?;

        let Sink::Compressed { section, snapshot } = self.take_sink()? else {
            unreachable!("end_compressed_section checked is_compressed() above")
        };
        let (w, compressed_len) = section.finish()?;
        self.sink = Some(Sink::Raw(w));
        self.bytes_written = snapshot + compressed_len;
        Ok(())
    }

    fn announce_if_needed<C: ClassMessage>(&mut self) -> Result<()> {
        if C::CLASS_ID < FIRST_CUSTOM_MESSAGE_CLASS {
            return Ok(());
        }
        let files = C::descriptor_closure();
        for file in files {
            let name = file.name().to_string();
            if self.announced_files.contains(&name) {
                continue;
            }
            let proto = Proto {
                file_descriptor: Some(file),
            };
            self.emit_long_frame(records::class::PROTO, &proto.encode_to_vec())?;
            self.announced_files.insert(name);
        }
        Ok(())
    }

    /// Writes one message. Its class ID determines whether it is treated as this sub-stream's
    /// content (short frame), its metadata (long frame, indexed, and a compression-section
    /// boundary), or an ordinary long-framed record.
    pub fn write<C: ClassMessage>(&mut self, msg: &C) -> Result<()> {
        if self.finished {
            return Err(Error::UsageError(
                "cannot write to a finished a4 stream".into(),
            ));
        }
        self.announce_if_needed::<C>()?;

        let is_metadata = self.metadata_class_id == Some(C::CLASS_ID);
        let is_content = self.content_class_id == Some(C::CLASS_ID);

        if is_metadata {
            if self.is_compressed() {
                self.end_compressed_section()?;
            }
            self.metadata_offsets.push(self.bytes_written);
        }

        let payload = msg.encode_to_vec();
        if is_content {
            self.emit_short_frame(&payload)?;
            self.content_count += 1;
        } else {
            self.emit_long_frame(C::CLASS_ID, &payload)?;
        }

        if is_metadata && self.compression_enabled {
            self.start_compressed_section()?;
        }

        Ok(())
    }

    /// Finishes the current sub-stream: footer, trailer, and closing magic.
    ///
    /// Subsequent calls to [`write`](Self::write) will fail.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.is_compressed() {
            self.end_compressed_section()?;
        }

        let footer = StreamFooter {
            size: self.bytes_written,
            metadata_offsets: std::mem::take(&mut self.metadata_offsets),
            metadata_refers_forward: self.metadata_refers_forward,
            content_count: Some(self.content_count),
        };
        let footer_payload = footer.encode_to_vec();
        self.emit_long_frame(records::class::STREAM_FOOTER, &footer_payload)?;

        let sink = self.take_sink()?;
        let Sink::Raw(mut w) = sink else {
            unreachable!("compression was closed above")
        };
        w.write_all(&(footer_payload.len() as u32).to_le_bytes())?;
        w.write_all(&records::END_MAGIC)?;
        w.flush()?;
        self.sink = Some(Sink::Raw(w));
        self.finished = true;
        Ok(())
    }

    /// Finishes the stream (if not already finished) and returns the underlying writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        match self.sink.take() {
            Some(Sink::Raw(w)) => Ok(w),
            _ => unreachable!("finish always leaves a raw sink in place"),
        }
    }
}

impl<W: Write + Seek> Drop for Writer<W> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.finish() {
                log::warn!("error finishing a4 stream on drop: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing;
    use crate::records::FIRST_CUSTOM_MESSAGE_CLASS;
    use prost_types::FileDescriptorSet;
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

    #[test]
    fn writes_start_magic_and_closes_with_end_magic() {
        let mut writer = WriterOptions::new()
            .content_schema::<Event>()
            .create(Cursor::new(Vec::new()))
            .unwrap();
        writer.write(&Event { event_number: 1000 }).unwrap();
        let out = writer.into_inner().unwrap().into_inner();

        assert_eq!(&out[..8], &records::START_MAGIC);
        assert_eq!(&out[out.len() - 8..], &records::END_MAGIC);
    }

    #[test]
    fn short_frames_content_long_frames_everything_else() {
        let mut writer = WriterOptions::new()
            .content_schema::<Event>()
            .create(Cursor::new(Vec::new()))
            .unwrap();
        writer.write(&Event { event_number: 42 }).unwrap();
        let out = writer.into_inner().unwrap().into_inner();

        let mut cur = Cursor::new(&out[8..]);
        let header = framing::read_frame_header(&mut cur, None).unwrap().unwrap();
        assert!(header.long);
        assert_eq!(header.class_id, records::class::STREAM_HEADER);
        framing::read_payload(&mut cur, header.payload_len).unwrap();

        let event = framing::read_frame_header(&mut cur, Some(FIRST_CUSTOM_MESSAGE_CLASS))
            .unwrap()
            .unwrap();
        assert!(!event.long);
        assert_eq!(event.class_id, FIRST_CUSTOM_MESSAGE_CLASS);
    }

    #[test]
    fn writing_after_finish_is_a_usage_error() {
        let mut writer = WriterOptions::new()
            .content_schema::<Event>()
            .create(Cursor::new(Vec::new()))
            .unwrap();
        writer.finish().unwrap();
        assert!(matches!(
            writer.write(&Event { event_number: 1 }),
            Err(Error::UsageError(_))
        ));
    }

    #[test]
    fn compression_round_trips_through_start_and_end_sections() {
        let mut writer = WriterOptions::new()
            .content_schema::<Event>()
            .compression(true)
            .create(Cursor::new(Vec::new()))
            .unwrap();
        for i in 0..50 {
            writer.write(&Event { event_number: i }).unwrap();
        }
        let out = writer.into_inner().unwrap().into_inner();
        assert_eq!(&out[..8], &records::START_MAGIC);
        assert_eq!(&out[out.len() - 8..], &records::END_MAGIC);
    }
}
