//! Forward iteration over an A4 stream: a state machine over `read_message()` that
//! hides the built-in control records from the caller and exposes only content, each paired
//! with the metadata currently bound to it.
//!
//! A flat `Iterator` over raw `(class_id, payload)` pairs, decoding left to the caller (directly
//! via a [`ClassMessage`], or dynamically via the [`SchemaPool`](crate::schema::SchemaPool) this
//! reader builds up as it goes).

use std::io::{self, Read, Seek, SeekFrom};

use prost::Message;

use crate::compression::SectionReader;
use crate::error::{A4Error as Error, A4Result as Result};
use crate::framing;
use crate::read_indexed::{self, StreamIndex};
use crate::records::{self, Proto, StreamFooter, StreamHeader, MAGIC_LEN};
use crate::schema::SchemaPool;

/// A metadata record as read off the wire: its class id and raw (still-encoded) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub class_id: u32,
    pub payload: Vec<u8>,
}

/// A content record as read off the wire, paired with whatever metadata is currently bound
/// to it (`None` if nothing in this sub-stream binds to it yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    pub class_id: u32,
    pub payload: Vec<u8>,
    pub current_metadata: Option<MetadataRecord>,
}

struct SubstreamState {
    /// Absolute offset of the first byte after this sub-stream's `START_MAGIC`; matches
    /// [`read_indexed::FooterEntry::body_start`].
    body_start: u64,
    content_class_id: Option<u32>,
    metadata_class_id: Option<u32>,
    metadata_refers_forward: bool,
    /// Forward mode: the most recently read metadata record, set directly as it is read.
    /// Backward mode: unused for writing (resolved lazily from the index instead), but read
    /// back as a one-entry cache keyed by `current_metadata_position`.
    current_metadata: Option<MetadataRecord>,
    current_metadata_position: Option<u64>,
}

enum Source<R> {
    Raw(R),
    Compressed {
        section: SectionReader<R>,
        /// Absolute offset where this compressed run began. Every content record read while
        /// this variant is active shares this as its logical position (see
        /// [`Reader::current_position`]).
        section_start: u64,
    },
}

fn bug_source_missing() -> Error {
    Error::UsageError("reader has no source (this is a bug)".into())
}

/// Reads one A4 stream forward, transparently crossing sub-stream boundaries and
/// compressed sections.
///
/// Yields [`ContentRecord`]s via its `Iterator` implementation. Metadata, schema announcements,
/// and the built-in framing records are consumed internally and never surfaced.
pub struct Reader<R: Read + Seek> {
    source: Option<Source<R>>,
    pool: SchemaPool,
    state: Option<SubstreamState>,
    index: Option<StreamIndex>,
    done: bool,
}

impl<R: Read + Seek> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.source.as_mut() {
            Some(Source::Raw(r)) => r.read(buf),
            Some(Source::Compressed { section, .. }) => {
                section.read(buf).map_err(crate::error::to_io_error)
            }
            None => Err(crate::error::to_io_error(bug_source_missing())),
        }
    }
}

impl<R: Read + Seek> Reader<R> {
    /// Opens `r` as an A4 stream, reading its first sub-stream's header eagerly. An empty
    /// input (no sub-streams at all) is accepted and simply yields no records; a non-empty
    /// input that doesn't start with `START_MAGIC`, or whose header can't be fully read, fails
    /// immediately.
    pub fn new(r: R) -> Result<Self> {
        let mut reader = Self {
            source: Some(Source::Raw(r)),
            pool: SchemaPool::new(),
            state: None,
            index: None,
            done: false,
        };
        reader.open_next_substream()?;
        Ok(reader)
    }

    /// The schema pool accumulated so far from in-band `Proto` announcements.
    pub fn schema_pool(&self) -> &SchemaPool {
        &self.pool
    }

    /// Builds (or returns the cached) complete header/metadata index for this file.
    /// Required before any backward-direction metadata can be resolved, and exposed directly
    /// for random-access callers.
    pub fn info(&mut self) -> Result<&StreamIndex> {
        self.ensure_index()
    }

    /// A grouped view over this reader's content: each `(metadata, group)` pair yields the run
    /// of content records bound to that one metadata record (metadata-grouped iteration).
    pub fn groups(&mut self) -> Groups<'_, R> {
        Groups {
            reader: self,
            pending: None,
            group_open: false,
        }
    }

    fn ensure_index(&mut self) -> Result<&StreamIndex> {
        if self.index.is_none() {
            let index = read_indexed::build(self.underlying_mut()?)?;
            self.index = Some(index);
        }
        Ok(self.index.as_ref().expect("just inserted"))
    }

    fn underlying_mut(&mut self) -> Result<&mut R> {
        match self.source.as_mut().ok_or_else(bug_source_missing)? {
            Source::Raw(r) => Ok(r),
            Source::Compressed { section, .. } => Ok(section.inner_mut()),
        }
    }

    fn current_position(&mut self) -> Result<u64> {
        match self.source.as_mut().ok_or_else(bug_source_missing)? {
            Source::Raw(r) => Ok(r.stream_position()?),
            Source::Compressed { section_start, .. } => Ok(*section_start),
        }
    }

    fn read_record(&mut self, content_class_id: Option<u32>) -> Result<Option<(u32, Vec<u8>)>> {
        let Some(header) = framing::read_frame_header(self, content_class_id)? else {
            return Ok(None);
        };
        let payload = framing::read_payload(self, header.payload_len)?;
        Ok(Some((header.class_id, payload)))
    }

    fn open_next_substream(&mut self) -> Result<bool> {
        let mut magic = [0u8; MAGIC_LEN];
        if !framing::read_prefix(self, &mut magic)? {
            return Ok(false);
        }
        if magic != records::START_MAGIC {
            return Err(Error::BadMagic {
                offset: 0,
                found: magic.to_vec(),
            });
        }
        let body_start = self.current_position()?;
        let Some((class_id, payload)) = self.read_record(None)? else {
            return Err(Error::UnclosedStream);
        };
        if class_id != records::class::STREAM_HEADER {
            return Err(Error::UsageError(format!(
                "expected a StreamHeader record at offset {body_start}, found class id {class_id}"
            )));
        }
        let header = StreamHeader::decode(&payload[..])?;
        if header.a4_version != records::A4_VERSION {
            return Err(Error::VersionMismatch(header.a4_version));
        }
        for fd in header.file_descriptors {
            self.pool.add_file_descriptor(fd)?;
        }
        self.state = Some(SubstreamState {
            body_start,
            content_class_id: header.content_class_id,
            metadata_class_id: header.metadata_class_id,
            metadata_refers_forward: header.metadata_refers_forward,
            current_metadata: None,
            current_metadata_position: None,
        });
        Ok(true)
    }

    fn close_substream(&mut self, footer_payload: &[u8]) -> Result<()> {
        // Decoded purely to validate the record; the index (if built) is the authority on
        // metadata offsets, not this copy.
        let _footer = StreamFooter::decode(footer_payload)?;

        let mut trailer = [0u8; 4];
        framing::read_prefix(self, &mut trailer)?;
        let declared_size = u32::from_le_bytes(trailer) as usize;
        if declared_size != footer_payload.len() {
            return Err(Error::UsageError(format!(
                "footer trailer declares size {declared_size}, but the footer record was {} bytes",
                footer_payload.len()
            )));
        }

        let mut end_magic = [0u8; MAGIC_LEN];
        framing::read_prefix(self, &mut end_magic)?;
        if end_magic != records::END_MAGIC {
            return Err(Error::BadMagic {
                offset: 0,
                found: end_magic.to_vec(),
            });
        }

        self.state = None;
        Ok(())
    }

    fn enter_compressed_section(&mut self) -> Result<()> {
        let section_start = self.current_position()?;
        let source = self.source.take().ok_or_else(bug_source_missing)?;
        let Source::Raw(r) = source else {
            return Err(Error::UsageError(
                "StartCompressedSection seen while already inside a compressed section".into(),
            ));
        };
        self.source = Some(Source::Compressed {
            section: SectionReader::new(r),
            section_start,
        });
        Ok(())
    }

    fn exit_compressed_section(&mut self) -> Result<()> {
        let source = self.source.take().ok_or_else(bug_source_missing)?;
        let Source::Compressed { section, .. } = source else {
            return Err(Error::UsageError(
                "EndCompressedSection seen with no compressed section open".into(),
            ));
        };
        // `EndCompressedSection`'s own frame is the last thing the writer put through the
        // deflate stream, so by the time we've read it here the decompressor has already hit
        // StreamEnd and seeked the underlying reader back to the first byte after the
        // compressed run; `finish()` below just returns it, no further draining needed.
        let r = section.finish()?;
        self.source = Some(Source::Raw(r));
        Ok(())
    }

    fn on_metadata(&mut self, class_id: u32, payload: Vec<u8>) -> Result<()> {
        let state = self.state.as_mut().expect("substream state present");
        if state.metadata_refers_forward {
            state.current_metadata = Some(MetadataRecord { class_id, payload });
        }
        // Backward mode: this metadata's binding is resolved lazily, per content record, from
        // the seek index (see `backward_metadata_at`); nothing to record here.
        Ok(())
    }

    /// Resolves the metadata bound to a backward-direction content record found at `position`
    /// (`get_metadata_at`): the leftmost metadata offset strictly greater than `position`
    /// within the current sub-stream, or `None` if no metadata follows it.
    fn backward_metadata_at(&mut self, position: u64) -> Result<Option<MetadataRecord>> {
        let body_start = self.state.as_ref().expect("substream state present").body_start;

        let index = self.ensure_index()?;
        let Some(entry) = index.footers.iter().find(|f| f.body_start == body_start) else {
            return Ok(None);
        };
        let Some(&abs_offset) = entry
            .metadata_absolute_offsets
            .iter()
            .find(|&&offset| offset > position)
        else {
            return Ok(None);
        };

        let state = self.state.as_ref().expect("substream state present");
        if state.current_metadata_position == Some(abs_offset) {
            return Ok(state.current_metadata.clone());
        }

        let record = self.read_record_at(abs_offset)?;
        let state = self.state.as_mut().expect("substream state present");
        state.current_metadata = Some(record.clone());
        state.current_metadata_position = Some(abs_offset);
        Ok(Some(record))
    }

    /// Reads one record at an absolute offset, restoring the underlying stream's position
    /// afterward. Valid even mid-compressed-section: `SectionReader::inner_mut` always sits at
    /// the next unconsumed compressed byte, so seeking away and back is safe (see
    /// `compression.rs`).
    fn read_record_at(&mut self, abs_offset: u64) -> Result<MetadataRecord> {
        let r = self.underlying_mut()?;
        let saved = r.stream_position()?;
        r.seek(SeekFrom::Start(abs_offset))?;
        let header = framing::read_frame_header(r, None)?.ok_or(Error::TruncatedFrame {
            needed: 8,
            got: 0,
        })?;
        let payload = framing::read_payload(r, header.payload_len)?;
        self.underlying_mut()?.seek(SeekFrom::Start(saved))?;
        Ok(MetadataRecord {
            class_id: header.class_id,
            payload,
        })
    }

    fn pump(&mut self) -> Result<Option<ContentRecord>> {
        loop {
            if self.state.is_none() {
                if !self.open_next_substream()? {
                    return Ok(None);
                }
                continue;
            }

            let content_class_id = self.state.as_ref().expect("just checked").content_class_id;
            let frame_start = self.current_position()?;
            let Some((class_id, payload)) = self.read_record(content_class_id)? else {
                return Err(Error::UnclosedStream);
            };

            match class_id {
                records::class::STREAM_HEADER => {
                    return Err(Error::UsageError(
                        "unexpected StreamHeader record in the middle of a sub-stream".into(),
                    ));
                }
                records::class::STREAM_FOOTER => {
                    self.close_substream(&payload)?;
                }
                records::class::START_COMPRESSED_SECTION => {
                    self.enter_compressed_section()?;
                }
                records::class::END_COMPRESSED_SECTION => {
                    self.exit_compressed_section()?;
                }
                records::class::PROTO => {
                    let proto = Proto::decode(&payload[..])?;
                    if let Some(fd) = proto.file_descriptor {
                        self.pool.add_file_descriptor(fd)?;
                    }
                }
                cid if Some(cid) == self.state.as_ref().and_then(|s| s.metadata_class_id) => {
                    self.on_metadata(cid, payload)?;
                }
                cid => {
                    let state = self.state.as_ref().expect("just checked");
                    let current_metadata = if state.metadata_refers_forward {
                        state.current_metadata.clone()
                    } else {
                        self.backward_metadata_at(frame_start)?
                    };
                    return Ok(Some(ContentRecord {
                        class_id: cid,
                        payload,
                        current_metadata,
                    }));
                }
            }
        }
    }
}

impl<R: Read + Seek> Iterator for Reader<R> {
    type Item = Result<ContentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.pump() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Groups content by the metadata currently bound to it (metadata-grouped iteration).
///
/// Borrowing the reader for the duration of a [`GroupContent`] makes "advance the outer
/// iterator without exhausting the inner one" a borrow-check error at the type level for the
/// common case (the inner iterator's lifetime _is_ the borrow); dropping a [`GroupContent`]
/// early instead of exhausting it is still possible, so [`Groups::next_group`] also checks at
/// runtime and reports that misuse as [`Error::UsageError`].
pub struct Groups<'a, R: Read + Seek> {
    reader: &'a mut Reader<R>,
    pending: Option<ContentRecord>,
    group_open: bool,
}

impl<'a, R: Read + Seek> Groups<'a, R> {
    /// Advances to the next metadata group. Returns `Ok(None)` once the stream is exhausted.
    pub fn next_group(&mut self) -> Result<Option<(Option<MetadataRecord>, GroupContent<'_, 'a, R>)>> {
        if self.group_open {
            return Err(Error::UsageError(
                "advanced to the next metadata group without exhausting the current one".into(),
            ));
        }

        let first = match self.pending.take() {
            Some(record) => Some(record),
            None => match self.reader.next() {
                Some(Ok(record)) => Some(record),
                Some(Err(e)) => return Err(e),
                None => None,
            },
        };
        let Some(first) = first else {
            return Ok(None);
        };

        let metadata = first.current_metadata.clone();
        self.pending = Some(first);
        self.group_open = true;
        Ok(Some((
            metadata.clone(),
            GroupContent {
                groups: self,
                metadata,
            },
        )))
    }
}

/// The content records bound to one metadata group. Yields until the bound metadata changes
/// (or the stream ends), then stops, leaving the boundary-crossing record cached in the
/// parent [`Groups`] for the next call to `next_group`.
pub struct GroupContent<'b, 'a: 'b, R: Read + Seek> {
    groups: &'b mut Groups<'a, R>,
    metadata: Option<MetadataRecord>,
}

impl<'b, 'a: 'b, R: Read + Seek> Iterator for GroupContent<'b, 'a, R> {
    type Item = Result<ContentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.groups.pending.take() {
            Some(record) => record,
            None => match self.groups.reader.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    self.groups.group_open = false;
                    return Some(Err(e));
                }
                None => {
                    self.groups.group_open = false;
                    return None;
                }
            },
        };

        if record.current_metadata == self.metadata {
            Some(Ok(record))
        } else {
            self.groups.pending = Some(record);
            self.groups.group_open = false;
            None
        }
    }
}
