//! Seek-based reverse indexing: walks a closed file backward from its final `END_MAGIC`
//! to recover every sub-stream's header and metadata offsets without decompressing content.

use std::io::{Read, Seek, SeekFrom};

use prost::Message;

use crate::error::{A4Error as Error, A4Result as Result};
use crate::framing;
use crate::records::{self, StreamFooter, StreamHeader, MAGIC_LEN};

/// One indexed sub-stream's header, plus the absolute byte offset (in the underlying
/// stream) at which its `StreamHeader` record begins.
#[derive(Debug, Clone)]
pub struct HeaderEntry {
    pub offset: u64,
    pub header: StreamHeader,
}

/// One indexed sub-stream's footer, the absolute offset its body started at (right after
/// `START_MAGIC`), and the absolute offsets of its metadata records.
#[derive(Debug, Clone)]
pub struct FooterEntry {
    /// Absolute offset of the first byte after this sub-stream's `START_MAGIC`.
    pub body_start: u64,
    pub footer: StreamFooter,
    /// Absolute offsets (in the underlying stream) of each metadata record, in the same
    /// order as `footer.metadata_offsets`.
    pub metadata_absolute_offsets: Vec<u64>,
}

/// The complete header/footer index for a closed, possibly multi-sub-stream, file.
#[derive(Debug, Clone, Default)]
pub struct StreamIndex {
    /// Sorted ascending by `offset`.
    pub headers: Vec<HeaderEntry>,
    /// Sorted ascending by `body_start`, matching `headers`.
    pub footers: Vec<FooterEntry>,
    /// Total file length.
    pub total_size: u64,
}

impl StreamIndex {
    /// Returns the rightmost header entry whose offset is `<= pos`.
    pub fn header_at(&self, pos: u64) -> Option<&HeaderEntry> {
        match self.headers.partition_point(|h| h.offset <= pos) {
            0 => None,
            n => Some(&self.headers[n - 1]),
        }
    }

    /// Returns the footer entry for the sub-stream that contains `pos`.
    pub fn footer_at(&self, pos: u64) -> Option<&FooterEntry> {
        self.footers
            .iter()
            .find(|f| pos >= f.body_start && pos < f.body_start + f.footer.size)
    }
}

/// Builds a [`StreamIndex`] by walking `r` backward from its current end-of-file.
///
/// `r`'s position is restored to wherever it was before this call once indexing completes
/// (successfully or not).
pub fn build<R: Read + Seek>(r: &mut R) -> Result<StreamIndex> {
    let saved_pos = r.stream_position()?;
    let result = build_inner(r);
    r.seek(SeekFrom::Start(saved_pos))?;
    result
}

fn build_inner<R: Read + Seek>(r: &mut R) -> Result<StreamIndex> {
    let file_len = r.seek(SeekFrom::End(0))?;
    let mut headers = Vec::new();
    let mut footers = Vec::new();

    let mut tail_offset = file_len;

    loop {
        if tail_offset < MAGIC_LEN as u64 {
            return Err(Error::BadMagic {
                offset: 0,
                found: Vec::new(),
            });
        }
        let end_magic_pos = tail_offset - MAGIC_LEN as u64;
        r.seek(SeekFrom::Start(end_magic_pos))?;
        let mut magic = [0u8; MAGIC_LEN];
        r.read_exact(&mut magic)?;
        if magic != records::END_MAGIC {
            log::warn!(
                "file seems to be not closed at offset {end_magic_pos}; seek-based indexing aborted"
            );
            return Err(Error::UnclosedStream);
        }

        if end_magic_pos < 4 {
            return Err(Error::TruncatedFrame { needed: 4, got: 0 });
        }
        r.seek(SeekFrom::Start(end_magic_pos - 4))?;
        let mut size_buf = [0u8; 4];
        r.read_exact(&mut size_buf)?;
        let footer_payload_size = u32::from_le_bytes(size_buf) as u64;

        let footer_frame_len = 8 + footer_payload_size; // 8 = long-frame prefix
        let footer_record_start = end_magic_pos - 4 - footer_frame_len;
        r.seek(SeekFrom::Start(footer_record_start))?;
        let frame = framing::read_frame_header(r, None)?.ok_or(Error::TruncatedFrame {
            needed: 8,
            got: 0,
        })?;
        if frame.class_id != records::class::STREAM_FOOTER {
            return Err(Error::UsageError(format!(
                "expected a StreamFooter record at offset {footer_record_start}, found class id {}",
                frame.class_id
            )));
        }
        let payload = framing::read_payload(r, frame.payload_len)?;
        let footer = StreamFooter::decode(&payload[..])?;

        let body_start = footer_record_start - footer.size;

        let metadata_absolute_offsets: Vec<u64> = footer
            .metadata_offsets
            .iter()
            .map(|&rel| body_start + rel)
            .collect();

        footers.push(FooterEntry {
            body_start,
            footer: footer.clone(),
            metadata_absolute_offsets,
        });

        // `body_start` is the first byte after this sub-stream's `START_MAGIC`, which is
        // exactly where its `StreamHeader` long frame begins.
        let start_magic_pos = body_start - MAGIC_LEN as u64;
        r.seek(SeekFrom::Start(start_magic_pos))?;
        let mut magic = [0u8; MAGIC_LEN];
        r.read_exact(&mut magic)?;
        if magic != records::START_MAGIC {
            return Err(Error::BadMagic {
                offset: start_magic_pos,
                found: magic.to_vec(),
            });
        }
        let header_frame = framing::read_frame_header(r, None)?.ok_or(Error::TruncatedFrame {
            needed: 8,
            got: 0,
        })?;
        if header_frame.class_id != records::class::STREAM_HEADER {
            return Err(Error::UsageError(format!(
                "expected a StreamHeader record at offset {body_start}, found class id {}",
                header_frame.class_id
            )));
        }
        let header_payload = framing::read_payload(r, header_frame.payload_len)?;
        let header = StreamHeader::decode(&header_payload[..])?;

        headers.push(HeaderEntry {
            offset: start_magic_pos,
            header,
        });

        if start_magic_pos == 0 {
            headers.reverse();
            footers.reverse();
            return Ok(StreamIndex {
                headers,
                footers,
                total_size: file_len,
            });
        }

        log::trace!(
            "crossed sub-stream boundary at offset {start_magic_pos}; {} sub-streams indexed so far",
            headers.len()
        );
        tail_offset = start_magic_pos;
    }
}
