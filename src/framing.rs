//! The long/short frame codec: the 4- or 8-byte record prefix shared by every reader
//! and writer in this crate.

use std::io::Read;

use crate::error::{A4Error as Error, A4Result as Result};
use crate::records::HIGH_BIT;

/// One record's framing: the class id it carries (declared for a long frame, inferred for a
/// short one) and the length of the payload that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub class_id: u32,
    pub payload_len: u32,
    /// `true` for a long (8-byte, typed) frame, `false` for a short (4-byte) one.
    pub long: bool,
}

fn check_class_id(class_id: u32) -> Result<()> {
    if class_id == 0 || class_id >= HIGH_BIT {
        return Err(Error::TypeOutOfRange(class_id));
    }
    Ok(())
}

fn check_payload_len(len: u64) -> Result<()> {
    if len >= HIGH_BIT as u64 {
        return Err(Error::SizeOutOfRange(len));
    }
    Ok(())
}

/// Reads up to `buf.len()` bytes. A zero-byte read before anything has been consumed is a
/// clean EOF (`Ok(false)`); any other short read is [`Error::TruncatedFrame`].
///
/// Exposed beyond this module so the forward reader can reuse the same "clean EOF vs.
/// truncation" distinction when looking for `START_MAGIC`/`END_MAGIC` and the footer trailer.
pub(crate) fn read_prefix<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut got = 0;
    while got < buf.len() {
        let n = r.read(&mut buf[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    if got == 0 {
        return Ok(false);
    }
    if got < buf.len() {
        return Err(Error::TruncatedFrame {
            needed: buf.len(),
            got,
        });
    }
    Ok(true)
}

/// Reads one frame prefix: the 4-byte size word, plus the 4-byte type word if its high bit
/// is set. `content_class_id` resolves a short frame's implicit type (the enclosing
/// sub-stream's declared content class); it is only consulted when the high bit is clear.
///
/// Returns `Ok(None)` on a clean EOF with nothing read at all.
pub fn read_frame_header<R: Read>(
    r: &mut R,
    content_class_id: Option<u32>,
) -> Result<Option<FrameHeader>> {
    let mut size_buf = [0u8; 4];
    if !read_prefix(r, &mut size_buf)? {
        return Ok(None);
    }
    let size_word = u32::from_le_bytes(size_buf);

    if size_word & HIGH_BIT != 0 {
        let payload_len = size_word & !HIGH_BIT;
        let mut type_buf = [0u8; 4];
        if !read_prefix(r, &mut type_buf)? {
            return Err(Error::TruncatedFrame { needed: 4, got: 0 });
        }
        let class_id = u32::from_le_bytes(type_buf);
        check_class_id(class_id)?;
        check_payload_len(payload_len as u64)?;
        Ok(Some(FrameHeader {
            class_id,
            payload_len,
            long: true,
        }))
    } else {
        let class_id = content_class_id.ok_or_else(|| {
            Error::UsageError(
                "short frame read but the sub-stream header declared no content_class_id".into(),
            )
        })?;
        check_payload_len(size_word as u64)?;
        Ok(Some(FrameHeader {
            class_id,
            payload_len: size_word,
            long: false,
        }))
    }
}

/// Reads the `payload_len` bytes of payload following a frame prefix.
pub fn read_payload<R: Read>(r: &mut R, payload_len: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; payload_len as usize];
    r.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::TruncatedPayload {
                needed: payload_len as usize,
                got: 0,
            }
        } else {
            Error::Io(e)
        }
    })?;
    Ok(buf)
}

/// Writes a long frame (`size | HIGH_BIT`, `type`, payload). Returns the number of bytes
/// written, for the caller's raw-byte counter.
pub fn write_long_frame<W: std::io::Write>(w: &mut W, class_id: u32, payload: &[u8]) -> Result<u64> {
    check_class_id(class_id)?;
    check_payload_len(payload.len() as u64)?;
    let size_word = (payload.len() as u32) | HIGH_BIT;
    w.write_all(&size_word.to_le_bytes())?;
    w.write_all(&class_id.to_le_bytes())?;
    w.write_all(payload)?;
    Ok(8 + payload.len() as u64)
}

/// Writes a short frame (bare `size`, payload; type is implicit). Returns the number of
/// bytes written.
pub fn write_short_frame<W: std::io::Write>(w: &mut W, payload: &[u8]) -> Result<u64> {
    check_payload_len(payload.len() as u64)?;
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(payload)?;
    Ok(4 + payload.len() as u64)
}
