//! Zlib framing for compressed sections: everything between a `StartCompressedSection`
//! and its matching `EndCompressedSection` long frame is one contiguous deflate stream.
//!
//! Both sides use `flate2`'s low-level [`flate2::Compress`]/[`flate2::Decompress`] rather
//! than its `Read`/`Write` wrappers. The wrappers buffer ahead of what they return to the
//! caller, so on the read side they tend to consume bytes past the logical end of the
//! compressed run, exactly the bytes the `EndCompressedSection` frame needs to still be
//! sitting at. The low-level API reports `total_in`/`total_out` after each call, which lets
//! us seek the underlying stream back to the true end of the compressed run ourselves.

use std::io::{Read, Seek, SeekFrom, Write};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{A4Error as Error, A4Result as Result};

const CHUNK: usize = 64 * 1024;

fn compress_err(e: flate2::CompressError) -> Error {
    Error::UsageError(format!("zlib compression failed: {e}"))
}

fn decompress_err(e: flate2::DecompressError) -> Error {
    Error::UsageError(format!("zlib decompression failed: {e}"))
}

/// Buffers writes, deflating them through a single [`Compress`] stream, and flushes the
/// compressed bytes to the underlying writer on [`finish`](Self::finish).
pub struct SectionWriter<W> {
    inner: W,
    compress: Compress,
    out_buf: Vec<u8>,
}

impl<W: Write> SectionWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            compress: Compress::new(Compression::default(), true),
            out_buf: vec![0u8; CHUNK],
        }
    }

    /// Feeds `data` through the compressor, writing any newly produced compressed bytes to
    /// the underlying writer immediately.
    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            let status = self
                .compress
                .compress(data, &mut self.out_buf, FlushCompress::None)
                .map_err(compress_err)?;
            let consumed = (self.compress.total_in() - before_in) as usize;
            let produced = (self.compress.total_out() - before_out) as usize;
            self.inner.write_all(&self.out_buf[..produced])?;
            data = &data[consumed..];
            if status == Status::BufError && consumed == 0 && produced == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Flushes the remaining compressed bytes and returns the underlying writer along with
    /// the total number of compressed bytes written to it.
    pub fn finish(mut self) -> Result<(W, u64)> {
        loop {
            let before_out = self.compress.total_out();
            let status = self
                .compress
                .compress(&[], &mut self.out_buf, FlushCompress::Finish)
                .map_err(compress_err)?;
            let produced = (self.compress.total_out() - before_out) as usize;
            self.inner.write_all(&self.out_buf[..produced])?;
            if status == Status::StreamEnd {
                break;
            }
        }
        let total = self.compress.total_out();
        Ok((self.inner, total))
    }
}

/// Reads and inflates a compressed run from a `Seek`-capable reader, leaving the stream
/// positioned exactly at the byte after the last compressed byte consumed once
/// [`finish`](Self::finish) is called, regardless of how much the underlying reader's `read`
/// calls over-fetched.
pub struct SectionReader<R> {
    inner: R,
    decompress: Decompress,
    in_buf: [u8; CHUNK],
    done: bool,
}

impl<R: Read + Seek> SectionReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decompress: Decompress::new(true),
            in_buf: [0u8; CHUNK],
            done: false,
        }
    }

    /// Fills `out` with inflated bytes, reading more compressed input as needed. Returns the
    /// number of bytes written to `out`; `0` means the compressed stream has ended.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.done || out.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.inner.read(&mut self.in_buf)?;
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress(&self.in_buf[..n], out, FlushDecompress::None)
                .map_err(decompress_err)?;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            let produced = (self.decompress.total_out() - before_out) as usize;

            if consumed < n {
                self.inner.seek(SeekFrom::Current(-((n - consumed) as i64)))?;
            }

            if status == Status::StreamEnd {
                self.done = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if n == 0 {
                // Underlying reader is exhausted but the deflate stream never signalled
                // StreamEnd; treat it as a clean end rather than spinning.
                self.done = true;
                return Ok(0);
            }
        }
    }

    /// Reads the compressed run to completion, discarding the inflated bytes, so the
    /// underlying stream is left positioned right after `EndCompressedSection`'s frame.
    pub fn finish(mut self) -> Result<R> {
        let mut sink = [0u8; CHUNK];
        while self.read(&mut sink)? > 0 {}
        Ok(self.inner)
    }

    /// Direct access to the underlying reader. Between calls to [`read`](Self::read) the
    /// inner reader's position always sits exactly at the next unconsumed compressed byte
    /// (see the seek-back in `read`), so callers may freely seek it elsewhere (e.g. to answer
    /// a seek-indexed lookup) and seek back before resuming decompression.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_small_payload() {
        let mut buf = Vec::new();
        {
            let mut w = SectionWriter::new(&mut buf);
            w.write_all(b"hello compressed world").unwrap();
            let (_, n) = w.finish().unwrap();
            assert_eq!(n as usize, buf.len());
        }

        let cur = Cursor::new(buf);
        let mut out = Vec::new();
        let mut r = SectionReader::new(cur);
        let mut chunk = [0u8; 64];
        loop {
            let n = r.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, b"hello compressed world");
    }

    #[test]
    fn leaves_trailing_bytes_intact_after_compressed_run() {
        let mut compressed = Vec::new();
        {
            let mut w = SectionWriter::new(&mut compressed);
            w.write_all(b"payload").unwrap();
            w.finish().unwrap();
        }
        let mut stream = compressed.clone();
        stream.extend_from_slice(b"TRAILER");

        let cur = Cursor::new(stream);
        let r = SectionReader::new(cur);
        let mut cur = r.finish().unwrap();
        let mut rest = Vec::new();
        cur.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"TRAILER");
    }

    #[test]
    fn round_trips_payload_spanning_multiple_chunks() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut buf = Vec::new();
        {
            let mut w = SectionWriter::new(&mut buf);
            w.write_all(&data).unwrap();
            w.finish().unwrap();
        }

        let cur = Cursor::new(buf);
        let mut out = Vec::new();
        let mut r = SectionReader::new(cur);
        let mut chunk = [0u8; 4096];
        loop {
            let n = r.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, data);
    }
}
