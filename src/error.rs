//! The crate-wide error type.

use thiserror::Error;

/// Everything that can go wrong reading or writing an A4 stream.
#[derive(Error, Debug)]
pub enum A4Error {
    #[error("expected start magic at offset {offset}, found {found:?}")]
    BadMagic { offset: u64, found: Vec<u8> },

    #[error("stream is missing its closing magic; seek-based indexing is unavailable")]
    UnclosedStream,

    #[error("unsupported a4_version {0}, expected 1")]
    VersionMismatch(u32),

    #[error("frame prefix truncated: needed {needed} bytes, got {got}")]
    TruncatedFrame { needed: usize, got: usize },

    #[error("record payload truncated: needed {needed} bytes, got {got}")]
    TruncatedPayload { needed: usize, got: usize },

    #[error("payload size {0} is out of range (must be < 2^31)")]
    SizeOutOfRange(u64),

    #[error("frame type {0} is out of range (must be in 1..2^31)")]
    TypeOutOfRange(u32),

    #[error("no decoder registered for class id {0}")]
    UnknownClassId(u32),

    #[error("usage error: {0}")]
    UsageError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to decode protobuf payload: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("failed to encode protobuf payload: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("invalid embedded schema: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),
}

pub type A4Result<T> = Result<T, A4Error>;

/// Wraps a crate error as a [`std::io::Error`], for the spots where we hand a compressor or
/// decompressor adapter to something that expects to implement `Read`/`Write`.
pub(crate) fn to_io_error(e: A4Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}
