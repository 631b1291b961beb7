//! Error types for the telemetry log writer and reader (§4.F/§4.G).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a telemetry log file (bad header)")]
    BadHeader,

    #[error("unknown block type tag {0}")]
    UnknownBlockType(u64),

    #[error("block declared size {declared} exceeds remaining bytes {available}")]
    TruncatedBlock { declared: u64, available: u64 },

    #[error("checksum mismatch in block at offset {offset}")]
    ChecksumMismatch { offset: u64 },

    #[error("snappy decompression failed: {0}")]
    Decompress(#[from] snap::Error),

    #[error("record '{name}' already registered with a different identifier")]
    DuplicateName { name: String },

    #[error("identifier {0} already reserved under a different name")]
    IdentifierTaken(u64),

    #[error("unknown record identifier {0}")]
    UnknownIdentifier(u64),

    #[error("the writer's background thread has stopped: {0}")]
    WriterStopped(String),

    #[error("malformed index block")]
    MalformedIndex,
}
