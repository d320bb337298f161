//! Reference container format.
//!
//! A `RCX1` file is a magic header followed by length-prefixed records:
//!
//! ```text
//! [magic "RCX1"][version u8]
//! ([tag u8][len u32 BE][payload; len])*
//! ```
//!
//! Track records carry the JSON [`TrackFormat`](crate::media::TrackFormat),
//! sample records carry `[track u8][timestamp i64][flags u8][data]`, and a
//! trailer record is written only when the file is finalized. Readers stop
//! at the first incomplete record, so files left behind by a cancelled or
//! crashed export stay readable.

pub mod reader;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
pub mod writer;

pub use reader::{ContainerExtractor, ContainerReader, SampleEntry};
pub use writer::{ContainerMuxer, ContainerMuxerFactory};

use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"RCX1";
pub const VERSION: u8 = 1;

/// Record header: tag plus payload length.
pub(crate) const RECORD_HEADER_LEN: usize = 5;
/// Sample payload prefix: track, timestamp, flags.
pub(crate) const SAMPLE_HEADER_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordTag {
    Track = 1,
    Sample = 2,
    Metadata = 3,
    Trailer = 0xFF,
}

impl RecordTag {
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(RecordTag::Track),
            2 => Some(RecordTag::Sample),
            3 => Some(RecordTag::Metadata),
            0xFF => Some(RecordTag::Trailer),
            _ => None,
        }
    }
}

/// Errors from reading or writing container files.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Not a recut container (bad magic)")]
    BadMagic,

    #[error("Unsupported container version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("Invalid record at offset {offset}: {reason}")]
    InvalidRecord { offset: usize, reason: String },

    #[error("Invalid track format: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Container I/O error: {0}")]
    Io(#[from] std::io::Error),
}
