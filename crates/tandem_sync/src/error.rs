use tandem_core::{CodecError, Tick};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("snapshot ring capacity must be at least 1")]
    InvalidCapacity,

    #[error("snapshot for tick {tick} fails verification: carried {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { tick: Tick, expected: u32, actual: u32 },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
