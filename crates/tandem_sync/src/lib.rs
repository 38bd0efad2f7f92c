//! Tandem Sync
//!
//! Everything that keeps peers in lockstep, independent of any transport or
//! simulation:
//! - CRC-32 state checksums
//! - A bounded ring of recent snapshots
//! - The lockstep coordinator (per-tick input buffering and merge)
//! - Sync wire messages, desync detection, stall tracking

pub mod checksum;
pub mod desync;
pub mod error;
pub mod lockstep;
pub mod message;
pub mod snapshot_ring;
pub mod stall;

pub use checksum::{checksum, Crc32};
pub use desync::{DesyncMonitor, DesyncReport};
pub use error::SyncError;
pub use lockstep::{Coordinator, Receipt, DEFAULT_HISTORY_LEN, DEFAULT_INPUT_DELAY};
pub use message::SyncMessage;
pub use snapshot_ring::{Snapshot, SnapshotRing, DEFAULT_SNAPSHOT_CAPACITY};
pub use stall::{StallPolicy, StallTracker};
