//! Snapshot ring
//!
//! Fixed-capacity history of recent checksummed snapshots. Storage is
//! allocated once; pushing into a full ring overwrites the oldest entry.

use crate::checksum::checksum;
use crate::error::SyncError;
use tandem_core::Tick;

pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 64;

/// Serialized simulation state after `tick` completed ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub tick: Tick,
    pub checksum: u32,
    pub bytes: Vec<u8>,
}

impl Snapshot {
    /// Wraps freshly produced state, computing its checksum.
    pub fn new(tick: Tick, bytes: Vec<u8>) -> Self {
        Self {
            tick,
            checksum: checksum(&bytes),
            bytes,
        }
    }

    /// Rebuilds a snapshot received from elsewhere. Call [`Snapshot::verify`]
    /// before trusting it.
    pub fn from_parts(tick: Tick, checksum: u32, bytes: Vec<u8>) -> Self {
        Self {
            tick,
            checksum,
            bytes,
        }
    }

    pub fn verify(&self) -> bool {
        checksum(&self.bytes) == self.checksum
    }

    pub fn ensure_valid(&self) -> Result<(), SyncError> {
        let actual = checksum(&self.bytes);
        if actual == self.checksum {
            Ok(())
        } else {
            Err(SyncError::ChecksumMismatch {
                tick: self.tick,
                expected: self.checksum,
                actual,
            })
        }
    }
}

pub struct SnapshotRing {
    slots: Vec<Snapshot>,
    capacity: usize,
    /// Next slot to overwrite once full.
    head: usize,
    total_pushed: u64,
}

impl SnapshotRing {
    /// Creates a ring; a zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            total_pushed: 0,
        }
    }

    pub fn try_new(capacity: usize) -> Result<Self, SyncError> {
        if capacity == 0 {
            return Err(SyncError::InvalidCapacity);
        }
        Ok(Self::new(capacity))
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        if self.slots.len() < self.capacity {
            self.slots.push(snapshot);
        } else {
            self.slots[self.head] = snapshot;
        }
        self.head = (self.head + 1) % self.capacity;
        self.total_pushed += 1;
    }

    /// Most recently pushed snapshot.
    pub fn latest(&self) -> Option<&Snapshot> {
        if self.slots.is_empty() {
            return None;
        }
        self.slots.get((self.head + self.capacity - 1) % self.capacity)
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        if self.slots.len() < self.capacity {
            self.slots.first()
        } else {
            self.slots.get(self.head)
        }
    }

    /// Newest retained snapshot for `tick`.
    pub fn get(&self, tick: Tick) -> Option<&Snapshot> {
        self.iter().rev().find(|s| s.tick == tick)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Snapshot> {
        let split = if self.slots.len() < self.capacity { 0 } else { self.head };
        let (newer, older) = self.slots.split_at(split);
        older.iter().chain(newer.iter())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops all history. Storage is kept.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    /// Snapshots pushed over the ring's lifetime, including evicted ones.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }
}

impl Default for SnapshotRing {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CAPACITY)
    }
}
