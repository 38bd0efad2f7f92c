//! Desync detection
//!
//! Peers periodically exchange the checksum of their state at the same tick.
//! Reports from a peer may arrive before or after the local checksum for that
//! tick is known; both orders are compared once both sides exist.

use std::collections::BTreeMap;
use std::fmt;
use tandem_core::{PeerId, Tick};

/// Local and remote state diverged at `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesyncReport {
    pub tick: Tick,
    pub local: u32,
    pub remote: u32,
    pub peer: PeerId,
}

impl fmt::Display for DesyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "desync at tick {} with {}: local {:#010x}, remote {:#010x}",
            self.tick, self.peer, self.local, self.remote
        )
    }
}

pub struct DesyncMonitor {
    /// Number of local checksums retained.
    horizon: usize,
    local: BTreeMap<Tick, u32>,
    pending: BTreeMap<Tick, Vec<(PeerId, u32)>>,
    last_verified: Option<Tick>,
}

impl DesyncMonitor {
    pub fn new(horizon: usize) -> Self {
        Self {
            horizon: horizon.max(1),
            local: BTreeMap::new(),
            pending: BTreeMap::new(),
            last_verified: None,
        }
    }

    /// Records our checksum for `tick` and checks any reports that were
    /// waiting on it.
    pub fn record_local(&mut self, tick: Tick, checksum: u32) -> Vec<DesyncReport> {
        self.local.insert(tick, checksum);
        while self.local.len() > self.horizon {
            self.local.pop_first();
        }

        let mut reports = Vec::new();
        for (peer, remote) in self.pending.remove(&tick).unwrap_or_default() {
            if let Some(report) = self.compare(tick, checksum, peer, remote) {
                reports.push(report);
            }
        }
        self.prune_pending();
        reports
    }

    /// Records a peer's checksum for `tick`.
    pub fn record_remote(&mut self, peer: PeerId, tick: Tick, remote: u32) -> Option<DesyncReport> {
        if let Some(&local) = self.local.get(&tick) {
            return self.compare(tick, local, peer, remote);
        }
        match self.local.keys().next_back() {
            // Local checksums are recorded in tick order, so a missing entry
            // at or below the latest one has left the horizon.
            Some(&latest) if tick <= latest => {
                tracing::trace!(peer = %peer, tick, "remote checksum outside local window");
                None
            }
            _ => {
                self.pending.entry(tick).or_default().push((peer, remote));
                self.prune_pending();
                None
            }
        }
    }

    /// Forgets everything; used after adopting a resync snapshot.
    pub fn clear(&mut self) {
        self.local.clear();
        self.pending.clear();
    }

    /// Latest tick at which a remote checksum matched ours.
    pub fn last_verified(&self) -> Option<Tick> {
        self.last_verified
    }

    pub fn pending_reports(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    fn compare(&mut self, tick: Tick, local: u32, peer: PeerId, remote: u32) -> Option<DesyncReport> {
        if local == remote {
            self.last_verified = Some(self.last_verified.map_or(tick, |t| t.max(tick)));
            tracing::trace!(peer = %peer, tick, checksum = local, "checksum verified");
            return None;
        }
        let report = DesyncReport {
            tick,
            local,
            remote,
            peer,
        };
        tracing::error!(peer = %peer, tick, local = local, remote = remote, "desync detected");
        Some(report)
    }

    fn prune_pending(&mut self) {
        while self.pending.len() > self.horizon {
            self.pending.pop_last();
        }
    }
}
