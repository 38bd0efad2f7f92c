//! Session membership
//!
//! Decides which senders a tick must hear from. Ordered so every peer derives
//! the same soft host from the same table.

use std::collections::BTreeMap;
use tandem_core::PeerId;

/// Member state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Alive,
    Suspected,
    Dead,
}

/// Membership table
#[derive(Debug, Clone, Default)]
pub struct MembershipTable {
    members: BTreeMap<PeerId, MemberState>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self {
            members: BTreeMap::new(),
        }
    }

    pub fn with_members(members: impl IntoIterator<Item = PeerId>) -> Self {
        let mut table = Self::new();
        for peer in members {
            table.add_member(peer);
        }
        table
    }

    pub fn add_member(&mut self, peer: PeerId) {
        self.members.insert(peer, MemberState::Alive);
    }

    pub fn mark_alive(&mut self, peer: PeerId) {
        if let Some(state) = self.members.get_mut(&peer) {
            if *state != MemberState::Dead {
                *state = MemberState::Alive;
            }
        }
    }

    pub fn mark_suspected(&mut self, peer: PeerId) {
        if let Some(state) = self.members.get_mut(&peer) {
            if *state == MemberState::Alive {
                *state = MemberState::Suspected;
            }
        }
    }

    pub fn mark_dead(&mut self, peer: PeerId) {
        if let Some(state) = self.members.get_mut(&peer) {
            *state = MemberState::Dead;
        }
    }

    pub fn state(&self, peer: PeerId) -> Option<MemberState> {
        self.members.get(&peer).copied()
    }

    /// Members whose input is still expected every tick. Suspected members
    /// count: suspicion alone never changes the lockstep quorum.
    pub fn expected_senders(&self) -> Vec<PeerId> {
        self.members
            .iter()
            .filter(|(_, &state)| state != MemberState::Dead)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Lowest-id live member; holds the authoritative snapshot for resync.
    pub fn soft_host(&self) -> Option<PeerId> {
        self.members
            .iter()
            .find(|(_, &state)| state != MemberState::Dead)
            .map(|(&id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
