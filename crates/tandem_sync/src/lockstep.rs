//! Lockstep coordinator
//!
//! Buffers every participant's input by target tick and hands out the merged,
//! deterministically ordered set once a tick is consumed. Local input is
//! scheduled `delay` ticks ahead to hide transport latency.
//!
//! The coordinator owns no transport: the driver transmits what
//! [`Coordinator::submit_local`] returns and feeds received frames back in.

use std::collections::{BTreeMap, HashSet, VecDeque};
use tandem_core::{InputFrame, MergedInput, PeerId, Tick};

pub const DEFAULT_INPUT_DELAY: u32 = 2;
pub const DEFAULT_HISTORY_LEN: usize = 128;

/// Outcome of offering a remote frame to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    /// Buffered for its target tick.
    Accepted,
    /// `(sender, seq)` was already buffered.
    Duplicate,
    /// The target tick was already drained.
    Stale,
    /// The sender already has a different frame for that tick. The first one
    /// stays.
    Conflict,
}

pub struct Coordinator {
    local: PeerId,
    delay: u32,
    next_seq: u32,
    buffer: BTreeMap<Tick, Vec<(PeerId, InputFrame)>>,
    seen: HashSet<(PeerId, u32)>,
    /// Highest tick consumed. Ticks are drained in order.
    drained_through: Option<Tick>,
    last_frames: BTreeMap<PeerId, InputFrame>,
    history: VecDeque<(Tick, MergedInput)>,
    history_len: usize,
}

impl Coordinator {
    pub fn new(local: PeerId, delay: u32) -> Self {
        Self::with_history(local, delay, DEFAULT_HISTORY_LEN)
    }

    pub fn with_history(local: PeerId, delay: u32, history_len: usize) -> Self {
        Self {
            local,
            delay,
            next_seq: 0,
            buffer: BTreeMap::new(),
            seen: HashSet::new(),
            drained_through: None,
            last_frames: BTreeMap::new(),
            history: VecDeque::with_capacity(history_len),
            history_len,
        }
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Schedules local input for `current_tick + delay` and returns the frame
    /// to transmit.
    pub fn submit_local(&mut self, current_tick: Tick, axes: [f32; 2], buttons: u32) -> InputFrame {
        let target = current_tick.wrapping_add(self.delay);
        let frame = InputFrame::new(target, self.take_seq(), axes, buttons);
        self.insert(self.local, frame);
        tracing::trace!(tick = target, seq = frame.seq, "local input scheduled");
        frame
    }

    /// Inserts neutral local frames for every schedulable tick in
    /// `[from, current_tick + delay)` that has no local frame yet. Returns the
    /// frames so they can be transmitted.
    pub fn fill_local_gaps(&mut self, from: Tick, current_tick: Tick) -> Vec<InputFrame> {
        let until = current_tick.saturating_add(self.delay);
        let mut filled = Vec::new();
        for tick in from.max(self.delay)..until {
            if self.is_drained(tick) || self.has_frame_from(tick, self.local) {
                continue;
            }
            let frame = InputFrame::neutral(tick, self.take_seq());
            self.insert(self.local, frame);
            filled.push(frame);
        }
        if !filled.is_empty() {
            tracing::debug!(from, until, count = filled.len(), "filled local input gap");
        }
        filled
    }

    /// Stands in for a missing sender at `tick` by repeating its last known
    /// frame (neutral if none). Substitutes never count as the sender's own
    /// frames: a late real frame for the tick is reported as a conflict.
    pub fn substitute(&mut self, sender: PeerId, tick: Tick) -> InputFrame {
        let frame = match self.last_frame_from(sender) {
            Some(last) => last.retarget(tick),
            None => InputFrame::neutral(tick, 0),
        };
        self.buffer.entry(tick).or_default().push((sender, frame));
        frame
    }

    /// Frames from `sender` still waiting to be drained, ascending by tick.
    pub fn buffered_from(&self, sender: PeerId) -> Vec<InputFrame> {
        self.buffer
            .values()
            .flatten()
            .filter(|(peer, _)| *peer == sender)
            .map(|(_, frame)| *frame)
            .collect()
    }

    pub fn receive_remote(&mut self, sender: PeerId, frame: InputFrame) -> Receipt {
        if self.is_drained(frame.tick) {
            tracing::trace!(peer = %sender, tick = frame.tick, "stale input");
            return Receipt::Stale;
        }
        if self.seen.contains(&(sender, frame.seq)) {
            return Receipt::Duplicate;
        }
        if self.has_frame_from(frame.tick, sender) {
            tracing::warn!(peer = %sender, tick = frame.tick, seq = frame.seq, "conflicting input for tick, keeping first");
            return Receipt::Conflict;
        }
        self.insert(sender, frame);
        Receipt::Accepted
    }

    /// Removes and returns the merged input for `tick`. A second drain of the
    /// same tick yields an empty set.
    pub fn drain_for_tick(&mut self, tick: Tick) -> MergedInput {
        let entries = self.buffer.remove(&tick).unwrap_or_default();
        for (peer, frame) in &entries {
            self.seen.remove(&(*peer, frame.seq));
        }
        let already = self.is_drained(tick);
        self.drained_through = Some(self.drained_through.map_or(tick, |t| t.max(tick)));

        let merged = MergedInput::from_unsorted(entries);
        if !already {
            if self.history.len() == self.history_len {
                self.history.pop_front();
            }
            if self.history_len > 0 {
                self.history.push_back((tick, merged.clone()));
            }
        }
        tracing::trace!(tick, frames = merged.len(), "drained tick");
        merged
    }

    /// Every peer in `expected` has a frame buffered for `tick`.
    pub fn is_complete(&self, tick: Tick, expected: &[PeerId]) -> bool {
        self.missing_senders(tick, expected).is_empty()
    }

    pub fn missing_senders(&self, tick: Tick, expected: &[PeerId]) -> Vec<PeerId> {
        // nothing can be scheduled below the delay window
        if tick < self.delay || self.is_drained(tick) {
            return Vec::new();
        }
        expected
            .iter()
            .copied()
            .filter(|peer| !self.has_frame_from(tick, *peer))
            .collect()
    }

    /// Ticks with buffered frames, ascending.
    pub fn pending_ticks(&self) -> Vec<Tick> {
        self.buffer.keys().copied().collect()
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.values().map(Vec::len).sum()
    }

    /// Drops buffered frames for every tick up to and including `tick`, and
    /// treats those ticks as drained.
    pub fn discard_through(&mut self, tick: Tick) {
        let keep = self.buffer.split_off(&tick.saturating_add(1));
        let dropped = std::mem::replace(&mut self.buffer, keep);
        for (peer, frame) in dropped.values().flatten() {
            self.seen.remove(&(*peer, frame.seq));
        }
        self.drained_through = Some(self.drained_through.map_or(tick, |t| t.max(tick)));
        tracing::debug!(tick, "discarded buffered input");
    }

    /// Most recent frame (by target tick) accepted from `sender`.
    pub fn last_frame_from(&self, sender: PeerId) -> Option<InputFrame> {
        self.last_frames.get(&sender).copied()
    }

    /// Merged input previously drained for `tick`, if still retained.
    pub fn history(&self, tick: Tick) -> Option<&MergedInput> {
        self.history
            .iter()
            .rev()
            .find(|(t, _)| *t == tick)
            .map(|(_, merged)| merged)
    }

    pub fn drained_through(&self) -> Option<Tick> {
        self.drained_through
    }

    fn take_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    fn is_drained(&self, tick: Tick) -> bool {
        self.drained_through.is_some_and(|t| tick <= t)
    }

    fn has_frame_from(&self, tick: Tick, sender: PeerId) -> bool {
        self.buffer
            .get(&tick)
            .is_some_and(|frames| frames.iter().any(|(p, _)| *p == sender))
    }

    fn insert(&mut self, sender: PeerId, frame: InputFrame) {
        self.seen.insert((sender, frame.seq));
        self.buffer.entry(frame.tick).or_default().push((sender, frame));
        match self.last_frames.get(&sender) {
            Some(last) if last.tick > frame.tick => {}
            _ => {
                self.last_frames.insert(sender, frame);
            }
        }
    }
}
