//! Input frames and their fixed binary layout
//!
//! An [`InputFrame`] is 20 bytes on the wire, little-endian:
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 4    | tick (u32)       |
//! | 4      | 4    | seq (u32)        |
//! | 8      | 4    | axes[0] (f32)    |
//! | 12     | 4    | axes[1] (f32)    |
//! | 16     | 4    | buttons (u32)    |
//!
//! A [`MergedInput`] is `count: u32` followed by `count` entries of
//! `sender: u32` + one encoded frame, ordered by `(sender, seq)`.

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::time::Tick;
use crate::PeerId;

/// Encoded size of one [`InputFrame`].
pub const INPUT_FRAME_LEN: usize = 20;

const MERGED_ENTRY_LEN: usize = 4 + INPUT_FRAME_LEN;

/// Button bit: primary action.
pub const BUTTON_PRIMARY: u32 = 1 << 0;
/// Button bit: secondary action.
pub const BUTTON_SECONDARY: u32 = 1 << 1;

/// Input sampled locally for one rendered tick, before scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalInput {
    pub axes: [f32; 2],
    pub buttons: u32,
}

impl LocalInput {
    pub fn new(axes: [f32; 2], buttons: u32) -> Self {
        Self { axes, buttons }
    }
}

/// One sender's input for one simulation tick. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputFrame {
    /// Tick this input applies to.
    pub tick: Tick,
    /// Per-sender sequence number, strictly increasing.
    pub seq: u32,
    /// Two axes, each in `[-1, 1]`.
    pub axes: [f32; 2],
    /// Button bitset.
    pub buttons: u32,
}

fn clamp_axis(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

impl InputFrame {
    pub fn new(tick: Tick, seq: u32, axes: [f32; 2], buttons: u32) -> Self {
        Self {
            tick,
            seq,
            axes: [clamp_axis(axes[0]), clamp_axis(axes[1])],
            buttons,
        }
    }

    /// A frame with no movement and no buttons.
    pub fn neutral(tick: Tick, seq: u32) -> Self {
        Self::new(tick, seq, [0.0, 0.0], 0)
    }

    /// Same input, scheduled for a different tick.
    pub fn retarget(&self, tick: Tick) -> Self {
        Self { tick, ..*self }
    }

    pub fn encode_into(&self, w: &mut ByteWriter) {
        w.put_u32(self.tick);
        w.put_u32(self.seq);
        w.put_f32(self.axes[0]);
        w.put_f32(self.axes[1]);
        w.put_u32(self.buttons);
    }

    pub fn to_bytes(&self) -> [u8; INPUT_FRAME_LEN] {
        let mut out = [0u8; INPUT_FRAME_LEN];
        out[0..4].copy_from_slice(&self.tick.to_le_bytes());
        out[4..8].copy_from_slice(&self.seq.to_le_bytes());
        out[8..12].copy_from_slice(&self.axes[0].to_bits().to_le_bytes());
        out[12..16].copy_from_slice(&self.axes[1].to_bits().to_le_bytes());
        out[16..20].copy_from_slice(&self.buttons.to_le_bytes());
        out
    }

    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let tick = r.u32()?;
        let seq = r.u32()?;
        let x = r.f32()?;
        let y = r.f32()?;
        let buttons = r.u32()?;
        if !x.is_finite() || !y.is_finite() {
            return Err(CodecError::NonFinite);
        }
        Ok(Self::new(tick, seq, [x, y], buttons))
    }

    /// Decodes exactly one frame; trailing bytes are an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let frame = Self::decode(&mut r)?;
        r.finish()?;
        Ok(frame)
    }
}

/// The deterministically ordered input set for one tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedInput {
    entries: Vec<(PeerId, InputFrame)>,
}

impl MergedInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts by `(sender, seq)` so arrival order never leaks into the
    /// simulation.
    pub fn from_unsorted(mut entries: Vec<(PeerId, InputFrame)>) -> Self {
        entries.sort_by_key(|(peer, frame)| (*peer, frame.seq));
        Self { entries }
    }

    pub fn entries(&self) -> &[(PeerId, InputFrame)] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &(PeerId, InputFrame)> {
        self.entries.iter()
    }

    pub fn senders(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.entries.iter().map(|(peer, _)| *peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(4 + self.entries.len() * MERGED_ENTRY_LEN);
        w.put_u32(self.entries.len() as u32);
        for (peer, frame) in &self.entries {
            w.put_u32(peer.0);
            frame.encode_into(&mut w);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        let count = r.u32()? as usize;
        let needed = count.saturating_mul(MERGED_ENTRY_LEN);
        if needed > r.remaining() {
            return Err(CodecError::Truncated {
                needed,
                remaining: r.remaining(),
            });
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let peer = PeerId(r.u32()?);
            let frame = InputFrame::decode(&mut r)?;
            entries.push((peer, frame));
        }
        r.finish()?;
        Ok(Self::from_unsorted(entries))
    }
}
