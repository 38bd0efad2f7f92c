//! Demo arena simulation
//!
//! One unit per participant, moved by its input axes. Positions are fixed-point
//! milli-units so integration never touches floating point after the axes are
//! quantized.

use crate::simulation::Simulation;
use glam::IVec2;
use std::collections::BTreeMap;
use tandem_core::input::BUTTON_PRIMARY;
use tandem_core::time::{DEFAULT_TICK_RATE_HZ, MAX_TICK_RATE_HZ};
use tandem_core::{ByteReader, ByteWriter, CodecError, DeterministicRng, MergedInput, PeerId, Tick};

/// Units per second at full deflection, in milli-units.
const SPEED_MILLI_PER_SEC: i32 = 4_000;
/// The arena spans `[-ARENA_EXTENT, ARENA_EXTENT]` on both axes.
const ARENA_EXTENT: i32 = 50_000;
const HEADER_LEN: usize = 24;
const UNIT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Unit {
    pos: IVec2,
    buttons: u32,
}

#[derive(Debug, Clone)]
pub struct ArenaSim {
    tick: Tick,
    seed: u32,
    fixed_hz: u32,
    rng: DeterministicRng,
    entropy: u32,
    units: BTreeMap<PeerId, Unit>,
}

impl ArenaSim {
    pub fn new() -> Self {
        Self {
            tick: 0,
            seed: 0,
            fixed_hz: DEFAULT_TICK_RATE_HZ,
            rng: DeterministicRng::new(0),
            entropy: 0,
            units: BTreeMap::new(),
        }
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Position of `peer`'s unit in milli-units.
    pub fn position(&self, peer: PeerId) -> Option<IVec2> {
        self.units.get(&peer).map(|u| u.pos)
    }

    pub fn fixed_hz(&self) -> u32 {
        self.fixed_hz
    }

    fn spawn_point(&mut self) -> IVec2 {
        let span = (ARENA_EXTENT as u32) * 2 + 1;
        let x = self.rng.next_below(span) as i32 - ARENA_EXTENT;
        let y = self.rng.next_below(span) as i32 - ARENA_EXTENT;
        IVec2::new(x, y)
    }
}

impl Default for ArenaSim {
    fn default() -> Self {
        Self::new()
    }
}

fn quantize_axis(axis: f32) -> i32 {
    (axis.clamp(-1.0, 1.0) * 1000.0).round() as i32
}

impl Simulation for ArenaSim {
    fn init(&mut self, seed: u32, fixed_hz: u32) {
        self.tick = 0;
        self.seed = seed;
        self.fixed_hz = if fixed_hz == 0 { DEFAULT_TICK_RATE_HZ } else { fixed_hz.min(MAX_TICK_RATE_HZ) };
        self.rng = DeterministicRng::new(seed);
        self.entropy = seed;
        self.units.clear();
    }

    fn step(&mut self, inputs: &MergedInput) {
        let per_tick = SPEED_MILLI_PER_SEC / self.fixed_hz as i32;
        let bounds = IVec2::splat(ARENA_EXTENT);

        for (peer, frame) in inputs.iter() {
            if !self.units.contains_key(peer) {
                let pos = self.spawn_point();
                self.units.insert(*peer, Unit { pos, buttons: 0 });
            }
            let speed = if frame.buttons & BUTTON_PRIMARY != 0 {
                per_tick * 2
            } else {
                per_tick
            };
            let axes = IVec2::new(quantize_axis(frame.axes[0]), quantize_axis(frame.axes[1]));
            let delta = axes * speed / 1000;
            if let Some(unit) = self.units.get_mut(peer) {
                unit.pos = (unit.pos + delta).clamp(-bounds, bounds);
                unit.buttons = frame.buttons;
            }
        }

        let draw = self.rng.next_u32();
        self.entropy = self.entropy.rotate_left(5) ^ draw ^ self.tick;
        self.tick = self.tick.wrapping_add(1);
    }

    fn tick(&self) -> Tick {
        self.tick
    }

    fn snapshot(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(HEADER_LEN + self.units.len() * UNIT_LEN);
        w.put_u32(self.tick);
        w.put_u32(self.seed);
        w.put_u32(self.fixed_hz);
        w.put_u32(self.rng.state());
        w.put_u32(self.entropy);
        w.put_u32(self.units.len() as u32);
        for (peer, unit) in &self.units {
            w.put_u32(peer.0);
            w.put_i32(unit.pos.x);
            w.put_i32(unit.pos.y);
            w.put_u32(unit.buttons);
        }
        w.into_bytes()
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<Tick, CodecError> {
        let mut r = ByteReader::new(bytes);
        let tick = r.u32()?;
        let seed = r.u32()?;
        let fixed_hz = r.u32()?;
        let rng_state = r.u32()?;
        let entropy = r.u32()?;
        let count = r.u32()? as usize;
        if fixed_hz == 0 || fixed_hz > MAX_TICK_RATE_HZ {
            return Err(CodecError::Invalid("tick rate out of range"));
        }
        if rng_state == 0 {
            return Err(CodecError::Invalid("zero rng state"));
        }
        let needed = count.saturating_mul(UNIT_LEN);
        if needed > r.remaining() {
            return Err(CodecError::Truncated {
                needed,
                remaining: r.remaining(),
            });
        }

        let mut units = BTreeMap::new();
        let mut previous: Option<PeerId> = None;
        for _ in 0..count {
            let peer = PeerId(r.u32()?);
            if previous.is_some_and(|p| p >= peer) {
                return Err(CodecError::Invalid("units out of order"));
            }
            previous = Some(peer);
            let pos = IVec2::new(r.i32()?, r.i32()?);
            let extent = -ARENA_EXTENT..=ARENA_EXTENT;
            if !extent.contains(&pos.x) || !extent.contains(&pos.y) {
                return Err(CodecError::Invalid("unit out of bounds"));
            }
            let buttons = r.u32()?;
            units.insert(peer, Unit { pos, buttons });
        }
        r.finish()?;

        self.tick = tick;
        self.seed = seed;
        self.fixed_hz = fixed_hz;
        self.rng = DeterministicRng::from_state(rng_state);
        self.entropy = entropy;
        self.units = units;
        Ok(tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::InputFrame;

    fn merged(tick: Tick, frames: &[(u32, [f32; 2], u32)]) -> MergedInput {
        MergedInput::from_unsorted(
            frames
                .iter()
                .enumerate()
                .map(|(i, (peer, axes, buttons))| {
                    (PeerId(*peer), InputFrame::new(tick, i as u32, *axes, *buttons))
                })
                .collect(),
        )
    }

    fn run(seed: u32, ticks: Tick) -> ArenaSim {
        let mut sim = ArenaSim::new();
        sim.init(seed, 60);
        for tick in 0..ticks {
            let input = if tick < 2 {
                MergedInput::new()
            } else {
                merged(tick, &[(1, [1.0, 0.0], 0), (2, [-0.5, 0.25], BUTTON_PRIMARY)])
            };
            sim.step(&input);
        }
        sim
    }

    #[test]
    fn same_inputs_same_bytes() {
        assert_eq!(run(99, 120).snapshot(), run(99, 120).snapshot());
        assert_ne!(run(99, 120).snapshot(), run(100, 120).snapshot());
    }

    #[test]
    fn tick_counts_steps() {
        let sim = run(1, 13);
        assert_eq!(sim.tick(), 13);
        assert_eq!(sim.unit_count(), 2);
    }

    #[test]
    fn boost_doubles_speed() {
        let mut sim = ArenaSim::new();
        sim.init(5, 60);
        sim.step(&merged(0, &[(1, [0.0, 0.0], 0), (2, [0.0, 0.0], 0)]));
        let a0 = sim.position(PeerId(1)).unwrap();
        let b0 = sim.position(PeerId(2)).unwrap();
        sim.step(&merged(1, &[(1, [0.0, 1.0], 0), (2, [0.0, 1.0], BUTTON_PRIMARY)]));
        let a = sim.position(PeerId(1)).unwrap() - a0;
        let b = sim.position(PeerId(2)).unwrap() - b0;
        // spawn points are random; skip the check if a unit sits on the wall
        if a0.y < ARENA_EXTENT - 200 && b0.y < ARENA_EXTENT - 200 {
            assert_eq!(a.y, SPEED_MILLI_PER_SEC / 60);
            assert_eq!(b.y, 2 * a.y);
        }
    }

    #[test]
    fn snapshot_restore_is_exact() {
        let source = run(7, 45);
        let bytes = source.snapshot();
        assert_eq!(bytes.len(), HEADER_LEN + 2 * UNIT_LEN);

        let mut copy = ArenaSim::new();
        copy.init(1, 30);
        assert_eq!(copy.restore(&bytes), Ok(45));
        assert_eq!(copy.snapshot(), bytes);

        let mut a = source;
        let input = merged(45, &[(1, [0.3, 0.3], 0)]);
        a.step(&input);
        copy.step(&input);
        assert_eq!(a.snapshot(), copy.snapshot());
    }

    #[test]
    fn restore_rejects_garbage() {
        let mut sim = ArenaSim::new();
        assert!(matches!(sim.restore(&[1, 2, 3]), Err(CodecError::Truncated { .. })));
        let mut bytes = run(3, 5).snapshot();
        bytes.push(0);
        assert_eq!(sim.restore(&bytes), Err(CodecError::TrailingBytes(1)));

        // a unit parked far outside the arena would overflow on the next step
        let mut bytes = run(3, 5).snapshot();
        bytes[HEADER_LEN + 4..HEADER_LEN + 8].copy_from_slice(&i32::MAX.to_le_bytes());
        assert_eq!(sim.restore(&bytes), Err(CodecError::Invalid("unit out of bounds")));
        let mut bytes = run(3, 5).snapshot();
        bytes[HEADER_LEN + 8..HEADER_LEN + 12].copy_from_slice(&i32::MIN.to_le_bytes());
        assert_eq!(sim.restore(&bytes), Err(CodecError::Invalid("unit out of bounds")));
        assert_eq!(sim.tick(), 0);
    }

    #[test]
    fn units_on_the_wall_stay_inside() {
        let mut sim = run(3, 5);
        let mut bytes = sim.snapshot();
        bytes[HEADER_LEN + 4..HEADER_LEN + 8].copy_from_slice(&ARENA_EXTENT.to_le_bytes());
        assert_eq!(sim.restore(&bytes), Ok(5));
        sim.step(&merged(5, &[(1, [1.0, 0.0], BUTTON_PRIMARY)]));
        assert_eq!(sim.position(PeerId(1)).map(|p| p.x), Some(ARENA_EXTENT));
    }

    #[test]
    fn init_sanitizes_tick_rate() {
        let mut sim = ArenaSim::new();
        sim.init(1, 0);
        assert_eq!(sim.fixed_hz(), DEFAULT_TICK_RATE_HZ);
        sim.init(1, u32::MAX);
        assert_eq!(sim.fixed_hz(), MAX_TICK_RATE_HZ);
    }
}
