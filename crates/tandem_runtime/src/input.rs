//! Local input sources

use tandem_core::{DeterministicRng, LocalInput, PeerId, Tick};

/// Produces the local participant's input once per tick.
pub trait InputSource {
    fn sample(&mut self, tick: Tick) -> LocalInput;
}

/// Always neutral.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleInput;

impl InputSource for IdleInput {
    fn sample(&mut self, _tick: Tick) -> LocalInput {
        LocalInput::default()
    }
}

/// Bot-like input: holds a random direction for a while, then picks another.
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    rng: DeterministicRng,
    hold: u32,
    current: LocalInput,
}

impl ScriptedInput {
    pub fn new(peer: PeerId, seed: u32) -> Self {
        Self {
            rng: DeterministicRng::new(seed ^ peer.0.wrapping_mul(0x9E37_79B9)),
            hold: 0,
            current: LocalInput::default(),
        }
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self, _tick: Tick) -> LocalInput {
        if self.hold == 0 {
            let x = self.rng.next_f32() * 2.0 - 1.0;
            let y = self.rng.next_f32() * 2.0 - 1.0;
            let buttons = self.rng.next_below(4);
            self.current = LocalInput::new([x, y], buttons);
            self.hold = 10 + self.rng.next_below(50);
        }
        self.hold -= 1;
        self.current
    }
}

impl<F: FnMut(Tick) -> LocalInput> InputSource for F {
    fn sample(&mut self, tick: Tick) -> LocalInput {
        self(tick)
    }
}
