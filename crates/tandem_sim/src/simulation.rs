//! Simulation trait
//!
//! Anything that runs behind the execution boundary. Implementations must be
//! fully deterministic: the same `init` followed by the same sequence of
//! merged inputs yields byte-identical snapshots on every machine.

use tandem_core::{CodecError, MergedInput, Tick};

pub trait Simulation: Send + 'static {
    /// Resets all state. A zero `fixed_hz` means the default rate.
    fn init(&mut self, seed: u32, fixed_hz: u32);

    /// Advances exactly one tick.
    fn step(&mut self, inputs: &MergedInput);

    /// Completed tick count.
    fn tick(&self) -> Tick;

    /// Serializes the full state. Must not mutate anything.
    fn snapshot(&self) -> Vec<u8>;

    /// Replaces the full state with a snapshot and returns its tick.
    fn restore(&mut self, bytes: &[u8]) -> Result<Tick, CodecError>;
}
