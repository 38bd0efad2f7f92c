//! Tandem Core
//!
//! Contains the primitives every peer must agree on bit for bit:
//! - Tick numbering and fixed-timestep time
//! - Deterministic RNG
//! - Input frames and their fixed binary layout
//! - Little-endian codec helpers

pub mod codec;
pub mod input;
pub mod rng;
pub mod time;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use codec::{ByteReader, ByteWriter, CodecError};
pub use input::{InputFrame, LocalInput, MergedInput, INPUT_FRAME_LEN};
pub use rng::DeterministicRng;
pub use time::{FixedTimestep, SimulationTime, Tick, MAX_TICK_RATE_HZ};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Session participant ID
///
/// The ordering of peer ids is the canonical ordering of merged input, so
/// every peer must assign the same id to the same participant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}
