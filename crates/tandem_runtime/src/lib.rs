//! Tandem Runtime
//!
//! Wires transport, lockstep coordination and the simulation boundary into
//! a per-peer [`Session`].

pub mod config;
pub mod error;
pub mod input;
pub mod session;
pub mod topology;

pub use config::{ConfigError, SessionConfig};
pub use error::SessionError;
pub use input::{IdleInput, InputSource, ScriptedInput};
pub use session::{Session, StepOutcome};
pub use topology::{memory_mesh, quic_mesh};
