//! Tandem Simulation Boundary
//!
//! The simulation runs isolated on its own thread and is reachable only
//! through explicit messages:
//! - `Init` once, then `Advance` per tick with the merged input
//! - `SnapshotReq` for checksummed state, `Restore` to adopt a peer's state

pub mod arena;
pub mod error;
pub mod protocol;
pub mod simulation;
pub mod worker;

pub use arena::ArenaSim;
pub use error::SimError;
pub use protocol::{FromSim, SimFault, ToSim};
pub use simulation::Simulation;
pub use worker::{SimHandle, SimWorker};
