use crate::config::ConfigError;
use tandem_core::{CodecError, Tick};
use tandem_sim::SimError;
use tandem_sync::{DesyncReport, SyncError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Lockstep can no longer be trusted. Recover with a resync or stop.
    #[error("{0}")]
    Desync(DesyncReport),

    #[error("simulation error: {0}")]
    Protocol(#[from] SimError),

    #[error("no soft host available to resync from")]
    NoAuthority,

    #[error("merged input for tick {tick} is no longer retained")]
    ReplayUnavailable { tick: Tick },

    #[error("peer mesh inbox is already owned by another session")]
    InboxTaken,

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
