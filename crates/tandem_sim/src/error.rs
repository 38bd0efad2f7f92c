use crate::protocol::SimFault;
use tandem_core::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("simulation protocol violation: {0}")]
    Protocol(SimFault),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("simulation worker is gone")]
    WorkerGone,

    #[error("unexpected reply from simulation: {0}")]
    UnexpectedReply(&'static str),

    #[error("failed to spawn simulation thread: {0}")]
    Spawn(#[source] std::io::Error),
}
