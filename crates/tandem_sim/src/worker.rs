//! Simulation worker
//!
//! Runs a [`Simulation`] on a dedicated OS thread. The driver talks to it only
//! through [`ToSim`] commands, each paired with a oneshot reply.

use crate::error::SimError;
use crate::protocol::{FromSim, SimFault, ToSim};
use crate::simulation::Simulation;
use std::thread::JoinHandle;
use tandem_core::{MergedInput, Tick};
use tokio::sync::{mpsc, oneshot};

const THREAD_NAME: &str = "tandem-sim";

type Command = (ToSim, oneshot::Sender<FromSim>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInit,
    Running,
}

/// Protocol state machine wrapped around a simulation.
struct SimMachine<S> {
    sim: S,
    phase: Phase,
}

impl<S: Simulation> SimMachine<S> {
    fn new(sim: S) -> Self {
        Self {
            sim,
            phase: Phase::AwaitingInit,
        }
    }

    fn handle(&mut self, message: ToSim) -> FromSim {
        match (self.phase, message) {
            (Phase::AwaitingInit, ToSim::Init { seed, fixed_hz }) => {
                self.sim.init(seed, fixed_hz);
                self.phase = Phase::Running;
                tracing::debug!(seed, fixed_hz, "simulation initialized");
                FromSim::Ready
            }
            (Phase::Running, ToSim::Init { .. }) => fault(SimFault::DoubleInit),
            (Phase::AwaitingInit, _) => fault(SimFault::NotInitialized),
            (Phase::Running, ToSim::Advance { inputs }) => match MergedInput::decode(&inputs) {
                Ok(merged) => {
                    self.sim.step(&merged);
                    FromSim::Advanced {
                        tick: self.sim.tick(),
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "undecodable advance payload");
                    fault(SimFault::MalformedInput)
                }
            },
            (Phase::Running, ToSim::SnapshotReq) => FromSim::Snapshot {
                bin: self.sim.snapshot(),
            },
            (Phase::Running, ToSim::Restore { bin }) => match self.sim.restore(&bin) {
                Ok(tick) => FromSim::Restored { tick },
                Err(err) => {
                    tracing::warn!(error = %err, "undecodable snapshot");
                    fault(SimFault::MalformedSnapshot)
                }
            },
        }
    }
}

fn fault(fault: SimFault) -> FromSim {
    FromSim::Fault { fault }
}

pub struct SimWorker;

impl SimWorker {
    /// Moves `sim` onto its own thread and returns the driver's handle.
    pub fn spawn<S: Simulation>(sim: S) -> Result<SimHandle, SimError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let mut machine = SimMachine::new(sim);
                while let Some((message, reply)) = rx.blocking_recv() {
                    let response = machine.handle(message);
                    // The driver may have given up on this reply.
                    let _ = reply.send(response);
                }
                tracing::debug!("simulation thread exiting");
            })
            .map_err(SimError::Spawn)?;

        Ok(SimHandle {
            tx: Some(tx),
            thread: Some(thread),
        })
    }
}

/// Driver-side handle to a simulation thread.
///
/// `advance` and `restore` take `&mut self`, so at most one mutating request
/// is ever in flight.
pub struct SimHandle {
    tx: Option<mpsc::UnboundedSender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl SimHandle {
    async fn request(&self, message: ToSim) -> Result<FromSim, SimError> {
        let tx = self.tx.as_ref().ok_or(SimError::WorkerGone)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send((message, reply_tx))
            .map_err(|_| SimError::WorkerGone)?;
        match reply_rx.await.map_err(|_| SimError::WorkerGone)? {
            FromSim::Fault { fault } => {
                tracing::error!(%fault, "simulation protocol violation");
                Err(SimError::Protocol(fault))
            }
            reply => Ok(reply),
        }
    }

    pub async fn init(&mut self, seed: u32, fixed_hz: u32) -> Result<(), SimError> {
        match self.request(ToSim::Init { seed, fixed_hz }).await? {
            FromSim::Ready => Ok(()),
            _ => Err(SimError::UnexpectedReply("expected ready")),
        }
    }

    /// Feeds one tick of merged input; returns the completed tick count.
    pub async fn advance(&mut self, inputs: &MergedInput) -> Result<Tick, SimError> {
        let message = ToSim::Advance {
            inputs: inputs.encode(),
        };
        match self.request(message).await? {
            FromSim::Advanced { tick } => Ok(tick),
            _ => Err(SimError::UnexpectedReply("expected advanced")),
        }
    }

    pub async fn snapshot(&self) -> Result<Vec<u8>, SimError> {
        match self.request(ToSim::SnapshotReq).await? {
            FromSim::Snapshot { bin } => Ok(bin),
            _ => Err(SimError::UnexpectedReply("expected snapshot")),
        }
    }

    /// Replaces simulation state; returns the restored tick.
    pub async fn restore(&mut self, bin: &[u8]) -> Result<Tick, SimError> {
        let message = ToSim::Restore { bin: bin.to_vec() };
        match self.request(message).await? {
            FromSim::Restored { tick } => Ok(tick),
            _ => Err(SimError::UnexpectedReply("expected restored")),
        }
    }

    /// Closes the command channel and waits for the thread to finish.
    pub async fn shutdown(mut self) -> Result<(), SimError> {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|_| SimError::WorkerGone)?
                .map_err(|_| SimError::WorkerGone)?;
        }
        Ok(())
    }
}
