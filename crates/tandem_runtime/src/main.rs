//! Tandem lockstep demo
//!
//! Runs N peers of the arena simulation in one process and checks that they
//! all end on the same state.
//!
//! ```bash
//! # Four peers over lossy in-memory links
//! tandem --peers 4 --ticks 1200 --loss 0.2 --delay-ms 20
//!
//! # Two peers over loopback QUIC, paced at the fixed tick rate
//! tandem --transport quic --realtime
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{FixedTimestep, PeerId, SimulationTime, Tick};
use tandem_net::{LinkConditioner, PeerMesh, QuicConfig};
use tandem_runtime::{
    memory_mesh, quic_mesh, InputSource, ScriptedInput, Session, SessionConfig, SessionError,
    StepOutcome,
};
use tandem_sim::ArenaSim;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportKind {
    Memory,
    Quic,
}

/// Deterministic lockstep session demo
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of peers
    #[arg(short = 'n', long, default_value = "2")]
    peers: u32,

    /// Ticks to simulate
    #[arg(short = 't', long, default_value = "600")]
    ticks: u32,

    /// Session config (JSON)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Unreliable channel loss probability (memory transport)
    #[arg(long, default_value = "0.0")]
    loss: f32,

    /// Artificial one-way latency in milliseconds (memory transport)
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Pace ticks at the fixed rate instead of running flat out
    #[arg(long)]
    realtime: bool,

    #[arg(long, value_enum, default_value = "memory")]
    transport: TransportKind,
}

#[derive(Debug)]
struct PeerReport {
    peer: PeerId,
    tick: Tick,
    checksum: u32,
    stalls: u32,
    resyncs: u32,
    sim_time: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if args.peers == 0 {
        bail!("--peers must be at least 1");
    }

    let config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    }
    .with_env_overrides()?;
    config.validate()?;

    info!(
        version = tandem_core::VERSION,
        peers = args.peers,
        ticks = args.ticks,
        transport = ?args.transport,
        seed = config.seed,
        "starting lockstep demo"
    );

    let meshes = match args.transport {
        TransportKind::Memory => {
            let conditioner = LinkConditioner {
                loss: args.loss.clamp(0.0, 1.0),
                latency: Duration::from_millis(args.delay_ms),
                seed: config.seed,
            };
            memory_mesh(args.peers, conditioner)
        }
        TransportKind::Quic => quic_mesh(args.peers, &QuicConfig::default())
            .await
            .context("building QUIC mesh")?,
    };

    // Links stay up until every peer is done; a finished peer's last frames
    // may still be in flight.
    let keepalive = meshes.clone();
    let mut tasks = Vec::with_capacity(meshes.len());
    for mesh in meshes {
        let config = config.clone();
        tasks.push(tokio::spawn(run_peer(mesh, config, args.ticks, args.realtime)));
    }

    let mut reports = Vec::with_capacity(tasks.len());
    for task in tasks {
        reports.push(task.await.context("peer task panicked")??);
    }
    drop(keepalive);

    for report in &reports {
        info!(
            peer = %report.peer,
            tick = report.tick,
            checksum = format_args!("{:#010x}", report.checksum),
            stalls = report.stalls,
            resyncs = report.resyncs,
            sim_secs = report.sim_time.as_secs_f32(),
            "peer finished"
        );
    }

    let first = &reports[0];
    let diverged: Vec<&PeerReport> = reports
        .iter()
        .filter(|r| r.tick != first.tick || r.checksum != first.checksum)
        .collect();
    if !diverged.is_empty() {
        for report in diverged {
            error!(peer = %report.peer, tick = report.tick, checksum = report.checksum, "final state differs");
        }
        bail!("peers finished on different states");
    }

    info!(tick = first.tick, checksum = format_args!("{:#010x}", first.checksum), "all peers agree");
    Ok(())
}

async fn run_peer(
    mesh: Arc<PeerMesh>,
    config: SessionConfig,
    ticks: u32,
    realtime: bool,
) -> Result<PeerReport, SessionError> {
    let hz = config.fixed_hz;
    let seed = config.seed;
    let mut session = Session::start(config, mesh, ArenaSim::new()).await?;
    let peer = session.local();
    let mut source = ScriptedInput::new(peer, seed);
    let mut timestep = FixedTimestep::new(hz);
    let mut time = SimulationTime::new(hz);
    let mut interval = tokio::time::interval(timestep.step());
    let mut last = Instant::now();
    let mut stalls = 0;
    let mut resyncs = 0;

    while session.next_tick() < ticks {
        let due = if realtime {
            interval.tick().await;
            let now = Instant::now();
            let due = timestep.accumulate(now - last);
            last = now;
            due
        } else {
            1
        };

        for _ in 0..due {
            if session.next_tick() >= ticks {
                break;
            }
            let input = source.sample(session.next_tick());
            match session.step(input).await {
                Ok(StepOutcome::Advanced { tick, .. }) => time.reset_to(tick),
                Ok(StepOutcome::Stalled { tick, waiting_on }) => {
                    stalls += 1;
                    // last progress each silent peer advertised, if any
                    let last_heard: Vec<(PeerId, Option<Tick>)> = waiting_on
                        .iter()
                        .map(|p| (*p, session.peer_hints().get(p).map(|(t, _)| *t)))
                        .collect();
                    warn!(%peer, tick, ?last_heard, "still waiting for input");
                    break;
                }
                Ok(StepOutcome::Resynced { tick }) => {
                    resyncs += 1;
                    time.reset_to(tick);
                }
                Err(SessionError::Desync(report)) => {
                    if session.is_soft_host() {
                        warn!(%peer, %report, "desync reported to soft host, continuing");
                    } else {
                        session.request_resync()?;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    let checksum = session.latest_snapshot().map_or(0, |s| s.checksum);
    let tick = session.next_tick();
    session.shutdown().await?;
    Ok(PeerReport {
        peer,
        tick,
        checksum,
        stalls,
        resyncs,
        sim_time: time.total_time(),
    })
}
