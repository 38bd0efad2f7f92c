//! Lockstep session driver
//!
//! Owns everything a peer needs for one session: the coordinator, the
//! simulation handle, the snapshot ring and the desync monitor. A session is
//! driven by calling [`Session::step`] once per fixed tick; all inbound traffic
//! is handled on that call, so nothing else ever mutates session state.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::input::InputSource;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tandem_core::{InputFrame, LocalInput, MergedInput, PeerId, Tick};
use tandem_net::{Channel, Inbound, MemberState, MembershipTable, PeerLink, PeerMesh};
use tandem_sim::{SimHandle, SimWorker, Simulation};
use tandem_sync::{
    Coordinator, DesyncMonitor, DesyncReport, Receipt, Snapshot, SnapshotRing, StallPolicy,
    StallTracker, SyncMessage,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Local checksums kept for comparison with late peer reports.
const DESYNC_HORIZON: usize = 16;

/// Result of one [`Session::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The tick was applied; `tick` is the completed tick count afterwards.
    Advanced {
        tick: Tick,
        checksum: u32,
        inputs: usize,
    },
    /// Input for `tick` is still missing after the stall timeout.
    Stalled { tick: Tick, waiting_on: Vec<PeerId> },
    /// A resync snapshot was adopted while waiting; the next tick is `tick`.
    Resynced { tick: Tick },
}

pub struct Session {
    local: PeerId,
    config: SessionConfig,
    mesh: Arc<PeerMesh>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    membership: MembershipTable,
    coordinator: Coordinator,
    sim: SimHandle,
    ring: SnapshotRing,
    monitor: DesyncMonitor,
    stall: StallTracker,
    hints: BTreeMap<PeerId, (Tick, u32)>,
    next_tick: Tick,
    submitted: Option<Tick>,
    pending_desync: Option<DesyncReport>,
    awaiting_resync: bool,
}

impl Session {
    /// Spawns the simulation, initializes it and registers every peer
    /// currently in `mesh` as a member.
    pub async fn start<S: Simulation>(
        config: SessionConfig,
        mesh: Arc<PeerMesh>,
        sim: S,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let local = mesh.local();
        let inbox = mesh.take_inbox().ok_or(SessionError::InboxTaken)?;

        let mut handle = SimWorker::spawn(sim)?;
        handle.init(config.seed, config.fixed_hz).await?;
        let baseline = Snapshot::new(0, handle.snapshot().await?);

        let mut membership = MembershipTable::new();
        membership.add_member(local);
        for peer in mesh.peers() {
            membership.add_member(peer);
        }

        let mut ring = SnapshotRing::try_new(config.snapshot_capacity)?;
        ring.push(baseline);

        info!(
            %local,
            peers = mesh.len(),
            delay = config.input_delay,
            hz = config.fixed_hz,
            "session started"
        );

        Ok(Self {
            local,
            coordinator: Coordinator::with_history(local, config.input_delay, config.history_len),
            monitor: DesyncMonitor::new(DESYNC_HORIZON),
            stall: StallTracker::new(config.stall_timeout()),
            config,
            mesh,
            inbox,
            membership,
            sim: handle,
            ring,
            hints: BTreeMap::new(),
            next_tick: 0,
            submitted: None,
            pending_desync: None,
            awaiting_resync: false,
        })
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Next tick to be applied; equals the completed tick count.
    pub fn next_tick(&self) -> Tick {
        self.next_tick
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mesh(&self) -> &Arc<PeerMesh> {
        &self.mesh
    }

    pub fn membership(&self) -> &MembershipTable {
        &self.membership
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn snapshots(&self) -> &SnapshotRing {
        &self.ring
    }

    pub fn latest_snapshot(&self) -> Option<&Snapshot> {
        self.ring.latest()
    }

    /// Freshest `(tick, checksum)` hint heard from each peer. Hints ride the
    /// unreliable channel and only report progress.
    pub fn peer_hints(&self) -> &BTreeMap<PeerId, (Tick, u32)> {
        &self.hints
    }

    pub fn is_soft_host(&self) -> bool {
        self.membership.soft_host() == Some(self.local)
    }

    /// Adds a peer mid-session and sends it the local input it has not seen.
    pub fn add_peer(&mut self, link: Arc<dyn PeerLink>) {
        let peer = link.remote();
        for frame in self.coordinator.buffered_from(self.local) {
            link.send_reliable(&SyncMessage::Input(frame).encode());
        }
        self.mesh.insert(link);
        self.membership.add_member(peer);
        info!(%peer, tick = self.next_tick, "peer joined");
    }

    /// Runs one fixed tick: schedules `input`, waits until every expected
    /// sender's input for the current tick is present, then advances the
    /// simulation and records its snapshot.
    ///
    /// A desync is returned as an error after the tick it was detected on has
    /// been applied.
    pub async fn step(&mut self, input: LocalInput) -> Result<StepOutcome, SessionError> {
        let tick = self.next_tick;
        self.pump().await?;
        self.take_desync()?;
        if self.next_tick != tick {
            return Ok(StepOutcome::Resynced {
                tick: self.next_tick,
            });
        }

        if self.submitted != Some(tick) {
            let frame = self.coordinator.submit_local(tick, input.axes, input.buttons);
            self.broadcast_input(frame);
            self.submitted = Some(tick);
        }

        loop {
            let expected = self.membership.expected_senders();
            let missing = self.coordinator.missing_senders(tick, &expected);
            if missing.is_empty() {
                break;
            }

            let now = Instant::now();
            let deadline = self.stall.deadline(tick, now);
            if now >= deadline {
                match self.config.stall_policy {
                    StallPolicy::Wait => {
                        self.stall.rearm(now);
                        for &peer in &missing {
                            self.membership.mark_suspected(peer);
                        }
                        warn!(tick, waiting_on = ?missing, "tick stalled");
                        return Ok(StepOutcome::Stalled {
                            tick,
                            waiting_on: missing,
                        });
                    }
                    StallPolicy::RepeatLastInput => {
                        for peer in missing {
                            let frame = self.coordinator.substitute(peer, tick);
                            warn!(%peer, tick, seq = frame.seq, "substituting last known input");
                        }
                    }
                    StallPolicy::DropPeer => {
                        for peer in missing {
                            self.membership.mark_dead(peer);
                            warn!(%peer, tick, "dropping unresponsive peer");
                        }
                    }
                }
                continue;
            }

            match tokio::time::timeout_at(deadline.into(), self.inbox.recv()).await {
                Ok(Some(inbound)) => self.handle_inbound(inbound).await?,
                Ok(None) => tokio::time::sleep_until(deadline.into()).await,
                Err(_) => {}
            }
            self.take_desync()?;
            if self.next_tick != tick {
                return Ok(StepOutcome::Resynced {
                    tick: self.next_tick,
                });
            }
        }

        self.stall.clear();
        let merged = self.coordinator.drain_for_tick(tick);
        let inputs = merged.len();
        let snapshot = self.apply(&merged).await?;
        let checksum = snapshot.checksum;
        debug!(tick, completed = snapshot.tick, checksum, inputs, "tick advanced");
        self.publish(snapshot.tick, checksum);
        self.take_desync()?;

        Ok(StepOutcome::Advanced {
            tick: self.next_tick,
            checksum,
            inputs,
        })
    }

    /// Steps until `ticks` more ticks completed, sampling `source` each time.
    /// Stalls under [`StallPolicy::Wait`] keep waiting.
    pub async fn run_for(
        &mut self,
        source: &mut dyn InputSource,
        ticks: u32,
    ) -> Result<Tick, SessionError> {
        let target = self.next_tick.saturating_add(ticks);
        while self.next_tick < target {
            let input = source.sample(self.next_tick);
            self.step(input).await?;
        }
        Ok(self.next_tick)
    }

    /// Asks the soft host for an authoritative snapshot. The snapshot is
    /// adopted on a later [`Session::step`].
    pub fn request_resync(&mut self) -> Result<PeerId, SessionError> {
        let host = match self.membership.soft_host() {
            Some(host) if host != self.local => host,
            _ => return Err(SessionError::NoAuthority),
        };
        let request = SyncMessage::ResyncRequest {
            since: self.next_tick,
        };
        if !self.mesh.send_to(host, Channel::Reliable, &request.encode()) {
            return Err(SessionError::NoAuthority);
        }
        self.awaiting_resync = true;
        info!(%host, tick = self.next_tick, "resync requested");
        Ok(host)
    }

    /// Adopts `snapshot` as the session baseline; used for late join.
    pub async fn join_from(&mut self, snapshot: Snapshot) -> Result<Tick, SessionError> {
        self.adopt(snapshot).await
    }

    pub async fn shutdown(self) -> Result<(), SessionError> {
        info!(local = %self.local, tick = self.next_tick, "session shutting down");
        self.sim.shutdown().await?;
        Ok(())
    }

    async fn apply(&mut self, merged: &MergedInput) -> Result<Snapshot, SessionError> {
        let completed = self.sim.advance(merged).await?;
        let snapshot = Snapshot::new(completed, self.sim.snapshot().await?);
        self.ring.push(snapshot.clone());
        self.next_tick = completed;
        Ok(snapshot)
    }

    fn publish(&mut self, tick: Tick, checksum: u32) {
        if tick % self.config.checksum_interval == 0 {
            self.mesh
                .broadcast_reliable(&SyncMessage::Checksum { tick, checksum }.encode());
            let reports = self.monitor.record_local(tick, checksum);
            self.note_desync(reports.into_iter().next());
        }
        if self.config.hint_interval > 0 && tick % self.config.hint_interval == 0 {
            self.mesh
                .broadcast_unreliable(&SyncMessage::SnapshotHint { tick, checksum }.encode());
        }
    }

    async fn pump(&mut self) -> Result<(), SessionError> {
        while let Ok(inbound) = self.inbox.try_recv() {
            self.handle_inbound(inbound).await?;
        }
        Ok(())
    }

    async fn handle_inbound(&mut self, inbound: Inbound) -> Result<(), SessionError> {
        let from = inbound.from;
        let message = match SyncMessage::decode(&inbound.payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %from, error = %err, "discarding malformed message");
                return Ok(());
            }
        };
        if message.channel() != inbound.channel {
            trace!(peer = %from, channel = ?inbound.channel, "message on unexpected channel");
        }

        match message {
            SyncMessage::Input(frame) => {
                let receipt = self.coordinator.receive_remote(from, frame);
                trace!(peer = %from, tick = frame.tick, seq = frame.seq, ?receipt, "input received");
                if receipt == Receipt::Accepted && self.membership.state(from) == Some(MemberState::Suspected) {
                    self.membership.mark_alive(from);
                    info!(peer = %from, tick = frame.tick, "suspected peer is sending again");
                }
            }
            SyncMessage::Checksum { tick, checksum } => {
                let report = self.monitor.record_remote(from, tick, checksum);
                self.note_desync(report);
            }
            SyncMessage::SnapshotHint { tick, checksum } => {
                let fresher = self.hints.get(&from).map_or(true, |(t, _)| tick >= *t);
                if fresher {
                    self.hints.insert(from, (tick, checksum));
                }
            }
            SyncMessage::ResyncRequest { since } => self.serve_resync(from, since),
            SyncMessage::Snapshot(snapshot) => {
                if self.awaiting_resync {
                    self.adopt(snapshot).await?;
                } else {
                    warn!(peer = %from, tick = snapshot.tick, "unsolicited snapshot ignored");
                }
            }
        }
        Ok(())
    }

    fn serve_resync(&self, from: PeerId, since: Tick) {
        if !self.is_soft_host() {
            warn!(peer = %from, "resync request received but not soft host");
            return;
        }
        match self.ring.latest() {
            Some(latest) => {
                info!(peer = %from, since, tick = latest.tick, checksum = latest.checksum, "serving resync snapshot");
                let message = SyncMessage::Snapshot(latest.clone());
                self.mesh.send_to(from, Channel::Reliable, &message.encode());
            }
            None => warn!(peer = %from, "no snapshot to serve"),
        }
    }

    async fn adopt(&mut self, snapshot: Snapshot) -> Result<Tick, SessionError> {
        snapshot.ensure_valid()?;
        let restored = self.sim.restore(&snapshot.bytes).await?;
        let previous = self.next_tick;

        self.ring.clear();
        self.ring.push(snapshot);
        self.monitor.clear();
        self.pending_desync = None;
        self.awaiting_resync = false;
        self.stall.clear();

        if previous > restored {
            // Already past the snapshot: replay the agreed inputs.
            let mut replay = Vec::with_capacity((previous - restored) as usize);
            for tick in restored..previous {
                let merged = self
                    .coordinator
                    .history(tick)
                    .cloned()
                    .ok_or(SessionError::ReplayUnavailable { tick })?;
                replay.push(merged);
            }
            self.next_tick = restored;
            for merged in &replay {
                self.apply(merged).await?;
            }
        } else {
            if restored > 0 {
                self.coordinator.discard_through(restored - 1);
            }
            self.next_tick = restored;
        }

        for frame in self.coordinator.fill_local_gaps(self.next_tick, self.next_tick) {
            self.broadcast_input(frame);
        }
        info!(restored, previous, tick = self.next_tick, "adopted snapshot");
        Ok(self.next_tick)
    }

    fn broadcast_input(&self, frame: InputFrame) {
        self.mesh.broadcast_reliable(&SyncMessage::Input(frame).encode());
    }

    fn note_desync(&mut self, report: Option<DesyncReport>) {
        if let Some(report) = report {
            error!(%report, "lockstep diverged");
            self.pending_desync.get_or_insert(report);
        }
    }

    fn take_desync(&mut self) -> Result<(), SessionError> {
        match self.pending_desync.take() {
            Some(report) => Err(SessionError::Desync(report)),
            None => Ok(()),
        }
    }
}
