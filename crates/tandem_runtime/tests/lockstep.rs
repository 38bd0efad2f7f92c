//! End-to-end lockstep scenarios over in-memory links.

use std::sync::Arc;
use std::time::Duration;
use tandem_core::{InputFrame, LocalInput, MergedInput, PeerId, Tick};
use tandem_net::{Channel, LinkConditioner, MemberState, MemoryLink, PeerLink, PeerMesh};
use tandem_runtime::{memory_mesh, IdleInput, ScriptedInput, Session, SessionConfig, StepOutcome};
use tandem_sim::{ArenaSim, SimWorker};
use tandem_sync::{checksum, Coordinator, Snapshot, SnapshotRing, StallPolicy, SyncMessage};

fn config() -> SessionConfig {
    SessionConfig {
        input_delay: 2,
        fixed_hz: 60,
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn two_coordinators_merge_identically() {
    let a = PeerId(1);
    let b = PeerId(2);
    let mut coord_a = Coordinator::new(a, 2);
    let mut coord_b = Coordinator::new(b, 2);

    let frame_a = coord_a.submit_local(10, [1.0, 0.0], 1);
    let frame_b = coord_b.submit_local(10, [0.0, -1.0], 0);
    assert_eq!(frame_a.tick, 12);

    // over the wire and back
    for (from, to, frame) in [(a, &mut coord_b, frame_a), (b, &mut coord_a, frame_b)] {
        let bytes = SyncMessage::Input(frame).encode();
        match SyncMessage::decode(&bytes).unwrap() {
            SyncMessage::Input(decoded) => {
                to.receive_remote(from, decoded);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    let mut sim_a = SimWorker::spawn(ArenaSim::new()).unwrap();
    let mut sim_b = SimWorker::spawn(ArenaSim::new()).unwrap();
    sim_a.init(7, 60).await.unwrap();
    sim_b.init(7, 60).await.unwrap();
    for tick in 0..12 {
        let empty = coord_a.drain_for_tick(tick);
        assert_eq!(empty, coord_b.drain_for_tick(tick));
        sim_a.advance(&empty).await.unwrap();
        sim_b.advance(&empty).await.unwrap();
    }

    assert!(coord_a.is_complete(12, &[a, b]));
    assert!(coord_b.is_complete(12, &[a, b]));
    let merged_a = coord_a.drain_for_tick(12);
    let merged_b = coord_b.drain_for_tick(12);
    assert_eq!(merged_a, merged_b);
    assert_eq!(merged_a.len(), 2);

    assert_eq!(sim_a.advance(&merged_a).await.unwrap(), 13);
    assert_eq!(sim_b.advance(&merged_b).await.unwrap(), 13);
    let bytes_a = sim_a.snapshot().await.unwrap();
    let bytes_b = sim_b.snapshot().await.unwrap();
    assert_eq!(checksum(&bytes_a), checksum(&bytes_b));
}

#[tokio::test]
async fn sessions_stay_in_lockstep() {
    let meshes = memory_mesh(2, LinkConditioner::default());
    let mut a = Session::start(config(), meshes[0].clone(), ArenaSim::new()).await.unwrap();
    let mut b = Session::start(config(), meshes[1].clone(), ArenaSim::new()).await.unwrap();

    let mut input_a = ScriptedInput::new(PeerId(1), 11);
    let mut input_b = ScriptedInput::new(PeerId(2), 11);
    let (ra, rb) = tokio::join!(a.run_for(&mut input_a, 120), b.run_for(&mut input_b, 120));
    assert_eq!(ra.unwrap(), 120);
    assert_eq!(rb.unwrap(), 120);

    let ticks_a: Vec<(Tick, u32)> = a.snapshots().iter().map(|s| (s.tick, s.checksum)).collect();
    let ticks_b: Vec<(Tick, u32)> = b.snapshots().iter().map(|s| (s.tick, s.checksum)).collect();
    assert_eq!(ticks_a, ticks_b);
    assert_eq!(a.latest_snapshot().map(|s| s.tick), Some(120));
    assert_eq!(a.coordinator().history(100), b.coordinator().history(100));

    // b advertised its progress at tick 60, and maybe 120
    let (hint_tick, hint_sum) = a.peer_hints()[&PeerId(2)];
    assert!(hint_tick == 60 || hint_tick == 120, "hint at {hint_tick}");
    let local = a.snapshots().iter().find(|s| s.tick == hint_tick).map(|s| s.checksum);
    assert_eq!(local, Some(hint_sum));
}

#[tokio::test]
async fn peer_hints_keep_the_freshest() {
    let meshes = memory_mesh(2, LinkConditioner::default());
    let mut a = Session::start(config(), meshes[0].clone(), ArenaSim::new()).await.unwrap();
    let hint = |tick, checksum| SyncMessage::SnapshotHint { tick, checksum }.encode();

    meshes[1].send_to(PeerId(1), Channel::Unreliable, &hint(10, 0xAAAA));
    meshes[1].send_to(PeerId(1), Channel::Unreliable, &hint(5, 0xBBBB));
    tokio::time::sleep(Duration::from_millis(20)).await;
    a.step(LocalInput::default()).await.unwrap();
    assert_eq!(a.peer_hints().get(&PeerId(2)), Some(&(10, 0xAAAA)));

    meshes[1].send_to(PeerId(1), Channel::Unreliable, &hint(20, 0xCCCC));
    tokio::time::sleep(Duration::from_millis(20)).await;
    a.step(LocalInput::default()).await.unwrap();
    assert_eq!(a.peer_hints().get(&PeerId(2)), Some(&(20, 0xCCCC)));
    assert_eq!(a.peer_hints().len(), 1);
}

#[tokio::test]
async fn lossy_hints_do_not_break_lockstep() {
    let conditioner = LinkConditioner {
        loss: 0.5,
        ..LinkConditioner::default()
    };
    let meshes = memory_mesh(3, conditioner);
    let cfg = SessionConfig {
        hint_interval: 5,
        checksum_interval: 10,
        ..config()
    };
    let mut sessions = Vec::new();
    for mesh in &meshes {
        sessions.push(Session::start(cfg.clone(), mesh.clone(), ArenaSim::new()).await.unwrap());
    }
    let mut c = sessions.pop().unwrap();
    let mut b = sessions.pop().unwrap();
    let mut a = sessions.pop().unwrap();
    let mut idle = IdleInput;
    let mut input_b = ScriptedInput::new(PeerId(2), 3);
    let mut input_c = ScriptedInput::new(PeerId(3), 4);
    let (ra, rb, rc) = tokio::join!(
        a.run_for(&mut idle, 90),
        b.run_for(&mut input_b, 90),
        c.run_for(&mut input_c, 90),
    );
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();

    let latest = a.latest_snapshot().cloned().unwrap();
    assert_eq!(b.latest_snapshot(), Some(&latest));
    assert_eq!(c.latest_snapshot(), Some(&latest));
}

#[tokio::test]
async fn unopened_reliable_channel_sends_nothing() {
    let (a, b) = MemoryLink::pair(PeerId(1), PeerId(2), LinkConditioner::default());
    b.open_all();
    let frame = tandem_core::InputFrame::new(3, 0, [0.0, 0.0], 0);
    a.send_reliable(&SyncMessage::Input(frame).encode());
    a.send_unreliable(b"hint");

    let stats = a.stats();
    assert_eq!(stats.reliable.bytes_sent, 0);
    assert_eq!(stats.reliable.messages_dropped, 1);
    assert_eq!(stats.unreliable.bytes_sent, 0);
    assert_eq!(a.state(Channel::Reliable), tandem_net::ChannelState::Connecting);
}

#[tokio::test]
async fn step_before_reliable_channel_opens_sends_nothing() {
    let mesh = Arc::new(PeerMesh::new(PeerId(1)));
    let (link, _remote) = MemoryLink::pair(PeerId(1), PeerId(2), LinkConditioner::default());
    let link = Arc::new(link);
    mesh.insert(link.clone());
    let mut a = Session::start(config(), mesh, ArenaSim::new()).await.unwrap();

    let outcome = a.step(LocalInput::new([1.0, 0.0], 0)).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Advanced { tick: 1, .. }));

    let stats = link.stats();
    assert_eq!(stats.reliable.bytes_sent, 0);
    assert_eq!(stats.reliable.messages_dropped, 1);
    // the frame is still scheduled locally for tick 2
    let ticks: Vec<Tick> = a.coordinator().buffered_from(PeerId(1)).iter().map(|f| f.tick).collect();
    assert_eq!(ticks, vec![2]);
}

#[test]
fn ring_of_three_evicts_oldest() {
    let mut ring = SnapshotRing::new(3);
    let snapshots: Vec<Snapshot> = (0..4).map(|i| Snapshot::new(i, vec![i as u8; 8])).collect();
    for s in &snapshots {
        ring.push(s.clone());
    }
    assert_eq!(ring.latest(), Some(&snapshots[3]));
    assert!(ring.iter().all(|s| s != &snapshots[0]));
}

async fn stalled_session(policy: StallPolicy) -> (Session, Vec<Arc<PeerMesh>>) {
    let meshes = memory_mesh(2, LinkConditioner::default());
    let cfg = SessionConfig {
        stall_timeout_ms: 50,
        stall_policy: policy,
        ..config()
    };
    let session = Session::start(cfg, meshes[0].clone(), ArenaSim::new()).await.unwrap();
    (session, meshes)
}

#[tokio::test]
async fn wait_policy_reports_stall() {
    let (mut a, _meshes) = stalled_session(StallPolicy::Wait).await;
    for expected in 1..=2 {
        let outcome = a.step(LocalInput::default()).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Advanced { tick, .. } if tick == expected));
    }
    let outcome = a.step(LocalInput::default()).await.unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Stalled {
            tick: 2,
            waiting_on: vec![PeerId(2)]
        }
    );
    assert_eq!(a.membership().state(PeerId(2)), Some(MemberState::Suspected));
    // still stalled, and no second local frame was scheduled for tick 2
    let again = a.step(LocalInput::default()).await.unwrap();
    assert!(matches!(again, StepOutcome::Stalled { tick: 2, .. }));
    let ticks: Vec<Tick> = a.coordinator().buffered_from(PeerId(1)).iter().map(|f| f.tick).collect();
    assert_eq!(ticks, vec![2, 3, 4]);
}

#[tokio::test]
async fn stalled_peer_is_suspected_until_it_sends() {
    let (mut a, meshes) = stalled_session(StallPolicy::Wait).await;
    a.run_for(&mut IdleInput, 2).await.unwrap();
    let outcome = a.step(LocalInput::default()).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Stalled { tick: 2, .. }));
    assert_eq!(a.membership().state(PeerId(2)), Some(MemberState::Suspected));
    // suspicion never shrinks the set of expected senders
    assert_eq!(a.membership().expected_senders(), vec![PeerId(1), PeerId(2)]);

    let late = SyncMessage::Input(InputFrame::neutral(2, 0)).encode();
    meshes[1].send_to(PeerId(1), Channel::Reliable, &late);
    let outcome = a.step(LocalInput::default()).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Advanced { tick: 3, inputs: 2, .. }));
    assert_eq!(a.membership().state(PeerId(2)), Some(MemberState::Alive));
}

#[tokio::test]
async fn drop_peer_policy_continues_alone() {
    let (mut a, _meshes) = stalled_session(StallPolicy::DropPeer).await;
    let reached = a.run_for(&mut IdleInput, 10).await.unwrap();
    assert_eq!(reached, 10);
    assert_eq!(a.membership().state(PeerId(2)), Some(MemberState::Dead));
    assert!(a.is_soft_host());
}

#[tokio::test]
async fn repeat_policy_substitutes_missing_input() {
    let (mut a, _meshes) = stalled_session(StallPolicy::RepeatLastInput).await;
    let mut seen = Vec::new();
    for _ in 0..5 {
        if let StepOutcome::Advanced { inputs, .. } = a.step(LocalInput::new([1.0, 0.0], 0)).await.unwrap() {
            seen.push(inputs);
        }
    }
    // ticks 0 and 1 carry no input; afterwards the absent peer is filled in
    assert_eq!(seen, vec![0, 0, 2, 2, 2]);
    let history: &MergedInput = a.coordinator().history(3).unwrap();
    assert_eq!(history.senders().collect::<Vec<_>>(), vec![PeerId(1), PeerId(2)]);
    assert_eq!(a.membership().state(PeerId(2)), Some(MemberState::Alive));
}
