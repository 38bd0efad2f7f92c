//! In-process peer links
//!
//! [`MemoryLink::pair`] wires two ends together with tokio channels. The
//! reliable channel never drops or reorders. The unreliable channel passes
//! through a seeded [`LinkConditioner`] so loss is reproducible in tests.

use crate::link::{Channel, ChannelState, LinkShared, LinkStats, MessageHandler, PeerLink};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem_core::{DeterministicRng, PeerId};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Simulated network conditions for a memory link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkConditioner {
    /// Probability in `[0, 1]` that an unreliable message is lost.
    pub loss: f32,
    /// One-way delay applied to every message.
    pub latency: Duration,
    /// Seed for the loss RNG.
    pub seed: u32,
}

impl Default for LinkConditioner {
    fn default() -> Self {
        Self {
            loss: 0.0,
            latency: Duration::ZERO,
            seed: 1,
        }
    }
}

type Envelope = (Instant, Vec<u8>);

/// One end of an in-process link.
pub struct MemoryLink {
    local: PeerId,
    remote: PeerId,
    shared: Arc<LinkShared>,
    reliable_tx: mpsc::UnboundedSender<Envelope>,
    unreliable_tx: mpsc::UnboundedSender<Envelope>,
    conditioner: LinkConditioner,
    loss_rng: Mutex<DeterministicRng>,
}

impl MemoryLink {
    /// Creates two connected ends, `a` talking to `b`. Both ends start with
    /// every channel `Connecting`; call [`MemoryLink::open_all`] on each.
    ///
    /// Must be called from within a tokio runtime.
    pub fn pair(a: PeerId, b: PeerId, conditioner: LinkConditioner) -> (MemoryLink, MemoryLink) {
        let a_shared = Arc::new(LinkShared::new(ChannelState::Connecting));
        let b_shared = Arc::new(LinkShared::new(ChannelState::Connecting));

        let (a_reliable_tx, a_reliable_rx) = mpsc::unbounded_channel();
        let (a_unreliable_tx, a_unreliable_rx) = mpsc::unbounded_channel();
        let (b_reliable_tx, b_reliable_rx) = mpsc::unbounded_channel();
        let (b_unreliable_tx, b_unreliable_rx) = mpsc::unbounded_channel();

        // a's outbound queues feed b's handlers and vice versa
        spawn_delivery(a_reliable_rx, b_shared.clone(), Channel::Reliable);
        spawn_delivery(a_unreliable_rx, b_shared.clone(), Channel::Unreliable);
        spawn_delivery(b_reliable_rx, a_shared.clone(), Channel::Reliable);
        spawn_delivery(b_unreliable_rx, a_shared.clone(), Channel::Unreliable);

        let end_a = MemoryLink {
            local: a,
            remote: b,
            shared: a_shared,
            reliable_tx: a_reliable_tx,
            unreliable_tx: a_unreliable_tx,
            conditioner,
            loss_rng: Mutex::new(DeterministicRng::new(conditioner.seed)),
        };
        let end_b = MemoryLink {
            local: b,
            remote: a,
            shared: b_shared,
            reliable_tx: b_reliable_tx,
            unreliable_tx: b_unreliable_tx,
            conditioner,
            loss_rng: Mutex::new(DeterministicRng::new(conditioner.seed.wrapping_add(1))),
        };
        (end_a, end_b)
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    pub fn open(&self, channel: Channel) {
        self.shared.set_state(channel, ChannelState::Open);
    }

    pub fn open_all(&self) {
        self.open(Channel::Reliable);
        self.open(Channel::Unreliable);
    }

    pub fn close(&self) {
        self.shared.close_all();
    }

    fn lost(&self) -> bool {
        if self.conditioner.loss <= 0.0 {
            return false;
        }
        match self.loss_rng.lock() {
            Ok(mut rng) => rng.next_f32() < self.conditioner.loss,
            Err(_) => false,
        }
    }
}

fn spawn_delivery(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    target: Arc<LinkShared>,
    channel: Channel,
) {
    tokio::spawn(async move {
        while let Some((due, bytes)) = rx.recv().await {
            if due > Instant::now() {
                tokio::time::sleep_until(due).await;
            }
            target.deliver(channel, bytes);
        }
    });
}

impl PeerLink for MemoryLink {
    fn remote(&self) -> PeerId {
        self.remote
    }

    fn state(&self, channel: Channel) -> ChannelState {
        self.shared.state(channel)
    }

    fn send(&self, channel: Channel, bytes: &[u8]) {
        if !self.shared.is_open(channel) {
            tracing::trace!(from = %self.local, to = %self.remote, ?channel, "channel not open, send dropped");
            self.shared.record_dropped(channel);
            return;
        }
        if channel == Channel::Unreliable && self.lost() {
            self.shared.record_dropped(channel);
            return;
        }

        let due = Instant::now() + self.conditioner.latency;
        let tx = match channel {
            Channel::Reliable => &self.reliable_tx,
            Channel::Unreliable => &self.unreliable_tx,
        };
        if tx.send((due, bytes.to_vec())).is_err() {
            self.shared.record_dropped(channel);
            return;
        }
        self.shared.record_sent(channel, bytes.len());
    }

    fn set_handler(&self, channel: Channel, handler: MessageHandler) {
        self.shared.set_handler(channel, handler);
    }

    fn stats(&self) -> LinkStats {
        self.shared.stats()
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.shared.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn collector() -> (MessageHandler, Arc<StdMutex<Vec<Vec<u8>>>>) {
        let store = Arc::new(StdMutex::new(Vec::new()));
        let sink = store.clone();
        let handler: MessageHandler = Arc::new(move |bytes| sink.lock().unwrap().push(bytes));
        (handler, store)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn reliable_delivery_is_ordered() {
        let (a, b) = MemoryLink::pair(PeerId(1), PeerId(2), LinkConditioner::default());
        a.open_all();
        b.open_all();
        let (handler, seen) = collector();
        b.on_reliable_message(handler);

        for i in 0u8..50 {
            a.send_reliable(&[i]);
        }
        settle().await;

        let seen = seen.lock().unwrap();
        let expected: Vec<Vec<u8>> = (0u8..50).map(|i| vec![i]).collect();
        assert_eq!(*seen, expected);
        assert_eq!(a.remote(), PeerId(2));
        assert_eq!(b.remote(), PeerId(1));
    }

    #[tokio::test]
    async fn send_on_unopened_channel_is_dropped() {
        let (a, b) = MemoryLink::pair(PeerId(1), PeerId(2), LinkConditioner::default());
        b.open_all();
        let (handler, seen) = collector();
        b.on_reliable_message(handler);

        a.send_reliable(b"early");
        settle().await;

        assert!(seen.lock().unwrap().is_empty());
        let stats = a.stats();
        assert_eq!(stats.reliable.bytes_sent, 0);
        assert_eq!(stats.reliable.messages_dropped, 1);
    }

    #[tokio::test]
    async fn lossy_unreliable_channel_drops_some() {
        let conditioner = LinkConditioner {
            loss: 0.5,
            ..LinkConditioner::default()
        };
        let (a, b) = MemoryLink::pair(PeerId(1), PeerId(2), conditioner);
        a.open_all();
        b.open_all();
        let (handler, seen) = collector();
        b.on_unreliable_message(handler);

        for _ in 0..200 {
            a.send_unreliable(b"hint");
        }
        settle().await;

        let delivered = seen.lock().unwrap().len();
        let stats = a.stats();
        assert!(delivered > 0 && delivered < 200, "delivered {delivered}");
        assert_eq!(stats.unreliable.messages_dropped as usize + delivered, 200);
    }

    #[tokio::test]
    async fn latency_delays_delivery() {
        let conditioner = LinkConditioner {
            latency: Duration::from_millis(30),
            ..LinkConditioner::default()
        };
        let (a, b) = MemoryLink::pair(PeerId(1), PeerId(2), conditioner);
        a.open_all();
        let (handler, seen) = collector();
        b.on_reliable_message(handler);

        a.send_reliable(b"x");
        tokio::task::yield_now().await;
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_link_drops_sends() {
        let (a, _b) = MemoryLink::pair(PeerId(1), PeerId(2), LinkConditioner::default());
        a.open_all();
        a.close();
        a.send_unreliable(b"late");
        assert_eq!(a.state(Channel::Unreliable), ChannelState::Closed);
        assert_eq!(a.stats().unreliable.messages_dropped, 1);
    }
}
