//! Peer mesh
//!
//! Registry of every link in a session. Inbound traffic from all links is
//! funnelled into one channel so a single driver owns all protocol state.

use crate::link::{Channel, PeerLink};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tandem_core::PeerId;
use tokio::sync::mpsc;

/// A message received from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub from: PeerId,
    pub channel: Channel,
    pub payload: Vec<u8>,
}

/// Full-mesh registry of peer links.
///
/// Every inserted link delivers into one inbox owned by the mesh, so traffic
/// that arrives before anyone reads it is buffered rather than lost.
pub struct PeerMesh {
    local: PeerId,
    links: DashMap<PeerId, Arc<dyn PeerLink>>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
}

impl PeerMesh {
    pub fn new(local: PeerId) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            local,
            links: DashMap::new(),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
        }
    }

    pub fn local(&self) -> PeerId {
        self.local
    }

    /// Registers a link and points its handlers at the inbox. Returns the
    /// replaced link, if any.
    pub fn insert(&self, link: Arc<dyn PeerLink>) -> Option<Arc<dyn PeerLink>> {
        route(link.as_ref(), self.inbox_tx.clone());
        self.links.insert(link.remote(), link)
    }

    /// Hands out the receiving end of the inbox. Only the first call gets it.
    pub fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        self.inbox_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    pub fn remove(&self, peer: PeerId) -> Option<Arc<dyn PeerLink>> {
        self.links.remove(&peer).map(|(_, link)| link)
    }

    pub fn get(&self, peer: PeerId) -> Option<Arc<dyn PeerLink>> {
        self.links.get(&peer).map(|entry| entry.value().clone())
    }

    /// Remote peers, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.links.iter().map(|entry| *entry.key()).collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn send_to(&self, peer: PeerId, channel: Channel, bytes: &[u8]) -> bool {
        match self.links.get(&peer) {
            Some(link) => {
                link.send(channel, bytes);
                true
            }
            None => false,
        }
    }

    pub fn broadcast(&self, channel: Channel, bytes: &[u8]) {
        for entry in self.links.iter() {
            entry.value().send(channel, bytes);
        }
    }

    pub fn broadcast_reliable(&self, bytes: &[u8]) {
        self.broadcast(Channel::Reliable, bytes);
    }

    pub fn broadcast_unreliable(&self, bytes: &[u8]) {
        self.broadcast(Channel::Unreliable, bytes);
    }
}

fn route(link: &dyn PeerLink, tx: mpsc::UnboundedSender<Inbound>) {
    let from = link.remote();
    for channel in [Channel::Reliable, Channel::Unreliable] {
        let tx = tx.clone();
        link.set_handler(
            channel,
            Arc::new(move |payload| {
                // The receiver is gone once the session shuts down.
                let _ = tx.send(Inbound {
                    from,
                    channel,
                    payload,
                });
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{LinkConditioner, MemoryLink};
    use std::time::Duration;

    #[tokio::test]
    async fn broadcast_reaches_every_peer_inbox() {
        let hub = PeerMesh::new(PeerId(1));
        let (to_two, two_end) = MemoryLink::pair(PeerId(1), PeerId(2), LinkConditioner::default());
        let (to_three, three_end) = MemoryLink::pair(PeerId(1), PeerId(3), LinkConditioner::default());
        for link in [&to_two, &two_end, &to_three, &three_end] {
            link.open_all();
        }

        let two = PeerMesh::new(PeerId(2));
        let three = PeerMesh::new(PeerId(3));
        two.insert(Arc::new(two_end));
        three.insert(Arc::new(three_end));
        let mut two_rx = two.take_inbox().unwrap();
        let mut three_rx = three.take_inbox().unwrap();
        assert!(two.take_inbox().is_none());

        hub.insert(Arc::new(to_three));
        hub.insert(Arc::new(to_two));
        assert_eq!(hub.peers(), vec![PeerId(2), PeerId(3)]);

        hub.broadcast_reliable(b"tick");

        let got_two = tokio::time::timeout(Duration::from_secs(1), two_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let got_three = tokio::time::timeout(Duration::from_secs(1), three_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got_two.from, PeerId(1));
        assert_eq!(got_two.channel, Channel::Reliable);
        assert_eq!(got_three.payload, b"tick".to_vec());
    }

    #[tokio::test]
    async fn send_to_unknown_peer_reports_false() {
        let mesh = PeerMesh::new(PeerId(1));
        assert!(!mesh.send_to(PeerId(9), Channel::Reliable, b"x"));
        assert!(mesh.is_empty());
    }
}
