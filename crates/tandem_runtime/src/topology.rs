//! Full-mesh construction for local sessions
//!
//! Peers are numbered `1..=n`; every pair gets one link.

use std::net::SocketAddr;
use std::sync::Arc;
use tandem_core::PeerId;
use tandem_net::{LinkConditioner, MemoryLink, PeerMesh, QuicConfig, QuicLink, QuicListener, TransportError};

/// Connects `n` in-process peers. Must be called from within a tokio runtime.
pub fn memory_mesh(n: u32, conditioner: LinkConditioner) -> Vec<Arc<PeerMesh>> {
    let meshes: Vec<Arc<PeerMesh>> = (1..=n).map(|id| Arc::new(PeerMesh::new(PeerId(id)))).collect();
    for i in 0..meshes.len() {
        for j in (i + 1)..meshes.len() {
            let seeded = LinkConditioner {
                seed: conditioner.seed.wrapping_add((i * 31 + j) as u32),
                ..conditioner
            };
            let (a, b) = MemoryLink::pair(meshes[i].local(), meshes[j].local(), seeded);
            a.open_all();
            b.open_all();
            meshes[i].insert(Arc::new(a));
            meshes[j].insert(Arc::new(b));
        }
    }
    meshes
}

/// Connects `n` peers over QUIC on the loopback interface.
pub async fn quic_mesh(n: u32, config: &QuicConfig) -> Result<Vec<Arc<PeerMesh>>, TransportError> {
    let loopback: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 0));
    let mut listeners = Vec::with_capacity(n as usize);
    for id in 1..=n {
        listeners.push(QuicListener::bind(loopback, PeerId(id), config)?);
    }
    let meshes: Vec<Arc<PeerMesh>> = (1..=n).map(|id| Arc::new(PeerMesh::new(PeerId(id)))).collect();

    for i in 0..meshes.len() {
        let addr = listeners[i].local_addr()?;
        for j in (i + 1)..meshes.len() {
            let (accepted, connected) = tokio::join!(
                listeners[i].accept(),
                QuicLink::connect(addr, meshes[j].local(), config)
            );
            meshes[i].insert(Arc::new(accepted?));
            meshes[j].insert(Arc::new(connected?));
        }
    }
    Ok(meshes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_mesh_is_complete() {
        let meshes = memory_mesh(4, LinkConditioner::default());
        assert_eq!(meshes.len(), 4);
        for mesh in &meshes {
            assert_eq!(mesh.len(), 3);
            assert!(!mesh.peers().contains(&mesh.local()));
        }
    }
}
