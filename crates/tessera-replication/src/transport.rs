//! Transport collaborator and an in-process implementation.
//!
//! A transport only moves bytes. Whatever it receives is pushed as
//! [`NetEvent`]s into a channel that the replication engine drains on its own
//! tick, so message handling never runs outside the tick.

use std::cell::RefCell;
use std::rc::Rc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Connection handle. The server is always [`SERVER_PEER`].
pub type PeerId = u64;

pub const SERVER_PEER: PeerId = 0;

/// Something that arrived from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    Data(PeerId, Vec<u8>),
}

/// Outbound half of a network connection.
pub trait Transport {
    fn send_reliable(&mut self, peer: PeerId, bytes: &[u8]);

    fn send_unreliable(&mut self, peer: PeerId, bytes: &[u8]);

    /// Reliable send to every connected peer.
    fn broadcast(&mut self, bytes: &[u8]);
}

// ---------------------------------------------------------------------------
// In-memory transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Routes {
    endpoints: FxHashMap<PeerId, Sender<NetEvent>>,
    next_client: PeerId,
    drop_unreliable: bool,
}

impl Routes {
    fn deliver(&self, from: PeerId, to: PeerId, bytes: &[u8]) {
        match self.endpoints.get(&to) {
            // The receiver may already be gone; that is a lost packet.
            Some(tx) => {
                let _ = tx.send(NetEvent::Data(from, bytes.to_vec()));
            }
            None => debug!(from, to, "send to unknown peer dropped"),
        }
    }
}

/// Connects one server endpoint and any number of client endpoints inside a
/// single process. Clients only talk to the server.
#[derive(Clone, Default)]
pub struct MemoryHub {
    routes: Rc<RefCell<Routes>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the server endpoint.
    pub fn server(&self) -> (MemoryTransport, Receiver<NetEvent>) {
        let (tx, rx) = unbounded();
        self.routes.borrow_mut().endpoints.insert(SERVER_PEER, tx);
        (self.endpoint(SERVER_PEER), rx)
    }

    /// Creates a client endpoint and announces it to both sides.
    pub fn connect(&self) -> (PeerId, MemoryTransport, Receiver<NetEvent>) {
        let (tx, rx) = unbounded();
        let peer = {
            let mut routes = self.routes.borrow_mut();
            routes.next_client += 1;
            let peer = routes.next_client;
            let _ = tx.send(NetEvent::Connected(SERVER_PEER));
            if let Some(server) = routes.endpoints.get(&SERVER_PEER) {
                let _ = server.send(NetEvent::Connected(peer));
            }
            routes.endpoints.insert(peer, tx);
            peer
        };
        (peer, self.endpoint(peer), rx)
    }

    /// Removes a client endpoint and tells the server.
    pub fn disconnect(&self, peer: PeerId) {
        let mut routes = self.routes.borrow_mut();
        if let Some(tx) = routes.endpoints.remove(&peer) {
            let _ = tx.send(NetEvent::Disconnected(SERVER_PEER));
            if let Some(server) = routes.endpoints.get(&SERVER_PEER) {
                let _ = server.send(NetEvent::Disconnected(peer));
            }
        }
    }

    /// Silently discards unreliable sends while set.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.routes.borrow_mut().drop_unreliable = drop;
    }

    fn endpoint(&self, local: PeerId) -> MemoryTransport {
        MemoryTransport {
            local,
            routes: Rc::clone(&self.routes),
        }
    }
}

/// One endpoint of a [`MemoryHub`].
pub struct MemoryTransport {
    local: PeerId,
    routes: Rc<RefCell<Routes>>,
}

impl MemoryTransport {
    pub fn local_peer(&self) -> PeerId {
        self.local
    }
}

impl Transport for MemoryTransport {
    fn send_reliable(&mut self, peer: PeerId, bytes: &[u8]) {
        self.routes.borrow().deliver(self.local, peer, bytes);
    }

    fn send_unreliable(&mut self, peer: PeerId, bytes: &[u8]) {
        let routes = self.routes.borrow();
        if !routes.drop_unreliable {
            routes.deliver(self.local, peer, bytes);
        }
    }

    fn broadcast(&mut self, bytes: &[u8]) {
        let routes = self.routes.borrow();
        let mut peers: Vec<PeerId> = routes
            .endpoints
            .keys()
            .copied()
            .filter(|&p| p != self.local)
            .collect();
        peers.sort_unstable();
        for peer in peers {
            if self.local == SERVER_PEER || peer == SERVER_PEER {
                routes.deliver(self.local, peer, bytes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_announces_both_sides() {
        let hub = MemoryHub::new();
        let (_server, server_rx) = hub.server();
        let (peer, _client, client_rx) = hub.connect();
        assert_eq!(server_rx.try_recv().unwrap(), NetEvent::Connected(peer));
        assert_eq!(client_rx.try_recv().unwrap(), NetEvent::Connected(SERVER_PEER));
    }

    #[test]
    fn test_broadcast_reaches_clients_only() {
        let hub = MemoryHub::new();
        let (mut server, server_rx) = hub.server();
        let (a, mut client_a, a_rx) = hub.connect();
        let (_b, _client_b, b_rx) = hub.connect();
        server_rx.try_iter().count();
        a_rx.try_iter().count();
        b_rx.try_iter().count();

        server.broadcast(b"hi");
        assert_eq!(a_rx.try_recv().unwrap(), NetEvent::Data(SERVER_PEER, b"hi".to_vec()));
        assert_eq!(b_rx.try_recv().unwrap(), NetEvent::Data(SERVER_PEER, b"hi".to_vec()));
        assert!(server_rx.try_recv().is_err());

        // A client broadcast only goes to the server.
        client_a.broadcast(b"up");
        assert_eq!(server_rx.try_recv().unwrap(), NetEvent::Data(a, b"up".to_vec()));
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn test_unreliable_drop_and_disconnect() {
        let hub = MemoryHub::new();
        let (mut server, server_rx) = hub.server();
        let (peer, _client, client_rx) = hub.connect();
        client_rx.try_iter().count();

        hub.set_drop_unreliable(true);
        server.send_unreliable(peer, b"lost");
        server.send_reliable(peer, b"kept");
        assert_eq!(client_rx.try_recv().unwrap(), NetEvent::Data(SERVER_PEER, b"kept".to_vec()));
        assert!(client_rx.try_recv().is_err());

        hub.disconnect(peer);
        assert_eq!(server_rx.try_iter().last(), Some(NetEvent::Disconnected(peer)));
        assert_eq!(client_rx.try_recv().unwrap(), NetEvent::Disconnected(SERVER_PEER));
        server.send_reliable(peer, b"gone");
    }
}
