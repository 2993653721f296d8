//! Remote peer table. One table per socket; lookup is a linear scan by exact
//! address, which is fine for the handful of peers a control node talks to.

use crate::addr::NetAddr;
use crate::arena::{Arena, Key};
use crate::param::ParamId;
use crate::socket::SocketKey;

/// Peer handle within one socket's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub(crate) Key);

/// Peer handle qualified by the socket that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerRef {
    pub socket: SocketKey,
    pub peer: PeerId,
}

/// One counterpart address.
#[derive(Debug)]
pub struct Remote {
    addr: NetAddr,
    /// Parameters we subscribed to at this peer.
    pub(crate) params: Vec<ParamId>,
    /// Peer subscribed to our public parameters.
    pub(crate) sends_to: bool,
    /// We pull parameter values from this peer.
    pub(crate) receives_from: bool,
}

impl Remote {
    fn new(addr: NetAddr) -> Self {
        Self {
            addr,
            params: Vec::new(),
            sends_to: false,
            receives_from: false,
        }
    }

    pub fn addr(&self) -> &NetAddr {
        &self.addr
    }

    pub fn params(&self) -> &[ParamId] {
        &self.params
    }

    pub fn sends_to(&self) -> bool {
        self.sends_to
    }

    pub fn receives_from(&self) -> bool {
        self.receives_from
    }
}

#[derive(Default)]
pub struct PeerTable {
    peers: Arena<Remote>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, addr: &NetAddr) -> Option<PeerId> {
        self.peers
            .iter()
            .find(|(_, r)| r.addr == *addr)
            .map(|(k, _)| PeerId(k))
    }

    /// Returns the peer for `addr` and whether it was just created.
    pub fn find_or_create(&mut self, addr: &NetAddr) -> (PeerId, bool) {
        match self.find(addr) {
            Some(id) => (id, false),
            None => (PeerId(self.peers.insert(Remote::new(addr.clone()))), true),
        }
    }

    pub fn get(&self, id: PeerId) -> Option<&Remote> {
        self.peers.get(id.0)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Remote> {
        self.peers.get_mut(id.0)
    }

    pub fn remove(&mut self, id: PeerId) -> Option<Remote> {
        self.peers.remove(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &Remote)> {
        self.peers.iter().map(|(k, r)| (PeerId(k), r))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::resolve;

    #[test]
    fn find_or_create_matches_exact_address() {
        let mut t = PeerTable::new();
        let a = resolve("@a", None).unwrap();
        let b = resolve("@b", None).unwrap();
        let (ia, created) = t.find_or_create(&a);
        assert!(created);
        let (ia2, created) = t.find_or_create(&a);
        assert!(!created);
        assert_eq!(ia, ia2);
        let (ib, _) = t.find_or_create(&b);
        assert_ne!(ia, ib);
        assert_eq!(t.len(), 2);
        t.remove(ia);
        assert_eq!(t.find(&a), None);
        assert_eq!(t.find(&b), Some(ib));
    }
}
