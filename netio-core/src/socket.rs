//! Logical socket registry: at most one public and one subscriber socket per family.
//! The host owns the descriptors; the engine owns the peers reachable through them.

use std::collections::BTreeMap;
use std::fmt;

use crate::addr::{Family, NetAddr};
use crate::peer::PeerTable;

/// What a socket is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Bound to a well-known address; publishes local parameters.
    Public,
    /// Auto-bound; subscribes to remote parameters and sends messages.
    Subscriber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketKey {
    pub family: Family,
    pub role: Role,
}

impl SocketKey {
    pub fn public(family: Family) -> Self {
        Self {
            family,
            role: Role::Public,
        }
    }

    pub fn subscriber(family: Family) -> Self {
        Self {
            family,
            role: Role::Subscriber,
        }
    }

    pub fn is_public(&self) -> bool {
        self.role == Role::Public
    }
}

impl fmt::Display for SocketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            Role::Public => "public",
            Role::Subscriber => "subscriber",
        };
        write!(f, "{} {}", self.family, role)
    }
}

/// One registered socket and the peers known through it.
pub struct Socket {
    local: NetAddr,
    pub(crate) peers: PeerTable,
}

impl Socket {
    pub fn local_addr(&self) -> &NetAddr {
        &self.local
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }
}

#[derive(Default)]
pub struct SocketRegistry {
    sockets: BTreeMap<SocketKey, Socket>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when `key` is already taken; the existing socket is kept.
    pub fn insert(&mut self, key: SocketKey, local: NetAddr) -> bool {
        if self.sockets.contains_key(&key) {
            return false;
        }
        self.sockets.insert(
            key,
            Socket {
                local,
                peers: PeerTable::new(),
            },
        );
        true
    }

    pub fn contains(&self, key: SocketKey) -> bool {
        self.sockets.contains_key(&key)
    }

    pub fn get(&self, key: SocketKey) -> Option<&Socket> {
        self.sockets.get(&key)
    }

    pub fn get_mut(&mut self, key: SocketKey) -> Option<&mut Socket> {
        self.sockets.get_mut(&key)
    }

    /// All sockets, ordered by family then role.
    pub fn iter(&self) -> impl Iterator<Item = (SocketKey, &Socket)> {
        self.sockets.iter().map(|(k, s)| (*k, s))
    }
}
