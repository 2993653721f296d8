//! Host-driven API: the engine receives datagrams, timer ticks and cycle
//! boundaries from the host and queues [`Transmit`]s for it to send.
//!
//! The engine is the single context holding every registry: logical sockets
//! with their peer tables, bound parameters, the message channel and timers.
//! It never blocks and never touches a descriptor.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::addr::{resolve, split_scheme, AddressError, Family, NetAddr};
use crate::arena::Arena;
use crate::message::{Message, MessageChannel, MessageError, MessageKind};
use crate::param::{check_name, BoundParam, Owner, ParamError, ParamId, ParamSpec};
use crate::peer::{PeerId, PeerRef, Remote};
use crate::protocol::{Token, IGNORED_ACK};
use crate::socket::{Role, Socket, SocketKey, SocketRegistry};
use crate::timer::TimerQueue;
use crate::wire::{self, Packet};

/// Default interval between keepalive/subscribe probes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Keepalive period. Peers silent for twice this long are considered lost.
    pub keepalive_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

/// Why a datagram is sent. Lets the host report failures back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitKind {
    /// Dirty local parameters, broadcast to subscribers.
    Update,
    /// Full dump for a peer that just subscribed.
    Snapshot(PeerId),
    /// Pending writes for one remote.
    Write,
    Subscribe(PeerId),
    Keepalive,
    Pong,
    Probe,
    Message,
    Ack,
}

/// One datagram for the host to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmit {
    pub socket: SocketKey,
    pub to: NetAddr,
    pub payload: Vec<u8>,
    pub kind: TransmitKind,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("duplicate {0} socket")]
    DuplicateSocket(SocketKey),
    #[error("no subscriber socket for {0}")]
    NoSocket(Family),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Message(#[from] MessageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum TimerKey {
    Keepalive,
    Liveness(PeerRef),
}

pub struct Engine {
    config: EngineConfig,
    sockets: SocketRegistry,
    params: Arena<BoundParam>,
    locals: Vec<ParamId>,
    messages: MessageChannel,
    timers: TimerQueue<TimerKey>,
    keepalive_armed: bool,
    /// Something needs to go out on the next sync.
    dirty: bool,
    outbox: Vec<Transmit>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sockets: SocketRegistry::new(),
            params: Arena::new(),
            locals: Vec::new(),
            messages: MessageChannel::new(),
            timers: TimerQueue::new(),
            keepalive_armed: false,
            dirty: false,
            outbox: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn liveness_timeout(&self) -> Duration {
        self.config.keepalive_interval * 2
    }

    // ---- socket registry ----

    /// Register a socket the host has bound. The process-wide keepalive timer is
    /// armed with the first socket and never again.
    pub fn register_socket(
        &mut self,
        key: SocketKey,
        local: NetAddr,
        now: Instant,
    ) -> Result<(), EngineError> {
        if !self.sockets.insert(key, local.clone()) {
            warn!("duplicate {} socket {}", key, local);
            return Err(EngineError::DuplicateSocket(key));
        }
        debug!("registered {} socket {}", key, local);
        if !self.keepalive_armed {
            self.timers
                .arm(TimerKey::Keepalive, now + self.config.keepalive_interval);
            self.keepalive_armed = true;
        }
        Ok(())
    }

    pub fn has_socket(&self, key: SocketKey) -> bool {
        self.sockets.contains(key)
    }

    pub fn socket(&self, key: SocketKey) -> Option<&Socket> {
        self.sockets.get(key)
    }

    pub fn sockets(&self) -> impl Iterator<Item = (SocketKey, &Socket)> {
        self.sockets.iter()
    }

    // ---- peers ----

    pub fn peer(&self, peer: PeerRef) -> Option<&Remote> {
        self.sockets.get(peer.socket)?.peers.get(peer.peer)
    }

    pub fn find_peer(&self, socket: SocketKey, addr: &NetAddr) -> Option<PeerRef> {
        let peer = self.sockets.get(socket)?.peers.find(addr)?;
        Some(PeerRef { socket, peer })
    }

    fn arm_liveness(&mut self, peer: PeerRef, now: Instant) {
        let at = now + self.liveness_timeout();
        self.timers.arm(TimerKey::Liveness(peer), at);
    }

    /// Peer lost its liveness window. Peers we subscribe to are kept and retried
    /// with their parameters marked absent; anything else is freed.
    fn lost_peer(&mut self, peer: PeerRef) {
        let Some(socket) = self.sockets.get_mut(peer.socket) else {
            return;
        };
        let Some(remote) = socket.peers.get(peer.peer) else {
            return;
        };
        if remote.receives_from {
            info!("lost {} on {}, parameters absent", remote.addr(), peer.socket);
            for id in &remote.params {
                if let Some(p) = self.params.get_mut(id.0) {
                    p.param.clear_present();
                }
            }
        } else {
            debug!("dropping {} on {}", remote.addr(), peer.socket);
            socket.peers.remove(peer.peer);
        }
    }

    // ---- parameters ----

    /// Create a parameter from a spec: `netio:[+]NAME` or `<scheme>:<addr>#NAME`.
    pub fn create_param(&mut self, spec: &str, now: Instant) -> Result<ParamId, EngineError> {
        match ParamSpec::parse(spec)? {
            ParamSpec::Local { name, writable } => Ok(self.create_local(name, writable)?),
            ParamSpec::Remote { family, addr, name } => {
                self.create_remote(family, addr, name, now)
            }
        }
    }

    /// Create a published parameter. It is sent with the next update even
    /// before its first change.
    pub fn create_local(&mut self, name: &str, writable: bool) -> Result<ParamId, ParamError> {
        check_name(name)?;
        if find_named(&self.params, &self.locals, name).is_some() {
            return Err(ParamError::Duplicate(name.to_string()));
        }
        let id = ParamId(self.params.insert(BoundParam::local(name, writable)));
        self.locals.push(id);
        self.dirty = true;
        Ok(id)
    }

    /// Subscribe to `name` at `addr`. Needs the family's subscriber socket.
    pub fn create_remote(
        &mut self,
        family: Family,
        addr: &str,
        name: &str,
        now: Instant,
    ) -> Result<ParamId, EngineError> {
        check_name(name)?;
        let key = SocketKey::subscriber(family);
        if !self.sockets.contains(key) {
            return Err(EngineError::NoSocket(family));
        }
        let target = resolve(addr, Some(family))?;

        if let Some(existing) = self.find_peer(key, &target) {
            let ids = self.peer(existing).map(|r| r.params.as_slice()).unwrap_or(&[]);
            if find_named(&self.params, ids, name).is_some() {
                return Err(ParamError::Duplicate(name.to_string()).into());
            }
        }

        let Some(socket) = self.sockets.get_mut(key) else {
            return Err(EngineError::NoSocket(family));
        };
        let (peer, _) = socket.peers.find_or_create(&target);
        let owner = PeerRef { socket: key, peer };
        let id = ParamId(self.params.insert(BoundParam::remote(name, owner)));
        let mut subscribe = false;
        if let Some(remote) = socket.peers.get_mut(peer) {
            // a peer known only from pongs or acks is not subscribed yet
            subscribe = !remote.receives_from;
            remote.receives_from = true;
            remote.params.push(id);
        }
        if subscribe {
            debug!("subscribing to {} via {}", target, key);
            self.outbox.push(Transmit {
                socket: key,
                to: target,
                payload: wire::encode(&Token::Subscribe),
                kind: TransmitKind::Subscribe(peer),
            });
            self.arm_liveness(owner, now);
        }
        Ok(id)
    }

    /// Unlink and free a parameter. A remote left without parameters stops
    /// being subscribed.
    pub fn destroy_param(&mut self, id: ParamId) -> Result<(), ParamError> {
        let p = self.params.remove(id.0).ok_or(ParamError::Stale)?;
        match p.owner() {
            Owner::Local => self.locals.retain(|l| *l != id),
            Owner::Remote(owner) => {
                let Some(socket) = self.sockets.get_mut(owner.socket) else {
                    return Ok(());
                };
                let Some(remote) = socket.peers.get_mut(owner.peer) else {
                    return Ok(());
                };
                remote.params.retain(|l| *l != id);
                if remote.params.is_empty() {
                    remote.receives_from = false;
                    if !self.timers.is_armed(&TimerKey::Liveness(owner)) {
                        socket.peers.remove(owner.peer);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn param(&self, id: ParamId) -> Option<&BoundParam> {
        self.params.get(id.0)
    }

    /// Look up a local parameter by wire name.
    pub fn find_local(&self, name: &str) -> Option<ParamId> {
        find_named(&self.params, &self.locals, name)
    }

    pub fn get(&self, id: ParamId) -> Result<f64, ParamError> {
        self.params
            .get(id.0)
            .map(|p| p.param.value())
            .ok_or(ParamError::Stale)
    }

    /// Local parameters take the value at once. Remote ones queue a write
    /// request and keep showing the remote value until it echoes back.
    pub fn set(&mut self, id: ParamId, value: f64) -> Result<(), ParamError> {
        let p = self.params.get_mut(id.0).ok_or(ParamError::Stale)?;
        match p.owner() {
            Owner::Local => {
                p.param.set(value);
                p.param.mark_present();
            }
            Owner::Remote(_) => {
                p.pending = value;
                p.waiting = true;
            }
        }
        self.dirty = true;
        Ok(())
    }

    pub fn is_dirty(&self, id: ParamId) -> bool {
        self.params
            .get(id.0)
            .is_some_and(|p| p.param.is_dirty())
    }

    pub fn is_present(&self, id: ParamId) -> bool {
        self.params
            .get(id.0)
            .is_some_and(|p| p.param.is_present())
    }

    /// True when the next sync has something to send.
    pub fn needs_sync(&self) -> bool {
        self.dirty
    }

    // ---- per-cycle ----

    /// Once per control cycle: drop unconsumed messages, broadcast changed
    /// local parameters, send pending writes.
    pub fn sync(&mut self) {
        while self.recv_msg().is_some() {}

        if !self.dirty {
            return;
        }
        let mut leftover = false;

        let mut packet = Packet::new();
        for id in &self.locals {
            let Some(p) = self.params.get_mut(id.0) else {
                continue;
            };
            if !(p.fresh || p.param.is_dirty()) {
                continue;
            }
            let token = Token::Assign {
                name: p.name(),
                value: p.param.value(),
            };
            if packet.push(&token) {
                p.fresh = false;
            } else {
                leftover |= p.fresh;
            }
        }
        if packet.dropped() > 0 {
            debug!("update packet full, {} parameters truncated", packet.dropped());
        }
        if !packet.is_empty() {
            let payload = packet.into_bytes();
            for (key, socket) in self.sockets.iter().filter(|(k, _)| k.is_public()) {
                for (_, remote) in socket.peers.iter().filter(|(_, r)| r.sends_to) {
                    self.outbox.push(Transmit {
                        socket: key,
                        to: remote.addr().clone(),
                        payload: payload.clone(),
                        kind: TransmitKind::Update,
                    });
                }
            }
        }

        for (key, socket) in self.sockets.iter().filter(|(k, _)| !k.is_public()) {
            for (_, remote) in socket.peers.iter() {
                let mut packet = Packet::new();
                for id in &remote.params {
                    let Some(p) = self.params.get_mut(id.0) else {
                        continue;
                    };
                    if !p.waiting {
                        continue;
                    }
                    let token = Token::Write {
                        name: p.name(),
                        value: p.pending,
                    };
                    if packet.push(&token) {
                        p.waiting = false;
                    } else {
                        leftover = true;
                    }
                }
                if !packet.is_empty() {
                    self.outbox.push(Transmit {
                        socket: key,
                        to: remote.addr().clone(),
                        payload: packet.into_bytes(),
                        kind: TransmitKind::Write,
                    });
                }
            }
        }

        self.dirty = leftover;
    }

    /// End of a control cycle: sync, then clear every parameter's dirty flag.
    pub fn flush(&mut self) {
        self.sync();
        for (_, p) in self.params.iter_mut() {
            p.param.clear_dirty();
        }
    }

    // ---- inbound ----

    /// Process one received datagram. Each token is handled on its own; a bad
    /// token is logged and dropped without affecting the rest.
    pub fn on_datagram(&mut self, key: SocketKey, from: NetAddr, datagram: &[u8], now: Instant) {
        let Some(socket) = self.sockets.get_mut(key) else {
            warn!("datagram on unregistered {} socket", key);
            return;
        };
        let (peer, created) = socket.peers.find_or_create(&from);
        if created {
            debug!("new peer {} on {}", from, key);
        }
        let owner = PeerRef { socket: key, peer };
        self.arm_liveness(owner, now);
        let was_sending = self.peer(owner).is_some_and(|r| r.sends_to);

        for token in wire::tokens(datagram) {
            trace!("{} <- {}: {}", key, from, token);
            match token {
                Token::Ping => self.outbox.push(Transmit {
                    socket: key,
                    to: from.clone(),
                    payload: wire::encode(&Token::Pong),
                    kind: TransmitKind::Pong,
                }),
                Token::Pong | Token::Initial | Token::Keepalive => {}
                Token::Subscribe => {
                    if !key.is_public() {
                        warn!("subscribe from {} via subscriber socket", from);
                        continue;
                    }
                    if let Some(remote) = self.peer_mut(owner) {
                        remote.sends_to = true;
                    }
                }
                Token::Msg { id, text } => self.enqueue(key, &from, id, MessageKind::Msg, text),
                Token::Ack { id, text } => self.enqueue(key, &from, id, MessageKind::Ack, text),
                Token::Assign { name, value } => {
                    if key.is_public() {
                        warn!("assign {} via public socket from {}", name, from);
                        continue;
                    }
                    self.assign(owner, name, value);
                }
                Token::Write { name, value } => {
                    if !key.is_public() {
                        warn!("write {} via subscriber socket from {}", name, from);
                        continue;
                    }
                    self.remote_write(&from, name, value);
                }
                Token::Invalid(line) => warn!("malformed token '{}' from {}", line, from),
                Token::Unknown(line) => debug!("unknown token '{}' from {}", line, from),
            }
        }

        let now_sending = self.peer(owner).is_some_and(|r| r.sends_to);
        if now_sending && !was_sending {
            self.send_snapshot(key, owner.peer, from);
        }
    }

    fn peer_mut(&mut self, peer: PeerRef) -> Option<&mut Remote> {
        self.sockets.get_mut(peer.socket)?.peers.get_mut(peer.peer)
    }

    fn enqueue(&mut self, key: SocketKey, from: &NetAddr, id: u32, kind: MessageKind, text: &str) {
        self.messages.push(Message {
            id,
            kind,
            text: text.to_string(),
            socket: key,
            reply: from.clone(),
        });
    }

    fn assign(&mut self, owner: PeerRef, name: &str, value: f64) {
        let ids = match self.sockets.get(owner.socket).and_then(|s| s.peers.get(owner.peer)) {
            Some(remote) => remote.params.as_slice(),
            None => return,
        };
        let Some(id) = find_named(&self.params, ids, name) else {
            // publishers send their whole set; see "Unknown assignment names" in DESIGN.md
            debug!("update for unsubscribed parameter {}", name);
            return;
        };
        if let Some(p) = self.params.get_mut(id.0) {
            p.param.set(value);
            p.param.mark_dirty();
            p.param.mark_present();
            trace!("netio:{} {}", name, value);
        }
    }

    fn remote_write(&mut self, from: &NetAddr, name: &str, value: f64) {
        let Some(id) = find_named(&self.params, &self.locals, name) else {
            warn!("{} writes unknown parameter {}", from, name);
            return;
        };
        let Some(p) = self.params.get_mut(id.0) else {
            return;
        };
        if !p.writable() {
            warn!("{} writes {}, refused", from, name);
            return;
        }
        p.param.set(value);
        p.param.mark_dirty();
        p.param.mark_present();
        self.dirty = true;
        trace!("netio:{} {}", name, value);
    }

    /// Full dump of local parameters for a new subscriber.
    fn send_snapshot(&mut self, key: SocketKey, peer: PeerId, to: NetAddr) {
        let mut packet = Packet::new();
        packet.push(&Token::Initial);
        for id in &self.locals {
            if let Some(p) = self.params.get(id.0) {
                packet.push(&Token::Assign {
                    name: p.name(),
                    value: p.param.value(),
                });
            }
        }
        debug!("snapshot of {} parameters to {}", self.locals.len(), to);
        self.outbox.push(Transmit {
            socket: key,
            to,
            payload: packet.into_bytes(),
            kind: TransmitKind::Snapshot(peer),
        });
    }

    // ---- timers ----

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        for key in self.timers.expired(now) {
            match key {
                TimerKey::Keepalive => {
                    self.send_keepalives();
                    self.timers
                        .arm(TimerKey::Keepalive, now + self.config.keepalive_interval);
                }
                TimerKey::Liveness(peer) => self.lost_peer(peer),
            }
        }
    }

    /// Public sockets tell subscribers we still publish; subscriber sockets
    /// renew every subscription, which also revives restarted publishers.
    fn send_keepalives(&mut self) {
        for (key, socket) in self.sockets.iter() {
            for (peer, remote) in socket.peers.iter() {
                let (token, kind) = match key.role {
                    Role::Public if remote.sends_to => (Token::Keepalive, TransmitKind::Keepalive),
                    Role::Subscriber if remote.receives_from => {
                        (Token::Subscribe, TransmitKind::Subscribe(peer))
                    }
                    _ => continue,
                };
                self.outbox.push(Transmit {
                    socket: key,
                    to: remote.addr().clone(),
                    payload: wire::encode(&token),
                    kind,
                });
            }
        }
    }

    // ---- messages ----

    fn direct_target(&self, uri: &str) -> Result<(SocketKey, NetAddr), EngineError> {
        let (family, rest) = split_scheme(uri)?;
        let key = SocketKey::subscriber(family);
        if !self.sockets.contains(key) {
            return Err(EngineError::NoSocket(family));
        }
        Ok((key, resolve(rest, Some(family))?))
    }

    /// Send `*ping` to `uri`; a live peer answers `*pong`.
    pub fn probe(&mut self, uri: &str) -> Result<(), EngineError> {
        let (socket, to) = self.direct_target(uri)?;
        self.outbox.push(Transmit {
            socket,
            to,
            payload: wire::encode(&Token::Ping),
            kind: TransmitKind::Probe,
        });
        Ok(())
    }

    /// Fire-and-forget message. Returns its id.
    pub fn send_msg(&mut self, uri: &str, text: &str) -> Result<u32, EngineError> {
        if text.contains('\n') {
            return Err(MessageError::Multiline.into());
        }
        let (socket, to) = self.direct_target(uri)?;
        let id = self.messages.next_id();
        self.outbox.push(Transmit {
            socket,
            to,
            payload: wire::encode(&Token::Msg { id, text }),
            kind: TransmitKind::Message,
        });
        Ok(id)
    }

    /// Acknowledge the current message. Only the first ack per message goes out.
    pub fn ack_msg(&mut self, text: &str) -> Result<u32, EngineError> {
        if text.contains('\n') {
            return Err(MessageError::Multiline.into());
        }
        let msg = self.messages.take_ack()?;
        let (id, socket, to) = (msg.id, msg.socket, msg.reply.clone());
        self.outbox.push(Transmit {
            socket,
            to,
            payload: wire::encode(&Token::Ack { id, text }),
            kind: TransmitKind::Ack,
        });
        Ok(id)
    }

    /// Pop the next message. A previous message that was never acknowledged
    /// gets an ignore-ack first.
    pub fn recv_msg(&mut self) -> Option<String> {
        if let Err(e) = self.ack_msg(IGNORED_ACK) {
            trace!("no implicit ack: {}", e);
        }
        self.messages.advance().map(|m| m.text.clone())
    }

    pub fn msg_pending(&self) -> bool {
        self.messages.pending()
    }

    /// Number of received messages not popped yet.
    pub fn msg_queued(&self) -> usize {
        self.messages.queued()
    }

    /// Id of the current message, 0 when there is none.
    pub fn msg_id(&self) -> u32 {
        self.messages.current_id()
    }

    pub fn current_msg(&self) -> Option<&Message> {
        self.messages.current()
    }

    // ---- outbound ----

    /// Take everything queued for sending.
    pub fn drain_transmits(&mut self) -> Vec<Transmit> {
        std::mem::take(&mut self.outbox)
    }

    /// Host could not send `t`. A failed snapshot un-subscribes the peer so
    /// its next `*subscribe` triggers a fresh one.
    pub fn send_failed(&mut self, t: &Transmit) {
        if let TransmitKind::Snapshot(peer) = t.kind {
            if let Some(remote) = self.peer_mut(PeerRef {
                socket: t.socket,
                peer,
            }) {
                remote.sends_to = false;
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn find_named(params: &Arena<BoundParam>, ids: &[ParamId], name: &str) -> Option<ParamId> {
    ids.iter()
        .copied()
        .find(|id| params.get(id.0).is_some_and(|p| p.name() == name))
}
