//! One netio endpoint: the engine plus the OS sockets it talks through.
//!
//! Everything runs on the caller's task. [`Node::wait`] flushes the current
//! cycle, blocks until one socket is readable or the next timer is due,
//! dispatches that single event and returns.

use std::future::poll_fn;
use std::io;
use std::task::Poll;
use std::time::{Duration, Instant};

use netio_core::addr::split_scheme;
use netio_core::wire;
use netio_core::{
    resolve_uri, AddressError, Engine, EngineConfig, EngineError, Family, Message, NetAddr,
    ParamError, ParamId, ParamSpec, SocketKey, Transmit,
};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError};
use crate::socket::{recv_buffer, NetSocket};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("bind {addr}: {source}")]
    Bind { addr: NetAddr, source: io::Error },
}

enum Event {
    Datagram(SocketKey, NetAddr, usize),
    Timer,
}

pub struct Node {
    config: Config,
    engine: Engine,
    sockets: Vec<NetSocket>,
    buf: Vec<u8>,
}

impl Node {
    pub fn new(config: Config) -> Self {
        let engine = Engine::new(EngineConfig {
            keepalive_interval: config.keepalive_interval(),
        });
        Self {
            config,
            engine,
            sockets: Vec::new(),
            buf: recv_buffer(),
        }
    }

    /// New node with every configured `listen` endpoint bound.
    /// Must be called inside a tokio runtime.
    pub fn start(config: Config) -> Result<Self, NodeError> {
        let listen = config.listen.clone();
        let mut node = Self::new(config);
        for uri in &listen {
            let local = node.bind_public(uri)?;
            info!("publishing on {}", local);
        }
        Ok(node)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Local address of a bound socket.
    pub fn local_addr(&self, key: SocketKey) -> Option<&NetAddr> {
        self.sockets
            .iter()
            .find(|s| s.key() == key)
            .map(|s| s.local_addr())
    }

    // ---- sockets ----

    /// Bind the publishing socket for the URI's family. One per family.
    pub fn bind_public(&mut self, uri: &str) -> Result<NetAddr, NodeError> {
        let uri = self.config.expand(uri)?;
        let addr = resolve_uri(uri)?;
        let key = SocketKey::public(addr.family());
        if self.engine.has_socket(key) {
            error!("duplicate family socket '{}'", uri);
            return Err(EngineError::DuplicateSocket(key).into());
        }
        self.bind(key, &addr)
    }

    /// Bind the subscriber socket for `family` on an automatic address, unless
    /// it already exists.
    pub fn autobind(&mut self, family: Family) -> Result<NetAddr, NodeError> {
        let key = SocketKey::subscriber(family);
        if let Some(local) = self.local_addr(key) {
            return Ok(local.clone());
        }
        self.bind(key, &NetAddr::auto(family))
    }

    fn bind(&mut self, key: SocketKey, addr: &NetAddr) -> Result<NetAddr, NodeError> {
        let sock = NetSocket::bind(key, addr).map_err(|source| {
            warn!("bind {}: {}", addr, source);
            NodeError::Bind {
                addr: addr.clone(),
                source,
            }
        })?;
        let local = sock.local_addr().clone();
        self.engine.register_socket(key, local.clone(), Instant::now())?;
        self.sockets.push(sock);
        Ok(local)
    }

    /// Resolve a message target, following presets, and make sure a
    /// subscriber socket exists to send from.
    fn direct_target(&mut self, uri: &str) -> Result<String, NodeError> {
        let uri = self.config.expand(uri)?.to_string();
        let (family, _) = split_scheme(&uri)?;
        self.autobind(family)?;
        Ok(uri)
    }

    // ---- parameters ----

    /// Create a parameter from a spec or preset name. Remote parameters bind
    /// the family's subscriber socket on first use.
    pub fn create_param(&mut self, spec: &str) -> Result<ParamId, NodeError> {
        let spec = self.config.expand(spec)?.to_string();
        if let ParamSpec::Remote { family, .. } = ParamSpec::parse(&spec)? {
            self.autobind(family)?;
        }
        let id = self.engine.create_param(&spec, Instant::now())?;
        self.send_pending();
        Ok(id)
    }

    pub fn destroy(&mut self, id: ParamId) -> Result<(), NodeError> {
        Ok(self.engine.destroy_param(id)?)
    }

    pub fn get(&self, id: ParamId) -> Result<f64, NodeError> {
        Ok(self.engine.get(id)?)
    }

    pub fn set(&mut self, id: ParamId, value: f64) -> Result<(), NodeError> {
        Ok(self.engine.set(id, value)?)
    }

    pub fn is_dirty(&self, id: ParamId) -> bool {
        self.engine.is_dirty(id)
    }

    pub fn is_present(&self, id: ParamId) -> bool {
        self.engine.is_present(id)
    }

    // ---- messages ----

    pub fn probe(&mut self, uri: &str) -> Result<(), NodeError> {
        let uri = self.direct_target(uri)?;
        self.engine.probe(&uri)?;
        self.send_pending();
        Ok(())
    }

    pub fn send_msg(&mut self, uri: &str, text: &str) -> Result<u32, NodeError> {
        let uri = self.direct_target(uri)?;
        let id = self.engine.send_msg(&uri, text)?;
        self.send_pending();
        Ok(id)
    }

    pub fn ack_msg(&mut self, text: &str) -> Result<u32, NodeError> {
        let id = self.engine.ack_msg(text)?;
        self.send_pending();
        Ok(id)
    }

    pub fn recv_msg(&mut self) -> Option<String> {
        let msg = self.engine.recv_msg();
        self.send_pending();
        msg
    }

    pub fn msg_pending(&self) -> bool {
        self.engine.msg_pending()
    }

    pub fn msg_queued(&self) -> usize {
        self.engine.msg_queued()
    }

    pub fn msg_id(&self) -> u32 {
        self.engine.msg_id()
    }

    pub fn current_msg(&self) -> Option<&Message> {
        self.engine.current_msg()
    }

    // ---- event loop ----

    /// End the control cycle: broadcast changes, clear dirty flags.
    pub fn flush(&mut self) {
        self.engine.flush();
        self.send_pending();
    }

    /// Flush, then dispatch exactly one socket or timer event.
    pub async fn wait(&mut self) {
        self.flush();
        let deadline = self.engine.next_deadline();
        let event = {
            let sockets = &self.sockets;
            let buf = &mut self.buf;
            let recv = poll_fn(|cx| {
                for s in sockets {
                    match s.poll_recv(cx, buf) {
                        Poll::Ready(Ok((n, from))) => {
                            return Poll::Ready(Some(Event::Datagram(s.key(), from, n)))
                        }
                        Poll::Ready(Err(e)) => {
                            warn!("recv on {}: {}", s.key(), e);
                            return Poll::Ready(None);
                        }
                        Poll::Pending => {}
                    }
                }
                Poll::Pending
            });
            let timer = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                ev = recv => ev,
                _ = timer => Some(Event::Timer),
            }
        };
        match event {
            Some(Event::Datagram(key, from, n)) => {
                let mut datagram = &self.buf[..n];
                if n == self.buf.len() {
                    warn!("datagram from {} truncated at {} bytes, dropping cut line", from, n);
                    datagram = wire::complete_lines(datagram);
                }
                self.engine.on_datagram(key, from, datagram, Instant::now());
            }
            Some(Event::Timer) => self.engine.poll_timers(Instant::now()),
            None => {}
        }
        self.send_pending();
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`. Returns false on
    /// timeout.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }

    /// Send everything the engine queued. Failures are logged and reported
    /// back; nothing here is fatal.
    fn send_pending(&mut self) {
        for t in self.engine.drain_transmits() {
            let Some(sock) = self.sockets.iter().find(|s| s.key() == t.socket) else {
                warn!("no {} socket for {:?}", t.socket, t.kind);
                continue;
            };
            if let Err(e) = sock.send_to(&t.payload, &t.to) {
                log_send_error(&t, &e);
                self.engine.send_failed(&t);
            }
        }
    }
}

fn log_send_error(t: &Transmit, e: &io::Error) {
    // nobody listening: routine for a best-effort protocol
    let quiet = matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
    );
    if quiet {
        debug!("send {:?} to {}: {}", t.kind, t.to, e);
    } else {
        warn!("send {:?} to {}: {}", t.kind, t.to, e);
    }
}
