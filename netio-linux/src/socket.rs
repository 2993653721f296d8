//! OS datagram sockets for the three netio families.
//!
//! Sockets are created with `socket2` (close-on-exec, non-blocking), bound, and
//! then handed to `std` types so abstract UNIX names can be used for sending
//! and receiving. Readiness comes from `tokio`'s `AsyncFd`.

use std::io;
use std::net::UdpSocket;
use std::os::fd::{AsRawFd, RawFd};
use std::os::linux::net::SocketAddrExt;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::{SocketAddr as UnixSocketAddr, UnixDatagram};
use std::path::PathBuf;
use std::task::{Context, Poll};

use netio_core::{NetAddr, SocketKey, UnixName, MTU};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

/// Bound descriptor of either kind.
#[derive(Debug)]
pub enum RawSocket {
    Unix(UnixDatagram),
    Inet(UdpSocket),
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            RawSocket::Unix(s) => s.as_raw_fd(),
            RawSocket::Inet(s) => s.as_raw_fd(),
        }
    }
}

impl RawSocket {
    fn send_to(&self, buf: &[u8], to: &NetAddr) -> io::Result<usize> {
        match (self, to) {
            (RawSocket::Unix(s), NetAddr::Unix(name)) => s.send_to_addr(buf, &to_std_unix(name)?),
            (RawSocket::Inet(s), NetAddr::Inet(sa)) => s.send_to(buf, sa),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not match socket family", to),
            )),
        }
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, NetAddr)> {
        match self {
            RawSocket::Unix(s) => {
                let (n, from) = s.recv_from(buf)?;
                Ok((n, NetAddr::Unix(from_std_unix(&from))))
            }
            RawSocket::Inet(s) => {
                let (n, from) = s.recv_from(buf)?;
                Ok((n, NetAddr::Inet(from)))
            }
        }
    }

    fn local_addr(&self) -> io::Result<NetAddr> {
        match self {
            RawSocket::Unix(s) => Ok(NetAddr::Unix(from_std_unix(&s.local_addr()?))),
            RawSocket::Inet(s) => Ok(NetAddr::Inet(s.local_addr()?)),
        }
    }
}

fn to_std_unix(name: &UnixName) -> io::Result<UnixSocketAddr> {
    match name {
        UnixName::Path(p) => UnixSocketAddr::from_pathname(p),
        UnixName::Abstract(n) => UnixSocketAddr::from_abstract_name(n),
        UnixName::Unnamed => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot send to an unnamed socket",
        )),
    }
}

fn from_std_unix(addr: &UnixSocketAddr) -> UnixName {
    if let Some(name) = addr.as_abstract_name() {
        UnixName::Abstract(name.to_vec())
    } else if let Some(path) = addr.as_pathname() {
        UnixName::Path(path.to_path_buf())
    } else {
        UnixName::Unnamed
    }
}

fn unix_sockaddr(name: &UnixName) -> io::Result<SockAddr> {
    match name {
        UnixName::Path(p) => SockAddr::unix(p),
        UnixName::Abstract(n) => {
            // a leading NUL selects the abstract namespace
            let mut raw = Vec::with_capacity(n.len() + 1);
            raw.push(0u8);
            raw.extend_from_slice(n);
            SockAddr::unix(std::ffi::OsStr::from_bytes(&raw))
        }
        // empty name: the kernel autobinds
        UnixName::Unnamed => SockAddr::unix(""),
    }
}

/// Create and bind a datagram socket for `addr`.
pub fn bind_raw(addr: &NetAddr) -> io::Result<RawSocket> {
    match addr {
        NetAddr::Unix(name) => {
            let sock = Socket::new(Domain::UNIX, Type::DGRAM, None)?;
            let sa = unix_sockaddr(name)?;
            // path sockets must be writable by every local user
            let saved = unsafe { libc::umask(0) };
            let ret = sock.bind(&sa);
            unsafe { libc::umask(saved) };
            ret?;
            sock.set_nonblocking(true)?;
            Ok(RawSocket::Unix(sock.into()))
        }
        NetAddr::Inet(sa) => {
            let sock = Socket::new(Domain::for_address(*sa), Type::DGRAM, Some(Protocol::UDP))?;
            if sa.is_ipv6() {
                sock.set_only_v6(true)?;
            }
            sock.bind(&(*sa).into())?;
            sock.set_nonblocking(true)?;
            Ok(RawSocket::Inet(sock.into()))
        }
    }
}

/// A registered netio socket: its role, its address and its readiness handle.
pub struct NetSocket {
    key: SocketKey,
    local: NetAddr,
    io: AsyncFd<RawSocket>,
    unlink: Option<PathBuf>,
}

impl NetSocket {
    /// Bind `addr` for `key`. Must run inside a tokio runtime with IO enabled.
    pub fn bind(key: SocketKey, addr: &NetAddr) -> io::Result<Self> {
        let raw = bind_raw(addr)?;
        let local = raw.local_addr()?;
        let unlink = match &local {
            NetAddr::Unix(UnixName::Path(p)) => Some(p.clone()),
            _ => None,
        };
        debug!("bound {} socket {}", key, local);
        Ok(Self {
            key,
            local,
            io: AsyncFd::new(raw)?,
            unlink,
        })
    }

    pub fn key(&self) -> SocketKey {
        self.key
    }

    pub fn local_addr(&self) -> &NetAddr {
        &self.local
    }

    /// Datagram sockets never block on send; a full buffer is an error.
    pub fn send_to(&self, buf: &[u8], to: &NetAddr) -> io::Result<usize> {
        self.io.get_ref().send_to(buf, to)
    }

    /// Poll for one datagram. Spurious readiness is cleared and retried.
    pub fn poll_recv(
        &self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<(usize, NetAddr)>> {
        loop {
            let mut guard = match self.io.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            match guard.try_io(|inner| inner.get_ref().recv_from(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }
}

impl Drop for NetSocket {
    fn drop(&mut self) {
        if let Some(path) = self.unlink.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("unlink {}: {}", path.display(), e);
            }
        }
    }
}

/// Receive buffer with headroom over what netio itself emits.
pub fn recv_buffer() -> Vec<u8> {
    vec![0u8; MTU * 2]
}
