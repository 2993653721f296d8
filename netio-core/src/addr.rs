//! Address resolution: URI-shaped text plus an optional family hint into a native address.
//!
//! UNIX names are paths, or abstract-namespace names when written with a leading `@`.
//! INET names are `host:port`, `[host]:port` for IPv6, or a bare host (port 0).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// Usable bytes in `sockaddr_un.sun_path`.
const SUN_PATH_LEN: usize = 108;

/// Address family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Unix,
    Inet,
    Inet6,
}

impl Family {
    /// URI scheme used when printing addresses of this family.
    pub fn scheme(self) -> &'static str {
        match self {
            Family::Unix => "unix",
            Family::Inet => "udp4",
            Family::Inet6 => "udp6",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Name of a UNIX-domain datagram socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnixName {
    /// Filesystem path.
    Path(PathBuf),
    /// Linux abstract namespace, without the leading NUL.
    Abstract(Vec<u8>),
    /// Peer that never bound a name. Replies are impossible.
    Unnamed,
}

/// Native socket address for any supported family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NetAddr {
    Unix(UnixName),
    Inet(SocketAddr),
}

impl NetAddr {
    pub fn family(&self) -> Family {
        match self {
            NetAddr::Unix(_) => Family::Unix,
            NetAddr::Inet(SocketAddr::V4(_)) => Family::Inet,
            NetAddr::Inet(SocketAddr::V6(_)) => Family::Inet6,
        }
    }

    /// Generate an address for an auto-bound socket of `family`.
    pub fn auto(family: Family) -> NetAddr {
        match family {
            Family::Unix => {
                let name = format!("netio-{}-{:08x}", std::process::id(), rand::random::<u32>());
                NetAddr::Unix(UnixName::Abstract(name.into_bytes()))
            }
            Family::Inet => NetAddr::Inet(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)),
            Family::Inet6 => NetAddr::Inet(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)),
        }
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetAddr::Unix(UnixName::Path(p)) => write!(f, "unix:{}", p.display()),
            NetAddr::Unix(UnixName::Abstract(name)) => {
                write!(f, "unix:@{}", String::from_utf8_lossy(name))
            }
            NetAddr::Unix(UnixName::Unnamed) => f.write_str("unix:"),
            NetAddr::Inet(sa) => write!(f, "{}:{}", self.family().scheme(), sa),
        }
    }
}

impl From<SocketAddr> for NetAddr {
    fn from(sa: SocketAddr) -> Self {
        NetAddr::Inet(sa)
    }
}

/// Error translating text into an address.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("no family in '{0}'")]
    NoScheme(String),
    #[error("unknown address family '{0}'")]
    UnknownScheme(String),
    #[error("cannot detect address family of '{0}'")]
    UnknownFamily(String),
    #[error("bad port in '{0}'")]
    BadPort(String),
    #[error("unix socket name too long: '{0}'")]
    TooLong(String),
    #[error("resolve '{addr}': {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no {family} address for '{addr}'")]
    NoAddress { addr: String, family: Family },
}

/// Split `unix:...`, `udp:...`, `udp4:...` or `udp6:...` into family and remainder.
pub fn split_scheme(uri: &str) -> Result<(Family, &str), AddressError> {
    let (scheme, rest) = uri
        .split_once(':')
        .ok_or_else(|| AddressError::NoScheme(uri.to_string()))?;
    let family = match scheme {
        "unix" => Family::Unix,
        "udp" | "udp4" => Family::Inet,
        "udp6" => Family::Inet6,
        _ => return Err(AddressError::UnknownScheme(scheme.to_string())),
    };
    Ok((family, rest))
}

/// Cut a `?query` or `#fragment` anchor.
pub fn strip_anchor(text: &str) -> &str {
    match text.find(|c| c == '?' || c == '#') {
        Some(i) => &text[..i],
        None => text,
    }
}

/// Guess the family of an address without scheme.
pub fn detect_family(text: &str) -> Option<Family> {
    if text.starts_with('@') || text.contains('/') {
        Some(Family::Unix)
    } else if text.starts_with('[') {
        Some(Family::Inet6)
    } else if text.contains('.') {
        Some(Family::Inet)
    } else {
        None
    }
}

/// Translate `text` into a native address. May block on host name resolution.
pub fn resolve(text: &str, family: Option<Family>) -> Result<NetAddr, AddressError> {
    let text = strip_anchor(text);
    let family = match family {
        Some(f) => f,
        None => {
            detect_family(text).ok_or_else(|| AddressError::UnknownFamily(text.to_string()))?
        }
    };
    match family {
        Family::Unix => resolve_unix(text),
        Family::Inet | Family::Inet6 => resolve_inet(text, family),
    }
}

/// Resolve a full URI (`udp4:host:port#name`) using its scheme as family.
pub fn resolve_uri(uri: &str) -> Result<NetAddr, AddressError> {
    let (family, rest) = split_scheme(uri)?;
    resolve(rest, Some(family))
}

fn resolve_unix(text: &str) -> Result<NetAddr, AddressError> {
    if text.is_empty() {
        return Ok(NetAddr::auto(Family::Unix));
    }
    if let Some(name) = text.strip_prefix('@') {
        // abstract names lose the NUL terminator, so one extra byte is usable
        if name.len() >= SUN_PATH_LEN {
            return Err(AddressError::TooLong(text.to_string()));
        }
        return Ok(NetAddr::Unix(UnixName::Abstract(name.as_bytes().to_vec())));
    }
    if text.len() >= SUN_PATH_LEN {
        return Err(AddressError::TooLong(text.to_string()));
    }
    Ok(NetAddr::Unix(UnixName::Path(PathBuf::from(text))))
}

fn resolve_inet(text: &str, family: Family) -> Result<NetAddr, AddressError> {
    let (host, port) = if let Some(rest) = text.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| AddressError::UnknownFamily(text.to_string()))?;
        (host, after.strip_prefix(':'))
    } else {
        match text.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (text, None),
        }
    };
    let port = match port {
        None | Some("") => 0,
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| AddressError::BadPort(text.to_string()))?,
    };

    let wanted = |ip: &IpAddr| match family {
        Family::Inet6 => ip.is_ipv6(),
        _ => ip.is_ipv4(),
    };

    if host.is_empty() || host == "*" {
        let ip: IpAddr = match family {
            Family::Inet6 => Ipv6Addr::UNSPECIFIED.into(),
            _ => Ipv4Addr::UNSPECIFIED.into(),
        };
        return Ok(NetAddr::Inet(SocketAddr::new(ip, port)));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if !wanted(&ip) {
            return Err(AddressError::NoAddress {
                addr: text.to_string(),
                family,
            });
        }
        return Ok(NetAddr::Inet(SocketAddr::new(ip, port)));
    }

    let candidates = (host, port)
        .to_socket_addrs()
        .map_err(|source| AddressError::Resolve {
            addr: text.to_string(),
            source,
        })?;
    candidates
        .into_iter()
        .find(|sa| wanted(&sa.ip()))
        .map(NetAddr::Inet)
        .ok_or_else(|| AddressError::NoAddress {
            addr: text.to_string(),
            family,
        })
}
