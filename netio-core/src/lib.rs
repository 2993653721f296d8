//! netio: connectionless publish/subscribe synchronization of named scalar
//! parameters between control processes, plus a small acknowledged message
//! channel.
//!
//! Host-driven: no I/O here. The host binds sockets, feeds datagrams and timer
//! ticks into the [`Engine`] and sends the [`Transmit`]s it queues.

pub mod addr;
pub mod arena;
pub mod engine;
pub mod message;
pub mod param;
pub mod peer;
pub mod protocol;
pub mod socket;
pub mod timer;
pub mod wire;

pub use addr::{resolve, resolve_uri, AddressError, Family, NetAddr, UnixName};
pub use engine::{Engine, EngineConfig, EngineError, Transmit, TransmitKind};
pub use message::{Message, MessageError, MessageKind};
pub use param::{BoundParam, Owner, ParamError, ParamId, ParamSpec, Parameter};
pub use peer::{PeerId, PeerRef, Remote};
pub use protocol::{Token, MTU};
pub use socket::{Role, SocketKey};
