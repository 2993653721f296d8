//! netio on Linux: real datagram sockets and a single-threaded event loop
//! around the `netio-core` engine.

pub mod config;
pub mod node;
pub mod socket;

pub use config::{Config, ConfigError};
pub use node::{Node, NodeError};
