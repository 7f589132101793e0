//! Connection/line-protocol engine
//!
//! Shared by the SMTP listener and the IPC event channel:
//! - [`endpoint`]: bind/connect addresses
//! - [`connection`]: one socket, its encoding and lifecycle
//! - [`protocol`]: line reassembly and the [`Protocol`] contract
//! - [`server`]: accept loop, idle reaper and graceful shutdown

pub mod connection;
pub mod endpoint;
pub mod protocol;
pub mod server;

pub use connection::{Connection, TextEncoding};
pub use endpoint::EndpointDefinition;
pub use protocol::{Flow, LineBuffer, LineProtocol, Protocol};
pub use server::{ConnectionRegistry, ListenerOptions, TcpServer};
