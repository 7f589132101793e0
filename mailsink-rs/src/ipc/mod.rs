//! Event bridge between cooperating local processes
//!
//! Runs the same connection/line-protocol stack as SMTP:
//! - [`event`]: JSON line frames
//! - [`protocol`]: [`IpcEventProtocol`], frames into the event bus
//! - [`server`]: loopback listener
//! - [`client`]: best-effort publisher

pub mod client;
pub mod event;
pub mod protocol;
pub mod server;

pub use client::{IpcClient, PublishOutcome, DEFAULT_PUBLISH_TIMEOUT};
pub use event::{decode_frame, encode_frame};
pub use protocol::IpcEventProtocol;
pub use server::IpcServer;
