//! SMTP protocol implementation
//!
//! - [`reply`]: reply codes and wire formatting
//! - [`session`]: per-connection transaction state
//! - [`commands`]: the ordered command handler chain
//! - [`protocol`]: [`SmtpCommandProtocol`], DATA capture and persistence
//! - [`server`]: the listener
//! - [`client`]: outbound relay client

pub mod client;
pub mod commands;
pub mod protocol;
pub mod reply;
pub mod server;
pub mod session;

pub use client::{dot_stuff, Envelope, RelayTransport, SmtpRelayClient};
pub use commands::{CommandChain, CommandHandler, CommandKind};
pub use protocol::{SmtpCommandProtocol, SmtpContext};
pub use reply::SmtpReply;
pub use server::SmtpServer;
pub use session::SmtpSession;
