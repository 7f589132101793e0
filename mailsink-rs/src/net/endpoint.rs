//! Listen/connect endpoint definitions

use crate::error::{Result, SinkError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Immutable (address, port) pair
///
/// An address of `"any"` or an empty string maps to the wildcard bind address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointDefinition {
    address: String,
    port: u16,
}

impl EndpointDefinition {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Loopback endpoint on the given port
    pub fn loopback(port: u16) -> Self {
        Self::new("127.0.0.1", port)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the address denotes "all interfaces"
    pub fn is_wildcard(&self) -> bool {
        let address = self.address.trim();
        address.is_empty() || address.eq_ignore_ascii_case("any")
    }

    /// Resolve to a socket address suitable for bind/connect
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip = if self.is_wildcard() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else if self.address.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.address.trim().parse::<IpAddr>().map_err(|e| {
                SinkError::Config(format!("Invalid endpoint address '{}': {}", self.address, e))
            })?
        };

        Ok(SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for EndpointDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "0.0.0.0:{}", self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

impl From<SocketAddr> for EndpointDefinition {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
