//! Per-interface datagram transport used by the discovery loop and announcers.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use shared::Message;

pub mod udp;

#[cfg(test)]
pub mod memory;

pub use udp::{local_ipv4_interfaces, UdpTransport};

/// Errors raised by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Nothing arrived within the receive timeout. Part of normal polling.
    #[error("Receive timed out")]
    Timeout,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Message has no sender address to reply to")]
    MissingDestination,
}

/// A datagram and the address it came from
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
}

/// One SSDP endpoint bound to a single local IPv4 interface.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Local interface address this transport is bound to
    fn interface(&self) -> Ipv4Addr;

    /// Send `payload` to the SSDP multicast group
    async fn send_multicast(&self, payload: &str) -> Result<(), TransportError>;

    /// Send `payload` to the sender of `msg`
    async fn send_unicast_response(&self, msg: &Message, payload: &str)
        -> Result<(), TransportError>;

    /// Wait for the next datagram, at most for the configured receive timeout
    async fn receive(&self) -> Result<Datagram, TransportError>;

    fn set_receive_timeout(&self, timeout: Duration);
}

/// Shared list of transports, one per interface
pub type Transports = Arc<Vec<Arc<dyn Transport>>>;

/// Multicast `payload` on every transport. A failure on one interface does not
/// prevent sending on the others. Returns the number of successful sends.
pub async fn multicast_all(transports: &Transports, payload: &str, what: &str) -> usize {
    let mut sent = 0;
    for transport in transports.iter() {
        match transport.send_multicast(payload).await {
            Ok(()) => {
                sent += 1;
                tracing::debug!("Multicast {} on {}", what, transport.interface());
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to multicast {} on {}: {}",
                    what,
                    transport.interface(),
                    e
                );
            }
        }
    }
    sent
}
