use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use shared::protocol::{DEFAULT_RECEIVE_TIMEOUT_MS, MULTICAST_GROUP, MULTICAST_PORT};
use shared::Message;
use super::{Datagram, Transport, TransportError};

/// Large enough for any SSDP datagram seen in practice
const RECV_BUFFER_SIZE: usize = 8192;

/// UDP multicast transport bound to one local IPv4 interface.
pub struct UdpTransport {
    interface: Ipv4Addr,
    socket: UdpSocket,
    group: SocketAddrV4,
    receive_timeout_ms: AtomicU64,
}

impl UdpTransport {
    /// Bind `0.0.0.0:1900` with address reuse, join the SSDP group on
    /// `interface` and pin outgoing multicast to it.
    /// Must be called from within a tokio runtime.
    pub fn bind(interface: Ipv4Addr) -> Result<Self, TransportError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MULTICAST_PORT));
        socket.bind(&bind_addr.into())?;
        restrict_to_own_memberships(&socket)?;
        socket.join_multicast_v4(&MULTICAST_GROUP, &interface)?;
        socket.set_multicast_if_v4(&interface)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;

        tracing::info!(
            "SSDP socket on {} joined {}:{}",
            interface,
            MULTICAST_GROUP,
            MULTICAST_PORT
        );

        Ok(Self {
            interface,
            socket,
            group: SocketAddrV4::new(MULTICAST_GROUP, MULTICAST_PORT),
            receive_timeout_ms: AtomicU64::new(DEFAULT_RECEIVE_TIMEOUT_MS),
        })
    }

    fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn interface(&self) -> Ipv4Addr {
        self.interface
    }

    async fn send_multicast(&self, payload: &str) -> Result<(), TransportError> {
        self.socket.send_to(payload.as_bytes(), self.group).await?;
        Ok(())
    }

    async fn send_unicast_response(
        &self,
        msg: &Message,
        payload: &str,
    ) -> Result<(), TransportError> {
        let destination = msg.sender.ok_or(TransportError::MissingDestination)?;
        self.socket.send_to(payload.as_bytes(), destination).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Datagram, TransportError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        match tokio::time::timeout(self.receive_timeout(), self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, source))) => {
                buf.truncate(len);
                Ok(Datagram { payload: buf, source })
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn set_receive_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.receive_timeout_ms.store(millis, Ordering::Relaxed);
    }
}

/// Deliver only traffic for groups joined on this socket. Linux otherwise hands
/// every socket bound to the SSDP port the group traffic of all interfaces.
#[cfg(target_os = "linux")]
fn restrict_to_own_memberships(socket: &Socket) -> io::Result<()> {
    socket.set_multicast_all_v4(false)
}

#[cfg(not(target_os = "linux"))]
fn restrict_to_own_memberships(_socket: &Socket) -> io::Result<()> {
    Ok(())
}

/// Non-loopback IPv4 addresses of the local interfaces, sorted and deduplicated
pub fn local_ipv4_interfaces() -> io::Result<Vec<Ipv4Addr>> {
    let mut addrs: Vec<Ipv4Addr> = get_if_addrs::get_if_addrs()?
        .into_iter()
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(ipv4) if !ipv4.is_loopback() => Some(ipv4),
            _ => None,
        })
        .collect();
    addrs.sort();
    addrs.dedup();
    Ok(addrs)
}
