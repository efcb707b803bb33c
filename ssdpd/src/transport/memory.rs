//! In-memory transport for tests: scripted inbound datagrams, recorded sends.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use shared::Message;
use super::{Datagram, Transport, TransportError};

pub struct MemoryTransport {
    interface: Ipv4Addr,
    inbound_tx: mpsc::UnboundedSender<Datagram>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    multicast: Mutex<Vec<String>>,
    unicast: Mutex<Vec<(SocketAddr, String)>>,
    receive_timeout: Mutex<Duration>,
    fail_sends: AtomicBool,
    fail_next_receive: AtomicBool,
}

impl MemoryTransport {
    pub fn new(interface: Ipv4Addr) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            interface,
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            multicast: Mutex::new(Vec::new()),
            unicast: Mutex::new(Vec::new()),
            receive_timeout: Mutex::new(Duration::from_millis(50)),
            fail_sends: AtomicBool::new(false),
            fail_next_receive: AtomicBool::new(false),
        })
    }

    /// Queue a datagram for the next `receive`
    pub fn inject(&self, payload: &str, source: SocketAddr) {
        let _ = self.inbound_tx.send(Datagram {
            payload: payload.as_bytes().to_vec(),
            source,
        });
    }

    pub fn multicast_sent(&self) -> Vec<String> {
        self.multicast.lock().clone()
    }

    pub fn unicast_sent(&self) -> Vec<(SocketAddr, String)> {
        self.unicast.lock().clone()
    }

    pub fn receive_timeout(&self) -> Duration {
        *self.receive_timeout.lock()
    }

    /// Make every send fail with an IO error
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make the next `receive` fail with an IO error
    pub fn fail_next_receive(&self) {
        self.fail_next_receive.store(true, Ordering::SeqCst);
    }

    /// Whether a requested receive failure is still pending
    pub fn receive_failure_pending(&self) -> bool {
        self.fail_next_receive.load(Ordering::SeqCst)
    }

    fn check_send(&self) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "send disabled",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn interface(&self) -> Ipv4Addr {
        self.interface
    }

    async fn send_multicast(&self, payload: &str) -> Result<(), TransportError> {
        self.check_send()?;
        self.multicast.lock().push(payload.to_string());
        Ok(())
    }

    async fn send_unicast_response(
        &self,
        msg: &Message,
        payload: &str,
    ) -> Result<(), TransportError> {
        self.check_send()?;
        let destination = msg.sender.ok_or(TransportError::MissingDestination)?;
        self.unicast.lock().push((destination, payload.to_string()));
        Ok(())
    }

    async fn receive(&self) -> Result<Datagram, TransportError> {
        if self.fail_next_receive.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "receive disabled",
            )));
        }
        let timeout = self.receive_timeout();
        let mut rx = self.inbound_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(datagram)) => Ok(datagram),
            Ok(None) | Err(_) => Err(TransportError::Timeout),
        }
    }

    fn set_receive_timeout(&self, timeout: Duration) {
        *self.receive_timeout.lock() = timeout;
    }
}
