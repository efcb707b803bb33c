use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use shared::protocol::{HEADER_MAN, HEADER_MX, MAN_DISCOVER};
use shared::{encode, Message, MessageKind};
use crate::announcer::Announcer;
use crate::discovery::DiscoveryLoop;
use crate::observer::{Observer, ObserverSet};
use crate::registry::{Service, ServiceError, ServiceRegistry};
use crate::transport::{multicast_all, Transport, Transports};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("SSDP server already started")]
    AlreadyStarted,
    #[error("No network interface available for SSDP")]
    NoTransports,
    #[error("SSDP server has been shut down")]
    ShutDown,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// SSDP engine: owns the registry, one discovery loop per transport and one
/// announcer per registered service.
pub struct SsdpServer {
    registry: ServiceRegistry,
    observers: ObserverSet,
    transports: Transports,
    server_token: Arc<str>,
    receive_timeout: Duration,
    announcers: Mutex<HashMap<String, Announcer>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl SsdpServer {
    pub fn new(
        transports: Vec<Arc<dyn Transport>>,
        server_token: impl Into<String>,
        receive_timeout: Duration,
    ) -> Self {
        let server_token: String = server_token.into();
        Self {
            registry: ServiceRegistry::default(),
            observers: ObserverSet::default(),
            transports: Arc::new(transports),
            server_token: Arc::from(server_token),
            receive_timeout,
            announcers: Mutex::new(HashMap::new()),
            loops: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Subscribe to every decoded message on every interface
    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.add(observer);
    }

    /// Spawn one discovery loop per transport
    pub fn start(&self) -> Result<(), ServerError> {
        if self.cancel.is_cancelled() {
            return Err(ServerError::ShutDown);
        }
        if self.transports.is_empty() {
            return Err(ServerError::NoTransports);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let mut loops = self.loops.lock();
        for transport in self.transports.iter() {
            transport.set_receive_timeout(self.receive_timeout);
            let discovery = DiscoveryLoop::new(
                Arc::clone(transport),
                self.registry.clone(),
                self.observers.clone(),
                Arc::clone(&self.server_token),
            );
            loops.push(tokio::spawn(discovery.run(self.cancel.child_token())));
        }

        tracing::info!(
            "SSDP server started on {} interface(s) with {} observer(s)",
            self.transports.len(),
            self.observers.len()
        );
        Ok(())
    }

    /// Store `service` and start announcing it. Re-registering a USN replaces
    /// the previous record and restarts its announcer.
    pub fn register(&self, service: Service) -> Result<(), ServerError> {
        // Registry and announcer map change together under this lock
        let mut announcers = self.announcers.lock();
        if self.cancel.is_cancelled() {
            return Err(ServerError::ShutDown);
        }

        let usn = service.usn().to_string();
        let announcer = Announcer::spawn(
            &service,
            &self.server_token,
            Arc::clone(&self.transports),
            &self.cancel,
        );

        tracing::info!(
            "Registered {} ({}) announcing every {}s",
            usn,
            service.service_type(),
            service.announce_interval_secs()
        );

        self.registry.insert(service);
        if let Some(previous) = announcers.insert(usn, announcer) {
            previous.cancel();
        }
        Ok(())
    }

    /// Build and register a service
    pub fn register_service(
        &self,
        service_type: &str,
        usn: &str,
        location: &str,
        announce_interval_secs: u32,
        observer: Option<Arc<dyn Observer>>,
    ) -> Result<(), ServerError> {
        let mut builder = Service::builder()
            .service_type(service_type)
            .usn(usn)
            .location(location)
            .announce_interval_secs(announce_interval_secs);
        if let Some(observer) = observer {
            builder = builder.observer(observer);
        }
        self.register(builder.build()?)
    }

    /// Remove a service, stop its announcer and multicast `ssdp:byebye`.
    /// Returns false if the USN was not registered.
    pub async fn unregister(&self, usn: &str) -> bool {
        let (removed, announcer) = {
            let mut announcers = self.announcers.lock();
            (self.registry.remove(usn), announcers.remove(usn))
        };

        if let Some(announcer) = announcer {
            let byebye = announcer.byebye();
            announcer.stop().await;
            multicast_all(&self.transports, &encode(&byebye), usn).await;
            tracing::info!("Unregistered {}", usn);
        }

        removed.is_some()
    }

    /// Multicast an M-SEARCH for `target` on every interface
    pub async fn search(&self, target: &str, mx: u32) -> usize {
        let query = Message::new(Some(MessageKind::Query))
            .with_service_type(target)
            .with_header(HEADER_MAN, MAN_DISCOVER)
            .with_header(HEADER_MX, mx.max(1).to_string());

        let sent = multicast_all(&self.transports, &encode(&query), target).await;
        tracing::info!("M-SEARCH for {} sent on {} interface(s)", target, sent);
        sent
    }

    /// Stop every task, say byebye for every registered service and join the
    /// discovery loops. The server cannot be started again afterwards.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down SSDP server");

        {
            let _announcers = self.announcers.lock();
            self.cancel.cancel();
        }

        for usn in self.registry.usns() {
            self.unregister(&usn).await;
        }

        let loops = std::mem::take(&mut *self.loops.lock());
        for result in futures::future::join_all(loops).await {
            if let Err(e) = result {
                tracing::warn!("Discovery loop failed: {}", e);
            }
        }

        tracing::info!("SSDP server stopped");
    }
}
