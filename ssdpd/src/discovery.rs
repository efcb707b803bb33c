use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use shared::protocol::HEADER_CACHE_CONTROL;
use shared::{decode, encode, Message, MessageKind, SubType};
use crate::observer::{self, ObserverSet};
use crate::registry::{Service, ServiceRegistry};
use crate::transport::{Datagram, Transport, TransportError};

/// Response to `query` advertising `service`, addressed to the query's sender
pub fn query_response(service: &Service, query: &Message, server_token: &str) -> Message {
    let response = Message::new(Some(MessageKind::QueryResponse))
        .with_status(200, "OK")
        .with_location(service.location())
        .with_server(server_token)
        .with_service_type(service.service_type())
        .with_usn(service.usn())
        .with_sub_type(SubType::Alive)
        .with_header(HEADER_CACHE_CONTROL, service.cache_control());

    match query.sender {
        Some(sender) => response.with_sender(sender),
        None => response,
    }
}

/// Receive loop for one interface: answers queries for registered services
/// and hands every decoded message to the observers.
pub struct DiscoveryLoop {
    transport: Arc<dyn Transport>,
    registry: ServiceRegistry,
    observers: ObserverSet,
    server_token: Arc<str>,
}

impl DiscoveryLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: ServiceRegistry,
        observers: ObserverSet,
        server_token: Arc<str>,
    ) -> Self {
        Self {
            transport,
            registry,
            observers,
            server_token,
        }
    }

    /// Run until `cancel` fires. A pending receive is abandoned on cancellation.
    pub async fn run(self, cancel: CancellationToken) {
        let interface = self.transport.interface();
        tracing::info!("Discovery loop listening on {}", interface);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Discovery loop on {} shutting down", interface);
                    break;
                }
                received = self.transport.receive() => match received {
                    Ok(datagram) => self.process(datagram).await,
                    Err(TransportError::Timeout) => {
                        tracing::trace!("No SSDP traffic on {} within timeout", interface);
                    }
                    Err(e) => {
                        tracing::warn!("SSDP receive error on {}: {}", interface, e);
                    }
                }
            }
        }
    }

    /// Handle one datagram
    pub async fn process(&self, datagram: Datagram) {
        let msg = decode(&datagram.payload, datagram.source);

        tracing::debug!(
            "SSDP {:?} from {} (ST: {:?}, USN: {:?}, Location: {}, NTS: {:?})",
            msg.kind,
            datagram.source,
            msg.service_type,
            msg.usn,
            msg.location,
            msg.sub_type.as_ref().map(SubType::as_str)
        );

        if msg.is_query() {
            self.answer_query(&msg).await;
        }
        self.dispatch(&msg);
    }

    /// Unicast one response per registered service. Returns the number sent.
    async fn answer_query(&self, query: &Message) -> usize {
        let mut sent = 0;
        for service in self.registry.snapshot() {
            let response = query_response(&service, query, &self.server_token);
            let payload = encode(&response);

            match self.transport.send_unicast_response(&response, &payload).await {
                Ok(()) => {
                    sent += 1;
                    tracing::debug!(
                        "Answered M-SEARCH from {:?} with {}",
                        query.sender,
                        service.usn()
                    );
                }
                Err(TransportError::Timeout) => {
                    tracing::debug!("Timed out answering M-SEARCH for {}", service.usn());
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to answer M-SEARCH from {:?} for {}: {}",
                        query.sender,
                        service.usn(),
                        e
                    );
                }
            }
        }
        sent
    }

    fn dispatch(&self, msg: &Message) {
        self.observers.dispatch(msg);
        for observer in self.registry.observers_for(msg) {
            observer::dispatch(observer.as_ref(), msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use crate::observer::tests::RecordingObserver;
    use crate::transport::memory::MemoryTransport;

    const MSEARCH: &str = "M-SEARCH * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        MAN: \"ssdp:discover\"\r\n\
        MX: 3\r\n\
        ST: ssdp:all\r\n\
        \r\n";

    const NOTIFY: &str = "NOTIFY * HTTP/1.1\r\n\
        HOST: 239.255.255.250:1900\r\n\
        CACHE-CONTROL: max-age=1800\r\n\
        LOCATION: http://10.0.0.9/desc.xml\r\n\
        NT: urn:foo\r\n\
        NTS: ssdp:alive\r\n\
        USN: uuid:remote::urn:foo\r\n\
        \r\n";

    fn querier() -> SocketAddr {
        "10.0.0.7:50123".parse().unwrap()
    }

    fn service() -> Service {
        Service::builder()
            .service_type("urn:foo")
            .usn("uuid:1")
            .location("http://h/d.xml")
            .announce_interval_secs(60)
            .build()
            .unwrap()
    }

    fn datagram(payload: &str, source: SocketAddr) -> Datagram {
        Datagram {
            payload: payload.as_bytes().to_vec(),
            source,
        }
    }

    fn discovery_loop(
        transport: Arc<MemoryTransport>,
        registry: ServiceRegistry,
        observers: ObserverSet,
    ) -> DiscoveryLoop {
        DiscoveryLoop::new(transport, registry, observers, Arc::from("test/1.0"))
    }

    #[tokio::test]
    async fn test_query_answered_per_service() {
        let transport = MemoryTransport::new(Ipv4Addr::new(10, 0, 0, 1));
        let registry = ServiceRegistry::default();
        registry.insert(service());
        let lp = discovery_loop(transport.clone(), registry, ObserverSet::default());

        lp.process(datagram(MSEARCH, querier())).await;

        let sent = transport.unicast_sent();
        assert_eq!(sent.len(), 1);
        let (destination, payload) = &sent[0];
        assert_eq!(*destination, querier());
        assert!(payload.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(payload.contains("CACHE-CONTROL: max-age 60\r\n"));
        assert!(payload.contains("USN: uuid:1\r\n"));

        let response = decode(payload.as_bytes(), "10.0.0.1:1900".parse().unwrap());
        assert!(response.is_query_response());
        assert_eq!(response.status_code, 200);
        assert_eq!(response.service_type.as_deref(), Some("urn:foo"));
        assert_eq!(response.location, "http://h/d.xml");
    }

    #[tokio::test]
    async fn test_notify_not_answered() {
        let transport = MemoryTransport::new(Ipv4Addr::new(10, 0, 0, 1));
        let registry = ServiceRegistry::default();
        registry.insert(service());
        let lp = discovery_loop(transport.clone(), registry, ObserverSet::default());

        lp.process(datagram(NOTIFY, "10.0.0.9:1900".parse().unwrap())).await;

        assert!(transport.unicast_sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_still_dispatches() {
        let transport = MemoryTransport::new(Ipv4Addr::new(10, 0, 0, 1));
        transport.fail_sends(true);
        let registry = ServiceRegistry::default();
        registry.insert(service());
        let observers = ObserverSet::default();
        let recorder = Arc::new(RecordingObserver::default());
        observers.add(recorder.clone());
        let lp = discovery_loop(transport.clone(), registry, observers);

        lp.process(datagram(MSEARCH, querier())).await;

        assert!(transport.unicast_sent().is_empty());
        assert_eq!(recorder.events(), vec![("query", None)]);
    }

    #[tokio::test]
    async fn test_events_dispatched_by_kind() {
        let transport = MemoryTransport::new(Ipv4Addr::new(10, 0, 0, 1));
        let observers = ObserverSet::default();
        let recorder = Arc::new(RecordingObserver::default());
        observers.add(recorder.clone());
        let lp = discovery_loop(transport, ServiceRegistry::default(), observers);
        let source: SocketAddr = "10.0.0.9:1900".parse().unwrap();

        lp.process(datagram(NOTIFY, source)).await;
        lp.process(datagram(MSEARCH, source)).await;
        lp.process(datagram("HTTP/1.1 200 OK\r\nUSN: uuid:r\r\n\r\n", source)).await;
        lp.process(datagram("garbage", source)).await;

        assert_eq!(
            recorder.events(),
            vec![
                ("notify", Some("uuid:remote::urn:foo".to_string())),
                ("query", None),
                ("query_response", Some("uuid:r".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_service_observer_sees_relevant_traffic() {
        let transport = MemoryTransport::new(Ipv4Addr::new(10, 0, 0, 1));
        let recorder = Arc::new(RecordingObserver::default());
        let registry = ServiceRegistry::default();
        registry.insert(
            Service::builder()
                .service_type("urn:foo")
                .usn("uuid:1")
                .observer(recorder.clone())
                .build()
                .unwrap(),
        );
        let lp = discovery_loop(transport, registry, ObserverSet::default());
        let source: SocketAddr = "10.0.0.9:1900".parse().unwrap();

        lp.process(datagram(NOTIFY, source)).await;
        lp.process(datagram(&NOTIFY.replace("urn:foo", "urn:bar"), source)).await;

        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test]
    async fn test_run_processes_and_stops() {
        let transport = MemoryTransport::new(Ipv4Addr::new(10, 0, 0, 1));
        transport.set_receive_timeout(Duration::from_millis(10));
        let registry = ServiceRegistry::default();
        registry.insert(service());
        let lp = discovery_loop(transport.clone(), registry, ObserverSet::default());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(lp.run(cancel.clone()));

        transport.inject(MSEARCH, querier());
        for _ in 0..100 {
            if !transport.unicast_sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop promptly")
            .unwrap();
        assert_eq!(transport.unicast_sent().len(), 1);
    }

    #[tokio::test]
    async fn test_run_survives_receive_error() {
        let transport = MemoryTransport::new(Ipv4Addr::new(10, 0, 0, 1));
        transport.set_receive_timeout(Duration::from_millis(10));
        transport.fail_next_receive();
        let registry = ServiceRegistry::default();
        registry.insert(service());
        let lp = discovery_loop(transport.clone(), registry, ObserverSet::default());
        let cancel = CancellationToken::new();

        transport.inject(MSEARCH, querier());
        let handle = tokio::spawn(lp.run(cancel.clone()));
        for _ in 0..100 {
            if !transport.unicast_sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        cancel.cancel();
        handle.await.unwrap();
        assert!(!transport.receive_failure_pending());
        assert_eq!(transport.unicast_sent().len(), 1);
    }
}
