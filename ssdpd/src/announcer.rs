use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use shared::protocol::HEADER_CACHE_CONTROL;
use shared::{encode, Message, MessageKind, SubType};
use crate::registry::Service;
use crate::transport::{multicast_all, Transports};

/// `ssdp:alive` announcement for `service`
pub fn alive_message(service: &Service, server_token: &str) -> Message {
    Message::new(Some(MessageKind::Announcement))
        .with_location(service.location())
        .with_server(server_token)
        .with_service_type(service.service_type())
        .with_usn(service.usn())
        .with_sub_type(SubType::Alive)
        .with_header(HEADER_CACHE_CONTROL, service.cache_control())
}

/// Periodic alive announcements for one service.
pub struct Announcer {
    alive: Message,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Announcer {
    /// Start announcing immediately, then every announce interval. Firings are
    /// scheduled against the start time so a slow send does not shift later ones.
    pub fn spawn(
        service: &Service,
        server_token: &str,
        transports: Transports,
        parent: &CancellationToken,
    ) -> Self {
        let alive = alive_message(service, server_token);
        let cancel = parent.child_token();
        let handle = tokio::spawn(run(
            service.usn().to_string(),
            encode(&alive),
            service.announce_interval(),
            transports,
            cancel.clone(),
        ));

        Self {
            alive,
            cancel,
            handle,
        }
    }

    /// `ssdp:byebye` matching the announcements this task sends
    pub fn byebye(&self) -> Message {
        self.alive.derive_byebye()
    }

    /// Stop future firings without waiting for the task
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop future firings and wait for the task to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Announcer task failed: {}", e);
        }
    }
}

async fn run(
    usn: String,
    payload: String,
    period: Duration,
    transports: Transports,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    tracing::debug!("Announcing {} every {:?}", usn, period);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Announcer for {} stopped", usn);
                break;
            }
            _ = ticker.tick() => {
                let sent = multicast_all(&transports, &payload, &usn).await;
                tracing::trace!("NOTIFY alive for {} sent on {} interface(s)", usn, sent);
            }
        }
    }
}
