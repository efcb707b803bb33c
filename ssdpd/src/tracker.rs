use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use shared::{Message, SubType};
use crate::observer::Observer;

/// In-memory view of remote services seen on the wire, keyed by USN.
/// Holds the latest alive announcement or search response per service.
#[derive(Clone, Default)]
pub struct ServiceTracker {
    entries: Arc<Mutex<HashMap<String, Message>>>,
}

impl ServiceTracker {
    /// Returns true if the USN was not known yet
    fn remember(&self, msg: &Message) -> bool {
        let Some(usn) = msg.usn.clone() else {
            tracing::trace!("Ignoring message without USN from {:?}", msg.sender);
            return false;
        };
        let is_new = self.entries.lock().insert(usn.clone(), msg.clone()).is_none();
        if is_new {
            tracing::info!("Discovered {} at {}", usn, msg.location);
        }
        is_new
    }

    fn forget(&self, msg: &Message) {
        if let Some(usn) = &msg.usn {
            if self.entries.lock().remove(usn).is_some() {
                tracing::info!("Service {} said byebye", usn);
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, usn: &str) -> Option<Message> {
        self.entries.lock().get(usn).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// All known services sorted by USN
    pub fn snapshot(&self) -> Vec<Message> {
        let mut entries: Vec<Message> = self.entries.lock().values().cloned().collect();
        entries.sort_by(|a, b| a.usn.cmp(&b.usn));
        entries
    }

    /// Drop entries whose max-age has elapsed at `now`. Returns the number removed.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, msg| !msg.is_expired(now));
        before - entries.len()
    }
}

impl Observer for ServiceTracker {
    fn on_notify(&self, msg: &Message) {
        match msg.sub_type {
            Some(SubType::Alive) | Some(SubType::Update) => {
                self.remember(msg);
            }
            Some(SubType::ByeBye) => self.forget(msg),
            _ => tracing::trace!("Ignoring NOTIFY with sub-type {:?}", msg.sub_type),
        }
    }

    fn on_query_response(&self, msg: &Message) {
        self.remember(msg);
    }
}

/// Periodically prune expired entries until cancelled
pub async fn run_maintenance(
    tracker: ServiceTracker,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let pruned = tracker.prune_expired(Utc::now());
                if pruned > 0 {
                    tracing::info!(
                        "Pruned {} expired service(s), {} still known",
                        pruned,
                        tracker.len()
                    );
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Service tracker shutting down");
                break;
            }
        }
    }
}
