use std::sync::Arc;
use parking_lot::RwLock;
use shared::{Message, MessageKind};

/// Receiver of decoded SSDP traffic. All methods are fire-and-forget and must
/// return quickly: they run on the discovery loop of the receiving interface.
pub trait Observer: Send + Sync {
    /// NOTIFY seen (alive, byebye or update)
    fn on_notify(&self, _msg: &Message) {}

    /// M-SEARCH seen
    fn on_query(&self, _msg: &Message) {}

    /// Response to an M-SEARCH seen
    fn on_query_response(&self, _msg: &Message) {}
}

/// Route `msg` to the observer method matching its kind. Unclassified
/// messages are dropped.
pub fn dispatch(observer: &dyn Observer, msg: &Message) {
    match msg.kind {
        Some(MessageKind::Announcement) => observer.on_notify(msg),
        Some(MessageKind::Query) => observer.on_query(msg),
        Some(MessageKind::QueryResponse) => observer.on_query_response(msg),
        None => {}
    }
}

/// Add-only set of observers, safe to extend while dispatching
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Arc<RwLock<Vec<Arc<dyn Observer>>>>,
}

impl ObserverSet {
    pub fn add(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Dispatch to a snapshot so observers can subscribe from a callback
    pub fn dispatch(&self, msg: &Message) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            dispatch(observer.as_ref(), msg);
        }
    }
}

/// Logs every event as a JSON snapshot of the message
pub struct LoggingObserver;

impl LoggingObserver {
    fn log(event: &str, msg: &Message) {
        match serde_json::to_string(msg) {
            Ok(json) => tracing::debug!("{}: {}", event, json),
            Err(e) => tracing::warn!("Failed to serialize {} message: {}", event, e),
        }
    }
}

impl Observer for LoggingObserver {
    fn on_notify(&self, msg: &Message) {
        Self::log("NOTIFY", msg);
    }

    fn on_query(&self, msg: &Message) {
        Self::log("M-SEARCH", msg);
    }

    fn on_query_response(&self, msg: &Message) {
        Self::log("M-SEARCH response", msg);
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records the event name and USN of every callback
    #[derive(Default)]
    pub struct RecordingObserver {
        pub events: Mutex<Vec<(&'static str, Option<String>)>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<(&'static str, Option<String>)> {
            self.events.lock().clone()
        }
    }

    impl Observer for RecordingObserver {
        fn on_notify(&self, msg: &Message) {
            self.events.lock().push(("notify", msg.usn.clone()));
        }

        fn on_query(&self, msg: &Message) {
            self.events.lock().push(("query", msg.usn.clone()));
        }

        fn on_query_response(&self, msg: &Message) {
            self.events.lock().push(("query_response", msg.usn.clone()));
        }
    }

    fn message(kind: Option<MessageKind>) -> Message {
        Message::new(kind).with_usn("uuid:1")
    }

    #[test]
    fn test_dispatch_by_kind() {
        let recorder = RecordingObserver::default();

        dispatch(&recorder, &message(Some(MessageKind::Announcement)));
        dispatch(&recorder, &message(Some(MessageKind::Query)));
        dispatch(&recorder, &message(Some(MessageKind::QueryResponse)));
        dispatch(&recorder, &message(None));

        let names: Vec<_> = recorder.events().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["notify", "query", "query_response"]);
    }

    #[test]
    fn test_observer_set_fans_out() {
        let set = ObserverSet::default();
        let first = Arc::new(RecordingObserver::default());
        let second = Arc::new(RecordingObserver::default());
        set.add(first.clone());
        set.add(second.clone());

        set.dispatch(&message(Some(MessageKind::Announcement)));

        assert_eq!(set.len(), 2);
        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }

    /// Subscribes another observer from inside a callback
    struct Subscriber {
        set: ObserverSet,
        added: Arc<RecordingObserver>,
    }

    impl Observer for Subscriber {
        fn on_notify(&self, _msg: &Message) {
            self.set.add(self.added.clone());
        }
    }

    #[test]
    fn test_subscribe_during_dispatch() {
        let set = ObserverSet::default();
        let added = Arc::new(RecordingObserver::default());
        set.add(Arc::new(Subscriber {
            set: set.clone(),
            added: added.clone(),
        }));

        set.dispatch(&message(Some(MessageKind::Announcement)));
        assert_eq!(set.len(), 2);
        assert!(added.events().is_empty());

        set.dispatch(&message(Some(MessageKind::Announcement)));
        assert_eq!(added.events().len(), 1);
    }
}
