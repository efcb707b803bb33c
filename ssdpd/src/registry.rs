use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;
use shared::protocol::{DEFAULT_ANNOUNCE_INTERVAL_SECS, SEARCH_ALL};
use shared::Message;
use crate::observer::Observer;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Service type is required")]
    MissingServiceType,
    #[error("Unique service name is required")]
    MissingUsn,
    #[error("Announce interval must be at least one second")]
    ZeroInterval,
}

/// A locally hosted service announced by this engine.
#[derive(Clone)]
pub struct Service {
    service_type: String,
    usn: String,
    location: String,
    /// Seconds between announcements, also advertised as max-age
    announce_interval_secs: u32,
    observer: Option<Arc<dyn Observer>>,
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn usn(&self) -> &str {
        &self.usn
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn announce_interval_secs(&self) -> u32 {
        self.announce_interval_secs
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.announce_interval_secs))
    }

    /// CACHE-CONTROL value sent with announcements and query responses
    pub fn cache_control(&self) -> String {
        format!("max-age {}", self.announce_interval_secs)
    }

    pub fn observer(&self) -> Option<&Arc<dyn Observer>> {
        self.observer.as_ref()
    }

    /// Whether `msg` concerns this service's type. Queries for `ssdp:all`
    /// concern every service.
    pub fn is_relevant(&self, msg: &Message) -> bool {
        match msg.service_type.as_deref() {
            Some(target) if msg.is_query() && target == SEARCH_ALL => true,
            Some(target) => target == self.service_type,
            None => false,
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("service_type", &self.service_type)
            .field("usn", &self.usn)
            .field("location", &self.location)
            .field("announce_interval_secs", &self.announce_interval_secs)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

pub struct ServiceBuilder {
    service_type: Option<String>,
    usn: Option<String>,
    location: String,
    announce_interval_secs: u32,
    observer: Option<Arc<dyn Observer>>,
}

impl Default for ServiceBuilder {
    fn default() -> Self {
        Self {
            service_type: None,
            usn: None,
            location: String::new(),
            announce_interval_secs: DEFAULT_ANNOUNCE_INTERVAL_SECS,
            observer: None,
        }
    }
}

impl ServiceBuilder {
    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    pub fn usn(mut self, usn: impl Into<String>) -> Self {
        self.usn = Some(usn.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn announce_interval_secs(mut self, secs: u32) -> Self {
        self.announce_interval_secs = secs;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Service, ServiceError> {
        let service_type = self
            .service_type
            .filter(|s| !s.trim().is_empty())
            .ok_or(ServiceError::MissingServiceType)?;
        let usn = self
            .usn
            .filter(|s| !s.trim().is_empty())
            .ok_or(ServiceError::MissingUsn)?;
        if self.announce_interval_secs == 0 {
            return Err(ServiceError::ZeroInterval);
        }

        Ok(Service {
            service_type,
            usn,
            location: self.location,
            announce_interval_secs: self.announce_interval_secs,
            observer: self.observer,
        })
    }
}

/// Locally registered services keyed by USN
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, Service>>>,
}

impl ServiceRegistry {
    /// Store `service`, replacing any previous registration with the same USN
    pub fn insert(&self, service: Service) -> Option<Service> {
        self.services.write().insert(service.usn.clone(), service)
    }

    pub fn remove(&self, usn: &str) -> Option<Service> {
        self.services.write().remove(usn)
    }

    #[cfg(test)]
    pub fn get(&self, usn: &str) -> Option<Service> {
        self.services.read().get(usn).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Copy of every registered service, sorted by USN
    pub fn snapshot(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.read().values().cloned().collect();
        services.sort_by(|a, b| a.usn.cmp(&b.usn));
        services
    }

    pub fn usns(&self) -> Vec<String> {
        let mut usns: Vec<String> = self.services.read().keys().cloned().collect();
        usns.sort();
        usns
    }

    /// Observers of the services `msg` is relevant to
    pub fn observers_for(&self, msg: &Message) -> Vec<Arc<dyn Observer>> {
        self.services
            .read()
            .values()
            .filter(|service| service.is_relevant(msg))
            .filter_map(|service| service.observer().cloned())
            .collect()
    }
}
