use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::protocol::{
    HEADER_CACHE_CONTROL, MAX_AGE_UNIT_MILLIS, NO_STATUS, NTS_ALIVE, NTS_BYEBYE, NTS_UPDATE,
};

/// The three SSDP message shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKind {
    /// `M-SEARCH * HTTP/1.1`
    Query,
    /// `NOTIFY * HTTP/1.1`
    Announcement,
    /// `HTTP/1.1 <code> <reason>` sent in reply to a query
    QueryResponse,
}

impl MessageKind {
    /// Map the method token of a request line to a kind
    pub fn from_method(token: &str) -> Option<Self> {
        match token {
            "M-SEARCH" => Some(Self::Query),
            "NOTIFY" => Some(Self::Announcement),
            _ => None,
        }
    }
}

/// Notification sub-type carried in the NTS header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum SubType {
    Alive,
    ByeBye,
    Update,
    Other(String),
}

impl SubType {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case(NTS_ALIVE) {
            Self::Alive
        } else if value.eq_ignore_ascii_case(NTS_BYEBYE) {
            Self::ByeBye
        } else if value.eq_ignore_ascii_case(NTS_UPDATE) {
            Self::Update
        } else {
            Self::Other(value.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Alive => NTS_ALIVE,
            Self::ByeBye => NTS_BYEBYE,
            Self::Update => NTS_UPDATE,
            Self::Other(value) => value,
        }
    }
}

/// A single SSDP message, either decoded from the wire or built locally.
///
/// Equality and hashing only consider the identity of the advertised service:
/// sender IP, location, server token, service type and USN. Two messages that
/// differ in kind, sub-type or residual headers but describe the same service
/// instance compare equal.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Absent when no start line could be classified
    pub kind: Option<MessageKind>,

    /// Source of the datagram; `None` for locally built messages
    pub sender: Option<SocketAddr>,

    /// Description URL; empty when the header was missing
    pub location: String,

    /// SERVER banner
    pub server: Option<String>,

    /// ST for queries and responses, NT for announcements
    pub service_type: Option<String>,

    /// Unique Service Name
    pub usn: Option<String>,

    /// NTS, only meaningful for announcements
    pub sub_type: Option<SubType>,

    /// Only meaningful for query responses; `NO_STATUS` otherwise
    pub status_code: u16,

    pub status_reason: String,

    /// Remaining headers keyed by upper-cased name. Shared between a message
    /// and the messages derived from it; mutation goes through copy-on-write.
    pub headers: Arc<BTreeMap<String, String>>,

    /// Time the message was decoded or built
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Empty message of the given kind, stamped with the current time
    pub fn new(kind: Option<MessageKind>) -> Self {
        Self {
            kind,
            sender: None,
            location: String::new(),
            server: None,
            service_type: None,
            usn: None,
            sub_type: None,
            status_code: NO_STATUS,
            status_reason: String::new(),
            headers: Arc::new(BTreeMap::new()),
            received_at: Utc::now(),
        }
    }

    pub fn with_sender(mut self, sender: SocketAddr) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    pub fn with_usn(mut self, usn: impl Into<String>) -> Self {
        self.usn = Some(usn.into());
        self
    }

    pub fn with_sub_type(mut self, sub_type: SubType) -> Self {
        self.sub_type = Some(sub_type);
        self
    }

    pub fn with_status(mut self, code: u16, reason: impl Into<String>) -> Self {
        self.status_code = code;
        self.status_reason = reason.into();
        self
    }

    /// Add a residual header. Copies the header bag first if it is shared.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.headers).insert(name.to_ascii_uppercase(), value.into());
        self
    }

    pub fn sender_ip(&self) -> Option<IpAddr> {
        self.sender.map(|addr| addr.ip())
    }

    /// Residual header lookup, case-insensitive on the name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    pub fn header_names(&self) -> Vec<String> {
        self.headers.keys().cloned().collect()
    }

    pub fn is_query(&self) -> bool {
        self.kind == Some(MessageKind::Query)
    }

    pub fn is_announcement(&self) -> bool {
        self.kind == Some(MessageKind::Announcement)
    }

    pub fn is_query_response(&self) -> bool {
        self.kind == Some(MessageKind::QueryResponse)
    }

    pub fn is_alive(&self) -> bool {
        self.is_announcement() && self.sub_type == Some(SubType::Alive)
    }

    pub fn is_byebye(&self) -> bool {
        self.is_announcement() && self.sub_type == Some(SubType::ByeBye)
    }

    /// Value of a `max-age=<n>` CACHE-CONTROL directive, if present
    pub fn max_age(&self) -> Option<u64> {
        let (option, value) = parse_cache_control(self.header(HEADER_CACHE_CONTROL)?)?;
        option.eq_ignore_ascii_case("max-age").then_some(value)
    }

    /// True once more than `max-age` units have elapsed since `received_at`.
    /// Messages without a parseable max-age never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age() else {
            return false;
        };
        let ttl_millis = i64::try_from(max_age)
            .unwrap_or(i64::MAX)
            .saturating_mul(MAX_AGE_UNIT_MILLIS);
        (now - self.received_at).num_milliseconds() > ttl_millis
    }

    /// Copy of this message as an `ssdp:alive` announcement
    pub fn derive_alive(&self) -> Message {
        self.derive_announcement(SubType::Alive)
    }

    /// Copy of this message as an `ssdp:byebye` announcement
    pub fn derive_byebye(&self) -> Message {
        self.derive_announcement(SubType::ByeBye)
    }

    fn derive_announcement(&self, sub_type: SubType) -> Message {
        Message {
            kind: Some(MessageKind::Announcement),
            sub_type: Some(sub_type),
            status_code: NO_STATUS,
            status_reason: String::new(),
            headers: Arc::clone(&self.headers),
            ..self.clone()
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.sender_ip() == other.sender_ip()
            && self.location == other.location
            && self.server == other.server
            && self.service_type == other.service_type
            && self.usn == other.usn
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sender_ip().hash(state);
        self.location.hash(state);
        self.server.hash(state);
        self.service_type.hash(state);
        self.usn.hash(state);
    }
}

/// Split `<option>=<integer>` into its parts, tolerating surrounding whitespace
/// and trailing text after the digits.
fn parse_cache_control(value: &str) -> Option<(&str, u64)> {
    let (option, rest) = value.trim().split_once('=')?;
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let value = rest[..end].parse().ok()?;
    Some((option.trim(), value))
}
