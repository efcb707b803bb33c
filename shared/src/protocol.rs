use std::net::Ipv4Addr;

/// SSDP multicast group address
pub const MULTICAST_ADDRESS: &str = "239.255.255.250";
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// SSDP multicast port
pub const MULTICAST_PORT: u16 = 1900;

/// Line terminator used on the wire
pub const NEWLINE: &str = "\r\n";

/// Notification sub-types carried in the NTS header
pub const NTS_ALIVE: &str = "ssdp:alive";
pub const NTS_BYEBYE: &str = "ssdp:byebye";
pub const NTS_UPDATE: &str = "ssdp:update";

/// Search target matching every service
pub const SEARCH_ALL: &str = "ssdp:all";

/// MAN header value required on M-SEARCH
pub const MAN_DISCOVER: &str = "\"ssdp:discover\"";

/// Header names promoted to named fields on decode
pub const HEADER_LOCATION: &str = "LOCATION";
pub const HEADER_SERVER: &str = "SERVER";
pub const HEADER_ST: &str = "ST";
pub const HEADER_NT: &str = "NT";
pub const HEADER_USN: &str = "USN";
pub const HEADER_NTS: &str = "NTS";
pub const HEADER_HOST: &str = "HOST";
pub const HEADER_CACHE_CONTROL: &str = "CACHE-CONTROL";
pub const HEADER_MAN: &str = "MAN";
pub const HEADER_MX: &str = "MX";

/// Status code of a message that is not an HTTP-style response
pub const NO_STATUS: u16 = 999;

/// Milliseconds per max-age unit used by expiry checks.
/// Wire-compatible with existing peers of this engine; standard SSDP uses 1000.
pub const MAX_AGE_UNIT_MILLIS: i64 = 1200;

/// Default receive timeout for discovery sockets, in milliseconds
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 5_000;

/// Default announcement interval (also the advertised max-age), in seconds
pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u32 = 60;

/// `HOST` header value for multicast traffic
pub fn multicast_host() -> String {
    format!("{}:{}", MULTICAST_ADDRESS, MULTICAST_PORT)
}
