use std::net::Ipv4Addr;
use std::path::Path;
use serde::Deserialize;
use anyhow::{ensure, Context, Result};
use shared::protocol::{DEFAULT_ANNOUNCE_INTERVAL_SECS, DEFAULT_RECEIVE_TIMEOUT_MS};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Local IPv4 addresses to serve; empty means every non-loopback interface
    #[serde(default)]
    pub interfaces: Vec<Ipv4Addr>,
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_server_token")]
    pub server_token: String,
    /// M-SEARCH targets sent once at start-up
    #[serde(default)]
    pub search_targets: Vec<String>,
    #[serde(default = "default_search_mx")]
    pub search_mx: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

/// A service announced by this host
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_type: String,
    pub usn: String,
    #[serde(default)]
    pub location: String,
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u32,
}

fn default_receive_timeout() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}

fn default_server_token() -> String {
    format!(
        "{}/{} UPnP/1.0 ssdpd/{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION")
    )
}

fn default_search_mx() -> u32 {
    3
}

fn default_maintenance_interval() -> u64 {
    30
}

fn default_announce_interval() -> u32 {
    DEFAULT_ANNOUNCE_INTERVAL_SECS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            receive_timeout_ms: default_receive_timeout(),
            server_token: default_server_token(),
            search_targets: Vec::new(),
            search_mx: default_search_mx(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.tracker.maintenance_interval_secs > 0,
            "tracker.maintenance_interval_secs must be positive"
        );
        for service in &self.services {
            ensure!(
                service.announce_interval_secs > 0,
                "announce_interval_secs of {} must be positive",
                service.usn
            );
        }
        Ok(())
    }
}
