mod announcer;
mod config;
mod discovery;
mod observer;
mod registry;
mod server;
mod tracker;
mod transport;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::observer::LoggingObserver;
use crate::server::SsdpServer;
use crate::tracker::ServiceTracker;
use crate::transport::{local_ipv4_interfaces, Transport, UdpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ssdpd=info"))
        )
        .init();

    tracing::info!("Starting ssdpd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/ssdpd/ssdpd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // One transport per IPv4 interface
    let interfaces = if config.server.interfaces.is_empty() {
        local_ipv4_interfaces().context("Failed to enumerate network interfaces")?
    } else {
        config.server.interfaces.clone()
    };

    let mut transports: Vec<Arc<dyn Transport>> = Vec::new();
    for interface in interfaces {
        match UdpTransport::bind(interface) {
            Ok(transport) => transports.push(Arc::new(transport)),
            Err(e) => tracing::error!("Failed to open SSDP socket on {}: {}", interface, e),
        }
    }

    let server = SsdpServer::new(
        transports,
        config.server.server_token.clone(),
        Duration::from_millis(config.server.receive_timeout_ms),
    );

    let tracker = ServiceTracker::default();
    server.add_observer(Arc::new(tracker.clone()));
    server.add_observer(Arc::new(LoggingObserver));

    server.start().context("Failed to start SSDP server")?;

    for service in &config.services {
        server
            .register_service(
                &service.service_type,
                &service.usn,
                &service.location,
                service.announce_interval_secs,
                None,
            )
            .with_context(|| format!("Failed to register service {}", service.usn))?;
    }

    tracing::info!("{} service(s) registered", server.registry().len());

    for target in &config.server.search_targets {
        server.search(target, config.server.search_mx).await;
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let maintenance_handle = tokio::spawn(tracker::run_maintenance(
        tracker.clone(),
        Duration::from_secs(config.tracker.maintenance_interval_secs),
        cancel.clone(),
    ));

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    server.shutdown().await;
    let _ = maintenance_handle.await;

    for msg in tracker.snapshot() {
        tracing::debug!(
            "Known at shutdown: {} ({}) at {}",
            msg.usn.as_deref().unwrap_or_default(),
            msg.service_type.as_deref().unwrap_or_default(),
            msg.location
        );
    }

    tracing::info!("Shutdown complete, {} remote service(s) were known", tracker.len());
    Ok(())
}
