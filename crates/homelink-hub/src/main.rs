//! HomeLink hub entry point.
//!
//! Wires together the infrastructure services and starts the Tokio async
//! runtime.  Headless by design: host-platform adapters and front ends
//! subscribe to the same library surface this binary uses.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()        -- TOML config, defaults on first run
//!  └─ start services
//!       ├─ DiscoveryService   (UDP background thread)
//!       ├─ announcement pump  (Tokio task → DeviceRegistry)
//!       └─ probe timer        (config-driven re-probe cadence)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use homelink_hub::application::registry::{DeviceRecord, DeviceRegistry};
use homelink_hub::infrastructure::network::discovery::{
    start_discovery, DiscoveryConfig, DiscoveryEvent, DEFAULT_BROADCAST_ADDR,
};
use homelink_hub::infrastructure::storage::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let hub_config = config::load_config()?;

    // Initialise structured logging.  `RUST_LOG` overrides the config.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(hub_config.hub.log_level.clone())),
        )
        .init();

    info!("HomeLink hub starting");

    // Seed the registry from configured devices.
    let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
    {
        let mut registry = registry.lock().await;
        for entry in &hub_config.devices {
            let token = match entry.parsed_token() {
                Ok(token) => token,
                Err(e) => {
                    warn!("device {} has a malformed token: {e}", entry.device_id);
                    None
                }
            };
            match entry.host.parse() {
                Ok(host) => registry.upsert(DeviceRecord::configured(
                    entry.device_id,
                    host,
                    hub_config.network.discovery_port,
                    token,
                    entry.model.clone(),
                )),
                Err(e) => warn!("device {} has a malformed host: {e}", entry.device_id),
            }
        }
        info!("loaded {} configured device(s)", registry.len());
    }

    // ── Discovery ─────────────────────────────────────────────────────────────
    let discovery_config = DiscoveryConfig {
        port: hub_config.network.discovery_port,
        target_addr: hub_config
            .network
            .broadcast_address
            .parse()
            .unwrap_or(DEFAULT_BROADCAST_ADDR),
        ..DiscoveryConfig::default()
    };

    let (discovery, mut discovery_rx) = match start_discovery(discovery_config) {
        Ok(pair) => pair,
        Err(e) => {
            error!("failed to start discovery: {e}");
            return Err(e.into());
        }
    };

    // ── Announcement pump ─────────────────────────────────────────────────────
    let registry_pump = Arc::clone(&registry);
    tokio::spawn(async move {
        while let Some(event) = discovery_rx.recv().await {
            match event {
                DiscoveryEvent::Started => info!("discovery listening"),
                DiscoveryEvent::Announcement(announcement) => {
                    let mut registry = registry_pump.lock().await;
                    let is_new = registry.upsert_announcement(&announcement);
                    if is_new {
                        info!(
                            "discovered device {} at {}:{} (secret {})",
                            announcement.device_id,
                            announcement.host,
                            announcement.port,
                            if announcement.has_known_secret() { "known" } else { "unknown" },
                        );
                    }
                }
                DiscoveryEvent::Error(e) => warn!("discovery error: {e}"),
                DiscoveryEvent::Stopped => {
                    info!("discovery stopped");
                    break;
                }
            }
        }
    });

    // ── Probe timer ───────────────────────────────────────────────────────────
    // The discovery service sends exactly one probe at start; the repeat
    // cadence is our policy choice, driven by configuration.
    let probe_interval = Duration::from_secs(hub_config.hub.probe_interval_secs.max(1));

    info!("HomeLink hub ready.  Press Ctrl-C to exit.");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(probe_interval) => {
                if let Err(e) = discovery.probe() {
                    warn!("discovery probe failed: {e}");
                }
            }
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("shutdown signal received");
                }
                break;
            }
        }
    }

    discovery.stop();
    info!("HomeLink hub stopped");
    Ok(())
}
