//! homelink-hub library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::registry::{DeviceRecord, DeviceRegistry, DeviceState};
pub use infrastructure::network::correlation::{CallError, CorrelationEngine, CorrelationId};
pub use infrastructure::network::discovery::{
    start_discovery, DiscoveryConfig, DiscoveryError, DiscoveryEvent, DiscoveryHandle,
};
pub use infrastructure::network::session::{
    CallOptions, ClosePolicy, CloudFallback, DeviceSession, SessionConfig, SessionEvent,
};
pub use infrastructure::network::transport::{
    Transport, TransportError, TransportEvent, TransportKind, TransportState,
};
pub use infrastructure::storage::config::{load_config, save_config, ConfigError, HubConfig};
