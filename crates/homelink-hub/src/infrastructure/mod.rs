//! Infrastructure layer for the hub.
//!
//! Contains OS-facing adapters: network sockets (discovery, transports,
//! device sessions) and file-system storage for configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `homelink_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
