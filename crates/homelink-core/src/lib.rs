//! # homelink-core
//!
//! Shared library for HomeLink containing the wire codec, symmetric
//! crypto, JSON command types, and the device domain model.
//!
//! This crate is used by the hub application and by anything else that
//! needs to speak the device LAN protocol.  It has zero dependencies on
//! OS APIs or network sockets.
//!
//! # Protocol overview
//!
//! Devices speak a compact binary protocol over UDP (and, on some
//! firmwares, TCP) on port 54321.  Every packet is a 32-byte big-endian
//! header followed by an AES-128-CBC-encrypted JSON body:
//!
//! - **`protocol::packet`** — encodes commands into checksummed packets
//!   and decodes inbound packets, including the header-only path that
//!   discovery uses on announcement datagrams.
//! - **`protocol::crypto`** — derives the per-token session key/IV
//!   (`MD5(token)` / `MD5(key ++ token)`) and implements the CBC body
//!   cipher and MD5 packet checksum.
//! - **`protocol::message`** — the `{"id", "method", "params"}` request
//!   and `{"id", "result" | "error"}` response payloads plus common
//!   method conventions.
//! - **`domain`** — typed device identity/attributes and the clock
//!   anchor used to extrapolate the replay-protection stamp between
//!   packets.

pub mod domain;
pub mod protocol;

pub use domain::device::{ClockAnchor, DeviceAttributes, DeviceIdentity, DiscoveredAnnouncement};
pub use protocol::crypto::{SecretToken, SessionKey};
pub use protocol::message::{RpcError, RpcRequest, RpcResponse};
pub use protocol::packet::{decode_header, decode_packet, encode_packet, DecodedPacket, PacketError};
pub use protocol::sequence::RequestIdCounter;
