//! Network infrastructure for the hub.
//!
//! # Sub-modules
//!
//! - **`transport`** – One TCP or UDP socket per device behind a uniform
//!   async interface, with connection-state handling and a typed inbound
//!   event stream.
//!
//! - **`correlation`** – The pending-request table: matches inbound
//!   decoded responses to the calls that produced them, enforces
//!   deadlines, and guarantees at-most-once resolution per id.
//!
//! - **`session`** – The per-device façade combining codec, transport,
//!   and correlation behind `call`/`get_prop`/`set_prop`-style methods,
//!   with the hello bootstrap for stamp anchoring.
//!
//! - **`discovery`** – Broadcasts hello probes on UDP 54321 and parses
//!   device announcements, including the token-in-checksum special case.

pub mod correlation;
pub mod discovery;
pub mod session;
pub mod transport;
