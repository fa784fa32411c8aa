//! Domain entities for HomeLink.
//!
//! Pure data and logic with no infrastructure dependencies: device
//! identity and attributes, clock anchoring for the replay-protection
//! stamp, and the discovery announcement record.  Code here can be
//! compiled and tested on any platform without sockets or timers.

pub mod device;
