//! Per-session correlation-id generation.
//!
//! Every command embeds a numeric `id` that the device echoes back in its
//! response; matching the two is the whole correlation mechanism.  Each
//! session owns its own counter — there is no process-wide shared id
//! state, so independent sessions can never race each other's ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing correlation-id counter.
///
/// Ids start at 1: id 0 is reserved for the hello bootstrap exchange,
/// which carries no JSON body and therefore no real correlation id.
/// Ids are never reused while an earlier request with the same id could
/// still be in flight — a session would need 2^64 calls to wrap.
///
/// # Examples
///
/// ```rust
/// use homelink_core::protocol::sequence::RequestIdCounter;
///
/// let counter = RequestIdCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
pub struct RequestIdCounter {
    inner: AtomicU64,
}

impl RequestIdCounter {
    /// Creates a counter whose first [`next`](Self::next) returns 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next correlation id and advances the counter.
    ///
    /// `Ordering::Relaxed` suffices: the counter only needs uniqueness,
    /// not memory synchronisation with other state.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call would produce, without advancing.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for RequestIdCounter {
    fn default() -> Self {
        Self::new()
    }
}
