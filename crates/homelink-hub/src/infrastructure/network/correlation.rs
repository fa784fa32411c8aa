//! Request/response correlation with deadline enforcement.
//!
//! The engine maps outbound correlation ids to waiting callers and
//! guarantees at-most-once resolution: for any id, only the first of
//! {resolve, reject, timeout} has effect, and later events are silent
//! no-ops.  Late or duplicate responses on a broadcast segment are
//! normal, not errors.
//!
//! The engine owns the [`Transport`]: issuing a request sends its bytes,
//! and completing a `keep_alive = false` request closes the socket (the
//! one-shot request/response pattern used over UDP).
//!
//! Deadlines are enforced cooperatively: the owning session loop asks for
//! [`next_deadline`](CorrelationEngine::next_deadline), sleeps until it,
//! and calls [`expire`](CorrelationEngine::expire).

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use homelink_core::PacketError;

use crate::infrastructure::network::transport::{Transport, TransportError};

/// Correlation id embedded in request and response payloads.
///
/// Id 0 is reserved for the hello bootstrap exchange (see the session
/// layer); real requests use ids from the per-session counter.
pub type CorrelationId = u64;

/// Error type for a failed device call.
#[derive(Debug, Error)]
pub enum CallError {
    /// An authenticated operation was attempted with no secret token and
    /// no cloud fallback configured.
    #[error("no secret token is known for device {device_id}")]
    MissingCredential { device_id: u32 },

    /// The transport could not connect or the write was rejected.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request payload could not be encoded into a packet.
    #[error(transparent)]
    Codec(#[from] PacketError),

    /// No matching response arrived within the deadline.  Id 0 denotes
    /// the hello bootstrap exchange.
    #[error("request {id} timed out")]
    RequestTimeout { id: CorrelationId },

    /// The device reported a failure; propagated verbatim.
    #[error("device error {code}: {message}")]
    Device { code: i64, message: String },

    /// The session was closed while the request was pending.
    #[error("session closed")]
    Closed,
}

struct PendingRequest {
    deadline: Instant,
    keep_alive: bool,
    tx: oneshot::Sender<Result<Value, CallError>>,
}

/// Table of in-flight requests plus the transport that carries them.
pub struct CorrelationEngine {
    transport: Transport,
    pending: HashMap<CorrelationId, PendingRequest>,
}

impl CorrelationEngine {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            pending: HashMap::new(),
        }
    }

    /// Direct access to the transport, for traffic that bypasses
    /// correlation (the hello probe has no JSON id).
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Registers a pending request and sends `payload`.
    ///
    /// The caller's half of `reply` resolves exactly once with the
    /// response value, a device error, a timeout, or a send failure.  If
    /// the send itself fails, the entry is removed and rejected before
    /// this method returns.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already in flight.  Ids come from a per-session
    /// monotonic counter, so a duplicate means a caller bypassed it —
    /// a programming error, not a runtime condition to paper over.
    pub async fn issue(
        &mut self,
        id: CorrelationId,
        payload: &[u8],
        timeout: Duration,
        keep_alive: bool,
        reply: oneshot::Sender<Result<Value, CallError>>,
    ) {
        assert!(
            !self.pending.contains_key(&id),
            "correlation id {id} is already in flight"
        );

        self.pending.insert(
            id,
            PendingRequest {
                deadline: Instant::now() + timeout,
                keep_alive,
                tx: reply,
            },
        );
        trace!("issued request {id}, timeout {timeout:?}, keep_alive {keep_alive}");

        if let Err(e) = self.transport.send(payload).await {
            debug!("send for request {id} failed: {e}");
            self.reject(id, CallError::Transport(e)).await;
        }
    }

    /// Fulfils the pending request `id` with `value`.
    ///
    /// Returns `false` (a silent no-op) when the id is unknown — already
    /// resolved, already timed out, or never issued.
    pub async fn resolve(&mut self, id: CorrelationId, value: Value) -> bool {
        self.finish(id, Ok(value)).await
    }

    /// Rejects the pending request `id` with `error`; same no-op
    /// semantics as [`resolve`](Self::resolve).
    pub async fn reject(&mut self, id: CorrelationId, error: CallError) -> bool {
        self.finish(id, Err(error)).await
    }

    async fn finish(&mut self, id: CorrelationId, outcome: Result<Value, CallError>) -> bool {
        let Some(request) = self.pending.remove(&id) else {
            trace!("ignoring completion for unknown request {id}");
            return false;
        };

        // The caller may have given up and dropped its receiver; that is
        // its business, the entry is gone either way.
        let _ = request.tx.send(outcome);

        if !request.keep_alive {
            self.transport.close().await;
        }
        true
    }

    /// Earliest pending deadline, if any; the session loop sleeps on it.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|r| r.deadline).min()
    }

    /// Rejects every request whose deadline has passed with
    /// [`CallError::RequestTimeout`].
    pub async fn expire(&mut self, now: Instant) {
        let overdue: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, r)| r.deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in overdue {
            debug!("request {id} timed out");
            self.reject(id, CallError::RequestTimeout { id }).await;
        }
    }

    /// Rejects every pending request with [`CallError::Closed`]; used by
    /// the session's opt-in fail-fast close policy.
    pub async fn reject_all(&mut self) {
        let ids: Vec<CorrelationId> = self.pending.keys().copied().collect();
        for id in ids {
            self.reject(id, CallError::Closed).await;
        }
    }

    /// Number of in-flight requests.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is still in flight.
    pub fn is_pending(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }
}
