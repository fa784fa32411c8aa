//! Per-device session: the caller-facing command façade.
//!
//! A [`DeviceSession`] glues the packet codec, the transport, and the
//! correlation engine together behind `call`-style methods.  All mutable
//! session state — the attribute store, the clock anchor, the pending
//! hello exchange, and the correlation table — is owned by one background
//! task; the cloneable handle talks to it over a command channel.  That
//! confinement is what guarantees inbound frames are processed in arrival
//! order and every correlation id resolves at most once, without locks.
//!
//! # The hello bootstrap
//!
//! Authenticated packets must carry a fresh replay-protection stamp, and
//! the only way to learn the device's stamp is to ask: the first `call`
//! on a session triggers a zero-body hello exchange whose response
//! anchors the device clock.  Concurrent calls issued before the anchor
//! exists all queue behind one in-flight hello — N early callers produce
//! exactly one probe on the wire, never N.
//!
//! A device that has not been claimed by any cloud account answers the
//! hello with its secret token in the checksum field; a session started
//! without a token adopts it and proceeds.  Provisioned devices answer
//! with the sentinel pattern instead, and calls then fail with
//! `MissingCredential` unless a cloud fallback is configured.

use std::sync::Arc;
use std::time::Instant as StdInstant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info, trace, warn};

use homelink_core::protocol::message::{methods, ActionCall, PropertyRef, PropertyValue};
use homelink_core::protocol::packet::{
    decode_packet, encode_packet, is_token_sentinel, DecodedPacket, HELLO_PACKET, STAMP_SENTINEL,
};
use homelink_core::{
    ClockAnchor, DeviceAttributes, DeviceIdentity, RequestIdCounter, RpcRequest, RpcResponse,
    SecretToken,
};

use crate::infrastructure::network::correlation::{CallError, CorrelationEngine, CorrelationId};
use crate::infrastructure::network::transport::{
    Transport, TransportEvent, TransportKind, DEFAULT_CONNECT_TIMEOUT,
};

/// Default per-request deadline when the caller does not override it.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Reserved correlation id for the hello bootstrap exchange; real request
/// ids start at 1.
const HELLO_ID: CorrelationId = 0;

/// Sleep horizon for the session loop when nothing has a deadline.
const IDLE_TICK: Duration = Duration::from_secs(3600);

/// What to do with in-flight requests when the session is closed.
///
/// The contract is timeout-driven: closing does not synchronously reject
/// pending requests, they run into their own deadlines.  `RejectPending`
/// is the opt-in fail-fast alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    #[default]
    LetPendingTimeOut,
    RejectPending,
}

/// Per-call knobs for [`DeviceSession::call_with`].
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    /// Response deadline; `None` uses the session default.
    pub timeout: Option<Duration>,
    /// `false` closes the transport once this call completes — the
    /// one-shot UDP exchange pattern.  `true` keeps it open for
    /// follow-up calls.
    pub keep_alive: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            keep_alive: true,
        }
    }
}

/// Session lifecycle notifications, delivered on a broadcast channel so
/// host-platform adapters can observe without touching session state.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started,
    Stopped,
    Error(String),
    Request { id: CorrelationId },
    Response { id: CorrelationId },
}

/// Configuration for one device session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: DeviceIdentity,
    /// Secret token, when known.  A tokenless session can still be
    /// bootstrapped by an unprovisioned device or served by a fallback.
    pub token: Option<SecretToken>,
    /// UDP is the protocol's native transport; some firmwares also
    /// accept TCP on the same port.
    pub transport: TransportKind,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub close_policy: ClosePolicy,
}

impl SessionConfig {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            token: None,
            transport: TransportKind::Udp,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            close_policy: ClosePolicy::default(),
        }
    }

    pub fn with_token(mut self, token: SecretToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// The cloud control surface a session falls back to when no local
/// secret token is available.  Only the shape is defined here; the HTTP
/// client implementing it lives outside this crate.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudFallback: Send + Sync {
    async fn get_prop(&self, device_id: u32, params: Value) -> Result<Value, CallError>;
    async fn set_prop(&self, device_id: u32, params: Value) -> Result<Value, CallError>;
    async fn action(&self, device_id: u32, params: Value) -> Result<Value, CallError>;
}

enum SessionCommand {
    Call {
        method: String,
        params: Value,
        options: CallOptions,
        reply: oneshot::Sender<Result<Value, CallError>>,
    },
    ApplyInfo {
        info: serde_json::Map<String, Value>,
    },
    Attributes {
        reply: oneshot::Sender<DeviceAttributes>,
    },
    SetToken {
        token: SecretToken,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to one device's session task.
#[derive(Clone)]
pub struct DeviceSession {
    identity: DeviceIdentity,
    cmd_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl DeviceSession {
    /// Spawns the session task and returns its handle.
    pub fn spawn(config: SessionConfig) -> Self {
        Self::spawn_with_fallback(config, None)
    }

    /// Like [`spawn`](Self::spawn), with a cloud fallback for tokenless
    /// operation.
    pub fn spawn_with_fallback(
        config: SessionConfig,
        fallback: Option<Arc<dyn CloudFallback>>,
    ) -> Self {
        let identity = config.identity;
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(32);
        let (transport_tx, transport_rx) = mpsc::channel(64);

        let transport = Transport::new(
            identity.addr(),
            config.transport,
            config.connect_timeout,
            transport_tx,
        );

        let task = SessionTask {
            identity,
            token: config.token,
            request_timeout: config.request_timeout,
            close_policy: config.close_policy,
            ids: RequestIdCounter::new(),
            engine: CorrelationEngine::new(transport),
            cmd_rx,
            transport_rx,
            anchor: None,
            attributes: DeviceAttributes::default(),
            hello: None,
            events: event_tx.clone(),
            fallback,
            closing: false,
        };
        tokio::spawn(task.run());

        Self {
            identity,
            cmd_tx,
            event_tx,
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn device_id(&self) -> u32 {
        self.identity.device_id
    }

    /// Subscribes to lifecycle events.  Receivers observe; they cannot
    /// mutate session state.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Sends `{"id", method, "params"}` and awaits the correlated
    /// response with default options.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Value,
    ) -> Result<Value, CallError> {
        self.call_with(method, params, CallOptions::default()).await
    }

    /// [`call`](Self::call) with explicit timeout/keep-alive options.
    pub async fn call_with(
        &self,
        method: impl Into<String>,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Call {
                method: method.into(),
                params,
                options,
                reply: reply_tx,
            })
            .await
            .map_err(|_| CallError::Closed)?;
        reply_rx.await.map_err(|_| CallError::Closed)?
    }

    /// Legacy property read: `get_prop` with a list of property names.
    pub async fn get_prop(&self, props: &[&str]) -> Result<Value, CallError> {
        self.call(methods::GET_PROP, json!(props)).await
    }

    /// Legacy property write: the `set_<prop>` method family, with the
    /// firmware's positional argument list.
    pub async fn set_prop(&self, prop: &str, args: Value) -> Result<Value, CallError> {
        self.call(format!("set_{prop}"), args).await
    }

    /// Service/property-id addressed read.
    pub async fn get_properties(&self, props: &[PropertyRef]) -> Result<Value, CallError> {
        let params = serde_json::to_value(props).expect("PropertyRef serialization is infallible");
        self.call(methods::GET_PROPERTIES, params).await
    }

    /// Service/property-id addressed write.
    pub async fn set_properties(&self, props: &[PropertyValue]) -> Result<Value, CallError> {
        let params =
            serde_json::to_value(props).expect("PropertyValue serialization is infallible");
        self.call(methods::SET_PROPERTIES, params).await
    }

    /// Service/action-id addressed invocation.
    pub async fn invoke_action(&self, action: &ActionCall) -> Result<Value, CallError> {
        let params = serde_json::to_value(action).expect("ActionCall serialization is infallible");
        self.call(methods::ACTION, params).await
    }

    /// Queries device information and merges the result into the
    /// attribute store.
    pub async fn info(&self) -> Result<Value, CallError> {
        let result = self.call(methods::INFO, json!([])).await?;
        if let Some(object) = result.as_object() {
            let _ = self
                .cmd_tx
                .send(SessionCommand::ApplyInfo {
                    info: object.clone(),
                })
                .await;
        }
        Ok(result)
    }

    /// Returns a snapshot of the attribute store.
    pub async fn attributes(&self) -> DeviceAttributes {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::Attributes { reply: reply_tx })
            .await
            .is_err()
        {
            return DeviceAttributes::default();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Provides the secret token after the fact (e.g. learned from a
    /// discovery announcement).
    pub async fn set_token(&self, token: SecretToken) {
        let _ = self.cmd_tx.send(SessionCommand::SetToken { token }).await;
    }

    /// Closes the session's transport and winds the task down according
    /// to the configured [`ClosePolicy`].
    pub async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::Close { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

/// A queued call waiting for the hello exchange to anchor the clock.
struct QueuedCall {
    method: String,
    params: Value,
    options: CallOptions,
    reply: oneshot::Sender<Result<Value, CallError>>,
}

struct HelloExchange {
    deadline: Instant,
    waiters: Vec<QueuedCall>,
}

/// The background task owning all mutable session state.
struct SessionTask {
    identity: DeviceIdentity,
    token: Option<SecretToken>,
    request_timeout: Duration,
    close_policy: ClosePolicy,
    ids: RequestIdCounter,
    engine: CorrelationEngine,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    anchor: Option<ClockAnchor>,
    attributes: DeviceAttributes,
    hello: Option<HelloExchange>,
    events: broadcast::Sender<SessionEvent>,
    fallback: Option<Arc<dyn CloudFallback>>,
    closing: bool,
}

impl SessionTask {
    async fn run(mut self) {
        info!("session for {} started", self.identity);
        loop {
            let deadline = self.next_deadline();
            let sleep_target = deadline.unwrap_or_else(|| Instant::now() + IDLE_TICK);

            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(SessionCommand::Close { reply }) => {
                        self.begin_close().await;
                        let _ = reply.send(());
                    }
                    Some(command) => self.handle_command(command).await,
                    // Every handle is gone, so every caller future is
                    // gone too; nobody can observe results.
                    None => break,
                },
                event = self.transport_rx.recv() => {
                    if let Some(event) = event {
                        self.handle_transport_event(event).await;
                    }
                },
                _ = sleep_until(sleep_target), if deadline.is_some() => {
                    self.handle_deadlines().await;
                }
            }

            // With the timeout-driven close policy, the task stays alive
            // until every pending deadline has fired.
            if self.closing && self.engine.pending_len() == 0 && self.hello.is_none() {
                break;
            }
        }

        self.engine.transport_mut().close().await;
        let _ = self.events.send(SessionEvent::Stopped);
        info!("session for {} stopped", self.identity);
    }

    fn next_deadline(&self) -> Option<Instant> {
        let hello = self.hello.as_ref().map(|h| h.deadline);
        match (self.engine.next_deadline(), hello) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Call {
                method,
                params,
                options,
                reply,
            } => self.handle_call(method, params, options, reply).await,
            SessionCommand::ApplyInfo { info } => self.attributes.apply_info(&info),
            SessionCommand::Attributes { reply } => {
                let _ = reply.send(self.attributes.clone());
            }
            SessionCommand::SetToken { token } => self.token = Some(token),
            SessionCommand::Close { .. } => unreachable!("Close is handled in run()"),
        }
    }

    async fn handle_call(
        &mut self,
        method: String,
        params: Value,
        options: CallOptions,
        reply: oneshot::Sender<Result<Value, CallError>>,
    ) {
        if self.closing {
            let _ = reply.send(Err(CallError::Closed));
            return;
        }

        let call = QueuedCall {
            method,
            params,
            options,
            reply,
        };

        match (self.token, self.anchor) {
            (Some(token), Some(anchor)) => self.issue_call(token, anchor, call).await,
            (Some(_), None) => self.enqueue_behind_hello(call).await,
            (None, _) if self.fallback.is_some() => self.dispatch_fallback(call),
            // No token, no fallback: a hello exchange may still reveal
            // the token if the device is unprovisioned.
            (None, _) => self.enqueue_behind_hello(call).await,
        }
    }

    /// Routes a tokenless call to the cloud surface on its own task, so
    /// a slow HTTP round trip never stalls the session loop.
    fn dispatch_fallback(&self, call: QueuedCall) {
        let device_id = self.identity.device_id;
        let Some(fallback) = self.fallback.clone() else {
            let _ = call.reply.send(Err(CallError::MissingCredential { device_id }));
            return;
        };

        debug!(
            "no token for {}; delegating {} to the cloud fallback",
            self.identity, call.method
        );
        tokio::spawn(async move {
            let outcome = match call.method.as_str() {
                methods::GET_PROP | methods::GET_PROPERTIES => {
                    fallback.get_prop(device_id, call.params).await
                }
                methods::SET_PROPERTIES => fallback.set_prop(device_id, call.params).await,
                methods::ACTION => fallback.action(device_id, call.params).await,
                method if method.starts_with("set_") => {
                    fallback.set_prop(device_id, call.params).await
                }
                _ => Err(CallError::MissingCredential { device_id }),
            };
            let _ = call.reply.send(outcome);
        });
    }

    /// Queues a call until the clock anchor exists, starting the single
    /// shared hello exchange if none is in flight.
    async fn enqueue_behind_hello(&mut self, call: QueuedCall) {
        match self.hello.as_mut() {
            Some(hello) => hello.waiters.push(call),
            None => {
                trace!("no clock anchor for {}; sending hello", self.identity);
                if let Err(e) = self.engine.transport_mut().send(&HELLO_PACKET).await {
                    warn!("hello probe to {} failed: {e}", self.identity);
                    let _ = call.reply.send(Err(CallError::Transport(e)));
                    return;
                }
                self.hello = Some(HelloExchange {
                    deadline: Instant::now() + self.request_timeout,
                    waiters: vec![call],
                });
            }
        }
    }

    async fn issue_call(&mut self, token: SecretToken, anchor: ClockAnchor, call: QueuedCall) {
        let id = self.ids.next();
        let request = RpcRequest::new(id, call.method, call.params);
        let plaintext =
            serde_json::to_vec(&request).expect("RpcRequest serialization is infallible");

        let stamp = anchor.effective_stamp(StdInstant::now());
        let packet = match encode_packet(&plaintext, self.identity.device_id, &token, Some(stamp)) {
            Ok(packet) => packet,
            Err(e) => {
                let _ = call.reply.send(Err(CallError::Codec(e)));
                return;
            }
        };

        let timeout = call.options.timeout.unwrap_or(self.request_timeout);
        let _ = self.events.send(SessionEvent::Request { id });
        self.engine
            .issue(id, &packet, timeout, call.options.keep_alive, call.reply)
            .await;
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Started => {
                let _ = self.events.send(SessionEvent::Started);
            }
            TransportEvent::Stopped => {
                let _ = self.events.send(SessionEvent::Stopped);
            }
            TransportEvent::Error(e) => {
                warn!("transport error on session for {}: {e}", self.identity);
                let _ = self.events.send(SessionEvent::Error(e.to_string()));
            }
            TransportEvent::Frame(bytes) => self.handle_frame(&bytes).await,
        }
    }

    async fn handle_frame(&mut self, bytes: &[u8]) {
        let decoded = match decode_packet(bytes, self.token.as_ref()) {
            Ok(decoded) => decoded,
            Err(e) => {
                trace!("undecodable frame from {}: {e}", self.identity);
                return;
            }
        };

        match decoded {
            DecodedPacket::Invalid => {
                // Expected weather on a shared segment; not an error.
                trace!("dropping packet with bad checksum from {}", self.identity);
            }
            DecodedPacket::Hello {
                stamp, token_field, ..
            } => self.handle_hello(stamp, token_field).await,
            DecodedPacket::Message {
                stamp, plaintext, ..
            } => self.handle_message(stamp, &plaintext).await,
        }
    }

    async fn handle_hello(&mut self, stamp: u32, token_field: [u8; 16]) {
        if self.token.is_none() && !is_token_sentinel(&token_field) {
            info!("adopting the token announced by {}", self.identity);
            self.token = Some(SecretToken::from_bytes(token_field));
        }
        if stamp != 0 && stamp != STAMP_SENTINEL {
            trace!("clock anchor for {} set to {stamp}", self.identity);
            self.anchor = Some(ClockAnchor::capture(stamp));
        }
        self.flush_hello_waiters().await;
    }

    async fn handle_message(&mut self, stamp: u32, plaintext: &[u8]) {
        // Any authenticated packet with time info refreshes the anchor.
        if stamp != 0 && stamp != STAMP_SENTINEL {
            self.anchor = Some(ClockAnchor::capture(stamp));
        }

        let response: RpcResponse = match serde_json::from_slice(plaintext) {
            Ok(response) => response,
            Err(e) => {
                debug!("unparseable response payload from {}: {e}", self.identity);
                return;
            }
        };

        let id = response.id;
        let completed = match response.into_result() {
            Ok(value) => self.engine.resolve(id, value).await,
            Err(device_error) => {
                self.engine
                    .reject(
                        id,
                        CallError::Device {
                            code: device_error.code,
                            message: device_error.message,
                        },
                    )
                    .await
            }
        };

        if completed {
            let _ = self.events.send(SessionEvent::Response { id });
        } else {
            // Late or duplicate response; its request already resolved
            // or timed out.
            trace!("dropping response for unknown id {id} from {}", self.identity);
        }
    }

    /// Issues every queued call once both an anchor and a token exist.
    async fn flush_hello_waiters(&mut self) {
        let Some(hello) = self.hello.take() else {
            return;
        };

        match (self.anchor, self.token) {
            (Some(anchor), Some(token)) => {
                for call in hello.waiters {
                    self.issue_call(token, anchor, call).await;
                }
            }
            (None, _) => {
                // A hello response without time info cannot anchor the
                // clock; keep waiting for one that can.
                self.hello = Some(hello);
            }
            (Some(_), None) => {
                // The device answered but kept its secret private.
                let device_id = self.identity.device_id;
                debug!("{} did not reveal a token; failing queued calls", self.identity);
                for call in hello.waiters {
                    let _ = call
                        .reply
                        .send(Err(CallError::MissingCredential { device_id }));
                }
            }
        }
    }

    async fn handle_deadlines(&mut self) {
        let now = Instant::now();

        if self.hello.as_ref().is_some_and(|h| h.deadline <= now) {
            debug!("hello exchange with {} timed out", self.identity);
            if let Some(hello) = self.hello.take() {
                for call in hello.waiters {
                    let _ = call
                        .reply
                        .send(Err(CallError::RequestTimeout { id: HELLO_ID }));
                }
            }
        }

        self.engine.expire(now).await;
    }

    async fn begin_close(&mut self) {
        if matches!(self.close_policy, ClosePolicy::RejectPending) {
            self.engine.reject_all().await;
            if let Some(hello) = self.hello.take() {
                for call in hello.waiters {
                    let _ = call.reply.send(Err(CallError::Closed));
                }
            }
        }
        self.engine.transport_mut().close().await;
        self.closing = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(42, "127.0.0.1".parse().unwrap(), 54_321)
    }

    // ── Config and options defaults ───────────────────────────────────────────

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::new(identity());
        assert_eq!(config.transport, TransportKind::Udp);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.close_policy, ClosePolicy::LetPendingTimeOut);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_call_options_default_to_keep_alive() {
        let options = CallOptions::default();
        assert!(options.keep_alive);
        assert!(options.timeout.is_none());
    }

    // ── Cloud fallback routing ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_tokenless_get_prop_delegates_to_fallback() {
        let mut mock = MockCloudFallback::new();
        mock.expect_get_prop()
            .withf(|device_id, _| *device_id == 42)
            .returning(|_, _| Ok(json!(["on", 80])));

        let session =
            DeviceSession::spawn_with_fallback(SessionConfig::new(identity()), Some(Arc::new(mock)));

        let result = session.get_prop(&["power", "bright"]).await.unwrap();
        assert_eq!(result, json!(["on", 80]));
    }

    #[tokio::test]
    async fn test_tokenless_set_prop_family_routes_to_fallback_set() {
        let mut mock = MockCloudFallback::new();
        mock.expect_set_prop()
            .withf(|_, params| params == &json!(["on"]))
            .returning(|_, _| Ok(json!(["ok"])));

        let session =
            DeviceSession::spawn_with_fallback(SessionConfig::new(identity()), Some(Arc::new(mock)));

        let result = session.set_prop("power", json!(["on"])).await.unwrap();
        assert_eq!(result, json!(["ok"]));
    }

    #[tokio::test]
    async fn test_tokenless_action_routes_to_fallback_action() {
        let mut mock = MockCloudFallback::new();
        mock.expect_action().returning(|_, _| {
            Err(CallError::Device {
                code: -704_002,
                message: "action not supported".into(),
            })
        });

        let session =
            DeviceSession::spawn_with_fallback(SessionConfig::new(identity()), Some(Arc::new(mock)));

        let action = ActionCall {
            did: 42,
            siid: 3,
            aiid: 1,
            args: vec![],
        };
        let result = session.invoke_action(&action).await;
        assert!(matches!(result, Err(CallError::Device { code, .. }) if code == -704_002));
    }

    #[tokio::test]
    async fn test_tokenless_unknown_method_fails_without_touching_fallback() {
        let mock = MockCloudFallback::new(); // no expectations: any call panics

        let session =
            DeviceSession::spawn_with_fallback(SessionConfig::new(identity()), Some(Arc::new(mock)));

        let result = session.call("reboot", json!([])).await;
        assert!(matches!(
            result,
            Err(CallError::MissingCredential { device_id: 42 })
        ));
    }

    // ── Attribute store ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_attributes_snapshot_is_initially_empty() {
        let session = DeviceSession::spawn(SessionConfig::new(identity()));
        assert_eq!(session.attributes().await, DeviceAttributes::default());
    }

    #[tokio::test]
    async fn test_close_then_call_is_rejected() {
        let session = DeviceSession::spawn(SessionConfig::new(identity()));
        session.close().await;
        let result = session.call("info", json!([])).await;
        assert!(matches!(result, Err(CallError::Closed)));
    }
}
