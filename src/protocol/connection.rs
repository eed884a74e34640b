//! # Connection Core
//!
//! One established, authenticated byte stream and everything that runs on
//! it: the framed read/write paths, the background listener, the RMI
//! correlation engine, and the controller dispatcher.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────────────────┐
//!                 │              Connection              │
//!                 ├──────────────────────────────────────┤
//!                 │  writer: Mutex<FramedWrite<…>>       │
//!                 │  reader: Mutex<FramedRead<…>>        │
//!                 │  pending: MessageId -> oneshot       │
//!                 │  controllers / proxies / events      │
//!                 └──────────────┬───────────────────────┘
//!                                │
//!                      frame classification
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!  both ids zero         InResponseToId != 0      MessageId != 0
//!        │                       │                       │
//!  ┌─────▼─────┐       ┌─────────▼────────┐   ┌──────────▼──────────┐
//!  │ deliver / │       │ route to pending │   │ dispatch controller │
//!  │ return    │       │ waiter by id     │   │ on a spawned task   │
//!  └───────────┘       └──────────────────┘   └─────────────────────┘
//! ```
//!
//! # Concurrency rules
//!
//! - One mutex serializes every byte written; one mutex serializes every
//!   frame decoded. Neither nests inside any other lock.
//! - At most one background listener task ever runs; toggling listening
//!   off and back on re-arms the same loop or starts a fresh one, never two.
//! - Incoming invocations run on spawned tasks so the read loop never
//!   blocks; their replies go through the ordinary write path.
//! - Closing cancels the connection token: pending reads, writes, and RMI
//!   waits unblock with `ConnectionBroken` or `OperationCancelled`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LinkConfig;
use crate::core::codec::FrameCodec;
use crate::core::frame::{Frame, ObjectValue, Value, NO_ID};
use crate::core::serialization::TypeRegistry;
use crate::error::{constants, FaultKind, LinkError, Result};
use crate::protocol::calls::{CallOutcome, PendingCalls};
use crate::protocol::controller::{ControllerRegistry, ControllerSource, MethodCall};
use crate::protocol::invoke::{InvokeRequest, InvokeResult, INVOKE_RESULT_TYPE};
use crate::protocol::proxy::{RemoteController, RemoteInterface};

/// Marker trait for anything a connection can run over: TCP, TLS, or an
/// in-memory duplex in tests.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> LinkStream for T {}

type Reader = FramedRead<ReadHalf<Box<dyn LinkStream>>, FrameCodec>;
type Writer = FramedWrite<WriteHalf<Box<dyn LinkStream>>, FrameCodec>;

/// Externally observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Open, background listening disabled.
    Established,
    /// Open, background listener delivering received values.
    Listening,
    /// Local close in progress.
    Closing,
    /// Gracefully closed.
    Closed,
    /// Torn down by a remote close mid-frame or an I/O error.
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifeState {
    Open,
    Closing,
    Closed,
    Broken,
}

#[derive(Debug, Default)]
struct ListenerState {
    /// What the application asked for.
    desired: bool,
    /// Whether a listener task currently exists.
    running: bool,
}

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// One observable event with explicit registration and RAII disposal.
struct EventSlot<T> {
    handlers: Arc<StdMutex<Vec<(u64, Handler<T>)>>>,
    next_id: AtomicU64,
}

impl<T: 'static> EventSlot<T> {
    fn new() -> Self {
        EventSlot {
            handlers: Arc::new(StdMutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(handler)));

        let weak = Arc::downgrade(&self.handlers);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(handlers) = weak.upgrade() {
                    handlers
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .retain(|(handler_id, _)| *handler_id != id);
                }
            })),
        }
    }

    /// Run every handler sequentially on the calling task. Handlers are
    /// snapshotted first so one may subscribe or dispose during delivery.
    fn emit(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(value);
        }
    }
}

/// Disposer for an event handler registration.
///
/// Dropping the subscription removes the handler; call [`detach`] to keep
/// the handler for the connection's whole lifetime instead.
///
/// [`detach`]: Subscription::detach
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Leave the handler registered forever and discard the disposer.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

struct Events {
    received: EventSlot<Value>,
    received_error: EventSlot<LinkError>,
    closed: EventSlot<Option<LinkError>>,
}

pub(crate) struct ConnectionInner {
    /// Self-reference for spawning background work from `&self` methods.
    this: Weak<ConnectionInner>,
    config: LinkConfig,
    registry: Arc<TypeRegistry>,
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
    pending: PendingCalls,
    controllers: ControllerRegistry,
    proxies: StdMutex<HashMap<String, Arc<RemoteController>>>,
    listener: StdMutex<ListenerState>,
    life: StdMutex<LifeState>,
    cancel: CancellationToken,
    events: Events,
}

impl ConnectionInner {
    fn life(&self) -> LifeState {
        *self.life.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.life() {
            LifeState::Open => Ok(()),
            _ => Err(LinkError::ObjectDisposed),
        }
    }

    fn listener_desired(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .desired
    }

    /// Transition into `Broken`, release every waiter, fire `Closed` with
    /// the fatal error, and hand the error back to the failing operation.
    fn fail_connection(&self, err: LinkError) -> LinkError {
        let transitioned = {
            let mut life = self.life.lock().unwrap_or_else(|e| e.into_inner());
            match *life {
                LifeState::Open | LifeState::Closing => {
                    *life = LifeState::Broken;
                    true
                }
                _ => false,
            }
        };
        self.cancel.cancel();
        self.pending.drain_cancelled();
        if transitioned {
            warn!(error = %err, "connection broken");
            let fatal = Some(err);
            self.events.closed.emit(&fatal);
            fatal.unwrap_or(LinkError::ConnectionBroken)
        } else {
            err
        }
    }

    /// The remote side closed cleanly between frames.
    fn close_remote(&self) {
        let transitioned = {
            let mut life = self.life.lock().unwrap_or_else(|e| e.into_inner());
            match *life {
                LifeState::Open => {
                    *life = LifeState::Closed;
                    true
                }
                _ => false,
            }
        };
        self.cancel.cancel();
        self.pending.drain_cancelled();
        if transitioned {
            debug!("remote peer closed the connection");
            self.events.closed.emit(&None);
        }
    }

    async fn close(&self) {
        let proceed = {
            let mut life = self.life.lock().unwrap_or_else(|e| e.into_inner());
            match *life {
                LifeState::Open => {
                    *life = LifeState::Closing;
                    true
                }
                _ => false,
            }
        };
        if !proceed {
            return;
        }

        self.cancel.cancel();
        self.pending.drain_cancelled();
        {
            // The cancel token has already unblocked any in-flight send.
            let mut writer = self.writer.lock().await;
            let _ = writer.close().await;
        }

        let finished = {
            let mut life = self.life.lock().unwrap_or_else(|e| e.into_inner());
            match *life {
                LifeState::Closing => {
                    *life = LifeState::Closed;
                    true
                }
                _ => false,
            }
        };
        if finished {
            debug!("connection closed");
            self.events.closed.emit(&None);
        }
    }

    /// Emit one frame: serialize under the write lock, one atomic write.
    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let mut writer = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = self.cancel.cancelled() => return Err(LinkError::ObjectDisposed),
        };
        self.ensure_open()?;

        let outcome = tokio::select! {
            result = writer.send(frame) => Some(result),
            _ = self.cancel.cancelled() => None,
        };
        drop(writer);

        match outcome {
            // Cancellation raced shutdown.
            None => Err(LinkError::ConnectionBroken),
            Some(Ok(())) => Ok(()),
            Some(Err(LinkError::Io(io_err))) => {
                let violation =
                    LinkError::ProtocolViolation(format!("transport write failed: {io_err}"));
                Err(self.fail_connection(violation))
            }
            Some(Err(err)) if err.is_fatal() => Err(self.fail_connection(err)),
            // A local serialization failure leaves the connection healthy.
            Some(Err(err)) => Err(err),
        }
    }

    /// Decode the next frame under the read lock. `Ok(None)` is a clean
    /// remote close between frames.
    async fn next_frame(&self) -> Result<Option<Frame>> {
        let mut reader = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = self.cancel.cancelled() => return Err(LinkError::ConnectionBroken),
        };
        tokio::select! {
            item = reader.next() => match item {
                None => Ok(None),
                Some(Ok(frame)) => Ok(Some(frame)),
                Some(Err(LinkError::Io(io_err))) => {
                    debug!(error = %io_err, "transport read failed");
                    Err(LinkError::ConnectionBroken)
                }
                Some(Err(err)) => Err(err),
            },
            _ = self.cancel.cancelled() => Err(LinkError::ConnectionBroken),
        }
    }

    /// Classify one received frame. Returns the value to hand to the
    /// application, or `None` when the frame belonged to the RMI subsystem.
    fn process_frame(&self, frame: Frame) -> Option<Value> {
        if frame.in_response_to_id != NO_ID {
            let outcome = match frame.value.get::<InvokeResult>() {
                Some(result) => match InvokeResult::clone(&result).into_outcome() {
                    Ok(value) => CallOutcome::Value(value),
                    Err(err) => CallOutcome::Fault(err),
                },
                // A correlated frame without an envelope carries the result
                // value directly.
                None => CallOutcome::Value(frame.value),
            };
            self.pending.complete(frame.in_response_to_id, outcome);
            return None;
        }

        if frame.message_id != NO_ID {
            let Some(inner) = self.this.upgrade() else {
                return None;
            };
            match frame.value.get::<InvokeRequest>() {
                Some(request) => {
                    let message_id = frame.message_id;
                    tokio::spawn(async move {
                        inner.handle_invoke(request, message_id).await;
                    });
                }
                None => {
                    warn!(
                        message_id = frame.message_id,
                        "track frame did not carry an invoke request"
                    );
                    let message_id = frame.message_id;
                    tokio::spawn(async move {
                        let reply = InvokeResult::fault(
                            FaultKind::DataReceivingError,
                            "track message was not an invoke request",
                            String::new(),
                        );
                        let _ = inner.send_invoke_result(message_id, reply).await;
                    });
                }
            }
            return None;
        }

        Some(frame.value)
    }

    /// Route a non-fatal per-frame decode error per its correlation ids.
    /// Returns the error back when it must be reported locally instead.
    fn route_frame_error(&self, err: LinkError) -> Option<LinkError> {
        match err.correlation_ids() {
            Some((_, in_response_to_id)) if in_response_to_id != NO_ID => {
                // The response to one of our calls was undecodable: fail that
                // call, never the connection.
                let fault = LinkError::ControllerInvocation {
                    kind: FaultKind::DataReceivingError,
                    message: err.to_string(),
                    remote_detail: String::new(),
                };
                self.pending
                    .complete(in_response_to_id, CallOutcome::Fault(fault));
                None
            }
            Some((message_id, _)) if message_id != NO_ID => {
                // A request we could not decode: tell the remote caller.
                let Some(inner) = self.this.upgrade() else {
                    return None;
                };
                let text = err.to_string();
                tokio::spawn(async move {
                    let reply =
                        InvokeResult::fault(FaultKind::DataReceivingError, text, String::new());
                    let _ = inner.send_invoke_result(message_id, reply).await;
                });
                None
            }
            _ => Some(err),
        }
    }

    async fn send_invoke_result(&self, in_response_to_id: i32, result: InvokeResult) -> Result<()> {
        self.send_frame(Frame::track(
            NO_ID,
            in_response_to_id,
            Value::Object(ObjectValue::new(INVOKE_RESULT_TYPE, result)),
        ))
        .await
    }

    /// Handle one incoming invocation on its own task.
    async fn handle_invoke(self: Arc<Self>, request: Arc<InvokeRequest>, message_id: i32) {
        let connection = Connection {
            inner: Arc::clone(&self),
        };
        let result = match self.controllers.resolve(&request.controller, &connection) {
            None => InvokeResult::fault(
                FaultKind::ControllerNotFound,
                format!("no controller registered as '{}'", request.controller),
                String::new(),
            ),
            Some(controller) => {
                let call = MethodCall::from_request(&request);
                match controller.invoke(call).await {
                    Ok(value) => InvokeResult::success(value),
                    Err(fault) => {
                        debug!(
                            controller = %request.controller,
                            method = %request.method,
                            fault = %fault,
                            "invocation faulted"
                        );
                        InvokeResult::from(fault)
                    }
                }
            }
        };

        if let Err(err) = self.send_invoke_result(message_id, result).await {
            if err.correlation_ids().is_some() {
                // The result value would not serialize; the caller still
                // deserves an answer.
                warn!(error = %err, "invocation result failed to serialize");
                let fallback = InvokeResult::fault(
                    FaultKind::MethodInvokeException,
                    "invocation result failed to serialize",
                    err.to_string(),
                );
                let _ = self.send_invoke_result(message_id, fallback).await;
            } else {
                debug!(error = %err, "dropping invocation reply on dead connection");
            }
        }
    }

    /// Send one invocation and await its correlated response.
    pub(crate) async fn invoke_remote(&self, request: InvokeRequest) -> Result<Value> {
        self.ensure_open()?;
        let (message_id, receiver) = self.pending.register();
        let frame = Frame::track(
            message_id,
            NO_ID,
            Value::Object(ObjectValue::new(
                crate::protocol::invoke::INVOKE_REQUEST_TYPE,
                request,
            )),
        );
        if let Err(err) = self.send_frame(frame).await {
            self.pending.remove(message_id);
            return Err(err);
        }

        let outcome = tokio::select! {
            outcome = receiver => outcome,
            _ = self.cancel.cancelled() => {
                self.pending.remove(message_id);
                return Err(LinkError::cancelled());
            }
        };
        match outcome {
            Ok(CallOutcome::Value(value)) => Ok(value),
            Ok(CallOutcome::Fault(err)) => Err(err),
            Err(_) => Err(LinkError::cancelled()),
        }
    }

    async fn read_value(&self) -> Result<Value> {
        if self.listener_desired() {
            return Err(LinkError::InvalidOperation(
                constants::ERR_LISTENING_ACTIVE.into(),
            ));
        }
        self.ensure_open()?;

        loop {
            match self.next_frame().await {
                Ok(Some(frame)) => {
                    if let Some(value) = self.process_frame(frame) {
                        return Ok(value);
                    }
                }
                Ok(None) => {
                    self.close_remote();
                    return Err(LinkError::ConnectionBroken);
                }
                Err(err) if err.is_fatal() => return Err(self.fail_connection(err)),
                Err(err) => match self.route_frame_error(err) {
                    Some(local) => return Err(local),
                    None => continue,
                },
            }
        }
    }

    fn set_listening(&self, enabled: bool) {
        let open = self.life() == LifeState::Open;
        let mut state = self.listener.lock().unwrap_or_else(|e| e.into_inner());
        state.desired = enabled;
        if enabled && !state.running && open {
            let Some(inner) = self.this.upgrade() else {
                return;
            };
            state.running = true;
            drop(state);
            tokio::spawn(run_listener(inner));
        }
    }

    fn retire_listener(&self) {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .running = false;
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        // Finalization: no task may stay parked, no waiter may stay pending.
        // Dropping the halves releases the socket.
        self.cancel.cancel();
        self.pending.drain_cancelled();
    }
}

/// The background receiver. At most one of these runs per connection.
async fn run_listener(inner: Arc<ConnectionInner>) {
    debug!("background listener started");
    loop {
        {
            // Exit-check under the listener lock: a concurrent re-enable
            // either re-arms this loop or starts a fresh one, never both.
            let mut state = inner.listener.lock().unwrap_or_else(|e| e.into_inner());
            if !state.desired {
                state.running = false;
                break;
            }
        }

        match inner.next_frame().await {
            Ok(Some(frame)) => {
                if let Some(value) = inner.process_frame(frame) {
                    inner.events.received.emit(&value);
                }
            }
            Ok(None) => {
                inner.retire_listener();
                inner.close_remote();
                break;
            }
            Err(err) if err.is_fatal() => {
                inner.retire_listener();
                // ConnectionBroken terminates the loop silently; the Closed
                // event carries the failure.
                let _ = inner.fail_connection(err);
                break;
            }
            Err(err) => {
                if let Some(local) = inner.route_frame_error(err) {
                    inner.events.received_error.emit(&local);
                }
            }
        }
    }
    debug!("background listener stopped");
}

/// A live, authenticated object-messaging connection.
///
/// Cloning is cheap and shares the underlying connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap an established (and, when required, authenticated) stream.
    /// When the configuration asks for it, background listening starts
    /// immediately.
    pub fn new(stream: Box<dyn LinkStream>, config: LinkConfig, registry: Arc<TypeRegistry>) -> Self {
        let start_listening = config.listening;
        let codec = FrameCodec::new(config.encoding, config.format, Arc::clone(&registry));
        let (read_half, write_half) = tokio::io::split(stream);
        let inner = Arc::new_cyclic(|this| ConnectionInner {
            this: this.clone(),
            config,
            registry,
            reader: Mutex::new(FramedRead::new(read_half, codec.clone())),
            writer: Mutex::new(FramedWrite::new(write_half, codec)),
            pending: PendingCalls::new(),
            controllers: ControllerRegistry::new(),
            proxies: StdMutex::new(HashMap::new()),
            listener: StdMutex::new(ListenerState::default()),
            life: StdMutex::new(LifeState::Open),
            cancel: CancellationToken::new(),
            events: Events {
                received: EventSlot::new(),
                received_error: EventSlot::new(),
                closed: EventSlot::new(),
            },
        });
        if start_listening {
            inner.set_listening(true);
        }
        Connection { inner }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    pub fn state(&self) -> ConnectionState {
        match self.inner.life() {
            LifeState::Open if self.inner.listener_desired() => ConnectionState::Listening,
            LifeState::Open => ConnectionState::Established,
            LifeState::Closing => ConnectionState::Closing,
            LifeState::Closed => ConnectionState::Closed,
            LifeState::Broken => ConnectionState::Broken,
        }
    }

    /// Send one application value. Frames from consecutive awaited sends
    /// arrive in order; a serialization failure leaves the connection
    /// healthy and surfaces only to this caller.
    pub async fn write_value(&self, value: Value) -> Result<()> {
        self.inner.send_frame(Frame::application(value)).await
    }

    /// Send a registered application object, resolving its wire identifier
    /// through the type registry.
    pub async fn send_object<T: Any + Send + Sync>(&self, instance: T) -> Result<()> {
        let object = self.inner.registry.object(instance)?;
        self.write_value(Value::Object(object)).await
    }

    /// Foreground read of the next application value. RMI and control
    /// frames arriving first are handled internally. Not available while
    /// background listening is enabled.
    pub async fn read_value(&self) -> Result<Value> {
        self.inner.read_value().await
    }

    /// Enable or disable the background receiver. While enabled, received
    /// application values are delivered through [`on_received`] handlers and
    /// handled errors through [`on_received_error`]; disabling stops new
    /// reads without aborting one already in flight.
    ///
    /// [`on_received`]: Connection::on_received
    /// [`on_received_error`]: Connection::on_received_error
    pub fn set_listening(&self, enabled: bool) {
        self.inner.set_listening(enabled);
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listener_desired()
    }

    /// Register a local controller under its identifier string.
    pub fn expose(&self, identifier: &str, source: ControllerSource) {
        self.inner.controllers.register(identifier, source);
    }

    /// The cached proxy for a remote controller identifier.
    pub fn controller(&self, identifier: &str) -> Arc<RemoteController> {
        let mut proxies = self
            .inner
            .proxies
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(proxies.entry(identifier.to_owned()).or_insert_with(|| {
            Arc::new(RemoteController::new(
                Arc::downgrade(&self.inner),
                identifier.to_owned(),
            ))
        }))
    }

    /// A typed stub attached to the cached proxy for `T::IDENTIFIER`.
    pub fn controller_as<T: RemoteInterface>(&self) -> T {
        T::attach(self.controller(T::IDENTIFIER))
    }

    /// Observe received application values (background listening only).
    pub fn on_received(&self, handler: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.inner.events.received.subscribe(handler)
    }

    /// Observe non-fatal receive errors handled by the background listener.
    pub fn on_received_error(
        &self,
        handler: impl Fn(&LinkError) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.received_error.subscribe(handler)
    }

    /// Observe connection shutdown. The payload is the fatal error, or
    /// `None` for a graceful close.
    pub fn on_closed(
        &self,
        handler: impl Fn(&Option<LinkError>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.closed.subscribe(handler)
    }

    /// Gracefully close the connection: cancel the token, release every
    /// pending call with an OperationCancelled fault, flush and shut the
    /// stream down, fire `Closed` with no error.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Number of RMI calls currently awaiting a response.
    pub fn outstanding_calls(&self) -> usize {
        self.inner.pending.len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("outstanding_calls", &self.outstanding_calls())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;

    fn pair() -> (Connection, Connection) {
        let (left, right) = tokio::io::duplex(256 * 1024);
        let a = Connection::new(
            Box::new(left),
            LinkConfig::default(),
            Arc::new(TypeRegistry::new()),
        );
        let b = Connection::new(
            Box::new(right),
            LinkConfig::default(),
            Arc::new(TypeRegistry::new()),
        );
        (a, b)
    }

    #[tokio::test]
    async fn foreground_write_and_read() {
        let (a, b) = pair();
        a.write_value(Value::String("hello".into())).await.unwrap();
        let value = b.read_value().await.unwrap();
        assert_eq!(value.as_str(), Some("hello"));
    }

    #[tokio::test]
    async fn read_value_rejected_while_listening() {
        let (a, _b) = pair();
        a.set_listening(true);
        let err = a.read_value().await.unwrap_err();
        assert!(matches!(err, LinkError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_disposes() {
        let (a, _b) = pair();
        a.close().await;
        a.close().await;
        assert_eq!(a.state(), ConnectionState::Closed);
        let err = a.write_value(Value::Empty).await.unwrap_err();
        assert!(matches!(err, LinkError::ObjectDisposed));
        let err = a.read_value().await.unwrap_err();
        assert!(matches!(err, LinkError::ObjectDisposed));
    }

    #[tokio::test]
    async fn listener_toggle_never_runs_two_loops() {
        let (a, b) = pair();
        b.set_listening(true);
        b.set_listening(false);
        b.set_listening(true);

        let received = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        b.on_received(move |value| {
            sink.lock().unwrap().push(value.clone());
        })
        .detach();

        for i in 0..10i32 {
            a.write_value(Value::I32(i)).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let seen = received.lock().unwrap().clone();
        // Exactly once each, in order: two loops would steal frames from
        // each other or double-deliver.
        assert_eq!(
            seen,
            (0..10i32).map(Value::I32).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn subscription_drop_unregisters() {
        let (a, b) = pair();
        let received = Arc::new(StdMutex::new(0usize));
        let sink = Arc::clone(&received);
        let subscription = b.on_received(move |_| {
            *sink.lock().unwrap() += 1;
        });
        drop(subscription);
        b.set_listening(true);
        a.write_value(Value::I32(1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(*received.lock().unwrap(), 0);
    }
}
