//! The driftsync client.
//!
//! [`Client`] owns the transport and interprets the pure state machines
//! from `driftsync-core`. One dispatch task consumes a single input
//! channel (socket events, decoded frames, timer firings, user
//! operations), so every input - including its subscriber callbacks -
//! completes before the next one is processed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use driftsync_core::connection::{ConnectionMachine, Effect, Input as MachineInput};
use driftsync_core::{ConnectionState, ErrorKind, RecordTimer};
use driftsync_types::{codec, Message, Topic};

use crate::emitter::{Emitter, ListenerId};
use crate::error::ClientError;
use crate::options::ClientOptions;
use crate::record::{RecordEntry, RecordHandle};
use crate::timers::Timers;
use crate::transport::{Transport, TransportError};
use crate::util::relock;

const RECONNECT_TIMER: &str = "connection:reconnect";
const HEARTBEAT_TIMER: &str = "connection:heartbeat";

/// Keys on the client event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    /// Fires on every state change, with the new state.
    ConnectionStateChanged,
    /// Fires when the client enters this specific state.
    State(ConnectionState),
    /// Fires for every surfaced error.
    Error,
}

/// Payload delivered to client event listeners.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// The state entered.
    State(ConnectionState),
    /// The error surfaced.
    Error {
        /// The error kind.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

type AuthCallback = Box<dyn FnOnce(bool, Option<Value>) + Send>;
type TopicHandler = Box<dyn Fn(&Message) + Send>;

pub(crate) enum ClientInput {
    Machine(MachineInput),
    RecordTimer { name: String, timer: RecordTimer },
}

pub(crate) struct ClientInner<T: Transport + 'static> {
    pub(crate) options: ClientOptions,
    pub(crate) transport: T,
    machine: Mutex<ConnectionMachine>,
    pub(crate) records: Mutex<HashMap<String, RecordEntry>>,
    pub(crate) emitter: Emitter<ClientEvent, EventPayload>,
    handlers: Mutex<HashMap<Topic, TopicHandler>>,
    pub(crate) timers: Timers<ClientInput>,
    pub(crate) tx: UnboundedSender<ClientInput>,
    auth_callback: Mutex<Option<AuthCallback>>,
    rx: Mutex<Option<UnboundedReceiver<ClientInput>>>,
    epoch: Instant,
    read_generation: AtomicU64,
    weak_self: Weak<ClientInner<T>>,
}

/// A driftsync client session.
///
/// Cloning is cheap and shares the session.
pub struct Client<T: Transport + 'static> {
    pub(crate) inner: Arc<ClientInner<T>>,
}

impl<T: Transport + 'static> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> Client<T> {
    /// Create a client for the given server url.
    ///
    /// Nothing touches the network until [`Client::open`].
    pub fn new(url: &str, options: ClientOptions, transport: T) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = ConnectionMachine::new(url, options.connection_config());
        let inner = Arc::new_cyclic(|weak_self| ClientInner {
            machine: Mutex::new(machine),
            records: Mutex::new(HashMap::new()),
            emitter: Emitter::new(),
            handlers: Mutex::new(HashMap::new()),
            timers: Timers::new(tx.clone()),
            tx,
            auth_callback: Mutex::new(None),
            rx: Mutex::new(Some(rx)),
            epoch: Instant::now(),
            read_generation: AtomicU64::new(0),
            weak_self: weak_self.clone(),
            options,
            transport,
        });
        Self { inner }
    }

    /// Open the session. Must be called from within a tokio runtime.
    pub fn open(&self) -> Result<(), ClientError> {
        if let Some(rx) = relock(&self.inner.rx).take() {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(dispatch_loop(inner, rx));
        }
        self.inner
            .enqueue(ClientInput::Machine(MachineInput::OpenRequested))
    }

    /// Close the session gracefully.
    pub fn close(&self) {
        let _ = self
            .inner
            .enqueue(ClientInput::Machine(MachineInput::CloseRequested));
    }

    /// Authenticate with a JSON object of credentials.
    ///
    /// The callback fires exactly once with the server's verdict:
    /// `(true, client_data)` or `(false, reason)`. Non-object `params`
    /// fail here, synchronously, without invoking the callback.
    pub fn login(
        &self,
        params: Value,
        callback: impl FnOnce(bool, Option<Value>) + Send + 'static,
    ) -> Result<(), ClientError> {
        if !params.is_object() {
            return Err(ClientError::InvalidAuthenticationDetails(
                "authentication parameters must be a JSON object".to_string(),
            ));
        }
        *relock(&self.inner.auth_callback) = Some(Box::new(callback));
        self.inner
            .enqueue(ClientInput::Machine(MachineInput::AuthRequested {
                params: params.to_string(),
            }))
    }

    /// The current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        relock(&self.inner.machine).state()
    }

    /// Register a listener on the client event bus.
    pub fn on(
        &self,
        event: ClientEvent,
        callback: impl FnMut(&EventPayload) + Send + 'static,
    ) -> ListenerId {
        self.inner.emitter.on(event, callback)
    }

    /// Remove a listener from the client event bus.
    pub fn off(&self, event: ClientEvent, id: ListenerId) {
        self.inner.emitter.off(&event, id);
    }

    /// Route inbound messages of a topic (events, RPC, presence) to a
    /// handler. Record and session topics are handled internally.
    pub fn register_handler(
        &self,
        topic: Topic,
        handler: impl Fn(&Message) + Send + 'static,
    ) {
        relock(&self.inner.handlers).insert(topic, Box::new(handler));
    }

    /// Get (or create) the record with this name.
    ///
    /// At most one record exists per name; a handle after discard or
    /// delete resubscribes from scratch.
    pub fn record(&self, name: &str) -> RecordHandle<T> {
        self.inner.ensure_record(name);
        RecordHandle::new(name, Arc::clone(&self.inner))
    }
}

async fn dispatch_loop<T: Transport + 'static>(
    inner: Arc<ClientInner<T>>,
    mut rx: UnboundedReceiver<ClientInput>,
) {
    while let Some(input) = rx.recv().await {
        match input {
            ClientInput::Machine(input) => inner.drive(input).await,
            ClientInput::RecordTimer { name, timer } => {
                let effects = match relock(&inner.records).get_mut(&name) {
                    Some(entry) => entry.core.handle_timer(timer),
                    None => Vec::new(),
                };
                inner.run_record_effects(&name, effects);
            }
        }
    }
}

impl<T: Transport + 'static> ClientInner<T> {
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn enqueue(&self, input: ClientInput) -> Result<(), ClientError> {
        self.tx.send(input).map_err(|_| ClientError::Closed)
    }

    async fn drive(&self, input: MachineInput) {
        let effects = relock(&self.machine).handle(input);
        for effect in effects {
            self.apply_effect(effect).await;
        }
    }

    async fn apply_effect(&self, effect: Effect) {
        match effect {
            Effect::StateChanged(state) => {
                tracing::debug!(?state, "connection state changed");
                let payload = EventPayload::State(state);
                self.emitter
                    .emit(&ClientEvent::ConnectionStateChanged, &payload);
                self.emitter.emit(&ClientEvent::State(state), &payload);
            }
            Effect::OpenSocket { url } => match self.transport.connect(&url).await {
                Ok(()) => {
                    self.spawn_read_loop();
                    let _ = self.enqueue(ClientInput::Machine(MachineInput::SocketOpened));
                }
                Err(error) => {
                    tracing::warn!(%url, %error, "socket open failed");
                    let _ = self.enqueue(ClientInput::Machine(MachineInput::SocketError {
                        error: error.to_string(),
                    }));
                }
            },
            Effect::CloseSocket => {
                if let Err(error) = self.transport.close().await {
                    tracing::debug!(%error, "socket close failed");
                }
            }
            Effect::Send(messages) => {
                let encoded = codec::encode_all(&messages);
                if let Err(error) = self.transport.send(encoded.as_bytes()).await {
                    tracing::warn!(%error, "send failed");
                    let _ = self.enqueue(ClientInput::Machine(MachineInput::SocketError {
                        error: error.to_string(),
                    }));
                }
            }
            Effect::ScheduleReconnect { delay_ms } => {
                self.timers.schedule(
                    RECONNECT_TIMER,
                    Duration::from_millis(delay_ms),
                    ClientInput::Machine(MachineInput::ReconnectTimerFired),
                );
            }
            Effect::CancelReconnect => self.timers.cancel(RECONNECT_TIMER),
            Effect::StartHeartbeat => {
                let epoch = self.epoch;
                self.timers.set_interval(
                    HEARTBEAT_TIMER,
                    Duration::from_millis(self.options.heartbeat_interval_ms),
                    move || {
                        ClientInput::Machine(MachineInput::HeartbeatTick {
                            now_ms: epoch.elapsed().as_millis() as u64,
                        })
                    },
                );
            }
            Effect::StopHeartbeat => self.timers.cancel(HEARTBEAT_TIMER),
            Effect::AuthResult { success, data } => self.resolve_login(success, data),
            Effect::EmitError { kind, message } => self.emit_error(kind, message),
            Effect::Dispatch(message) => self.dispatch(message),
        }
    }

    pub(crate) fn emit_error(&self, kind: ErrorKind, message: String) {
        tracing::warn!(%kind, detail = %message, "client error");
        self.emitter
            .emit(&ClientEvent::Error, &EventPayload::Error { kind, message });
    }

    fn resolve_login(&self, success: bool, data: Option<String>) {
        let Some(callback) = relock(&self.auth_callback).take() else {
            tracing::debug!("login verdict arrived with no callback armed");
            return;
        };
        let parsed = data.as_deref().and_then(|raw| match codec::parse_typed(raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(%error, "dropping undecodable login payload");
                None
            }
        });
        if catch_unwind(AssertUnwindSafe(move || callback(success, parsed))).is_err() {
            tracing::warn!("login callback panicked");
        }
    }

    fn dispatch(&self, message: Message) {
        match message.topic() {
            Topic::Record => self.dispatch_record(&message),
            topic => {
                let handled = {
                    let handlers = relock(&self.handlers);
                    if let Some(handler) = handlers.get(&topic) {
                        handler(&message);
                        true
                    } else {
                        false
                    }
                };
                if !handled {
                    self.emit_error(
                        ErrorKind::UnsolicitedMessage,
                        format!("no handler registered for topic {topic:?}"),
                    );
                }
            }
        }
    }

    fn spawn_read_loop(&self) {
        // Each socket incarnation gets its own generation; a loop that
        // outlives its segment stops forwarding events.
        let generation = self.read_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            loop {
                let result = inner.transport.recv().await;
                if inner.read_generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                match result {
                    Ok(bytes) => {
                        let raw = String::from_utf8_lossy(&bytes);
                        let now_ms = inner.now_ms();
                        for frame in codec::parse(&raw) {
                            match frame {
                                Ok(message) => {
                                    let _ = inner.enqueue(ClientInput::Machine(
                                        MachineInput::FrameIn { message, now_ms },
                                    ));
                                }
                                Err(error) => {
                                    tracing::warn!(%error, "dropping malformed frame");
                                }
                            }
                        }
                    }
                    Err(TransportError::ConnectionClosed | TransportError::NotConnected) => {
                        let _ =
                            inner.enqueue(ClientInput::Machine(MachineInput::SocketClosed));
                        break;
                    }
                    Err(error) => {
                        let _ = inner.enqueue(ClientInput::Machine(MachineInput::SocketError {
                            error: error.to_string(),
                        }));
                        break;
                    }
                }
            }
        });
    }
}
