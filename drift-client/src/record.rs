//! Record handles and the per-name record registry.
//!
//! The client keeps at most one record per name. Inbound RECORD frames
//! are routed here by name; each record's pure core decides what they
//! mean and this module executes the resulting effects: sends through
//! the connection, deadline timers, and callback dispatch.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use driftsync_core::connection::Input as MachineInput;
use driftsync_core::{ErrorKind, JsonPath, RecordCore, RecordEffect, RecordTimer};
use driftsync_types::{codec, Action, Message, RecordAction, Topic};

use crate::client::{ClientInner, ClientInput};
use crate::emitter::{Emitter, ListenerId};
use crate::error::ClientError;
use crate::transport::Transport;
use crate::util::relock;

/// Keys on a record's event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordEvent {
    /// The record received its first state.
    Ready,
    /// An error surfaced on this record.
    Error,
    /// The server acknowledged a delete.
    Deleted,
    /// The server acknowledged an unsubscribe.
    Discarded,
}

/// Payload delivered to record event listeners.
#[derive(Debug, Clone)]
pub enum RecordPayload {
    /// A plain lifecycle event; nothing to carry.
    Lifecycle,
    /// The error surfaced.
    Error {
        /// The error kind.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
}

pub(crate) struct RecordEntry {
    pub(crate) core: RecordCore,
    pub(crate) subs: Arc<Emitter<Option<String>, Value>>,
    pub(crate) events: Arc<Emitter<RecordEvent, RecordPayload>>,
}

impl RecordEntry {
    fn new(core: RecordCore) -> Self {
        Self {
            core,
            subs: Arc::new(Emitter::new()),
            events: Arc::new(Emitter::new()),
        }
    }
}

fn timer_name(record: &str, timer: RecordTimer) -> String {
    format!("record:{record}:{timer:?}")
}

impl<T: Transport + 'static> ClientInner<T> {
    /// Make sure a live record exists for this name, announcing a fresh
    /// one to the server when needed.
    pub(crate) fn ensure_record(&self, name: &str) {
        let effects = {
            let mut records = relock(&self.records);
            if records.contains_key(name) {
                Vec::new()
            } else {
                let core = RecordCore::new(name);
                let effects = core.start();
                records.insert(name.to_string(), RecordEntry::new(core));
                effects
            }
        };
        self.run_record_effects(name, effects);
    }

    /// Run a closure against a live record and execute its effects.
    pub(crate) fn with_record(
        &self,
        name: &str,
        op: impl FnOnce(&mut RecordEntry) -> Vec<RecordEffect>,
    ) -> Result<(), ClientError> {
        let effects = {
            let mut records = relock(&self.records);
            match records.get_mut(name) {
                Some(entry) => op(entry),
                None => return Err(ClientError::RecordDestroyed(name.to_string())),
            }
        };
        self.run_record_effects(name, effects);
        Ok(())
    }

    /// Execute record effects. Callbacks run here, after the registry
    /// lock is released, so they may freely call back into the client.
    pub(crate) fn run_record_effects(&self, name: &str, effects: Vec<RecordEffect>) {
        if effects.is_empty() {
            return;
        }
        let handles = relock(&self.records)
            .get(name)
            .map(|entry| (Arc::clone(&entry.subs), Arc::clone(&entry.events)));
        let Some((subs, events)) = handles else {
            return;
        };

        let mut destroyed = false;
        for effect in effects {
            match effect {
                RecordEffect::Send(message) => {
                    let _ = self.enqueue(ClientInput::Machine(MachineInput::SendRequested {
                        message,
                    }));
                }
                RecordEffect::ArmTimer(timer) => {
                    self.timers.schedule(
                        &timer_name(name, timer),
                        self.record_timer_delay(timer),
                        ClientInput::RecordTimer {
                            name: name.to_string(),
                            timer,
                        },
                    );
                }
                RecordEffect::CancelTimer(timer) => {
                    self.timers.cancel(&timer_name(name, timer));
                }
                RecordEffect::EmitReady => {
                    events.emit(&RecordEvent::Ready, &RecordPayload::Lifecycle);
                }
                RecordEffect::EmitDeleted => {
                    events.emit(&RecordEvent::Deleted, &RecordPayload::Lifecycle);
                }
                RecordEffect::EmitDiscarded => {
                    events.emit(&RecordEvent::Discarded, &RecordPayload::Lifecycle);
                }
                RecordEffect::EmitError { kind, message } => {
                    tracing::warn!(record = %name, %kind, detail = %message, "record error");
                    events.emit(&RecordEvent::Error, &RecordPayload::Error { kind, message });
                }
                RecordEffect::PathChanged { path, value } => {
                    subs.emit(&path, &value);
                }
                RecordEffect::Destroyed => destroyed = true,
            }
        }

        if destroyed {
            relock(&self.records).remove(name);
            for timer in [
                RecordTimer::ReadAck,
                RecordTimer::ReadResponse,
                RecordTimer::DeleteAck,
                RecordTimer::DiscardAck,
            ] {
                self.timers.cancel(&timer_name(name, timer));
            }
            subs.clear();
            events.clear();
        }
    }

    fn record_timer_delay(&self, timer: RecordTimer) -> Duration {
        let ms = match timer {
            RecordTimer::ReadAck | RecordTimer::DiscardAck => {
                self.options.record_read_ack_timeout_ms
            }
            RecordTimer::ReadResponse => self.options.record_read_timeout_ms,
            RecordTimer::DeleteAck => self.options.record_delete_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    /// Route one inbound RECORD frame to the record it names.
    pub(crate) fn dispatch_record(&self, message: &Message) {
        let Action::Record(action) = message.action else {
            return;
        };
        let Some(name) = message.name() else {
            self.emit_error(
                ErrorKind::UnsolicitedMessage,
                "record frame without a name".to_string(),
            );
            return;
        };
        let name = name.to_string();
        if !relock(&self.records).contains_key(&name) {
            self.emit_error(
                ErrorKind::UnsolicitedMessage,
                format!("message for unknown record {name:?}"),
            );
            return;
        }

        let result = match action {
            RecordAction::Read => self.apply_remote_state(&name, message, true),
            RecordAction::Update => self.apply_remote_state(&name, message, false),
            RecordAction::Patch => self.apply_remote_patch(&name, message),
            RecordAction::Ack => self.apply_remote_ack(&name, message),
            RecordAction::Error => {
                self.apply_remote_error(&name, message);
                Ok(())
            }
            RecordAction::CreateOrRead | RecordAction::Delete | RecordAction::Unsubscribe => {
                self.emit_error(
                    ErrorKind::UnsolicitedMessage,
                    format!("client-only record action {action:?} from server"),
                );
                Ok(())
            }
        };
        if let Err(detail) = result {
            tracing::warn!(record = %name, %detail, "dropping malformed record frame");
            self.emit_error(ErrorKind::ParseError, detail);
        }
    }

    fn apply_remote_state(
        &self,
        name: &str,
        message: &Message,
        initial: bool,
    ) -> Result<(), String> {
        let version = parse_version(message)?;
        let raw = message.data.get(2).ok_or("missing data field")?;
        let data: Value =
            serde_json::from_str(raw).map_err(|error| format!("bad record payload: {error}"))?;
        let _ = self.with_record(name, |entry| {
            if initial {
                entry.core.apply_read(version, data)
            } else {
                entry.core.apply_update(version, data)
            }
        });
        Ok(())
    }

    fn apply_remote_patch(&self, name: &str, message: &Message) -> Result<(), String> {
        let version = parse_version(message)?;
        let raw_path = message.data.get(2).ok_or("missing path field")?;
        let path = JsonPath::parse(raw_path).map_err(|error| error.to_string())?;
        let typed = message.data.get(3).ok_or("missing value field")?;
        let value = codec::parse_typed(typed).map_err(|error| error.to_string())?;
        let _ = self.with_record(name, |entry| entry.core.apply_patch(version, &path, value));
        Ok(())
    }

    fn apply_remote_ack(&self, name: &str, message: &Message) -> Result<(), String> {
        let code = message.data.first().ok_or("missing acked-action field")?;
        let acked = match Action::from_code(Topic::Record, code) {
            Ok(Action::Record(acked)) => acked,
            _ => return Err(format!("unknown acked action {code:?}")),
        };
        let _ = self.with_record(name, |entry| entry.core.handle_ack(acked));
        Ok(())
    }

    fn apply_remote_error(&self, name: &str, message: &Message) {
        let code = message.data.get(1).map(String::as_str).unwrap_or("");
        let detail = message.data.get(2).cloned().unwrap_or_default();
        let kind = match code {
            "VERSION_EXISTS" => ErrorKind::VersionExists,
            "ACK_TIMEOUT" => ErrorKind::AckTimeout,
            "RESPONSE_TIMEOUT" => ErrorKind::ResponseTimeout,
            _ => ErrorKind::UnsolicitedMessage,
        };
        let _ = self.with_record(name, |_entry| {
            vec![RecordEffect::EmitError {
                kind,
                message: format!("{code}: {detail}"),
            }]
        });
    }
}

fn parse_version(message: &Message) -> Result<u64, String> {
    message
        .data
        .get(1)
        .ok_or("missing version field")?
        .parse::<u64>()
        .map_err(|error| format!("bad version: {error}"))
}

/// A handle to one named record.
///
/// Cloning is cheap; every handle for a name addresses the same record.
pub struct RecordHandle<T: Transport + 'static> {
    name: String,
    inner: Arc<ClientInner<T>>,
}

impl<T: Transport + 'static> Clone for RecordHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> RecordHandle<T> {
    pub(crate) fn new(name: &str, inner: Arc<ClientInner<T>>) -> Self {
        Self {
            name: name.to_string(),
            inner,
        }
    }

    /// The record's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the record has received its first state.
    pub fn is_ready(&self) -> bool {
        relock(&self.inner.records)
            .get(&self.name)
            .map(|entry| entry.core.is_ready())
            .unwrap_or(false)
    }

    /// The record's current version, if it is still live.
    pub fn version(&self) -> Option<u64> {
        relock(&self.inner.records)
            .get(&self.name)
            .map(|entry| entry.core.version())
    }

    /// A deep copy of the whole document.
    pub fn get(&self) -> Option<Value> {
        relock(&self.inner.records)
            .get(&self.name)
            .and_then(|entry| entry.core.get(&JsonPath::root()))
    }

    /// A deep copy of the value at `path`; `None` when the path is
    /// missing. The copy is isolated from later record mutations.
    pub fn get_path(&self, path: &str) -> Result<Option<Value>, ClientError> {
        let path = JsonPath::parse(path)?;
        Ok(relock(&self.inner.records)
            .get(&self.name)
            .and_then(|entry| entry.core.get(&path)))
    }

    /// Replace the whole document.
    pub fn set(&self, data: Value) -> Result<(), ClientError> {
        self.set_at(JsonPath::root(), data)
    }

    /// Write the value at `path`.
    pub fn set_path(&self, path: &str, value: Value) -> Result<(), ClientError> {
        self.set_at(JsonPath::parse(path)?, value)
    }

    fn set_at(&self, path: JsonPath, value: Value) -> Result<(), ClientError> {
        self.inner
            .with_record(&self.name, |entry| entry.core.set(&path, value))
    }

    /// Observe the whole document. With `trigger_now`, a ready record
    /// invokes the callback immediately with the current state.
    pub fn subscribe(
        &self,
        trigger_now: bool,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> Result<ListenerId, ClientError> {
        self.subscribe_at(JsonPath::root(), trigger_now, callback)
    }

    /// Observe one path of the document.
    pub fn subscribe_path(
        &self,
        path: &str,
        trigger_now: bool,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> Result<ListenerId, ClientError> {
        self.subscribe_at(JsonPath::parse(path)?, trigger_now, callback)
    }

    fn subscribe_at(
        &self,
        path: JsonPath,
        trigger_now: bool,
        callback: impl FnMut(&Value) + Send + 'static,
    ) -> Result<ListenerId, ClientError> {
        let key = subscription_key(&path);
        let (id, now_value, subs) = {
            let mut records = relock(&self.inner.records);
            let entry = records
                .get_mut(&self.name)
                .ok_or_else(|| ClientError::RecordDestroyed(self.name.clone()))?;
            entry.core.subscribe(&path);
            let id = entry.subs.on(key.clone(), callback);
            let now_value = (trigger_now && entry.core.is_ready())
                .then(|| entry.core.get(&path).unwrap_or(Value::Null));
            (id, now_value, Arc::clone(&entry.subs))
        };
        if let Some(value) = now_value {
            subs.emit_to(&key, id, &value);
        }
        Ok(id)
    }

    /// Drop a root subscription. Purely local.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.unsubscribe_at(JsonPath::root(), id);
    }

    /// Drop a path subscription. Purely local.
    pub fn unsubscribe_path(&self, path: &str, id: ListenerId) -> Result<(), ClientError> {
        self.unsubscribe_at(JsonPath::parse(path)?, id);
        Ok(())
    }

    fn unsubscribe_at(&self, path: JsonPath, id: ListenerId) {
        let mut records = relock(&self.inner.records);
        if let Some(entry) = records.get_mut(&self.name) {
            if entry.subs.off(&subscription_key(&path), id) {
                entry.core.unsubscribe(&path);
            }
        }
    }

    /// Register a lifecycle listener on this record.
    pub fn on(
        &self,
        event: RecordEvent,
        callback: impl FnMut(&RecordPayload) + Send + 'static,
    ) -> Result<ListenerId, ClientError> {
        let records = relock(&self.inner.records);
        let entry = records
            .get(&self.name)
            .ok_or_else(|| ClientError::RecordDestroyed(self.name.clone()))?;
        Ok(entry.events.on(event, callback))
    }

    /// Remove a lifecycle listener.
    pub fn off(&self, event: RecordEvent, id: ListenerId) {
        if let Some(entry) = relock(&self.inner.records).get(&self.name) {
            entry.events.off(&event, id);
        }
    }

    /// Stop caring about the record: unsubscribe server-side and drop
    /// all local state once the server acknowledges.
    pub fn discard(&self) -> Result<(), ClientError> {
        self.inner
            .with_record(&self.name, |entry| entry.core.discard())
    }

    /// Delete the record server-side. Emits `Deleted` and drops local
    /// state once the server acknowledges.
    pub fn delete(&self) -> Result<(), ClientError> {
        self.inner
            .with_record(&self.name, |entry| entry.core.delete())
    }
}

fn subscription_key(path: &JsonPath) -> Option<String> {
    if path.is_root() {
        None
    } else {
        Some(path.as_str().to_string())
    }
}
