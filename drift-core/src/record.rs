//! Per-record state machine.
//!
//! A record is a named, versioned JSON document held by the server and
//! cached here. This module owns the versioned apply rules, the
//! deep-equal dedup on local writes, and the snapshot/compare algorithm
//! that turns one mutation into at most one notification per affected
//! path. Like the connection machine it is pure: operations return
//! effect lists for `driftsync-client` to execute.

use std::collections::HashMap;

use serde_json::Value;

use driftsync_types::{codec, Message, RecordAction};

use crate::error::ErrorKind;
use crate::path::JsonPath;

/// The named deadlines a record arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordTimer {
    /// The server has not yet acknowledged the subscription.
    ReadAck,
    /// The server has not yet answered with the record state.
    ReadResponse,
    /// The server has not yet acknowledged a delete.
    DeleteAck,
    /// The server has not yet acknowledged an unsubscribe.
    DiscardAck,
}

/// Effects for `driftsync-client` to execute against a record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEffect {
    /// Send a message through the connection.
    Send(Message),
    /// Arm the named deadline.
    ArmTimer(RecordTimer),
    /// Disarm the named deadline.
    CancelTimer(RecordTimer),
    /// The record received its first state.
    EmitReady,
    /// The server acknowledged the delete.
    EmitDeleted,
    /// The server acknowledged the unsubscribe.
    EmitDiscarded,
    /// Surface an error on this record.
    EmitError {
        /// The error kind.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
    /// The value at a subscribed path actually changed.
    PathChanged {
        /// The subscribed path, or `None` for root subscribers.
        path: Option<String>,
        /// The new value at that path.
        value: Value,
    },
    /// The record is gone; drop the handle state and all listeners.
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Discarding,
    Deleting,
    Destroyed,
}

#[derive(Debug)]
struct PathSub {
    path: JsonPath,
    count: usize,
}

struct ChangeSnapshot {
    root: Option<Value>,
    paths: Vec<(String, Option<Value>)>,
}

/// The cached state and protocol rules for one record.
#[derive(Debug)]
pub struct RecordCore {
    name: String,
    version: u64,
    data: Value,
    is_ready: bool,
    lifecycle: Lifecycle,
    subscribed_paths: HashMap<String, PathSub>,
    root_subscribers: usize,
}

impl RecordCore {
    /// Create the local cache for a record.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 0,
            data: Value::Null,
            is_ready: false,
            lifecycle: Lifecycle::Active,
            subscribed_paths: HashMap::new(),
            root_subscribers: 0,
        }
    }

    /// The record's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the first READ has arrived.
    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    /// Whether the record has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.lifecycle == Lifecycle::Destroyed
    }

    /// A deep copy of the value at `path` (the whole document for a root
    /// path). The copy is isolated from later record mutations.
    pub fn get(&self, path: &JsonPath) -> Option<Value> {
        path.get(&self.data).cloned()
    }

    /// Announce the record to the server and arm the read deadlines.
    pub fn start(&self) -> Vec<RecordEffect> {
        vec![
            RecordEffect::Send(Message::record_create_or_read(&self.name)),
            RecordEffect::ArmTimer(RecordTimer::ReadAck),
            RecordEffect::ArmTimer(RecordTimer::ReadResponse),
        ]
    }

    /// Register interest in a path (root when `path.is_root()`).
    pub fn subscribe(&mut self, path: &JsonPath) {
        if path.is_root() {
            self.root_subscribers += 1;
        } else {
            self.subscribed_paths
                .entry(path.as_str().to_string())
                .or_insert_with(|| PathSub {
                    path: path.clone(),
                    count: 0,
                })
                .count += 1;
        }
    }

    /// Drop one registration for a path.
    pub fn unsubscribe(&mut self, path: &JsonPath) {
        if path.is_root() {
            self.root_subscribers = self.root_subscribers.saturating_sub(1);
        } else if let Some(sub) = self.subscribed_paths.get_mut(path.as_str()) {
            sub.count -= 1;
            if sub.count == 0 {
                self.subscribed_paths.remove(path.as_str());
            }
        }
    }

    /// Local write at `path` (the whole document for a root path).
    ///
    /// A write that deep-equals the current value is a complete no-op:
    /// no version bump, no traffic, no notifications.
    pub fn set(&mut self, path: &JsonPath, value: Value) -> Vec<RecordEffect> {
        let mut effects = Vec::new();
        if self.lifecycle != Lifecycle::Active {
            effects.push(self.destroyed_error("set"));
            return effects;
        }
        if !self.is_ready {
            effects.push(RecordEffect::EmitError {
                kind: ErrorKind::RecordNotReady,
                message: format!("set on {:?} before it was ready", self.name),
            });
            return effects;
        }

        let unchanged = if path.is_root() {
            self.data == value
        } else {
            path.get(&self.data) == Some(&value)
        };
        if unchanged {
            return effects;
        }

        let snapshot = self.begin_change();
        self.version += 1;
        let message = if path.is_root() {
            self.data = value;
            Message::record_update(&self.name, self.version, &self.data.to_string())
        } else {
            path.set(&mut self.data, value.clone());
            Message::record_patch(
                &self.name,
                self.version,
                path.as_str(),
                &codec::encode_typed(&value),
            )
        };
        self.complete_change(snapshot, &mut effects);
        effects.push(RecordEffect::Send(message));
        effects
    }

    /// Apply the initial READ response.
    pub fn apply_read(&mut self, version: u64, data: Value) -> Vec<RecordEffect> {
        let mut effects = vec![
            RecordEffect::CancelTimer(RecordTimer::ReadAck),
            RecordEffect::CancelTimer(RecordTimer::ReadResponse),
        ];
        let snapshot = self.begin_change();
        self.version = version;
        self.data = data;
        if !self.is_ready {
            self.is_ready = true;
            effects.push(RecordEffect::EmitReady);
        }
        self.complete_change(snapshot, &mut effects);
        effects
    }

    /// Apply a remote full-state update.
    ///
    /// A version that is not exactly `local + 1` is flagged, but the
    /// incoming state is adopted regardless so the cache converges on
    /// what the server holds.
    pub fn apply_update(&mut self, version: u64, data: Value) -> Vec<RecordEffect> {
        let mut effects = Vec::new();
        if self.lifecycle == Lifecycle::Destroyed {
            return effects;
        }
        self.check_version(version, &mut effects);
        let snapshot = self.begin_change();
        self.version = version;
        self.data = data;
        self.complete_change(snapshot, &mut effects);
        effects
    }

    /// Apply a remote path-scoped update. Same versioning rule as
    /// [`RecordCore::apply_update`].
    pub fn apply_patch(
        &mut self,
        version: u64,
        path: &JsonPath,
        value: Value,
    ) -> Vec<RecordEffect> {
        let mut effects = Vec::new();
        if self.lifecycle == Lifecycle::Destroyed {
            return effects;
        }
        self.check_version(version, &mut effects);
        let snapshot = self.begin_change();
        self.version = version;
        path.set(&mut self.data, value);
        self.complete_change(snapshot, &mut effects);
        effects
    }

    /// Ask the server to delete the record.
    pub fn delete(&mut self) -> Vec<RecordEffect> {
        if self.lifecycle != Lifecycle::Active {
            return vec![self.destroyed_error("delete")];
        }
        self.lifecycle = Lifecycle::Deleting;
        vec![
            RecordEffect::Send(Message::record_delete(&self.name)),
            RecordEffect::ArmTimer(RecordTimer::DeleteAck),
        ]
    }

    /// Stop caring about the record without deleting it server-side.
    pub fn discard(&mut self) -> Vec<RecordEffect> {
        if self.lifecycle != Lifecycle::Active {
            return vec![self.destroyed_error("discard")];
        }
        self.lifecycle = Lifecycle::Discarding;
        vec![
            RecordEffect::Send(Message::record_unsubscribe(&self.name)),
            RecordEffect::ArmTimer(RecordTimer::DiscardAck),
        ]
    }

    /// Handle a server acknowledgement for this record.
    pub fn handle_ack(&mut self, acked: RecordAction) -> Vec<RecordEffect> {
        match (self.lifecycle, acked) {
            (_, RecordAction::CreateOrRead) => {
                vec![RecordEffect::CancelTimer(RecordTimer::ReadAck)]
            }
            (Lifecycle::Deleting, RecordAction::Delete) => {
                self.lifecycle = Lifecycle::Destroyed;
                vec![
                    RecordEffect::CancelTimer(RecordTimer::DeleteAck),
                    RecordEffect::EmitDeleted,
                    RecordEffect::Destroyed,
                ]
            }
            (Lifecycle::Discarding, RecordAction::Unsubscribe) => {
                self.lifecycle = Lifecycle::Destroyed;
                vec![
                    RecordEffect::CancelTimer(RecordTimer::DiscardAck),
                    RecordEffect::EmitDiscarded,
                    RecordEffect::Destroyed,
                ]
            }
            (_, acked) => vec![RecordEffect::EmitError {
                kind: ErrorKind::UnsolicitedMessage,
                message: format!("unexpected ack {acked:?} for {:?}", self.name),
            }],
        }
    }

    /// Handle an expired deadline.
    pub fn handle_timer(&mut self, timer: RecordTimer) -> Vec<RecordEffect> {
        let (kind, what) = match timer {
            RecordTimer::ReadAck => (ErrorKind::AckTimeout, "subscription was not acknowledged"),
            RecordTimer::ReadResponse => (ErrorKind::ResponseTimeout, "no read response"),
            RecordTimer::DeleteAck => (ErrorKind::RecordDeleteTimeout, "delete was not acknowledged"),
            RecordTimer::DiscardAck => (ErrorKind::AckTimeout, "unsubscribe was not acknowledged"),
        };
        vec![RecordEffect::EmitError {
            kind,
            message: format!("{what} in time for {:?}", self.name),
        }]
    }

    fn check_version(&self, version: u64, effects: &mut Vec<RecordEffect>) {
        if version != self.version + 1 {
            effects.push(RecordEffect::EmitError {
                kind: ErrorKind::VersionExists,
                message: format!(
                    "expected version {} for {:?}, got {version}",
                    self.version + 1,
                    self.name
                ),
            });
        }
    }

    fn destroyed_error(&self, op: &str) -> RecordEffect {
        RecordEffect::EmitError {
            kind: ErrorKind::RecordAlreadyDestroyed,
            message: format!("{op} on destroyed record {:?}", self.name),
        }
    }

    /// Snapshot every subscribed view before a mutation.
    fn begin_change(&self) -> ChangeSnapshot {
        let root = (self.root_subscribers > 0).then(|| self.data.clone());
        let paths = self
            .subscribed_paths
            .values()
            .map(|sub| {
                (
                    sub.path.as_str().to_string(),
                    sub.path.get(&self.data).cloned(),
                )
            })
            .collect();
        ChangeSnapshot { root, paths }
    }

    /// Compare each snapshotted view against the mutated state and emit
    /// one notification per view that actually changed.
    fn complete_change(&self, snapshot: ChangeSnapshot, effects: &mut Vec<RecordEffect>) {
        for (raw, before) in snapshot.paths {
            let after = self
                .subscribed_paths
                .get(&raw)
                .and_then(|sub| sub.path.get(&self.data).cloned());
            if after != before {
                effects.push(RecordEffect::PathChanged {
                    path: Some(raw),
                    value: after.unwrap_or(Value::Null),
                });
            }
        }
        if let Some(before) = snapshot.root {
            if before != self.data {
                effects.push(RecordEffect::PathChanged {
                    path: None,
                    value: self.data.clone(),
                });
            }
        }
    }
}
