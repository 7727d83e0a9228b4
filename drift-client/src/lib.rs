//! # driftsync-client
//!
//! Client library for the driftsync realtime record-sync protocol.
//!
//! A [`Client`] keeps one long-lived session to a server: it drives the
//! challenge/auth handshake, answers heartbeats, reconnects with backoff
//! (falling back to the original url after a redirect), and exposes
//! server-hosted observable JSON records with path-scoped subscriptions.
//!
//! ## Architecture
//!
//! Protocol decisions live in the pure state machines of
//! `driftsync-core`; this crate interprets their effects against a
//! [`Transport`]:
//!
//! ```text
//! Application → Client → Transport → Network
//!                  ↓
//!          driftsync-core (pure state machines)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use driftsync_client::{Client, ClientOptions, MockTransport};
//! use serde_json::json;
//!
//! let client = Client::new("wss://sync.example", ClientOptions::default(), transport);
//! client.open()?;
//! client.login(json!({"password": "123456"}), |ok, data| { /* ... */ })?;
//!
//! let weather = client.record("weather");
//! weather.subscribe_path("temp", true, |value| println!("temp: {value}"))?;
//! weather.set_path("temp", json!(21))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod emitter;
mod error;
mod options;
pub mod record;
mod timers;
pub mod transport;
mod util;

pub use client::{Client, ClientEvent, EventPayload};
pub use emitter::{Emitter, ListenerId};
pub use error::ClientError;
pub use options::ClientOptions;
pub use record::{RecordEvent, RecordHandle, RecordPayload};
pub use transport::{MockTransport, Transport, TransportError};

pub use driftsync_core::{ConnectionState, ErrorKind};
pub use driftsync_types::{Action, Message, Topic};
