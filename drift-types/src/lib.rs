//! # driftsync-types
//!
//! Wire format types for the driftsync realtime record-sync protocol.
//!
//! This crate provides the foundational types used across all driftsync
//! crates:
//! - [`Topic`], [`Action`] and the per-topic action enums
//! - [`Message`] - a decoded protocol frame
//! - [`codec`] - frame encoding/decoding and the typed scalar codec
//! - [`ParseError`] - decode failures

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
mod error;
mod message;

pub use codec::{encode, encode_all, encode_typed, parse, parse_typed};
pub use error::ParseError;
pub use message::{
    Action, AuthAction, ConnectionAction, EventAction, Message, PresenceAction, RecordAction,
    RpcAction, Topic,
};
