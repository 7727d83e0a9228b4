//! Decode errors for driftsync frames.

use thiserror::Error;

/// Errors produced while decoding frames or typed values.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A frame with no fields at all.
    #[error("empty frame")]
    EmptyFrame,

    /// A frame whose topic code is not recognised.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// A frame whose action code is not valid for its topic.
    #[error("unknown action {action} on topic {topic}")]
    UnknownAction {
        /// The topic code of the frame.
        topic: String,
        /// The unrecognised action code.
        action: String,
    },

    /// A frame missing a required field.
    #[error("frame is missing its {0} field")]
    MissingField(&'static str),

    /// A typed value with an unrecognised type prefix.
    #[error("unknown type prefix: {0:?}")]
    UnknownTypePrefix(Option<char>),

    /// A typed number that does not parse.
    #[error("invalid number payload: {0}")]
    InvalidNumber(String),

    /// An embedded JSON payload that does not parse.
    #[error("invalid json payload: {0}")]
    InvalidJson(#[source] serde_json::Error),
}
