//! Client API errors.

use thiserror::Error;

use driftsync_core::PathError;

use crate::transport::TransportError;

/// Errors returned synchronously from the client API.
///
/// Asynchronous failures (socket drops, heartbeat timeouts, denied
/// logins) surface on the event bus instead; see
/// [`ErrorKind`](driftsync_core::ErrorKind).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Login parameters were not a JSON object.
    #[error("invalid authentication details: {0}")]
    InvalidAuthenticationDetails(String),

    /// A path string that does not parse.
    #[error(transparent)]
    Path(#[from] PathError),

    /// The addressed record has been discarded or deleted.
    #[error("record {0:?} already destroyed")]
    RecordDestroyed(String),

    /// The client's dispatch loop is gone.
    #[error("client is closed")]
    Closed,
}
