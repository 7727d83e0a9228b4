//! User-visible error kinds.

use thiserror::Error;

/// The kinds of errors surfaced to user code, on the client event bus or
/// on individual records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// A transport-level failure on the socket.
    #[error("connection error")]
    ConnectionError,
    /// An operation that needs an open session arrived while closed.
    #[error("connection is closed")]
    IsClosed,
    /// No inbound traffic for two heartbeat intervals.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
    /// The reconnect attempt budget is exhausted.
    #[error("max reconnection attempts reached")]
    MaxReconnectionAttemptsReached,
    /// An operation was attempted while the client is offline.
    #[error("client offline")]
    ClientOffline,
    /// Login parameters were rejected before being sent.
    #[error("invalid authentication details")]
    InvalidAuthenticationDetails,
    /// The server gave up waiting for a login.
    #[error("authentication timeout")]
    AuthenticationTimeout,
    /// The server refused further login attempts.
    #[error("too many authentication attempts")]
    TooManyAuthAttempts,
    /// A silent re-login with cached credentials was denied.
    #[error("reauthentication failure")]
    ReauthenticationFailure,
    /// A message arrived that nothing asked for.
    #[error("unsolicited message")]
    UnsolicitedMessage,
    /// A response referenced a request this client never made.
    #[error("unknown correlation id")]
    UnknownCorrelationId,
    /// The server did not acknowledge a request in time.
    #[error("ack timeout")]
    AckTimeout,
    /// The server did not answer a read in time.
    #[error("response timeout")]
    ResponseTimeout,
    /// A remote update skipped or reused a version number.
    #[error("version exists")]
    VersionExists,
    /// An operation on a record that was already destroyed.
    #[error("record already destroyed")]
    RecordAlreadyDestroyed,
    /// The server did not acknowledge a delete in time.
    #[error("record delete timeout")]
    RecordDeleteTimeout,
    /// A record operation arrived before the record was ready.
    #[error("record not ready")]
    RecordNotReady,
    /// An inbound frame could not be decoded.
    #[error("parse error")]
    ParseError,
}
