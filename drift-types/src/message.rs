//! Protocol messages for driftsync.
//!
//! A decoded frame is a [`Message`]: an action plus its string fields. The
//! topic is derived from the action, so a message with a mismatched
//! (topic, action) pair cannot be constructed.

use crate::error::ParseError;

/// Protocol topics, used to demultiplex inbound traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Session lifecycle: handshake, liveness, close.
    Connection,
    /// Authentication.
    Auth,
    /// Pub/sub events (routed to an external handler).
    Event,
    /// Observable records.
    Record,
    /// Remote procedure calls (routed to an external handler).
    Rpc,
    /// Presence queries (routed to an external handler).
    Presence,
}

impl Topic {
    /// The single-character wire code for this topic.
    pub fn code(&self) -> &'static str {
        match self {
            Topic::Connection => "C",
            Topic::Auth => "A",
            Topic::Event => "E",
            Topic::Record => "R",
            Topic::Rpc => "P",
            Topic::Presence => "U",
        }
    }

    /// Decode a topic from its wire code.
    pub fn from_code(code: &str) -> Result<Self, ParseError> {
        match code {
            "C" => Ok(Topic::Connection),
            "A" => Ok(Topic::Auth),
            "E" => Ok(Topic::Event),
            "R" => Ok(Topic::Record),
            "P" => Ok(Topic::Rpc),
            "U" => Ok(Topic::Presence),
            other => Err(ParseError::UnknownTopic(other.to_string())),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Actions on the `Connection` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionAction {
    /// Server-initiated handshake preamble.
    Challenge,
    /// Client reply carrying its own url.
    ChallengeResponse,
    /// Server accepted the challenge response.
    Accept,
    /// Server rejected the challenge response (terminal).
    Reject,
    /// Server redirects the client to another url.
    Redirect,
    /// Liveness probe.
    Ping,
    /// Liveness probe answer.
    Pong,
    /// Graceful close (sent by either side).
    Closing,
    /// Connection-level error, first field is an error code.
    Error,
}

/// Actions on the `Auth` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthAction {
    /// Client login request carrying a JSON parameter object.
    Request,
    /// Login accepted; optional typed client data follows.
    Success,
    /// Login denied; optional typed reason follows.
    Unsuccessful,
    /// Too many failed logins, the server gives up (terminal).
    TooManyAttempts,
    /// The server could not parse the login parameters.
    InvalidMessageData,
}

/// Actions on the `Record` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordAction {
    /// Subscribe to a record, creating it server-side if needed.
    CreateOrRead,
    /// Full state response: name, version, data.
    Read,
    /// Full-state update: name, version, data.
    Update,
    /// Path-scoped update: name, version, path, typed value.
    Patch,
    /// Acknowledgement; first field is the acknowledged action code.
    Ack,
    /// Delete a record.
    Delete,
    /// Unsubscribe from a record.
    Unsubscribe,
    /// Record-level error.
    Error,
}

/// Actions on the `Event` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventAction {
    /// Subscribe to an event name.
    Subscribe,
    /// Unsubscribe from an event name.
    Unsubscribe,
    /// An event instance: name, typed payload.
    Emit,
}

/// Actions on the `Rpc` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcAction {
    /// Invoke a remote procedure.
    Request,
    /// Response to a request.
    Response,
    /// Acknowledgement of a request.
    Ack,
    /// RPC-level error.
    Error,
}

/// Actions on the `Presence` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceAction {
    /// Subscribe to presence changes.
    Subscribe,
    /// Unsubscribe from presence changes.
    Unsubscribe,
    /// Query who is present.
    Query,
}

/// An action on any topic.
///
/// Carrying the topic inside the action makes every `(topic, action)` pair
/// valid by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// A `Connection` topic action.
    Connection(ConnectionAction),
    /// An `Auth` topic action.
    Auth(AuthAction),
    /// An `Event` topic action.
    Event(EventAction),
    /// A `Record` topic action.
    Record(RecordAction),
    /// An `Rpc` topic action.
    Rpc(RpcAction),
    /// A `Presence` topic action.
    Presence(PresenceAction),
}

impl Action {
    /// The topic this action belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            Action::Connection(_) => Topic::Connection,
            Action::Auth(_) => Topic::Auth,
            Action::Event(_) => Topic::Event,
            Action::Record(_) => Topic::Record,
            Action::Rpc(_) => Topic::Rpc,
            Action::Presence(_) => Topic::Presence,
        }
    }

    /// The wire code for this action.
    pub fn code(&self) -> &'static str {
        match self {
            Action::Connection(a) => match a {
                ConnectionAction::Challenge => "CH",
                ConnectionAction::ChallengeResponse => "CHR",
                ConnectionAction::Accept => "A",
                ConnectionAction::Reject => "REJ",
                ConnectionAction::Redirect => "RED",
                ConnectionAction::Ping => "PI",
                ConnectionAction::Pong => "PO",
                ConnectionAction::Closing => "CL",
                ConnectionAction::Error => "E",
            },
            Action::Auth(a) => match a {
                AuthAction::Request => "REQ",
                AuthAction::Success => "A",
                AuthAction::Unsuccessful => "E",
                AuthAction::TooManyAttempts => "TMA",
                AuthAction::InvalidMessageData => "IMD",
            },
            Action::Event(a) => match a {
                EventAction::Subscribe => "S",
                EventAction::Unsubscribe => "US",
                EventAction::Emit => "EVT",
            },
            Action::Record(a) => match a {
                RecordAction::CreateOrRead => "CR",
                RecordAction::Read => "R",
                RecordAction::Update => "U",
                RecordAction::Patch => "P",
                RecordAction::Ack => "A",
                RecordAction::Delete => "D",
                RecordAction::Unsubscribe => "US",
                RecordAction::Error => "E",
            },
            Action::Rpc(a) => match a {
                RpcAction::Request => "REQ",
                RpcAction::Response => "RES",
                RpcAction::Ack => "A",
                RpcAction::Error => "E",
            },
            Action::Presence(a) => match a {
                PresenceAction::Subscribe => "S",
                PresenceAction::Unsubscribe => "US",
                PresenceAction::Query => "Q",
            },
        }
    }

    /// Decode an action from a topic and wire code.
    pub fn from_code(topic: Topic, code: &str) -> Result<Self, ParseError> {
        let unknown = || ParseError::UnknownAction {
            topic: topic.code().to_string(),
            action: code.to_string(),
        };
        match topic {
            Topic::Connection => match code {
                "CH" => Ok(Action::Connection(ConnectionAction::Challenge)),
                "CHR" => Ok(Action::Connection(ConnectionAction::ChallengeResponse)),
                "A" => Ok(Action::Connection(ConnectionAction::Accept)),
                "REJ" => Ok(Action::Connection(ConnectionAction::Reject)),
                "RED" => Ok(Action::Connection(ConnectionAction::Redirect)),
                "PI" => Ok(Action::Connection(ConnectionAction::Ping)),
                "PO" => Ok(Action::Connection(ConnectionAction::Pong)),
                "CL" => Ok(Action::Connection(ConnectionAction::Closing)),
                "E" => Ok(Action::Connection(ConnectionAction::Error)),
                _ => Err(unknown()),
            },
            Topic::Auth => match code {
                "REQ" => Ok(Action::Auth(AuthAction::Request)),
                "A" => Ok(Action::Auth(AuthAction::Success)),
                "E" => Ok(Action::Auth(AuthAction::Unsuccessful)),
                "TMA" => Ok(Action::Auth(AuthAction::TooManyAttempts)),
                "IMD" => Ok(Action::Auth(AuthAction::InvalidMessageData)),
                _ => Err(unknown()),
            },
            Topic::Event => match code {
                "S" => Ok(Action::Event(EventAction::Subscribe)),
                "US" => Ok(Action::Event(EventAction::Unsubscribe)),
                "EVT" => Ok(Action::Event(EventAction::Emit)),
                _ => Err(unknown()),
            },
            Topic::Record => match code {
                "CR" => Ok(Action::Record(RecordAction::CreateOrRead)),
                "R" => Ok(Action::Record(RecordAction::Read)),
                "U" => Ok(Action::Record(RecordAction::Update)),
                "P" => Ok(Action::Record(RecordAction::Patch)),
                "A" => Ok(Action::Record(RecordAction::Ack)),
                "D" => Ok(Action::Record(RecordAction::Delete)),
                "US" => Ok(Action::Record(RecordAction::Unsubscribe)),
                "E" => Ok(Action::Record(RecordAction::Error)),
                _ => Err(unknown()),
            },
            Topic::Rpc => match code {
                "REQ" => Ok(Action::Rpc(RpcAction::Request)),
                "RES" => Ok(Action::Rpc(RpcAction::Response)),
                "A" => Ok(Action::Rpc(RpcAction::Ack)),
                "E" => Ok(Action::Rpc(RpcAction::Error)),
                _ => Err(unknown()),
            },
            Topic::Presence => match code {
                "S" => Ok(Action::Presence(PresenceAction::Subscribe)),
                "US" => Ok(Action::Presence(PresenceAction::Unsubscribe)),
                "Q" => Ok(Action::Presence(PresenceAction::Query)),
                _ => Err(unknown()),
            },
        }
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// What this frame does.
    pub action: Action,
    /// The remaining frame fields, in wire order.
    pub data: Vec<String>,
}

impl Message {
    /// Create a message from an action and its fields.
    pub fn new(action: Action, data: Vec<String>) -> Self {
        Self { action, data }
    }

    /// The topic this message belongs to.
    pub fn topic(&self) -> Topic {
        self.action.topic()
    }

    /// The record/event name this message addresses, if any.
    ///
    /// For record frames other than ACK the name is the first field; for
    /// ACK frames it is the second (the first being the acknowledged
    /// action code).
    pub fn name(&self) -> Option<&str> {
        match self.action {
            Action::Record(RecordAction::Ack) => self.data.get(1).map(String::as_str),
            Action::Record(_) | Action::Event(_) => self.data.first().map(String::as_str),
            _ => None,
        }
    }

    /// `C PI` - liveness probe.
    pub fn ping() -> Self {
        Self::new(Action::Connection(ConnectionAction::Ping), vec![])
    }

    /// `C PO` - liveness probe answer.
    pub fn pong() -> Self {
        Self::new(Action::Connection(ConnectionAction::Pong), vec![])
    }

    /// `C CH` - handshake preamble.
    pub fn challenge() -> Self {
        Self::new(Action::Connection(ConnectionAction::Challenge), vec![])
    }

    /// `C CHR <url>` - handshake reply carrying the client's url.
    pub fn challenge_response(url: &str) -> Self {
        Self::new(
            Action::Connection(ConnectionAction::ChallengeResponse),
            vec![url.to_string()],
        )
    }

    /// `C A` - challenge accepted.
    pub fn accept() -> Self {
        Self::new(Action::Connection(ConnectionAction::Accept), vec![])
    }

    /// `C REJ` - challenge rejected.
    pub fn reject() -> Self {
        Self::new(Action::Connection(ConnectionAction::Reject), vec![])
    }

    /// `C RED <url>` - redirect to another server.
    pub fn redirect(url: &str) -> Self {
        Self::new(
            Action::Connection(ConnectionAction::Redirect),
            vec![url.to_string()],
        )
    }

    /// `C CL` - graceful close.
    pub fn closing() -> Self {
        Self::new(Action::Connection(ConnectionAction::Closing), vec![])
    }

    /// `A REQ <json>` - login request.
    pub fn auth_request(params_json: &str) -> Self {
        Self::new(
            Action::Auth(AuthAction::Request),
            vec![params_json.to_string()],
        )
    }

    /// `R CR <name>` - subscribe to a record, creating it if needed.
    pub fn record_create_or_read(name: &str) -> Self {
        Self::new(
            Action::Record(RecordAction::CreateOrRead),
            vec![name.to_string()],
        )
    }

    /// `R R <name> <version> <json>` - full record state.
    pub fn record_read(name: &str, version: u64, data_json: &str) -> Self {
        Self::new(
            Action::Record(RecordAction::Read),
            vec![name.to_string(), version.to_string(), data_json.to_string()],
        )
    }

    /// `R U <name> <version> <json>` - full-state update.
    pub fn record_update(name: &str, version: u64, data_json: &str) -> Self {
        Self::new(
            Action::Record(RecordAction::Update),
            vec![name.to_string(), version.to_string(), data_json.to_string()],
        )
    }

    /// `R P <name> <version> <path> <typed>` - path-scoped update.
    pub fn record_patch(name: &str, version: u64, path: &str, typed: &str) -> Self {
        Self::new(
            Action::Record(RecordAction::Patch),
            vec![
                name.to_string(),
                version.to_string(),
                path.to_string(),
                typed.to_string(),
            ],
        )
    }

    /// `R A <action-code> <name>` - record acknowledgement.
    pub fn record_ack(acked: RecordAction, name: &str) -> Self {
        Self::new(
            Action::Record(RecordAction::Ack),
            vec![
                Action::Record(acked).code().to_string(),
                name.to_string(),
            ],
        )
    }

    /// `R D <name>` - delete a record.
    pub fn record_delete(name: &str) -> Self {
        Self::new(Action::Record(RecordAction::Delete), vec![name.to_string()])
    }

    /// `R US <name>` - unsubscribe from a record.
    pub fn record_unsubscribe(name: &str) -> Self {
        Self::new(
            Action::Record(RecordAction::Unsubscribe),
            vec![name.to_string()],
        )
    }
}
