//! Connection state machine for the driftsync session.
//!
//! This module provides a pure, side-effect-free state machine for the
//! session lifecycle: the challenge/auth handshake, heartbeat liveness,
//! reconnection with backoff, redirection, and graceful close. The machine
//! takes inputs and produces a list of effects to execute.
//!
//! The actual I/O (sockets, timers, callbacks) is performed by
//! `driftsync-client`, not by this module. Time enters as explicit
//! millisecond values on the inputs that need it, so every liveness rule
//! is testable without a clock.

use driftsync_types::{Action, AuthAction, ConnectionAction, Message};

use crate::error::ErrorKind;
use crate::queue::SendQueue;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket; nothing in flight.
    Closed,
    /// Socket requested; waiting for the server's challenge.
    AwaitingConnection,
    /// Challenge response sent; waiting for the verdict.
    Challenging,
    /// The server rejected the challenge response (terminal).
    ChallengeDenied,
    /// Handshake done; the client may authenticate.
    AwaitingAuthentication,
    /// Login request sent; waiting for the verdict.
    Authenticating,
    /// Fully established session.
    Open,
    /// Tearing down the current socket to follow a redirect.
    Redirecting,
    /// Waiting out the backoff before the next attempt.
    Reconnecting,
    /// Graceful close in progress.
    Closing,
    /// The server reported an unrecoverable protocol error (terminal).
    Error,
    /// The server refused further login attempts (terminal).
    TooManyAuthAttempts,
    /// The server gave up waiting for a login (terminal).
    AuthenticationTimeout,
}

impl ConnectionState {
    /// States that accept no further traffic and never reconnect.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::ChallengeDenied
                | ConnectionState::Error
                | ConnectionState::TooManyAuthAttempts
                | ConnectionState::AuthenticationTimeout
        )
    }
}

/// Tuning knobs for the connection machine.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Heartbeat tick period in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Backoff step added per reconnection attempt, in milliseconds.
    pub reconnect_interval_increment_ms: u64,
    /// Cap on the reconnection backoff, in milliseconds.
    pub max_reconnect_interval_ms: u64,
    /// Consecutive failed attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Cap on the offline send queue. `None` means unbounded.
    pub send_queue_limit: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            reconnect_interval_increment_ms: 4_000,
            max_reconnect_interval_ms: 180_000,
            max_reconnect_attempts: 5,
            send_queue_limit: None,
        }
    }
}

/// Inputs to the connection machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// User requested the session to open.
    OpenRequested,
    /// The transport finished connecting.
    SocketOpened,
    /// The transport closed.
    SocketClosed,
    /// The transport failed.
    SocketError {
        /// Description of the failure.
        error: String,
    },
    /// A decoded frame arrived.
    FrameIn {
        /// The decoded frame.
        message: Message,
        /// Arrival time in milliseconds.
        now_ms: u64,
    },
    /// User requested authentication with a JSON parameter object.
    AuthRequested {
        /// The serialized parameter object.
        params: String,
    },
    /// User requested a graceful close.
    CloseRequested,
    /// The reconnect backoff elapsed.
    ReconnectTimerFired,
    /// The periodic heartbeat timer ticked.
    HeartbeatTick {
        /// Tick time in milliseconds.
        now_ms: u64,
    },
    /// Something above the connection wants a message sent.
    SendRequested {
        /// The outbound message.
        message: Message,
    },
}

/// Effects for `driftsync-client` to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The state changed; emit exactly one event for it.
    StateChanged(ConnectionState),
    /// Acquire a socket to the given url.
    OpenSocket {
        /// Where to connect.
        url: String,
    },
    /// Tear down the current socket.
    CloseSocket,
    /// Encode and send these messages, in order.
    Send(Vec<Message>),
    /// Arm the reconnect timer.
    ScheduleReconnect {
        /// Backoff before the next attempt.
        delay_ms: u64,
    },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Start the periodic heartbeat timer.
    StartHeartbeat,
    /// Stop the periodic heartbeat timer.
    StopHeartbeat,
    /// Resolve the pending login callback.
    AuthResult {
        /// Whether the login was accepted.
        success: bool,
        /// Typed payload: client data on success, reason on denial.
        data: Option<String>,
    },
    /// Surface an error to the event bus and logger.
    EmitError {
        /// The error kind.
        kind: ErrorKind,
        /// Human-readable detail.
        message: String,
    },
    /// Route a non-connection message to its topic handler.
    Dispatch(Message),
}

/// The session state machine. No I/O, no clock.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    config: ConnectionConfig,
    original_url: String,
    current_url: String,
    reconnect_attempts: u32,
    reconnect_pending: bool,
    last_activity_ms: u64,
    queue: SendQueue,
    in_flight_auth: Option<String>,
    cached_auth: Option<String>,
    reauth_in_flight: bool,
}

impl ConnectionMachine {
    /// Create a machine for the given url.
    pub fn new(url: &str, config: ConnectionConfig) -> Self {
        let queue = SendQueue::new(config.send_queue_limit);
        Self {
            state: ConnectionState::Closed,
            config,
            original_url: url.to_string(),
            current_url: url.to_string(),
            reconnect_attempts: 0,
            reconnect_pending: false,
            last_activity_ms: 0,
            queue,
            in_flight_auth: None,
            cached_auth: None,
            reauth_in_flight: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The url the machine is currently talking (or about to talk) to.
    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    /// Consecutive failed reconnection attempts.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Process one input and return the effects to execute, in order.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            Input::OpenRequested => self.on_open_requested(&mut effects),
            Input::SocketOpened => self.on_socket_opened(&mut effects),
            Input::SocketClosed => self.on_socket_dropped(None, &mut effects),
            Input::SocketError { error } => self.on_socket_dropped(Some(error), &mut effects),
            Input::FrameIn { message, now_ms } => self.on_frame(message, now_ms, &mut effects),
            Input::AuthRequested { params } => self.on_auth_requested(params, &mut effects),
            Input::CloseRequested => self.on_close_requested(&mut effects),
            Input::ReconnectTimerFired => self.on_reconnect_timer(&mut effects),
            Input::HeartbeatTick { now_ms } => self.on_heartbeat_tick(now_ms, &mut effects),
            Input::SendRequested { message } => self.on_send_requested(message, &mut effects),
        }
        effects
    }

    fn transition(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != next {
            self.state = next;
            effects.push(Effect::StateChanged(next));
        }
    }

    fn on_open_requested(&mut self, effects: &mut Vec<Effect>) {
        if self.state != ConnectionState::Closed {
            return;
        }
        self.reconnect_attempts = 0;
        self.current_url = self.original_url.clone();
        self.transition(ConnectionState::AwaitingConnection, effects);
        effects.push(Effect::OpenSocket {
            url: self.current_url.clone(),
        });
    }

    fn on_socket_opened(&mut self, effects: &mut Vec<Effect>) {
        if self.state == ConnectionState::Redirecting {
            self.transition(ConnectionState::AwaitingConnection, effects);
        }
    }

    fn on_socket_dropped(&mut self, error: Option<String>, effects: &mut Vec<Effect>) {
        if let Some(error) = error {
            effects.push(Effect::EmitError {
                kind: ErrorKind::ConnectionError,
                message: error,
            });
        }
        match self.state {
            ConnectionState::Closed | ConnectionState::Redirecting => {}
            s if s.is_terminal() => {}
            ConnectionState::Closing => {
                self.transition(ConnectionState::Closed, effects);
            }
            ConnectionState::Reconnecting => {
                // A lingering socket from before the backoff was armed.
                if !self.reconnect_pending {
                    self.schedule_or_give_up(effects);
                }
            }
            ConnectionState::Open => {
                effects.push(Effect::StopHeartbeat);
                self.schedule_or_give_up(effects);
            }
            _ => self.schedule_or_give_up(effects),
        }
    }

    fn schedule_or_give_up(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_attempts < self.config.max_reconnect_attempts {
            self.reconnect_attempts += 1;
            let delay_ms = self
                .config
                .reconnect_interval_increment_ms
                .saturating_mul(u64::from(self.reconnect_attempts))
                .min(self.config.max_reconnect_interval_ms);
            self.transition(ConnectionState::Reconnecting, effects);
            self.reconnect_pending = true;
            effects.push(Effect::ScheduleReconnect { delay_ms });
        } else {
            let attempts = self.reconnect_attempts;
            self.transition(ConnectionState::Closed, effects);
            effects.push(Effect::EmitError {
                kind: ErrorKind::MaxReconnectionAttemptsReached,
                message: format!("giving up after {attempts} reconnection attempts"),
            });
        }
    }

    fn on_reconnect_timer(&mut self, effects: &mut Vec<Effect>) {
        if self.state != ConnectionState::Reconnecting {
            return;
        }
        self.reconnect_pending = false;
        // Reconnects always fall back to the original url, even after a
        // redirect moved the session elsewhere.
        self.current_url = self.original_url.clone();
        self.transition(ConnectionState::AwaitingConnection, effects);
        effects.push(Effect::OpenSocket {
            url: self.current_url.clone(),
        });
    }

    fn on_close_requested(&mut self, effects: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::Closed | ConnectionState::Closing => {}
            s if s.is_terminal() => {}
            ConnectionState::Open => {
                self.transition(ConnectionState::Closing, effects);
                effects.push(Effect::StopHeartbeat);
                effects.push(Effect::Send(vec![Message::closing()]));
            }
            ConnectionState::Reconnecting => {
                self.reconnect_pending = false;
                self.transition(ConnectionState::Closed, effects);
                effects.push(Effect::CancelReconnect);
            }
            _ => {
                self.transition(ConnectionState::Closed, effects);
                effects.push(Effect::CloseSocket);
            }
        }
    }

    fn on_heartbeat_tick(&mut self, now_ms: u64, effects: &mut Vec<Effect>) {
        if self.state != ConnectionState::Open {
            return;
        }
        let silent_ms = now_ms.saturating_sub(self.last_activity_ms);
        // One missed interval is tolerated; two is a dead peer.
        if silent_ms > self.config.heartbeat_interval_ms.saturating_mul(2) {
            effects.push(Effect::EmitError {
                kind: ErrorKind::HeartbeatTimeout,
                message: format!("no traffic for {silent_ms}ms"),
            });
            effects.push(Effect::StopHeartbeat);
            effects.push(Effect::CloseSocket);
            self.schedule_or_give_up(effects);
        }
    }

    fn on_send_requested(&mut self, message: Message, effects: &mut Vec<Effect>) {
        if self.state == ConnectionState::Open {
            effects.push(Effect::Send(vec![message]));
        } else if self.queue.push(message).is_some() {
            effects.push(Effect::EmitError {
                kind: ErrorKind::ClientOffline,
                message: "send queue full; dropped oldest queued message".to_string(),
            });
        }
    }

    fn on_auth_requested(&mut self, params: String, effects: &mut Vec<Effect>) {
        if self.state != ConnectionState::AwaitingAuthentication {
            effects.push(Effect::EmitError {
                kind: ErrorKind::IsClosed,
                message: format!("cannot authenticate while {:?}", self.state),
            });
            return;
        }
        self.reauth_in_flight = false;
        self.in_flight_auth = Some(params.clone());
        self.transition(ConnectionState::Authenticating, effects);
        effects.push(Effect::Send(vec![Message::auth_request(&params)]));
    }

    fn on_frame(&mut self, message: Message, now_ms: u64, effects: &mut Vec<Effect>) {
        self.last_activity_ms = now_ms;
        match message.action {
            Action::Connection(action) => self.on_connection_frame(action, message, effects),
            Action::Auth(action) => self.on_auth_frame(action, message, effects),
            _ => effects.push(Effect::Dispatch(message)),
        }
    }

    fn on_connection_frame(
        &mut self,
        action: ConnectionAction,
        message: Message,
        effects: &mut Vec<Effect>,
    ) {
        match action {
            ConnectionAction::Ping => {
                effects.push(Effect::Send(vec![Message::pong()]));
            }
            ConnectionAction::Pong => {}
            ConnectionAction::Challenge => {
                if self.state == ConnectionState::AwaitingConnection {
                    self.transition(ConnectionState::Challenging, effects);
                    effects.push(Effect::Send(vec![Message::challenge_response(
                        &self.current_url,
                    )]));
                } else {
                    self.unsolicited(&message, effects);
                }
            }
            ConnectionAction::Accept => {
                if self.state == ConnectionState::Challenging {
                    self.transition(ConnectionState::AwaitingAuthentication, effects);
                    if let Some(params) = self.cached_auth.clone() {
                        // Reconnect with known-good credentials: log back in
                        // without bothering the application.
                        self.reauth_in_flight = true;
                        self.in_flight_auth = Some(params.clone());
                        self.transition(ConnectionState::Authenticating, effects);
                        effects.push(Effect::Send(vec![Message::auth_request(&params)]));
                    }
                } else {
                    self.unsolicited(&message, effects);
                }
            }
            ConnectionAction::Reject => {
                if self.state == ConnectionState::Challenging {
                    self.transition(ConnectionState::ChallengeDenied, effects);
                    effects.push(Effect::CloseSocket);
                } else {
                    self.unsolicited(&message, effects);
                }
            }
            ConnectionAction::Redirect => {
                if self.state != ConnectionState::Challenging {
                    self.unsolicited(&message, effects);
                    return;
                }
                match message.data.first() {
                    Some(url) => {
                        self.current_url = url.clone();
                        self.transition(ConnectionState::Redirecting, effects);
                        effects.push(Effect::CloseSocket);
                        effects.push(Effect::OpenSocket { url: url.clone() });
                    }
                    None => effects.push(Effect::EmitError {
                        kind: ErrorKind::ParseError,
                        message: "redirect frame without a url".to_string(),
                    }),
                }
            }
            ConnectionAction::Closing => match self.state {
                ConnectionState::Closing => {
                    // The server acknowledged our close; the socket
                    // teardown completes the transition to Closed.
                    effects.push(Effect::CloseSocket);
                }
                ConnectionState::Closed | ConnectionState::Reconnecting => {}
                s if s.is_terminal() => {}
                s => {
                    // Server-initiated graceful shutdown.
                    if s == ConnectionState::Open {
                        effects.push(Effect::StopHeartbeat);
                    }
                    self.transition(ConnectionState::Closing, effects);
                    effects.push(Effect::CloseSocket);
                }
            },
            ConnectionAction::Error => {
                let code = message.data.first().map(String::as_str).unwrap_or("");
                let detail = message.data.get(1).cloned().unwrap_or_default();
                if code == "AUTHENTICATION_TIMEOUT" {
                    self.transition(ConnectionState::AuthenticationTimeout, effects);
                    effects.push(Effect::EmitError {
                        kind: ErrorKind::AuthenticationTimeout,
                        message: detail,
                    });
                } else {
                    self.transition(ConnectionState::Error, effects);
                    effects.push(Effect::EmitError {
                        kind: ErrorKind::ConnectionError,
                        message: format!("{code}: {detail}"),
                    });
                }
            }
            ConnectionAction::ChallengeResponse => self.unsolicited(&message, effects),
        }
    }

    fn on_auth_frame(&mut self, action: AuthAction, message: Message, effects: &mut Vec<Effect>) {
        match action {
            AuthAction::Success => {
                if self.state != ConnectionState::Authenticating {
                    self.unsolicited(&message, effects);
                    return;
                }
                let client_data = message.data.first().cloned();
                self.cached_auth = self.in_flight_auth.take();
                self.reconnect_attempts = 0;
                self.transition(ConnectionState::Open, effects);
                if self.reauth_in_flight {
                    self.reauth_in_flight = false;
                } else {
                    effects.push(Effect::AuthResult {
                        success: true,
                        data: client_data,
                    });
                }
                effects.push(Effect::StartHeartbeat);
                let queued = self.queue.drain();
                if !queued.is_empty() {
                    effects.push(Effect::Send(queued));
                }
            }
            AuthAction::Unsuccessful | AuthAction::InvalidMessageData => {
                if self.state != ConnectionState::Authenticating {
                    self.unsolicited(&message, effects);
                    return;
                }
                let reason = message.data.first().cloned();
                self.in_flight_auth = None;
                self.transition(ConnectionState::AwaitingAuthentication, effects);
                if self.reauth_in_flight {
                    self.reauth_in_flight = false;
                    self.cached_auth = None;
                    effects.push(Effect::EmitError {
                        kind: ErrorKind::ReauthenticationFailure,
                        message: reason.unwrap_or_else(|| "cached credentials denied".to_string()),
                    });
                } else {
                    effects.push(Effect::AuthResult {
                        success: false,
                        data: reason,
                    });
                }
            }
            AuthAction::TooManyAttempts => {
                self.transition(ConnectionState::TooManyAuthAttempts, effects);
                effects.push(Effect::EmitError {
                    kind: ErrorKind::TooManyAuthAttempts,
                    message: message.data.first().cloned().unwrap_or_default(),
                });
                effects.push(Effect::CloseSocket);
            }
            AuthAction::Request => self.unsolicited(&message, effects),
        }
    }

    fn unsolicited(&mut self, message: &Message, effects: &mut Vec<Effect>) {
        effects.push(Effect::EmitError {
            kind: ErrorKind::UnsolicitedMessage,
            message: format!("{:?} in state {:?}", message.action, self.state),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_types::RecordAction;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_interval_ms: 15,
            reconnect_interval_increment_ms: 10,
            max_reconnect_interval_ms: 30_000,
            max_reconnect_attempts: 3,
            send_queue_limit: None,
        }
    }

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new("wss://a.example", config())
    }

    fn frame(m: &mut ConnectionMachine, message: Message) -> Vec<Effect> {
        m.handle(Input::FrameIn { message, now_ms: 0 })
    }

    fn auth_success(data: &str) -> Message {
        Message::new(Action::Auth(AuthAction::Success), vec![data.to_string()])
    }

    fn auth_unsuccessful(reason: &str) -> Message {
        Message::new(
            Action::Auth(AuthAction::Unsuccessful),
            vec![reason.to_string()],
        )
    }

    /// Drive a fresh machine all the way to Open.
    fn open_machine() -> ConnectionMachine {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        m.handle(Input::AuthRequested {
            params: r#"{"password":"123456"}"#.to_string(),
        });
        frame(&mut m, auth_success(r#"O{"name":"elton"}"#));
        assert_eq!(m.state(), ConnectionState::Open);
        m
    }

    fn state_changes(effects: &[Effect]) -> Vec<ConnectionState> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn sent(effects: &[Effect]) -> Vec<Message> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(msgs) => Some(msgs.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn starts_closed() {
        assert_eq!(machine().state(), ConnectionState::Closed);
    }

    #[test]
    fn open_acquires_socket() {
        let mut m = machine();
        let effects = m.handle(Input::OpenRequested);

        assert_eq!(m.state(), ConnectionState::AwaitingConnection);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenSocket { url } if url == "wss://a.example")));
    }

    #[test]
    fn open_while_connected_is_ignored() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        let effects = m.handle(Input::OpenRequested);
        assert!(effects.is_empty());
    }

    #[test]
    fn challenge_triggers_challenge_response() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        let effects = frame(&mut m, Message::challenge());

        assert_eq!(m.state(), ConnectionState::Challenging);
        assert_eq!(
            sent(&effects),
            vec![Message::challenge_response("wss://a.example")]
        );
    }

    #[test]
    fn state_change_is_emitted_before_the_send_it_triggers() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        let effects = frame(&mut m, Message::challenge());

        let change_at = effects
            .iter()
            .position(|e| matches!(e, Effect::StateChanged(_)))
            .unwrap();
        let send_at = effects
            .iter()
            .position(|e| matches!(e, Effect::Send(_)))
            .unwrap();
        assert!(change_at < send_at);
    }

    #[test]
    fn accept_awaits_authentication() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        let effects = frame(&mut m, Message::accept());

        assert_eq!(m.state(), ConnectionState::AwaitingAuthentication);
        assert!(sent(&effects).is_empty());
    }

    #[test]
    fn happy_path_emits_each_state_exactly_once() {
        let mut m = machine();
        let mut all = Vec::new();
        all.extend(m.handle(Input::OpenRequested));
        all.extend(m.handle(Input::SocketOpened));
        all.extend(frame(&mut m, Message::challenge()));
        all.extend(frame(&mut m, Message::accept()));
        all.extend(m.handle(Input::AuthRequested {
            params: r#"{"password":"123456"}"#.to_string(),
        }));
        all.extend(frame(&mut m, auth_success(r#"O{"name":"elton"}"#)));

        assert_eq!(
            state_changes(&all),
            vec![
                ConnectionState::AwaitingConnection,
                ConnectionState::Challenging,
                ConnectionState::AwaitingAuthentication,
                ConnectionState::Authenticating,
                ConnectionState::Open,
            ]
        );
    }

    #[test]
    fn auth_success_resolves_callback_with_client_data() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        m.handle(Input::AuthRequested {
            params: r#"{"password":"123456"}"#.to_string(),
        });
        let effects = frame(&mut m, auth_success(r#"O{"name":"elton"}"#));

        let results: Vec<_> = effects
            .iter()
            .filter(|e| matches!(e, Effect::AuthResult { .. }))
            .collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Effect::AuthResult { success: true, data: Some(d) } if d == r#"O{"name":"elton"}"#
        ));
        assert!(effects.iter().any(|e| matches!(e, Effect::StartHeartbeat)));
    }

    #[test]
    fn auth_request_sends_credentials() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        let effects = m.handle(Input::AuthRequested {
            params: r#"{"password":"123456"}"#.to_string(),
        });

        assert_eq!(m.state(), ConnectionState::Authenticating);
        assert_eq!(
            sent(&effects),
            vec![Message::auth_request(r#"{"password":"123456"}"#)]
        );
    }

    #[test]
    fn auth_outside_awaiting_authentication_is_refused() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        let effects = m.handle(Input::AuthRequested {
            params: "{}".to_string(),
        });

        assert_eq!(m.state(), ConnectionState::AwaitingConnection);
        assert!(sent(&effects).is_empty());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::IsClosed, .. }
        )));
    }

    #[test]
    fn auth_unsuccessful_allows_retry() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        m.handle(Input::AuthRequested {
            params: r#"{"password":"wrong"}"#.to_string(),
        });
        let effects = frame(&mut m, auth_unsuccessful("Sinvalid credentials"));

        assert_eq!(m.state(), ConnectionState::AwaitingAuthentication);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::AuthResult { success: false, data: Some(d) } if d == "Sinvalid credentials"
        )));

        // The client may try again.
        let retry = m.handle(Input::AuthRequested {
            params: r#"{"password":"right"}"#.to_string(),
        });
        assert_eq!(m.state(), ConnectionState::Authenticating);
        assert_eq!(sent(&retry).len(), 1);
    }

    #[test]
    fn too_many_auth_attempts_is_terminal() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        m.handle(Input::AuthRequested {
            params: "{}".to_string(),
        });
        let effects = frame(
            &mut m,
            Message::new(Action::Auth(AuthAction::TooManyAttempts), vec![]),
        );

        assert_eq!(m.state(), ConnectionState::TooManyAuthAttempts);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::TooManyAuthAttempts, .. }
        )));

        // No reconnect once terminal.
        assert!(m.handle(Input::SocketClosed).is_empty());
    }

    #[test]
    fn authentication_timeout_error_frame_is_terminal() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        let effects = frame(
            &mut m,
            Message::new(
                Action::Connection(ConnectionAction::Error),
                vec!["AUTHENTICATION_TIMEOUT".to_string()],
            ),
        );

        assert_eq!(m.state(), ConnectionState::AuthenticationTimeout);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::AuthenticationTimeout, .. }
        )));
    }

    #[test]
    fn challenge_rejected_is_terminal() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        let effects = frame(&mut m, Message::reject());

        assert_eq!(m.state(), ConnectionState::ChallengeDenied);
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseSocket)));

        // Neither the socket closing nor further opens revive it.
        assert!(m.handle(Input::SocketClosed).is_empty());
        assert!(m.handle(Input::OpenRequested).is_empty());
    }

    #[test]
    fn redirect_moves_to_the_new_url() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        let effects = frame(&mut m, Message::redirect("wss://b.example"));

        assert_eq!(m.state(), ConnectionState::Redirecting);
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseSocket)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenSocket { url } if url == "wss://b.example")));

        // The old socket's close is not a failure.
        assert!(m.handle(Input::SocketClosed).is_empty());

        // The new socket challenges with the redirected url.
        m.handle(Input::SocketOpened);
        assert_eq!(m.state(), ConnectionState::AwaitingConnection);
        let effects = frame(&mut m, Message::challenge());
        assert_eq!(
            sent(&effects),
            vec![Message::challenge_response("wss://b.example")]
        );
    }

    #[test]
    fn reconnect_after_redirect_falls_back_to_the_original_url() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::redirect("wss://b.example"));
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        m.handle(Input::AuthRequested {
            params: "{}".to_string(),
        });
        frame(&mut m, auth_success("L"));
        assert_eq!(m.state(), ConnectionState::Open);

        // The redirected server goes down.
        m.handle(Input::SocketClosed);
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        let effects = m.handle(Input::ReconnectTimerFired);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::OpenSocket { url } if url == "wss://a.example")));
        let effects = frame(&mut m, Message::challenge());
        assert_eq!(
            sent(&effects),
            vec![Message::challenge_response("wss://a.example")]
        );
    }

    #[test]
    fn redirect_without_url_is_a_parse_error() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        let effects = frame(
            &mut m,
            Message::new(Action::Connection(ConnectionAction::Redirect), vec![]),
        );
        assert_eq!(m.state(), ConnectionState::Challenging);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::ParseError, .. }
        )));
    }

    #[test]
    fn ping_is_answered_with_exactly_one_pong_in_any_state() {
        // Mid-handshake.
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        let effects = frame(&mut m, Message::ping());
        assert_eq!(sent(&effects), vec![Message::pong()]);

        // Open.
        let mut m = open_machine();
        let effects = frame(&mut m, Message::ping());
        assert_eq!(sent(&effects), vec![Message::pong()]);
    }

    #[test]
    fn heartbeat_one_missed_interval_is_tolerated() {
        let mut m = open_machine();
        // Interval is 15ms; the last frame arrived at t=0.
        let effects = m.handle(Input::HeartbeatTick { now_ms: 20 });
        assert!(effects.is_empty());
        let effects = m.handle(Input::HeartbeatTick { now_ms: 30 });
        assert!(effects.is_empty());
    }

    #[test]
    fn heartbeat_timeout_after_two_intervals() {
        let mut m = open_machine();
        let effects = m.handle(Input::HeartbeatTick { now_ms: 45 });

        let timeouts: Vec<_> = effects
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Effect::EmitError {
                        kind: ErrorKind::HeartbeatTimeout,
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert!(effects.iter().any(|e| matches!(e, Effect::StopHeartbeat)));
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseSocket)));

        // The torn-down socket's close event is not a second failure.
        assert!(m.handle(Input::SocketClosed).is_empty());
    }

    #[test]
    fn inbound_traffic_feeds_the_heartbeat() {
        let mut m = open_machine();
        m.handle(Input::FrameIn {
            message: Message::pong(),
            now_ms: 40,
        });
        // 25ms of silence after the pong is one missed interval, which
        // is tolerated; without the pong this tick would have fired.
        let effects = m.handle(Input::HeartbeatTick { now_ms: 65 });
        assert!(effects.is_empty());
    }

    #[test]
    fn heartbeat_ticks_are_ignored_outside_open() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        assert!(m.handle(Input::HeartbeatTick { now_ms: 10_000 }).is_empty());
    }

    #[test]
    fn sends_queue_until_open_and_flush_in_order() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketOpened);

        let effects = m.handle(Input::SendRequested {
            message: Message::record_create_or_read("alpha"),
        });
        assert!(sent(&effects).is_empty());
        m.handle(Input::SendRequested {
            message: Message::record_create_or_read("beta"),
        });

        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        m.handle(Input::AuthRequested {
            params: "{}".to_string(),
        });
        let effects = frame(&mut m, auth_success("L"));

        let flushed = sent(&effects);
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].name(), Some("alpha"));
        assert_eq!(flushed[1].name(), Some("beta"));

        // The state change precedes the flush.
        let change_at = effects
            .iter()
            .position(|e| matches!(e, Effect::StateChanged(ConnectionState::Open)))
            .unwrap();
        let send_at = effects
            .iter()
            .position(|e| matches!(e, Effect::Send(_)))
            .unwrap();
        assert!(change_at < send_at);
    }

    #[test]
    fn sends_go_straight_out_when_open() {
        let mut m = open_machine();
        let effects = m.handle(Input::SendRequested {
            message: Message::record_create_or_read("alpha"),
        });
        assert_eq!(sent(&effects).len(), 1);
    }

    #[test]
    fn bounded_queue_drops_oldest_with_an_error() {
        let mut cfg = config();
        cfg.send_queue_limit = Some(1);
        let mut m = ConnectionMachine::new("wss://a.example", cfg);
        m.handle(Input::OpenRequested);

        m.handle(Input::SendRequested {
            message: Message::record_create_or_read("alpha"),
        });
        let effects = m.handle(Input::SendRequested {
            message: Message::record_create_or_read("beta"),
        });
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::ClientOffline, .. }
        )));
    }

    #[test]
    fn unsolicited_drop_schedules_reconnect_with_linear_backoff() {
        let mut m = machine();
        m.handle(Input::OpenRequested);

        let effects = m.handle(Input::SocketError {
            error: "connection refused".to_string(),
        });
        assert_eq!(m.state(), ConnectionState::Reconnecting);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::ConnectionError, .. }
        )));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect { delay_ms: 10 })));

        m.handle(Input::ReconnectTimerFired);
        let effects = m.handle(Input::SocketError {
            error: "connection refused".to_string(),
        });
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect { delay_ms: 20 })));
    }

    #[test]
    fn backoff_is_capped() {
        let mut cfg = config();
        cfg.reconnect_interval_increment_ms = 4_000;
        cfg.max_reconnect_interval_ms = 5_000;
        let mut m = ConnectionMachine::new("wss://a.example", cfg);
        m.handle(Input::OpenRequested);

        let effects = m.handle(Input::SocketClosed);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect { delay_ms: 4_000 })));
        m.handle(Input::ReconnectTimerFired);
        let effects = m.handle(Input::SocketClosed);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect { delay_ms: 5_000 })));
    }

    #[test]
    fn gives_up_after_max_reconnect_attempts() {
        let mut m = machine();
        m.handle(Input::OpenRequested);

        for expected_delay in [10u64, 20, 30] {
            let effects = m.handle(Input::SocketError {
                error: "refused".to_string(),
            });
            assert!(effects.iter().any(
                |e| matches!(e, Effect::ScheduleReconnect { delay_ms } if *delay_ms == expected_delay)
            ));
            m.handle(Input::ReconnectTimerFired);
        }

        // Fourth consecutive failure exhausts the budget of three.
        let effects = m.handle(Input::SocketError {
            error: "refused".to_string(),
        });
        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::MaxReconnectionAttemptsReached, message }
                if message.contains('3')
        )));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect { .. })));
    }

    #[test]
    fn reaching_open_resets_the_attempt_counter() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketClosed);
        m.handle(Input::ReconnectTimerFired);
        m.handle(Input::SocketClosed);
        m.handle(Input::ReconnectTimerFired);
        assert_eq!(m.reconnect_attempts(), 2);

        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());
        m.handle(Input::AuthRequested {
            params: "{}".to_string(),
        });
        frame(&mut m, auth_success("L"));
        assert_eq!(m.reconnect_attempts(), 0);

        // The next failure starts the backoff ladder over.
        let effects = m.handle(Input::SocketClosed);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect { delay_ms: 10 })));
    }

    #[test]
    fn graceful_close_handshake() {
        let mut m = open_machine();

        let effects = m.handle(Input::CloseRequested);
        assert_eq!(m.state(), ConnectionState::Closing);
        assert_eq!(sent(&effects), vec![Message::closing()]);
        assert!(effects.iter().any(|e| matches!(e, Effect::StopHeartbeat)));

        let effects = frame(&mut m, Message::closing());
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseSocket)));

        let effects = m.handle(Input::SocketClosed);
        assert_eq!(m.state(), ConnectionState::Closed);
        assert_eq!(state_changes(&effects), vec![ConnectionState::Closed]);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect { .. })));
    }

    #[test]
    fn close_before_open_drops_the_socket() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        let effects = m.handle(Input::CloseRequested);

        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseSocket)));
        assert!(m.handle(Input::SocketClosed).is_empty());
    }

    #[test]
    fn close_while_reconnecting_cancels_the_timer() {
        let mut m = machine();
        m.handle(Input::OpenRequested);
        m.handle(Input::SocketClosed);
        assert_eq!(m.state(), ConnectionState::Reconnecting);

        let effects = m.handle(Input::CloseRequested);
        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(effects.iter().any(|e| matches!(e, Effect::CancelReconnect)));
    }

    #[test]
    fn server_initiated_closing_does_not_reconnect() {
        let mut m = open_machine();
        let effects = frame(&mut m, Message::closing());
        assert_eq!(m.state(), ConnectionState::Closing);
        assert!(effects.iter().any(|e| matches!(e, Effect::CloseSocket)));

        m.handle(Input::SocketClosed);
        assert_eq!(m.state(), ConnectionState::Closed);
    }

    #[test]
    fn reauthentication_is_silent_on_success() {
        let mut m = open_machine();
        m.handle(Input::SocketClosed);
        m.handle(Input::ReconnectTimerFired);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());

        // Accept triggers an automatic login with the cached credentials.
        let effects = frame(&mut m, Message::accept());
        assert_eq!(m.state(), ConnectionState::Authenticating);
        assert_eq!(
            sent(&effects),
            vec![Message::auth_request(r#"{"password":"123456"}"#)]
        );

        // Success goes unreported; there is no callback waiting.
        let effects = frame(&mut m, auth_success("L"));
        assert_eq!(m.state(), ConnectionState::Open);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::AuthResult { .. })));
    }

    #[test]
    fn reauthentication_failure_is_reported_as_an_error() {
        let mut m = open_machine();
        m.handle(Input::SocketClosed);
        m.handle(Input::ReconnectTimerFired);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        frame(&mut m, Message::accept());

        let effects = frame(&mut m, auth_unsuccessful("Stoken expired"));
        assert_eq!(m.state(), ConnectionState::AwaitingAuthentication);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::AuthResult { .. })));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::ReauthenticationFailure, .. }
        )));

        // The denied credentials are forgotten; no retry loop.
        m.handle(Input::SocketClosed);
        m.handle(Input::ReconnectTimerFired);
        m.handle(Input::SocketOpened);
        frame(&mut m, Message::challenge());
        let effects = frame(&mut m, Message::accept());
        assert_eq!(m.state(), ConnectionState::AwaitingAuthentication);
        assert!(sent(&effects).is_empty());
    }

    #[test]
    fn record_frames_are_dispatched() {
        let mut m = open_machine();
        let read = Message::record_read("weather", 1, "{}");
        let effects = frame(&mut m, read.clone());
        assert_eq!(effects, vec![Effect::Dispatch(read)]);
    }

    #[test]
    fn record_ack_name_survives_dispatch() {
        let mut m = open_machine();
        let ack = Message::record_ack(RecordAction::Delete, "weather");
        let effects = frame(&mut m, ack.clone());
        assert_eq!(effects, vec![Effect::Dispatch(ack)]);
    }

    #[test]
    fn unsolicited_frames_are_reported() {
        let mut m = open_machine();
        let effects = frame(&mut m, Message::challenge());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::EmitError { kind: ErrorKind::UnsolicitedMessage, .. }
        )));
        assert_eq!(m.state(), ConnectionState::Open);
    }
}
