//! Client configuration.
//!
//! Every knob has a default; construct with `ClientOptions::default()` and
//! override with the `with_*` builders, or deserialize from a config file.

use serde::Deserialize;

use driftsync_core::ConnectionConfig;

/// Tuning options for a [`Client`](crate::Client).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientOptions {
    /// Heartbeat tick period in milliseconds (default: 30s).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Backoff step added per reconnection attempt (default: 4s).
    #[serde(default = "default_reconnect_interval_increment_ms")]
    pub reconnect_interval_increment_ms: u64,
    /// Cap on the reconnection backoff (default: 3 minutes).
    #[serde(default = "default_max_reconnect_interval_ms")]
    pub max_reconnect_interval_ms: u64,
    /// Consecutive failed reconnection attempts before giving up (default: 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// How long a record waits for its subscription ack (default: 1s).
    #[serde(default = "default_record_read_ack_timeout_ms")]
    pub record_read_ack_timeout_ms: u64,
    /// How long a record waits for its state (default: 3s).
    #[serde(default = "default_record_read_timeout_ms")]
    pub record_read_timeout_ms: u64,
    /// How long a record waits for a delete ack (default: 3s).
    #[serde(default = "default_record_delete_timeout_ms")]
    pub record_delete_timeout_ms: u64,
    /// Cap on the offline send queue (default: unbounded).
    #[serde(default)]
    pub send_queue_limit: Option<usize>,
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_reconnect_interval_increment_ms() -> u64 {
    4_000
}

fn default_max_reconnect_interval_ms() -> u64 {
    180_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_record_read_ack_timeout_ms() -> u64 {
    1_000
}

fn default_record_read_timeout_ms() -> u64 {
    3_000
}

fn default_record_delete_timeout_ms() -> u64 {
    3_000
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_interval_increment_ms: default_reconnect_interval_increment_ms(),
            max_reconnect_interval_ms: default_max_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            record_read_ack_timeout_ms: default_record_read_ack_timeout_ms(),
            record_read_timeout_ms: default_record_read_timeout_ms(),
            record_delete_timeout_ms: default_record_delete_timeout_ms(),
            send_queue_limit: None,
        }
    }
}

impl ClientOptions {
    /// Set the heartbeat tick period.
    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    /// Set the per-attempt reconnection backoff step.
    pub fn with_reconnect_interval_increment_ms(mut self, ms: u64) -> Self {
        self.reconnect_interval_increment_ms = ms;
        self
    }

    /// Set the reconnection backoff cap.
    pub fn with_max_reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.max_reconnect_interval_ms = ms;
        self
    }

    /// Set the reconnection attempt budget.
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the record subscription-ack deadline.
    pub fn with_record_read_ack_timeout_ms(mut self, ms: u64) -> Self {
        self.record_read_ack_timeout_ms = ms;
        self
    }

    /// Set the record read-response deadline.
    pub fn with_record_read_timeout_ms(mut self, ms: u64) -> Self {
        self.record_read_timeout_ms = ms;
        self
    }

    /// Set the record delete-ack deadline.
    pub fn with_record_delete_timeout_ms(mut self, ms: u64) -> Self {
        self.record_delete_timeout_ms = ms;
        self
    }

    /// Cap the offline send queue.
    pub fn with_send_queue_limit(mut self, limit: usize) -> Self {
        self.send_queue_limit = Some(limit);
        self
    }

    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            reconnect_interval_increment_ms: self.reconnect_interval_increment_ms,
            max_reconnect_interval_ms: self.max_reconnect_interval_ms,
            max_reconnect_attempts: self.max_reconnect_attempts,
            send_queue_limit: self.send_queue_limit,
        }
    }
}
