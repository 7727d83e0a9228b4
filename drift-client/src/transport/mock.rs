//! Mock transport for testing.
//!
//! Allows queueing inbound frames, capturing sent frames, forcing
//! failures, and simulating a server-side close.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use driftsync_types::{codec, Message};

use super::{Transport, TransportError};

/// Mock transport for testing.
///
/// `recv` blocks until a response is queued or the segment ends, like a
/// real socket. Cloning shares the same underlying state.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    wakeup: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    remote_closed: bool,
    connect_history: Vec<String>,
    sent: Vec<Vec<u8>>,
    receive_queue: VecDeque<Vec<u8>>,
    fail_next_connect: Option<String>,
    fail_all_connects: Option<String>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes for the next `recv()`.
    pub fn queue_response(&self, data: Vec<u8>) {
        self.inner.lock().unwrap().receive_queue.push_back(data);
        self.wakeup.notify_one();
    }

    /// Queue protocol messages, encoded as one inbound read.
    pub fn queue_messages(&self, messages: &[Message]) {
        self.queue_response(codec::encode_all(messages).into_bytes());
    }

    /// Simulate the server closing the connection.
    pub fn close_remote(&self) {
        self.inner.lock().unwrap().remote_closed = true;
        self.wakeup.notify_one();
    }

    /// All sent payloads, in order, across every segment.
    pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// All sent frames decoded, in order, across every segment.
    pub fn sent_frames(&self) -> Vec<Message> {
        self.sent_bytes()
            .iter()
            .flat_map(|bytes| codec::parse(&String::from_utf8_lossy(bytes)))
            .filter_map(Result::ok)
            .collect()
    }

    /// Urls passed to `connect`, in order.
    pub fn connect_history(&self) -> Vec<String> {
        self.inner.lock().unwrap().connect_history.clone()
    }

    /// Number of `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connect_history.len()
    }

    /// Make the next `connect()` fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// Make every `connect()` fail with the given error.
    pub fn fail_all_connects(&self, error: &str) {
        self.inner.lock().unwrap().fail_all_connects = Some(error.to_string());
    }

    /// Make the next `send()` fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            wakeup: Arc::clone(&self.wakeup),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connect_history.push(url.to_string());
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        if let Some(error) = inner.fail_all_connects.clone() {
            return Err(TransportError::ConnectionFailed(error));
        }
        // Fresh segment: nothing queued for the old one survives.
        inner.receive_queue.clear();
        inner.remote_closed = false;
        inner.connected = true;
        drop(inner);
        self.wakeup.notify_one();
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        inner.sent.push(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        loop {
            let pending = self.wakeup.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(data) = inner.receive_queue.pop_front() {
                    return Ok(data);
                }
                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }
                if inner.remote_closed {
                    return Err(TransportError::ConnectionClosed);
                }
            }
            pending.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.lock().unwrap().connected = false;
        self.wakeup.notify_one();
        Ok(())
    }
}
