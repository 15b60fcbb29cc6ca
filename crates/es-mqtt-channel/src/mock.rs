//! Mock MQTT transport for testing without a real broker.
//!
//! Connect attempts follow a script of `ConnectOutcome`s, and every publish
//! is recorded for assertion in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::QoS;

use crate::channel::{ConnectionEvents, Transport, codes};
use crate::error::{MqttError, MqttResult};

/// What the mock broker does with the next connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Deliver `on_connect(SUCCESS)` immediately.
    Accept,
    /// Deliver `on_connect(SUCCESS)` after the given delay.
    AcceptAfter(Duration),
    /// Deliver `on_connect(code)` with a refusal code.
    Refuse(u8),
    /// Accept the request but never answer (handshake hang).
    Silent,
    /// Fail the connect request itself.
    Fail,
}

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Mock implementation of the `Transport` trait.
///
/// Once the script runs out, every further attempt gets the fallback
/// outcome (`Accept` unless changed).
pub struct MockTransport {
    script: Mutex<VecDeque<ConnectOutcome>>,
    fallback: Mutex<ConnectOutcome>,
    events: Mutex<Option<Arc<dyn ConnectionEvents>>>,
    published: Mutex<Vec<PublishedMessage>>,
    fail_publish: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    background_starts: AtomicUsize,
    background_stops: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ConnectOutcome::Accept),
            events: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            background_starts: AtomicUsize::new(0),
            background_stops: AtomicUsize::new(0),
        }
    }

    /// Mock whose first attempts follow `outcomes`.
    pub fn with_script(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        let mock = Self::new();
        mock.script.lock().unwrap().extend(outcomes);
        mock
    }

    /// Queue outcomes for upcoming connect attempts.
    pub fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// Outcome used once the script is exhausted.
    pub fn set_fallback(&self, outcome: ConnectOutcome) {
        *self.fallback.lock().unwrap() = outcome;
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Simulate the broker dropping the session.
    pub fn drop_connection(&self, code: u8) {
        if let Some(events) = self.registered_events() {
            events.on_disconnect(code);
        }
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Get the last published message.
    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.published.lock().unwrap().last().cloned()
    }

    /// Get published messages for a specific topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn background_starts(&self) -> usize {
        self.background_starts.load(Ordering::SeqCst)
    }

    pub fn background_stops(&self) -> usize {
        self.background_stops.load(Ordering::SeqCst)
    }

    /// Clear recorded publishes.
    pub fn reset(&self) {
        self.published.lock().unwrap().clear();
    }

    fn registered_events(&self) -> Option<Arc<dyn ConnectionEvents>> {
        self.events.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> ConnectOutcome {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| *self.fallback.lock().unwrap())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> MqttResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let Some(events) = self.registered_events() else {
            return Err(MqttError::Connection(
                "network loop is not running".to_string(),
            ));
        };

        match self.next_outcome() {
            ConnectOutcome::Accept => events.on_connect(codes::SUCCESS),
            ConnectOutcome::AcceptAfter(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    events.on_connect(codes::SUCCESS);
                });
            }
            ConnectOutcome::Refuse(code) => events.on_connect(code),
            ConnectOutcome::Silent => {}
            ConnectOutcome::Fail => {
                return Err(MqttError::Connection("connection refused".to_string()));
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(events) = self.registered_events() {
            events.on_disconnect(codes::SUCCESS);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MqttError::Publish("request queue closed".to_string()));
        }
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(())
    }

    fn start_background_loop(&self, events: Arc<dyn ConnectionEvents>) -> MqttResult<()> {
        self.background_starts.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn stop_background_loop(&self) {
        self.background_stops.fetch_add(1, Ordering::SeqCst);
    }
}
