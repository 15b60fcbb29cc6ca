//! Shared test harness for E2E integration tests.
//!
//! Wires the real `ConnectionManager`, `Publisher` and `SamplingLoop`
//! to a `MockTransport` broker and a `MockSensor`, so every scenario runs
//! the production code paths across crate boundaries.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use es_agent::sampling::SamplingLoop;
use es_mqtt_channel::{ConnectionManager, ConnectionState, MockTransport, RetryPolicy};
use es_protocol::SensorSample;
use es_sensor::MockSensor;

pub const TOPIC_BASE: &str = "sensors/bme680";
pub const INTERVAL: Duration = Duration::from_secs(10);

/// A typical indoor sample.
pub fn indoor_sample() -> SensorSample {
    SensorSample {
        temperature: 21.456,
        pressure: 1013.254,
        humidity: 40.0,
    }
}

/// End-to-end harness: mock broker + mock sensor around the real agent.
pub struct TestHarness {
    pub manager: ConnectionManager<MockTransport>,
    pub sensor: MockSensor,
}

impl TestHarness {
    /// Broker that accepts every connect, sensor with a constant sample.
    pub fn new() -> Self {
        Self::with_transport(MockTransport::new())
    }

    /// Use a pre-scripted broker. Backoff is 1 s initial, 300 s max.
    pub fn with_transport(transport: MockTransport) -> Self {
        let state = Arc::new(ConnectionState::new(
            "localhost:1883",
            RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(300)),
        ));
        Self {
            manager: ConnectionManager::new(Arc::new(transport), state, Duration::from_secs(2)),
            sensor: MockSensor::constant(indoor_sample()),
        }
    }

    pub fn broker(&self) -> &MockTransport {
        self.manager.transport()
    }

    pub fn sampling(&self) -> SamplingLoop<'_, MockTransport, MockSensor> {
        SamplingLoop::new(&self.manager, &self.sensor, TOPIC_BASE, INTERVAL)
    }

    /// Number of messages the mock broker has received.
    pub fn publish_count(&self) -> usize {
        self.broker().published().len()
    }

    /// Decode the JSON payload of every published message, in order.
    pub fn payloads(&self) -> Vec<(String, serde_json::Value)> {
        self.broker()
            .published()
            .into_iter()
            .map(|m| {
                let value = serde_json::from_slice(&m.payload).unwrap();
                (m.topic, value)
            })
            .collect()
    }
}
