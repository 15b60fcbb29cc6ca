//! Reading publisher.
//!
//! Turns a `Reading` into its JSON payload and hands it to the connection
//! manager. Never returns an error: a reading that cannot be delivered is
//! logged and dropped so the sampling loop keeps its cadence.

use rumqttc::QoS;

use es_mqtt_channel::{ConnectionManager, Transport};
use es_protocol::{Reading, topics};

/// What happened to one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport.
    Sent,
    /// Not connected; dropped without touching the transport.
    Skipped,
    /// The transport or serializer rejected it; dropped.
    Failed,
}

/// Publishes readings under `{topic_base}/{path}`.
pub struct Publisher<'a, T: Transport> {
    manager: &'a ConnectionManager<T>,
    topic_base: String,
}

impl<'a, T: Transport> Publisher<'a, T> {
    pub fn new(manager: &'a ConnectionManager<T>, topic_base: impl Into<String>) -> Self {
        Self {
            manager,
            topic_base: topic_base.into(),
        }
    }

    pub fn topic_base(&self) -> &str {
        &self.topic_base
    }

    pub async fn publish(&self, reading: &Reading) -> PublishOutcome {
        if !self.manager.is_connected() {
            tracing::warn!(path = %reading.path, "not connected to MQTT broker, skipping publish");
            return PublishOutcome::Skipped;
        }

        let topic = topics::reading(&self.topic_base, &reading.path);
        let payload = match reading.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "failed to serialize reading");
                return PublishOutcome::Failed;
            }
        };

        match self.manager.send(&topic, &payload, QoS::AtMostOnce).await {
            Ok(()) => {
                tracing::debug!(topic = %topic, value = reading.value, "reading published");
                PublishOutcome::Sent
            }
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "failed to publish reading");
                PublishOutcome::Failed
            }
        }
    }
}
