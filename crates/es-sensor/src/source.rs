//! Sensor abstraction: poll the latest environmental sample.

use async_trait::async_trait;

use es_protocol::SensorSample;

/// Source of environmental samples.
///
/// Enables mocking for tests and swappable backends (IIO sysfs, I2C, ...).
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Latest sample, or `None` when no fresh data is ready. Read failures
    /// also yield `None`: a missed cycle, not an error.
    async fn poll(&self) -> Option<SensorSample>;
}
