//! Sensor error types.

use thiserror::Error;

/// Errors that can occur while reading the sensor.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid value in {channel}: {value:?}")]
    Parse { channel: String, value: String },

    #[error("sensor not found: {0}")]
    NotFound(String),
}

/// Convenience alias for sensor results.
pub type SensorResult<T> = Result<T, SensorError>;
