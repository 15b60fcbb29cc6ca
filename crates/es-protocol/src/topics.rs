//! MQTT topic builders for sensor readings.
//!
//! Topic structure:
//! ```text
//! {topic_base}/{path}
//! ```
//! e.g. `sensors/bme680/temperature`.

/// Topic a reading for `path` is published on.
pub fn reading(topic_base: &str, path: &str) -> String {
    format!("{topic_base}/{path}")
}
