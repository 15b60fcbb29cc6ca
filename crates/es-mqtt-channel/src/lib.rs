//! MQTT connectivity for the EnvSense sensor agent.
//!
//! - `Transport` trait for the broker session (mockable in tests)
//! - `MqttTransport` backed by rumqttc for production
//! - `MockTransport` with scripted connect outcomes for testing
//! - `ConnectionManager` owning connection state and reconnect backoff

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod mock;
pub mod retry;

// Re-exports for convenience.
pub use channel::{ConnectionEvents, MqttTransport, Transport, codes};
pub use config::MqttConfig;
pub use connection::{ConnectionManager, ConnectionState, LinkStatus};
pub use error::{MqttError, MqttResult};
pub use mock::{ConnectOutcome, MockTransport};
pub use retry::RetryPolicy;
