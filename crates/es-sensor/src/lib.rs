//! Environmental sensor sources for the EnvSense agent.
//!
//! `Sensor` trait with `poll`. Two impls:
//! - `IioSensor`: reads the Linux BME680 IIO driver through sysfs
//! - `MockSensor`: scripted samples for tests (in `mock.rs`)

pub mod error;
pub mod iio;
pub mod mock;
pub mod source;

pub use error::{SensorError, SensorResult};
pub use iio::{IioConfig, IioSensor};
pub use mock::MockSensor;
pub use source::Sensor;
