//! BME680 readings through the Linux Industrial I/O (IIO) sysfs interface.
//!
//! The kernel `bme680` driver exposes one file per channel under
//! `/sys/bus/iio/devices/iio:deviceN/`:
//! - `in_temp_input`: milli-degrees Celsius
//! - `in_pressure_input`: kilopascals
//! - `in_humidityrelative_input`: percent
//!
//! Oversampling and filter settings belong to the driver and are left as
//! configured at boot.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;

use es_protocol::SensorSample;

use crate::error::{SensorError, SensorResult};
use crate::source::Sensor;

const TEMPERATURE_CHANNEL: &str = "in_temp_input";
const PRESSURE_CHANNEL: &str = "in_pressure_input";
const HUMIDITY_CHANNEL: &str = "in_humidityrelative_input";

/// IIO sensor settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IioConfig {
    /// Device directory. When unset, the first device under `devices_root`
    /// whose `name` matches `device_name` is used.
    #[serde(default)]
    pub iio_device: Option<String>,
    #[serde(default = "default_devices_root")]
    pub devices_root: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Multiplier from raw `in_temp_input` to degrees Celsius.
    #[serde(default = "default_temperature_scale")]
    pub temperature_scale: f64,
    /// Multiplier from raw `in_pressure_input` to hectopascals.
    #[serde(default = "default_pressure_scale")]
    pub pressure_scale: f64,
    /// Multiplier from raw `in_humidityrelative_input` to percent.
    #[serde(default = "default_humidity_scale")]
    pub humidity_scale: f64,
}

fn default_devices_root() -> String {
    "/sys/bus/iio/devices".to_string()
}

fn default_device_name() -> String {
    "bme680".to_string()
}

fn default_temperature_scale() -> f64 {
    0.001
}

fn default_pressure_scale() -> f64 {
    10.0
}

fn default_humidity_scale() -> f64 {
    1.0
}

impl Default for IioConfig {
    fn default() -> Self {
        Self {
            iio_device: None,
            devices_root: default_devices_root(),
            device_name: default_device_name(),
            temperature_scale: default_temperature_scale(),
            pressure_scale: default_pressure_scale(),
            humidity_scale: default_humidity_scale(),
        }
    }
}

/// Reads the BME680 through sysfs.
///
/// The device directory is resolved on first poll, so a sensor that is
/// absent at startup only costs missed cycles. A discovered directory is
/// forgotten after a failed read and looked up again on the next poll.
#[derive(Debug)]
pub struct IioSensor {
    config: IioConfig,
    device_dir: Mutex<Option<PathBuf>>,
}

impl IioSensor {
    pub fn new(config: IioConfig) -> Self {
        let device_dir = config.iio_device.as_ref().map(PathBuf::from);
        Self {
            config,
            device_dir: Mutex::new(device_dir),
        }
    }

    /// Currently resolved device directory, if any.
    pub fn device_dir(&self) -> Option<PathBuf> {
        self.device_dir
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Read all three channels. Fails if any channel is unreadable.
    pub async fn read_sample(&self) -> SensorResult<SensorSample> {
        let dir = self.resolve_device().await?;
        let result = self.read_all(&dir).await;
        if result.is_err() && self.config.iio_device.is_none() {
            *self.device_dir.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
        result
    }

    async fn resolve_device(&self) -> SensorResult<PathBuf> {
        if let Some(dir) = self.device_dir() {
            return Ok(dir);
        }
        let dir = discover(Path::new(&self.config.devices_root), &self.config.device_name).await?;
        tracing::info!(device = %dir.display(), "found IIO sensor");
        *self.device_dir.lock().unwrap_or_else(PoisonError::into_inner) = Some(dir.clone());
        Ok(dir)
    }

    async fn read_all(&self, dir: &Path) -> SensorResult<SensorSample> {
        Ok(SensorSample {
            temperature: read_channel(dir, TEMPERATURE_CHANNEL).await? * self.config.temperature_scale,
            pressure: read_channel(dir, PRESSURE_CHANNEL).await? * self.config.pressure_scale,
            humidity: read_channel(dir, HUMIDITY_CHANNEL).await? * self.config.humidity_scale,
        })
    }
}

#[async_trait]
impl Sensor for IioSensor {
    async fn poll(&self) -> Option<SensorSample> {
        match self.read_sample().await {
            Ok(sample) => Some(sample),
            Err(e) => {
                tracing::warn!(error = %e, "sensor read failed, skipping cycle");
                None
            }
        }
    }
}

async fn read_channel(dir: &Path, channel: &str) -> SensorResult<f64> {
    let path = dir.join(channel);
    let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SensorError::NotFound(path.display().to_string())
        } else {
            SensorError::Io(format!("{}: {e}", path.display()))
        }
    })?;

    let value = raw.trim();
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SensorError::Parse {
            channel: channel.to_string(),
            value: value.to_string(),
        })
}

/// Find the IIO device directory whose `name` file equals `name`.
pub async fn discover(devices_root: &Path, name: &str) -> SensorResult<PathBuf> {
    let mut entries = tokio::fs::read_dir(devices_root)
        .await
        .map_err(|e| SensorError::Io(format!("{}: {e}", devices_root.display())))?;

    let mut candidates = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SensorError::Io(format!("{}: {e}", devices_root.display())))?
    {
        candidates.push(entry.path());
    }
    // Deterministic pick when several devices match.
    candidates.sort();

    for dir in candidates {
        if let Ok(found) = tokio::fs::read_to_string(dir.join("name")).await {
            if found.trim() == name {
                return Ok(dir);
            }
        }
    }

    Err(SensorError::NotFound(format!(
        "no IIO device named '{name}' under {}",
        devices_root.display()
    )))
}
